//! Input bridge
//!
//! Couples a negotiated session with the keymap state and the virtual
//! modifier table. Injection events drained from the channel update the
//! keymap and turn key transitions into `KeyNotification`s; grab
//! requests from the accessibility side flow the other way (see `grab`).

mod grab;
mod mouse;

pub use grab::{GrabRegistry, KeyDefinition, KeyGrab, KeyGrabs};
pub use mouse::{generate_mouse_event, resolve_screen_position};

use log::{debug, trace, warn};

use crate::a11y::{KeyNotification, KeyNotifier};
use crate::constants::XKB_KEYCODE_OFFSET;
use crate::error::BridgeResult;
use crate::input::{KeymapState, KeymapUpdate, VirtualModifierTable};
use crate::protocol::{InjectionEvent, KeymapBlob, SeatId};
use crate::transport::{InjectionChannel, Session, SessionTransport};

/// Bridge between one session transport and the accessibility service
pub struct InputBridge<T: SessionTransport> {
    session: Session<T>,
    keymap: KeymapState,
    modifiers: VirtualModifierTable,
    notifier: Box<dyn KeyNotifier>,
    /// Why the last keymap could not be installed
    keymap_error: Option<String>,
}

impl<T: SessionTransport> InputBridge<T> {
    /// Negotiate the session on `transport`
    pub fn new(transport: T, notifier: Box<dyn KeyNotifier>) -> Self {
        Self {
            session: Session::open(transport),
            keymap: KeymapState::new(),
            modifiers: VirtualModifierTable::new(),
            notifier,
            keymap_error: None,
        }
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn keymap(&self) -> &KeymapState {
        &self.keymap
    }

    pub fn modifiers(&self) -> &VirtualModifierTable {
        &self.modifiers
    }

    /// Last keymap compile failure, cleared once a keymap installs
    pub fn keymap_error(&self) -> Option<&str> {
        self.keymap_error.as_deref()
    }

    pub fn is_functional(&self) -> bool {
        self.session.is_functional()
    }

    /// Drain the session transport
    ///
    /// Returns true when a new injection channel was established.
    pub fn dispatch_session(&mut self) -> BridgeResult<bool> {
        self.session.dispatch()
    }

    /// Dispatch the injection channel and handle every queued event
    ///
    /// Returns the number of events handled.
    pub fn dispatch_injection(&mut self) -> BridgeResult<usize> {
        let Some(channel) = self.session.channel_mut() else {
            return Ok(0);
        };
        channel.dispatch()?;

        let mut handled = 0;
        while let Some(event) = self.session.channel_mut().and_then(|c| c.next_event()) {
            self.handle_event(event);
            handled += 1;
        }
        Ok(handled)
    }

    fn handle_event(&mut self, event: InjectionEvent) {
        match event {
            InjectionEvent::SeatAdded(seat) => self.on_seat_added(seat),
            InjectionEvent::DeviceAdded { keymap } => self.on_device_added(keymap),
            InjectionEvent::KeyboardModifiers {
                depressed,
                latched,
                locked,
                group,
            } => {
                if !self.keymap.update_modifiers(depressed, latched, locked, group) {
                    trace!("Modifiers before keymap, ignored");
                }
            }
            InjectionEvent::KeyboardKey { key, pressed } => self.on_key(key, pressed),
            InjectionEvent::Other => {}
        }
    }

    fn on_seat_added(&mut self, seat: SeatId) {
        let Some(channel) = self.session.channel_mut() else {
            return;
        };
        if let Err(e) = channel.bind_keyboard(seat) {
            warn!("Failed to bind keyboard on {:?}: {}", seat, e);
        }
    }

    fn on_device_added(&mut self, keymap: Option<KeymapBlob>) {
        let Some(blob) = keymap else {
            debug!("Device without keymap");
            return;
        };
        match self.keymap.load_blob(blob) {
            Ok(KeymapUpdate::Installed) => self.keymap_error = None,
            Ok(KeymapUpdate::Skipped) => {}
            Err(e) => {
                warn!("No usable keymap: {}", e);
                self.keymap_error = Some(e.to_string());
            }
        }
    }

    fn on_key(&mut self, key: u32, pressed: bool) {
        let key_code = key.saturating_add(XKB_KEYCODE_OFFSET);
        let Some(decoded) = self.keymap.decode_key(key_code) else {
            trace!("Key {} before keymap, ignored", key);
            return;
        };
        let notification = KeyNotification {
            pressed,
            key_code,
            keysym: decoded.keysym,
            modifiers: decoded.modifiers,
            text: decoded.text,
        };
        trace!("Key notification: {:?}", notification);
        self.notifier.notify_key(&notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{MODIFIER_SHIFT, MODIFIER_SHIFTLOCK};
    use crate::input::keymap::tests::{keymap_blob, ONE_KEY_KEYMAP, SHIFT_KEYMAP};
    use crate::transport::{MemoryHandle, MemoryTransport};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn bridge() -> (
        InputBridge<MemoryTransport>,
        MemoryHandle,
        Rc<RefCell<Vec<KeyNotification>>>,
    ) {
        let (transport, handle) = MemoryTransport::new().unwrap();
        handle.offer_channel().unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let bridge = InputBridge::new(
            transport,
            Box::new(move |event: &KeyNotification| sink.borrow_mut().push(event.clone())),
        );
        (bridge, handle, seen)
    }

    #[test]
    fn test_key_before_device_is_dropped() {
        let (mut bridge, handle, seen) = bridge();
        handle.push_injection(InjectionEvent::KeyboardKey {
            key: 30,
            pressed: true,
        });
        assert_eq!(bridge.dispatch_injection().unwrap(), 1);
        assert!(seen.borrow().is_empty());
        assert_eq!(handle.pending_injection(), 0);
    }

    #[test]
    fn test_seat_binds_keyboard() {
        let (mut bridge, handle, _) = bridge();
        handle.push_injection(InjectionEvent::SeatAdded(SeatId(3)));
        bridge.dispatch_injection().unwrap();
        assert_eq!(handle.bound_seats(), vec![SeatId(3)]);
    }

    #[test]
    fn test_zero_size_keymap_keeps_layout_absent() {
        let (mut bridge, handle, _) = bridge();
        let mut blob = keymap_blob(ONE_KEY_KEYMAP, "bridge-zero");
        blob.size = 0;
        handle.push_injection(InjectionEvent::DeviceAdded { keymap: Some(blob) });
        handle.push_injection(InjectionEvent::DeviceAdded { keymap: None });
        bridge.dispatch_injection().unwrap();
        assert!(!bridge.keymap().is_live());
        assert_eq!(bridge.keymap_error(), None);
    }

    #[test]
    fn test_compile_failure_is_observable() {
        let (mut bridge, handle, seen) = bridge();
        let blob = keymap_blob("not a keymap", "bridge-broken");
        handle.push_injection(InjectionEvent::DeviceAdded { keymap: Some(blob) });
        handle.push_injection(InjectionEvent::KeyboardKey {
            key: 30,
            pressed: true,
        });
        bridge.dispatch_injection().unwrap();
        assert!(bridge.keymap_error().is_some());
        assert!(seen.borrow().is_empty());

        let blob = keymap_blob(ONE_KEY_KEYMAP, "bridge-recover");
        handle.push_injection(InjectionEvent::DeviceAdded { keymap: Some(blob) });
        bridge.dispatch_injection().unwrap();
        assert_eq!(bridge.keymap_error(), None);
    }

    #[test]
    fn test_key_release_notification() {
        let (mut bridge, handle, seen) = bridge();
        let blob = keymap_blob(ONE_KEY_KEYMAP, "bridge-release");
        handle.push_injection(InjectionEvent::DeviceAdded { keymap: Some(blob) });
        handle.push_injection(InjectionEvent::KeyboardModifiers {
            depressed: 0,
            latched: 0,
            locked: 0,
            group: 0,
        });
        handle.push_injection(InjectionEvent::KeyboardKey {
            key: 30,
            pressed: false,
        });
        assert_eq!(bridge.dispatch_injection().unwrap(), 3);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].pressed);
        assert_eq!(seen[0].key_code, 38);
    }

    #[test]
    fn test_modifiers_apply_to_later_keys() {
        let (mut bridge, handle, seen) = bridge();
        let blob = keymap_blob(SHIFT_KEYMAP, "bridge-shift");
        handle.push_injection(InjectionEvent::DeviceAdded { keymap: Some(blob) });
        handle.push_injection(InjectionEvent::KeyboardModifiers {
            depressed: MODIFIER_SHIFT,
            latched: 0,
            locked: MODIFIER_SHIFTLOCK,
            group: 0,
        });
        handle.push_injection(InjectionEvent::KeyboardKey {
            key: 30,
            pressed: true,
        });
        assert_eq!(bridge.dispatch_injection().unwrap(), 3);

        assert_eq!(
            *seen.borrow(),
            vec![KeyNotification {
                pressed: true,
                key_code: 38,
                keysym: xkbcommon::xkb::keysyms::KEY_A,
                modifiers: MODIFIER_SHIFT | MODIFIER_SHIFTLOCK,
                text: "A".to_string(),
            }]
        );
        assert_eq!(bridge.get_locked_modifiers(), MODIFIER_SHIFTLOCK);
    }

    #[test]
    fn test_no_channel_dispatch_is_noop() {
        let (transport, _handle) = MemoryTransport::new().unwrap();
        let mut bridge = InputBridge::new(transport, Box::new(|_: &KeyNotification| {}));
        assert_eq!(bridge.dispatch_injection().unwrap(), 0);
    }
}
