//! libei receiver channel
//!
//! Wraps the socket offered by the compositor in a reis context, performs
//! the receiver handshake and translates the incoming stream into
//! `InjectionEvent`s. Only keyboard capabilities are bound.

use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;

use log::{debug, info, trace, warn};
use reis::{ei, handshake::ei_handshake_blocking, PendingRequestResult};

use super::InjectionChannel;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{InjectionEvent, KeymapBlob, KeymapFormat, SeatId};

const KEYBOARD_INTERFACE: &str = "ei_keyboard";

/// Receiver context on the offered libei socket
pub struct EiChannel {
    context: ei::Context,
    /// Same socket, kept for readiness watching
    watch: UnixStream,
    #[allow(dead_code)]
    connection: ei::Connection,
    /// Capability masks announced per seat, until the seat is done
    capabilities: HashMap<ei::Seat, HashMap<String, u64>>,
    /// Seats announced to the bridge
    seats: HashMap<SeatId, (ei::Seat, u64)>,
    next_seat: u64,
    /// Keymap of the device currently being described
    pending_keymap: Option<KeymapBlob>,
    events: VecDeque<InjectionEvent>,
}

impl EiChannel {
    /// Handshake as a receiver on `fd`
    pub fn connect(fd: OwnedFd, client_name: &str) -> BridgeResult<Self> {
        let stream = UnixStream::from(fd);
        let watch = stream.try_clone()?;
        let context = ei::Context::new(stream)?;

        let response =
            ei_handshake_blocking(&context, client_name, ei::handshake::ContextType::Receiver)
                .map_err(|e| BridgeError::Protocol(format!("EI handshake failed: {:?}", e)))?;
        // Reads after the handshake must never block the loop
        watch.set_nonblocking(true)?;
        info!("EI handshake completed as {}", client_name);

        Ok(Self {
            context,
            watch,
            connection: response.connection,
            capabilities: HashMap::new(),
            seats: HashMap::new(),
            next_seat: 0,
            pending_keymap: None,
            events: VecDeque::new(),
        })
    }

    fn flush(&self) -> BridgeResult<()> {
        self.context
            .flush()
            .map_err(|e| BridgeError::Protocol(e.to_string()))
    }

    fn handle_event(&mut self, event: ei::Event) -> BridgeResult<()> {
        match event {
            ei::Event::Connection(_, event) => match event {
                ei::connection::Event::Seat { seat } => {
                    debug!("EI seat announced");
                    self.capabilities.insert(seat, HashMap::new());
                }
                ei::connection::Event::Ping { ping } => {
                    ping.done(0);
                    self.flush()?;
                }
                ei::connection::Event::Disconnected { .. } => {
                    warn!("EI connection disconnected by compositor");
                }
                _ => self.events.push_back(InjectionEvent::Other),
            },
            ei::Event::Pingpong(pingpong, _) => {
                pingpong.done(0);
                self.flush()?;
            }
            ei::Event::Seat(seat, event) => match event {
                ei::seat::Event::Capability { mask, interface } => {
                    trace!("Seat capability {} (mask=0x{:x})", interface, mask);
                    self.capabilities
                        .entry(seat)
                        .or_default()
                        .insert(interface, mask);
                }
                ei::seat::Event::Done => {
                    let caps = self.capabilities.remove(&seat).unwrap_or_default();
                    let mask = caps.get(KEYBOARD_INTERFACE).copied().unwrap_or(0);
                    let id = SeatId(self.next_seat);
                    self.next_seat += 1;
                    self.seats.insert(id, (seat, mask));
                    self.events.push_back(InjectionEvent::SeatAdded(id));
                }
                _ => self.events.push_back(InjectionEvent::Other),
            },
            ei::Event::Device(_, ei::device::Event::Done) => {
                self.events.push_back(InjectionEvent::DeviceAdded {
                    keymap: self.pending_keymap.take(),
                });
            }
            ei::Event::Keyboard(_, event) => match event {
                ei::keyboard::Event::Keymap {
                    keymap_type,
                    size,
                    keymap,
                } => {
                    #[allow(unreachable_patterns)]
                    let format = match keymap_type {
                        ei::keyboard::KeymapType::Xkb => KeymapFormat::XkbV1,
                        _ => KeymapFormat::Unknown(0),
                    };
                    self.pending_keymap = Some(KeymapBlob {
                        fd: keymap,
                        size: size as usize,
                        format,
                    });
                }
                ei::keyboard::Event::Modifiers {
                    depressed,
                    locked,
                    latched,
                    group,
                    ..
                } => self.events.push_back(InjectionEvent::KeyboardModifiers {
                    depressed,
                    latched,
                    locked,
                    group,
                }),
                ei::keyboard::Event::Key { key, state } => {
                    self.events.push_back(InjectionEvent::KeyboardKey {
                        key,
                        pressed: matches!(state, ei::keyboard::KeyState::Press),
                    })
                }
                _ => self.events.push_back(InjectionEvent::Other),
            },
            _ => self.events.push_back(InjectionEvent::Other),
        }
        Ok(())
    }
}

/// Map the outcome of one socket read
fn read_result(result: std::io::Result<usize>) -> BridgeResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(BridgeError::Protocol(
            "compositor closed the EI socket".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

impl InjectionChannel for EiChannel {
    fn watch_fd(&self) -> BridgeResult<OwnedFd> {
        Ok(OwnedFd::from(self.watch.try_clone()?))
    }

    fn dispatch(&mut self) -> BridgeResult<()> {
        read_result(self.context.read())?;

        while let Some(pending) = self.context.pending_event() {
            match pending {
                PendingRequestResult::Request(event) => self.handle_event(event)?,
                PendingRequestResult::ParseError(e) => {
                    return Err(BridgeError::Protocol(format!(
                        "Failed to parse EI event: {:?}",
                        e
                    )));
                }
                PendingRequestResult::InvalidObject(id) => {
                    debug!("EI event for unknown object {}", id);
                }
            }
        }
        Ok(())
    }

    fn next_event(&mut self) -> Option<InjectionEvent> {
        self.events.pop_front()
    }

    fn bind_keyboard(&mut self, id: SeatId) -> BridgeResult<()> {
        let Some((seat, mask)) = self.seats.get(&id) else {
            return Err(BridgeError::Protocol(format!("unknown seat {:?}", id)));
        };
        if *mask == 0 {
            warn!("Seat offers no keyboard capability");
            return Ok(());
        }
        debug!("Binding keyboard capability (mask=0x{:x})", mask);
        seat.bind(*mask);
        self.flush()
    }
}
