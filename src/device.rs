//! Backend-independent device interface
//!
//! The daemon and the event loop talk to whichever backend was selected
//! through `Box<dyn Device>`.

use std::os::fd::OwnedFd;

use serde::{Deserialize, Serialize};

use crate::a11y::{AccessibleQuery, AccessibleRef, KeyNotifier, MouseSynthesizer};
use crate::bridge::{self, GrabRegistry, InputBridge, KeyDefinition};
use crate::config::Config;
use crate::error::BridgeResult;
use crate::transport::{InjectionChannel, SessionTransport};

/// Per-backend device capability surface
pub trait Device {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Whether the remote-input capability was bound
    fn is_functional(&self) -> bool;

    /// Fd to watch for transport events
    fn session_fd(&self) -> BridgeResult<OwnedFd>;

    /// Fd to watch for injection events, once a channel exists
    fn injection_fd(&self) -> BridgeResult<Option<OwnedFd>>;

    /// Returns true when a new injection channel was established
    fn dispatch_session(&mut self) -> BridgeResult<bool>;

    fn dispatch_injection(&mut self) -> BridgeResult<usize>;

    fn keymap_error(&self) -> Option<&str>;

    fn add_key_grab(&mut self, key: &KeyDefinition) -> BridgeResult<()>;
    fn remove_key_grab(&mut self, grab_id: u32, registry: &dyn GrabRegistry) -> BridgeResult<()>;
    fn grab_keyboard(&mut self) -> BridgeResult<()>;
    fn ungrab_keyboard(&mut self) -> BridgeResult<()>;

    fn map_modifier(&mut self, key_code: u32) -> u32;
    fn unmap_modifier(&mut self, key_code: u32);
    fn get_modifier(&self, key_code: u32) -> u32;
    fn get_locked_modifiers(&self) -> u32;

    fn generate_mouse_event(
        &self,
        query: &dyn AccessibleQuery,
        synth: &dyn MouseSynthesizer,
        target: &AccessibleRef,
        x: i32,
        y: i32,
        event_name: &str,
    ) -> BridgeResult<()> {
        bridge::generate_mouse_event(query, synth, target, x, y, event_name)
    }
}

impl<T: SessionTransport> Device for InputBridge<T> {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn is_functional(&self) -> bool {
        InputBridge::is_functional(self)
    }

    fn session_fd(&self) -> BridgeResult<OwnedFd> {
        self.session().transport().watch_fd()
    }

    fn injection_fd(&self) -> BridgeResult<Option<OwnedFd>> {
        self.session()
            .channel()
            .map(|channel| channel.watch_fd())
            .transpose()
    }

    fn dispatch_session(&mut self) -> BridgeResult<bool> {
        InputBridge::dispatch_session(self)
    }

    fn dispatch_injection(&mut self) -> BridgeResult<usize> {
        InputBridge::dispatch_injection(self)
    }

    fn keymap_error(&self) -> Option<&str> {
        InputBridge::keymap_error(self)
    }

    fn add_key_grab(&mut self, key: &KeyDefinition) -> BridgeResult<()> {
        InputBridge::add_key_grab(self, key)
    }

    fn remove_key_grab(&mut self, grab_id: u32, registry: &dyn GrabRegistry) -> BridgeResult<()> {
        InputBridge::remove_key_grab(self, grab_id, registry)
    }

    fn grab_keyboard(&mut self) -> BridgeResult<()> {
        InputBridge::grab_keyboard(self)
    }

    fn ungrab_keyboard(&mut self) -> BridgeResult<()> {
        InputBridge::ungrab_keyboard(self)
    }

    fn map_modifier(&mut self, key_code: u32) -> u32 {
        InputBridge::map_modifier(self, key_code)
    }

    fn unmap_modifier(&mut self, key_code: u32) {
        InputBridge::unmap_modifier(self, key_code)
    }

    fn get_modifier(&self, key_code: u32) -> u32 {
        InputBridge::get_modifier(self, key_code)
    }

    fn get_locked_modifiers(&self) -> u32 {
        InputBridge::get_locked_modifiers(self)
    }
}

/// Backend variant selected at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// COSMIC compositor (`cosmic_atspi_manager_v1` + libei)
    #[default]
    Cosmic,
}

impl Backend {
    /// Connect the backend and negotiate its session
    pub fn open(self, config: &Config, notifier: Box<dyn KeyNotifier>) -> BridgeResult<Box<dyn Device>> {
        match self {
            #[cfg(feature = "cosmic")]
            Backend::Cosmic => {
                let transport = crate::transport::CosmicTransport::connect(
                    config.session.version,
                    &config.injection.client_name,
                )?;
                Ok(Box::new(InputBridge::new(transport, notifier)))
            }
            #[cfg(not(feature = "cosmic"))]
            Backend::Cosmic => {
                let _ = (config, notifier);
                Err(crate::error::BridgeError::TransportUnavailable(
                    "built without the cosmic feature".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a11y::KeyNotification;
    use crate::transport::MemoryTransport;

    #[test]
    fn test_bridge_as_device() {
        let (transport, handle) = MemoryTransport::new().unwrap();
        let mut device: Box<dyn Device> =
            Box::new(InputBridge::new(transport, Box::new(|_: &KeyNotification| {})));

        assert_eq!(device.name(), "memory");
        assert!(device.is_functional());
        assert!(device.injection_fd().unwrap().is_none());

        handle.offer_channel().unwrap();
        assert!(device.dispatch_session().unwrap());
        assert!(device.injection_fd().unwrap().is_some());

        device.grab_keyboard().unwrap();
        assert_eq!(handle.requests().len(), 1);
    }

    #[test]
    fn test_backend_names() {
        #[derive(Deserialize)]
        struct Section {
            backend: Backend,
        }
        let section: Section = toml::from_str("backend = \"cosmic\"").unwrap();
        assert_eq!(section.backend, Backend::Cosmic);
        assert!(toml::from_str::<Section>("backend = \"x11\"").is_err());
    }
}
