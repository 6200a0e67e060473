//! Key grabs and modifier façade
//!
//! A grab names an XKB key code and an AT-SPI modifier mask that may
//! carry virtual bits. Requests on the wire use wire key codes, the
//! hardware part of the mask and the list of keys standing in for the
//! virtual bits.

use log::debug;

use super::InputBridge;
use crate::constants::XKB_KEYCODE_OFFSET;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::ManagerRequest;
use crate::transport::SessionTransport;

/// Key code plus AT-SPI modifier mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDefinition {
    /// XKB key code
    pub key_code: u32,
    pub modifier_mask: u32,
}

impl KeyDefinition {
    pub fn new(key_code: u32, modifier_mask: u32) -> Self {
        Self {
            key_code,
            modifier_mask,
        }
    }
}

/// Registered grab
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyGrab {
    pub grab_id: u32,
    pub key: KeyDefinition,
}

/// Lookup of registered grabs by id, owned by the caller
pub trait GrabRegistry {
    fn lookup_grab(&self, grab_id: u32) -> Option<KeyDefinition>;
}

/// Simple grab registry handing out increasing ids
#[derive(Debug, Clone, Default)]
pub struct KeyGrabs {
    grabs: Vec<KeyGrab>,
    next_id: u32,
}

impl KeyGrabs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a grab and return its id (ids start at 1)
    pub fn insert(&mut self, key: KeyDefinition) -> u32 {
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let grab_id = self.next_id;
        self.grabs.push(KeyGrab { grab_id, key });
        grab_id
    }

    pub fn remove(&mut self, grab_id: u32) -> Option<KeyGrab> {
        let pos = self.grabs.iter().position(|g| g.grab_id == grab_id)?;
        Some(self.grabs.remove(pos))
    }

    pub fn get(&self, grab_id: u32) -> Option<&KeyGrab> {
        self.grabs.iter().find(|g| g.grab_id == grab_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyGrab> {
        self.grabs.iter()
    }

    pub fn len(&self) -> usize {
        self.grabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grabs.is_empty()
    }
}

impl GrabRegistry for KeyGrabs {
    fn lookup_grab(&self, grab_id: u32) -> Option<KeyDefinition> {
        self.get(grab_id).map(|g| g.key)
    }
}

impl<T: SessionTransport> InputBridge<T> {
    /// Grab a key combination
    pub fn add_key_grab(&mut self, key: &KeyDefinition) -> BridgeResult<()> {
        let split = self.modifiers.split_mask(key.modifier_mask);
        self.session.request(ManagerRequest::AddKeyGrab {
            mods: split.real_mods,
            virtual_mods: split.virtual_keys,
            key: key.key_code.saturating_sub(XKB_KEYCODE_OFFSET),
        })
    }

    /// Release the grab registered under `grab_id`
    pub fn remove_key_grab(&mut self, grab_id: u32, registry: &dyn GrabRegistry) -> BridgeResult<()> {
        let key = registry
            .lookup_grab(grab_id)
            .ok_or(BridgeError::UnknownGrab(grab_id))?;
        let split = self.modifiers.split_mask(key.modifier_mask);
        self.session.request(ManagerRequest::RemoveKeyGrab {
            mods: split.real_mods,
            virtual_mods: split.virtual_keys,
            key: key.key_code.saturating_sub(XKB_KEYCODE_OFFSET),
        })
    }

    pub fn grab_keyboard(&mut self) -> BridgeResult<()> {
        self.session.request(ManagerRequest::GrabKeyboard)
    }

    pub fn ungrab_keyboard(&mut self) -> BridgeResult<()> {
        self.session.request(ManagerRequest::UngrabKeyboard)
    }

    /// Virtual modifier bit for `key_code`, allocating one if needed
    ///
    /// Returns 0 when the virtual range is exhausted.
    pub fn map_modifier(&mut self, key_code: u32) -> u32 {
        self.modifiers.map(key_code)
    }

    /// Like `map_modifier`, but exhaustion is an error
    pub fn try_map_modifier(&mut self, key_code: u32) -> BridgeResult<u32> {
        match self.modifiers.map(key_code) {
            0 => Err(BridgeError::NoVirtualBitsAvailable),
            bit => Ok(bit),
        }
    }

    pub fn unmap_modifier(&mut self, key_code: u32) {
        self.modifiers.unmap(key_code);
    }

    /// Bit assigned to `key_code`, 0 when unmapped
    pub fn get_modifier(&self, key_code: u32) -> u32 {
        self.modifiers.lookup(key_code).unwrap_or(0)
    }

    pub fn get_locked_modifiers(&self) -> u32 {
        let locked = self.keymap.locked_modifiers();
        debug!("Locked modifiers: 0x{:x}", locked);
        locked
    }
}
