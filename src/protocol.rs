//! Protocol shapes shared by every backend
//!
//! Backends translate their own wire objects into these types so the
//! bridge never sees transport specifics.

use std::os::fd::OwnedFd;

/// Keymap format announced alongside a keymap blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeymapFormat {
    /// XKB text format v1 (`XKB_KEYMAP_FORMAT_TEXT_V1`)
    XkbV1,
    /// Anything else the remote side may send
    Unknown(u32),
}

impl KeymapFormat {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => KeymapFormat::XkbV1,
            other => KeymapFormat::Unknown(other),
        }
    }
}

/// Keymap shared by the remote device through a memory-mappable fd
#[derive(Debug)]
pub struct KeymapBlob {
    pub fd: OwnedFd,
    pub size: usize,
    pub format: KeymapFormat,
}

/// Opaque seat identifier assigned by the injection channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeatId(pub u64);

/// Events produced by the session transport
#[derive(Debug)]
pub enum SessionEvent {
    /// The bound capability handed over the fd of the injection channel
    InjectionChannelOffered(OwnedFd),
}

/// Events drained from the injection channel
#[derive(Debug)]
pub enum InjectionEvent {
    SeatAdded(SeatId),
    DeviceAdded {
        keymap: Option<KeymapBlob>,
    },
    KeyboardModifiers {
        depressed: u32,
        latched: u32,
        locked: u32,
        group: u32,
    },
    KeyboardKey {
        /// Wire (evdev) key code, without the XKB offset
        key: u32,
        pressed: bool,
    },
    /// Anything the bridge has no use for
    Other,
}

/// Requests issued on the bound capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerRequest {
    AddKeyGrab {
        mods: u32,
        virtual_mods: Vec<u32>,
        key: u32,
    },
    RemoveKeyGrab {
        mods: u32,
        virtual_mods: Vec<u32>,
        key: u32,
    },
    GrabKeyboard,
    UngrabKeyboard,
}
