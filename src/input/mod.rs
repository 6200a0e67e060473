//! Keyboard state
//!
//! - Keymap compiled from the remote device's shared keymap (xkbcommon)
//! - Virtual modifier bits handed out to keys used as modifiers

pub mod keymap;
pub mod modifiers;

pub use keymap::{DecodedKey, KeymapState, KeymapUpdate};
pub use modifiers::{SplitModifiers, VirtualModifierEntry, VirtualModifierTable};
