//! Keymap state
//!
//! Owns the XKB keymap announced by the remote keyboard device and the
//! live modifier state tracked against it. Only one keyboard is tracked;
//! a new device replaces the previous keymap wholesale.

use log::{debug, info, warn};
use memmap2::MmapOptions;
use xkbcommon::xkb;

use crate::constants::KEY_TEXT_BUFFER_LEN;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{KeymapBlob, KeymapFormat};

/// Key resolved against the live state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedKey {
    pub keysym: u32,
    /// Effective modifiers (`XKB_STATE_MODS_EFFECTIVE`)
    pub modifiers: u32,
    /// UTF-8 text, bounded by the 16-byte key text buffer
    pub text: String,
}

/// Outcome of offering a keymap blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeymapUpdate {
    /// A new keymap and state are live
    Installed,
    /// The blob was empty; nothing changed
    Skipped,
}

/// XKB context, keymap and live modifier state
pub struct KeymapState {
    context: xkb::Context,
    keymap: Option<xkb::Keymap>,
    state: Option<xkb::State>,
}

impl Default for KeymapState {
    fn default() -> Self {
        Self::new()
    }
}

impl KeymapState {
    pub fn new() -> Self {
        Self {
            context: xkb::Context::new(xkb::CONTEXT_NO_FLAGS),
            keymap: None,
            state: None,
        }
    }

    /// Whether a keymap and live state are installed
    pub fn is_live(&self) -> bool {
        self.state.is_some()
    }

    /// Install the keymap shared by a newly added device
    ///
    /// Empty blobs are skipped. An unsupported format or a compile
    /// failure leaves no keymap installed and is returned as an error.
    pub fn load_blob(&mut self, blob: KeymapBlob) -> BridgeResult<KeymapUpdate> {
        if blob.size == 0 {
            debug!("Ignoring empty keymap");
            return Ok(KeymapUpdate::Skipped);
        }

        // Old keymap is released before the new one is compiled
        self.state = None;
        self.keymap = None;

        if let KeymapFormat::Unknown(raw) = blob.format {
            return Err(BridgeError::UnsupportedKeymapFormat(raw));
        }

        let map = unsafe {
            MmapOptions::new()
                .len(blob.size)
                .map_copy_read_only(&blob.fd)?
        };
        let keymap = Self::compile(&self.context, &map);
        drop(map);

        let keymap = keymap.ok_or(BridgeError::KeymapCompile { size: blob.size })?;
        self.state = Some(xkb::State::new(&keymap));
        self.keymap = Some(keymap);
        info!("Keymap installed ({} bytes)", blob.size);
        Ok(KeymapUpdate::Installed)
    }

    /// Install a keymap from XKB text directly
    pub fn load_string(&mut self, text: &str) -> BridgeResult<()> {
        self.state = None;
        self.keymap = None;
        let keymap = Self::compile(&self.context, text.as_bytes())
            .ok_or(BridgeError::KeymapCompile { size: text.len() })?;
        self.state = Some(xkb::State::new(&keymap));
        self.keymap = Some(keymap);
        Ok(())
    }

    fn compile(context: &xkb::Context, buffer: &[u8]) -> Option<xkb::Keymap> {
        // Shared keymaps are usually NUL terminated
        let end = buffer
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(buffer.len());
        let text = match std::str::from_utf8(&buffer[..end]) {
            Ok(text) => text,
            Err(e) => {
                warn!("Keymap is not valid UTF-8: {}", e);
                return None;
            }
        };
        xkb::Keymap::new_from_string(
            context,
            text.to_owned(),
            xkb::KEYMAP_FORMAT_TEXT_V1,
            xkb::COMPILE_NO_FLAGS,
        )
    }

    /// Apply a modifier update from the remote device
    ///
    /// `group` drives the depressed, latched and locked layout alike.
    /// Returns false when no keymap is live yet.
    pub fn update_modifiers(&mut self, depressed: u32, latched: u32, locked: u32, group: u32) -> bool {
        match self.state.as_mut() {
            Some(state) => {
                state.update_mask(depressed, latched, locked, group, group, group);
                true
            }
            None => false,
        }
    }

    /// Resolve an XKB key code against the live state
    pub fn decode_key(&self, key_code: u32) -> Option<DecodedKey> {
        let state = self.state.as_ref()?;
        let keycode = xkb::Keycode::new(key_code);
        let keysym = state.key_get_one_sym(keycode).raw();
        let modifiers = state.serialize_mods(xkb::STATE_MODS_EFFECTIVE);
        let text = bounded_key_text(state.key_get_utf8(keycode));
        Some(DecodedKey {
            keysym,
            modifiers,
            text,
        })
    }

    /// Level 0 symbol of the first layout, ignoring modifier state
    pub fn keycode_to_keysym(&self, key_code: u32) -> u32 {
        self.keymap
            .as_ref()
            .and_then(|keymap| {
                keymap
                    .key_get_syms_by_level(xkb::Keycode::new(key_code), 0, 0)
                    .first()
                    .map(|sym| sym.raw())
            })
            .unwrap_or(xkb::keysyms::KEY_NoSymbol)
    }

    /// Locked modifiers of the live state (0 without one)
    pub fn locked_modifiers(&self) -> u32 {
        self.state
            .as_ref()
            .map(|state| state.serialize_mods(xkb::STATE_MODS_LOCKED))
            .unwrap_or(0)
    }
}

/// Cut key text so it fits the key text buffer with its terminator
fn bounded_key_text(mut text: String) -> String {
    let max = KEY_TEXT_BUFFER_LEN - 1;
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::constants::{MODIFIER_SHIFT, MODIFIER_SHIFTLOCK};
    use std::io::Write;
    use std::os::fd::OwnedFd;

    /// Single-key layout: evdev key 30 (XKB 38) produces "a"
    pub(crate) const ONE_KEY_KEYMAP: &str = r#"xkb_keymap {
    xkb_keycodes "test" {
        minimum = 8;
        maximum = 255;
        <AC01> = 38;
    };
    xkb_types "test" {
        type "ONE_LEVEL" {
            modifiers = none;
            level_name[Level1] = "Any";
        };
    };
    xkb_compatibility "test" {
    };
    xkb_symbols "test" {
        key <AC01> { type = "ONE_LEVEL", symbols[Group1] = [ a ] };
    };
};
"#;

    /// Same key with a Shift level: "a" / "A"
    pub(crate) const SHIFT_KEYMAP: &str = r#"xkb_keymap {
    xkb_keycodes "test" {
        minimum = 8;
        maximum = 255;
        <AC01> = 38;
    };
    xkb_types "test" {
        type "ONE_LEVEL" {
            modifiers = none;
            level_name[Level1] = "Any";
        };
        type "TWO_LEVEL" {
            modifiers = Shift;
            map[Shift] = Level2;
            level_name[Level1] = "Base";
            level_name[Level2] = "Shift";
        };
    };
    xkb_compatibility "test" {
    };
    xkb_symbols "test" {
        key <AC01> { type = "TWO_LEVEL", symbols[Group1] = [ a, A ] };
    };
};
"#;

    /// Write `text` to a temp file and hand it over like a remote keymap
    pub(crate) fn keymap_blob(text: &str, tag: &str) -> KeymapBlob {
        let path = std::env::temp_dir().join(format!(
            "a11y-input-bridge-{}-{}.xkb",
            tag,
            std::process::id()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        drop(file);
        let file = std::fs::File::open(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        KeymapBlob {
            fd: OwnedFd::from(file),
            size: text.len(),
            format: KeymapFormat::XkbV1,
        }
    }

    #[test]
    fn test_no_keymap_until_device() {
        let state = KeymapState::new();
        assert!(!state.is_live());
        assert_eq!(state.decode_key(38), None);
        assert_eq!(state.locked_modifiers(), 0);
        assert_eq!(state.keycode_to_keysym(38), xkb::keysyms::KEY_NoSymbol);
    }

    #[test]
    fn test_empty_blob_is_skipped() {
        let mut state = KeymapState::new();
        let mut blob = keymap_blob("", "empty");
        blob.size = 0;
        assert_eq!(state.load_blob(blob).unwrap(), KeymapUpdate::Skipped);
        assert!(!state.is_live());
    }

    #[test]
    fn test_load_blob_and_decode() {
        let mut state = KeymapState::new();
        let blob = keymap_blob(ONE_KEY_KEYMAP, "decode");
        assert_eq!(state.load_blob(blob).unwrap(), KeymapUpdate::Installed);

        let key = state.decode_key(38).unwrap();
        assert_eq!(key.keysym, xkb::keysyms::KEY_a);
        assert_eq!(key.modifiers, 0);
        assert_eq!(key.text, "a");
        assert_eq!(state.keycode_to_keysym(38), xkb::keysyms::KEY_a);
    }

    #[test]
    fn test_compile_failure_drops_previous_keymap() {
        let mut state = KeymapState::new();
        state.load_string(ONE_KEY_KEYMAP).unwrap();
        assert!(state.is_live());

        let blob = keymap_blob("xkb_keymap { this is not a keymap", "broken");
        let err = state.load_blob(blob).unwrap_err();
        assert!(matches!(err, BridgeError::KeymapCompile { .. }));
        assert!(!state.is_live());
    }

    #[test]
    fn test_unknown_format_rejected() {
        let mut state = KeymapState::new();
        let mut blob = keymap_blob(ONE_KEY_KEYMAP, "format");
        blob.format = KeymapFormat::Unknown(7);
        assert!(matches!(
            state.load_blob(blob),
            Err(BridgeError::UnsupportedKeymapFormat(7))
        ));
    }

    #[test]
    fn test_update_modifiers_requires_keymap() {
        let mut state = KeymapState::new();
        assert!(!state.update_modifiers(1, 0, 0, 0));
        state.load_string(ONE_KEY_KEYMAP).unwrap();
        assert!(state.update_modifiers(0, 0, 0, 0));
    }

    #[test]
    fn test_modifier_update_reaches_decode() {
        let mut state = KeymapState::new();
        state.load_string(SHIFT_KEYMAP).unwrap();
        assert_eq!(state.decode_key(38).unwrap().text, "a");

        assert!(state.update_modifiers(MODIFIER_SHIFT, 0, MODIFIER_SHIFTLOCK, 0));
        let key = state.decode_key(38).unwrap();
        assert_eq!(key.keysym, xkb::keysyms::KEY_A);
        assert_eq!(key.text, "A");
        assert_eq!(key.modifiers, MODIFIER_SHIFT | MODIFIER_SHIFTLOCK);
        assert_eq!(state.locked_modifiers(), MODIFIER_SHIFTLOCK);
        // Level 0 lookup ignores the live modifiers
        assert_eq!(state.keycode_to_keysym(38), xkb::keysyms::KEY_a);
    }

    #[test]
    fn test_bounded_key_text() {
        assert_eq!(bounded_key_text("abc".to_string()), "abc");
        let long = "x".repeat(20);
        assert_eq!(bounded_key_text(long).len(), 15);
        // 5 x 3-byte chars = 15 bytes fits, the 6th is cut
        let wide = "あいうえおか".to_string();
        assert_eq!(bounded_key_text(wide), "あいうえお");
    }
}
