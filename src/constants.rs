//! Global constants for a11y-input-bridge
//!
//! Consolidates modifier bit layout, key code numbering and protocol
//! names to eliminate magic numbers throughout the codebase.

// ============================================================================
// Key Codes
// ============================================================================

/// Offset between evdev key codes (wire) and XKB key codes
pub const XKB_KEYCODE_OFFSET: u32 = 8;

/// Size of the text buffer used when resolving key text (includes the NUL slot)
pub const KEY_TEXT_BUFFER_LEN: usize = 16;

// ============================================================================
// Modifier Bits
// ============================================================================

/// Shift modifier bit
pub const MODIFIER_SHIFT: u32 = 1 << 0;

/// Caps Lock modifier bit
pub const MODIFIER_SHIFTLOCK: u32 = 1 << 1;

/// Control modifier bit
pub const MODIFIER_CONTROL: u32 = 1 << 2;

/// Position of the Num Lock bit in AT-SPI modifier masks
pub const MODIFIER_NUMLOCK_SHIFT: u32 = 14;

/// Num Lock modifier bit (permanently reserved inside the virtual range)
pub const MODIFIER_NUMLOCK: u32 = 1 << MODIFIER_NUMLOCK_SHIFT;

/// First bit of the reserved virtual modifier range
pub const VIRTUAL_MODIFIER_FIRST: u32 = 0x1000;

/// End (exclusive) of the reserved virtual modifier range
pub const VIRTUAL_MODIFIER_END: u32 = 0x10000;

/// Mask covering the whole virtual modifier range
pub const VIRTUAL_MODIFIER_MASK: u32 = 0x0000_f000;

// ============================================================================
// Protocol Names
// ============================================================================

/// Wayland global offering the accessibility remote-input session
pub const COSMIC_ATSPI_MANAGER: &str = "cosmic_atspi_manager_v1";

/// Highest `cosmic_atspi_manager_v1` version this bridge speaks
pub const COSMIC_ATSPI_MANAGER_VERSION: u32 = 1;

/// Name announced during the libei handshake
pub const EI_CLIENT_NAME: &str = "a11y-input-bridge";

// ============================================================================
// AT-SPI
// ============================================================================

/// `ATSPI_ROLE_APPLICATION`
pub const ROLE_APPLICATION: u32 = 75;

/// `ATSPI_COORD_TYPE_SCREEN`
pub const COORD_TYPE_SCREEN: u32 = 0;

/// Position reported by components that are not on screen
pub const INVALID_POSITION: i32 = -1;
