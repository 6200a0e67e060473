//! Error types for the input bridge

use thiserror::Error;

/// Main error type for bridge operations
///
/// None of these are fatal to the hosting process. Apart from
/// `TransportUnavailable` at construction time, every variant describes
/// degraded functionality (inert bridge, no key decoding, missing grab).
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("remote-input capability not offered by the compositor")]
    CapabilityNotOffered,

    #[error("failed to compile keymap ({size} bytes)")]
    KeymapCompile { size: usize },

    #[error("unsupported keymap format: {0}")]
    UnsupportedKeymapFormat(u32),

    #[error("no virtual modifier bits available")]
    NoVirtualBitsAvailable,

    #[error("screen position of the target could not be resolved")]
    PositionUnresolvable,

    #[error("unknown key grab id: {0}")]
    UnknownGrab(u32),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("accessibility bus error: {0}")]
    Accessibility(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
