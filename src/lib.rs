//! a11y-input-bridge - AT-SPI device bridge for the COSMIC compositor
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Event Loop                   │
//! ├──────────────────────────────────────────────┤
//! │  Session (Wayland)  →  Injection (libei)     │
//! │         ↑                     ↓              │
//! │  Grab requests        Keymap / modifiers     │
//! │         ↑                     ↓              │
//! │        Accessibility service (AT-SPI)        │
//! └──────────────────────────────────────────────┘
//! ```

pub mod a11y;
pub mod bridge;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod event_loop;
pub mod input;
pub mod protocol;
pub mod transport;

pub use bridge::{GrabRegistry, InputBridge, KeyDefinition, KeyGrab, KeyGrabs};
pub use config::Config;
pub use device::{Backend, Device};
pub use error::{BridgeError, BridgeResult};
pub use event_loop::BridgeLoop;
