//! Accessibility service collaborators
//!
//! The bridge talks to the accessibility framework through three seams:
//! - key notifications flowing into the framework's key handler chain
//! - read-only queries on accessible objects (position, role, children)
//! - the synthetic mouse event primitive
//!
//! `dbus` provides implementations of the latter two over the AT-SPI bus.

pub mod dbus;

pub use dbus::AtspiClient;

use crate::constants::{INVALID_POSITION, ROLE_APPLICATION};
use crate::error::BridgeResult;

/// Normalized key notification for the accessibility key handler chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNotification {
    pub pressed: bool,
    /// XKB key code (wire key code + 8)
    pub key_code: u32,
    pub keysym: u32,
    pub modifiers: u32,
    pub text: String,
}

/// Receiver of physical key transitions
pub trait KeyNotifier {
    fn notify_key(&mut self, event: &KeyNotification);
}

impl<F> KeyNotifier for F
where
    F: FnMut(&KeyNotification),
{
    fn notify_key(&mut self, event: &KeyNotification) {
        self(event)
    }
}

/// Reference to an accessible object on the accessibility bus
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessibleRef {
    /// Unique bus name of the owning application
    pub bus_name: String,
    /// Object path of the accessible
    pub path: String,
}

impl AccessibleRef {
    pub fn new(bus_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bus_name: bus_name.into(),
            path: path.into(),
        }
    }
}

/// Screen coordinates of an accessible
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Off-screen components report -1 on either axis
    pub fn is_valid(&self) -> bool {
        self.x != INVALID_POSITION && self.y != INVALID_POSITION
    }
}

/// AT-SPI role code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Role(pub u32);

impl Role {
    pub const APPLICATION: Role = Role(ROLE_APPLICATION);
}

/// Read-only queries on accessible objects
pub trait AccessibleQuery {
    /// Position in screen coordinates; errors are reported as `None`
    fn screen_position(&self, object: &AccessibleRef) -> Option<Point>;
    fn role(&self, object: &AccessibleRef) -> Option<Role>;
    fn child_at_index(&self, object: &AccessibleRef, index: i32) -> Option<AccessibleRef>;
}

/// Platform-level synthetic mouse event primitive
pub trait MouseSynthesizer {
    /// `event_name` uses the AT-SPI syntax ("b1c", "b1p", "abs", "rel", ...)
    fn generate_mouse_event(&self, x: i32, y: i32, event_name: &str) -> BridgeResult<()>;
}
