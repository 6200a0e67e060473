//! Session transport abstraction
//!
//! Provides two layers:
//! - `SessionTransport`: the display-server connection carrying the
//!   remote-input capability (grab requests, injection channel offer)
//! - `InjectionChannel`: the event stream the capability hands over
//!
//! Backends:
//! - COSMIC (`cosmic_atspi_manager_v1` over Wayland, libei receiver)
//! - in-memory scripted transport for tests

#[cfg(feature = "cosmic")]
pub mod cosmic;
#[cfg(feature = "cosmic")]
pub mod ei;
pub mod memory;

#[cfg(feature = "cosmic")]
pub use cosmic::CosmicTransport;
#[cfg(feature = "cosmic")]
pub use ei::EiChannel;
pub use memory::{MemoryChannel, MemoryHandle, MemoryTransport};

use std::os::fd::OwnedFd;

use log::{debug, info, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{InjectionEvent, ManagerRequest, SeatId, SessionEvent};

/// Event stream set up from the fd the capability offers
pub trait InjectionChannel {
    /// Duplicate of the fd to watch for readability
    fn watch_fd(&self) -> BridgeResult<OwnedFd>;

    /// Read whatever is available and queue the resulting events
    fn dispatch(&mut self) -> BridgeResult<()>;

    /// Next queued event in arrival order
    fn next_event(&mut self) -> Option<InjectionEvent>;

    /// Bind the keyboard capability of an announced seat
    fn bind_keyboard(&mut self, seat: SeatId) -> BridgeResult<()>;
}

/// Display-server connection with a dedicated event queue
pub trait SessionTransport {
    type Channel: InjectionChannel;

    /// Backend name for logging
    const NAME: &'static str;

    /// Duplicate of the connection fd to watch for readability
    fn watch_fd(&self) -> BridgeResult<OwnedFd>;

    /// Whether the registry advertised the capability and it was bound
    fn capability_bound(&self) -> bool;

    /// Read and dispatch everything queued on the dedicated queue
    fn dispatch(&mut self) -> BridgeResult<Vec<SessionEvent>>;

    /// Issue a request on the bound capability
    fn send(&mut self, request: ManagerRequest) -> BridgeResult<()>;

    fn flush(&mut self) -> BridgeResult<()>;

    /// Set up the injection channel from an offered fd
    fn open_channel(&mut self, fd: OwnedFd) -> BridgeResult<Self::Channel>;
}

/// Negotiated session: transport plus the injection channel it offered
pub struct Session<T: SessionTransport> {
    /// Declared first so it is torn down before the transport
    channel: Option<T::Channel>,
    transport: T,
}

impl<T: SessionTransport> Session<T> {
    /// Take over a connected transport
    ///
    /// A transport without the capability still yields a session; it is
    /// inert and every request fails with `CapabilityNotOffered`.
    pub fn open(transport: T) -> Self {
        let mut session = Self {
            channel: None,
            transport,
        };

        if !session.transport.capability_bound() {
            warn!("Remote-input capability not offered, bridge is inert");
            return session;
        }

        // The offer may already be sitting in the queue after the round-trip
        if let Err(e) = session.dispatch() {
            warn!("Initial session dispatch failed: {}", e);
        }
        session
    }

    pub fn is_functional(&self) -> bool {
        self.transport.capability_bound()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn channel(&self) -> Option<&T::Channel> {
        self.channel.as_ref()
    }

    pub fn channel_mut(&mut self) -> Option<&mut T::Channel> {
        self.channel.as_mut()
    }

    /// Drain the transport queue
    ///
    /// Returns true when a new injection channel was established, so the
    /// caller can (re)register its watcher.
    pub fn dispatch(&mut self) -> BridgeResult<bool> {
        let mut established = false;
        for event in self.transport.dispatch()? {
            match event {
                SessionEvent::InjectionChannelOffered(fd) => match self.transport.open_channel(fd) {
                    Ok(channel) => {
                        if self.channel.replace(channel).is_some() {
                            info!("Injection channel replaced");
                        } else {
                            info!("Injection channel established");
                        }
                        established = true;
                    }
                    Err(e) => warn!("Failed to set up injection channel: {}", e),
                },
            }
        }
        Ok(established)
    }

    /// Issue one request and flush it
    pub fn request(&mut self, request: ManagerRequest) -> BridgeResult<()> {
        if !self.transport.capability_bound() {
            return Err(BridgeError::CapabilityNotOffered);
        }
        debug!("Request: {:?}", request);
        self.transport.send(request)?;
        self.transport.flush()
    }
}

impl<T: SessionTransport> Drop for Session<T> {
    fn drop(&mut self) {
        if self.channel.take().is_some() {
            debug!("Injection channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inert_session_rejects_requests() {
        let (transport, handle) = MemoryTransport::without_capability().unwrap();
        let mut session = Session::open(transport);
        assert!(!session.is_functional());
        assert!(matches!(
            session.request(ManagerRequest::GrabKeyboard),
            Err(BridgeError::CapabilityNotOffered)
        ));
        assert!(handle.requests().is_empty());
    }

    #[test]
    fn test_offer_before_open_is_picked_up() {
        let (transport, handle) = MemoryTransport::new().unwrap();
        handle.offer_channel().unwrap();
        let session = Session::open(transport);
        assert!(session.channel().is_some());
        assert_eq!(handle.channels_opened(), 1);
    }

    #[test]
    fn test_request_is_flushed() {
        let (transport, handle) = MemoryTransport::new().unwrap();
        let mut session = Session::open(transport);
        session.request(ManagerRequest::UngrabKeyboard).unwrap();
        assert_eq!(handle.requests(), vec![ManagerRequest::UngrabKeyboard]);
        assert_eq!(handle.flushes(), 1);
    }

    #[test]
    fn test_second_offer_replaces_channel() {
        let (transport, handle) = MemoryTransport::new().unwrap();
        let mut session = Session::open(transport);
        handle.offer_channel().unwrap();
        assert!(session.dispatch().unwrap());
        handle.offer_channel().unwrap();
        assert!(session.dispatch().unwrap());
        assert!(!session.dispatch().unwrap());
        assert_eq!(handle.channels_opened(), 2);
    }
}
