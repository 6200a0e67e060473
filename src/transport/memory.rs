//! In-memory transport
//!
//! Scripted stand-in for a display server. A `MemoryHandle` queues
//! session and injection events and records every request, flush and
//! seat binding the bridge issues. Both sides expose real socket fds that
//! become readable when events are queued, so they can be driven by the
//! event loop like a real backend.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;

use log::trace;

use super::{InjectionChannel, SessionTransport};
use crate::error::BridgeResult;
use crate::protocol::{InjectionEvent, ManagerRequest, SeatId, SessionEvent};

#[derive(Default)]
struct Shared {
    capability: bool,
    session_events: VecDeque<SessionEvent>,
    injection_events: VecDeque<InjectionEvent>,
    requests: Vec<ManagerRequest>,
    flushes: usize,
    bound_seats: Vec<SeatId>,
    channels_opened: usize,
    /// Write ends that make the watched fds readable
    session_wake: Option<UnixStream>,
    injection_wake: Option<UnixStream>,
}

/// Script and inspection side of the in-memory transport
#[derive(Clone)]
pub struct MemoryHandle {
    shared: Rc<RefCell<Shared>>,
}

impl MemoryHandle {
    /// Have the capability offer a fresh injection channel
    pub fn offer_channel(&self) -> BridgeResult<()> {
        let (writer, reader) = UnixStream::pair()?;
        let mut shared = self.shared.borrow_mut();
        shared.injection_wake = Some(writer);
        shared
            .session_events
            .push_back(SessionEvent::InjectionChannelOffered(OwnedFd::from(reader)));
        wake(shared.session_wake.as_mut());
        Ok(())
    }

    /// Queue an event on the injection channel
    pub fn push_injection(&self, event: InjectionEvent) {
        let mut shared = self.shared.borrow_mut();
        shared.injection_events.push_back(event);
        wake(shared.injection_wake.as_mut());
    }

    pub fn requests(&self) -> Vec<ManagerRequest> {
        self.shared.borrow().requests.clone()
    }

    pub fn flushes(&self) -> usize {
        self.shared.borrow().flushes
    }

    pub fn bound_seats(&self) -> Vec<SeatId> {
        self.shared.borrow().bound_seats.clone()
    }

    pub fn channels_opened(&self) -> usize {
        self.shared.borrow().channels_opened
    }

    /// Injection events not yet drained by the bridge
    pub fn pending_injection(&self) -> usize {
        self.shared.borrow().injection_events.len()
    }
}

fn wake(stream: Option<&mut UnixStream>) {
    if let Some(stream) = stream {
        if let Err(e) = stream.write_all(&[1]) {
            trace!("Memory transport wake failed: {}", e);
        }
    }
}

fn drain(stream: &mut UnixStream) -> BridgeResult<()> {
    let mut buf = [0u8; 64];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(_) => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Session side of the in-memory transport
pub struct MemoryTransport {
    shared: Rc<RefCell<Shared>>,
    wake: UnixStream,
}

impl MemoryTransport {
    /// Transport whose registry advertises the capability
    pub fn new() -> BridgeResult<(Self, MemoryHandle)> {
        Self::build(true)
    }

    /// Transport whose registry never advertises the capability
    pub fn without_capability() -> BridgeResult<(Self, MemoryHandle)> {
        Self::build(false)
    }

    fn build(capability: bool) -> BridgeResult<(Self, MemoryHandle)> {
        let (writer, reader) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        let shared = Rc::new(RefCell::new(Shared {
            capability,
            session_wake: Some(writer),
            ..Default::default()
        }));
        let handle = MemoryHandle {
            shared: shared.clone(),
        };
        Ok((
            Self {
                shared,
                wake: reader,
            },
            handle,
        ))
    }
}

impl SessionTransport for MemoryTransport {
    const NAME: &'static str = "memory";
    type Channel = MemoryChannel;

    fn watch_fd(&self) -> BridgeResult<OwnedFd> {
        Ok(OwnedFd::from(self.wake.try_clone()?))
    }

    fn capability_bound(&self) -> bool {
        self.shared.borrow().capability
    }

    fn dispatch(&mut self) -> BridgeResult<Vec<SessionEvent>> {
        drain(&mut self.wake)?;
        Ok(self.shared.borrow_mut().session_events.drain(..).collect())
    }

    fn send(&mut self, request: ManagerRequest) -> BridgeResult<()> {
        self.shared.borrow_mut().requests.push(request);
        Ok(())
    }

    fn flush(&mut self) -> BridgeResult<()> {
        self.shared.borrow_mut().flushes += 1;
        Ok(())
    }

    fn open_channel(&mut self, fd: OwnedFd) -> BridgeResult<MemoryChannel> {
        let wake = UnixStream::from(fd);
        wake.set_nonblocking(true)?;
        self.shared.borrow_mut().channels_opened += 1;
        Ok(MemoryChannel {
            shared: self.shared.clone(),
            wake,
        })
    }
}

/// Injection side of the in-memory transport
pub struct MemoryChannel {
    shared: Rc<RefCell<Shared>>,
    wake: UnixStream,
}

impl InjectionChannel for MemoryChannel {
    fn watch_fd(&self) -> BridgeResult<OwnedFd> {
        Ok(OwnedFd::from(self.wake.try_clone()?))
    }

    fn dispatch(&mut self) -> BridgeResult<()> {
        drain(&mut self.wake)
    }

    fn next_event(&mut self) -> Option<InjectionEvent> {
        self.shared.borrow_mut().injection_events.pop_front()
    }

    fn bind_keyboard(&mut self, seat: SeatId) -> BridgeResult<()> {
        self.shared.borrow_mut().bound_seats.push(seat);
        Ok(())
    }
}
