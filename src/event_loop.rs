//! Event dispatch loop
//!
//! One calloop `EventLoop` multiplexes two fd watchers: the session
//! transport and, once the capability has offered it, the injection
//! channel. Both are level triggered; a wakeup drains everything queued.

use std::os::fd::OwnedFd;
use std::time::Duration;

use anyhow::{Context, Result};
use calloop::generic::Generic;
use calloop::signals::{Signal, Signals};
use calloop::{EventLoop, Interest, LoopHandle, LoopSignal, Mode, PostAction, RegistrationToken};
use log::{debug, info, warn};

use crate::device::Device;

/// State handed to every source callback
pub struct LoopState {
    device: Box<dyn Device>,
    handle: LoopHandle<'static, LoopState>,
    signal: LoopSignal,
    session_token: Option<RegistrationToken>,
    injection_token: Option<RegistrationToken>,
}

impl LoopState {
    pub fn device(&self) -> &dyn Device {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> &mut dyn Device {
        self.device.as_mut()
    }

    fn on_session_ready(&mut self) -> PostAction {
        match self.device.dispatch_session() {
            Ok(true) => self.watch_injection(),
            Ok(false) => {}
            Err(e) => {
                warn!("Session transport lost: {}", e);
                self.session_token = None;
                self.unwatch_injection();
                self.signal.stop();
                return PostAction::Remove;
            }
        }
        PostAction::Continue
    }

    fn on_injection_ready(&mut self) -> PostAction {
        match self.device.dispatch_injection() {
            Ok(handled) => {
                if handled > 0 {
                    debug!("Handled {} injection events", handled);
                }
                PostAction::Continue
            }
            Err(e) => {
                warn!("Injection channel lost: {}", e);
                self.injection_token = None;
                PostAction::Remove
            }
        }
    }

    /// (Re)register the watcher on the current injection channel
    fn watch_injection(&mut self) {
        self.unwatch_injection();

        let fd = match self.device.injection_fd() {
            Ok(Some(fd)) => fd,
            Ok(None) => return,
            Err(e) => {
                warn!("Cannot watch injection channel: {}", e);
                return;
            }
        };

        let source = Generic::new(fd, Interest::READ, Mode::Level);
        match self
            .handle
            .insert_source(source, |_, _, state: &mut LoopState| {
                Ok(state.on_injection_ready())
            }) {
            Ok(token) => {
                debug!("Watching injection channel");
                self.injection_token = Some(token);
            }
            Err(e) => warn!("Failed to register injection watcher: {}", e.error),
        }
    }

    fn unwatch_injection(&mut self) {
        if let Some(token) = self.injection_token.take() {
            self.handle.remove(token);
        }
    }

    fn unwatch_all(&mut self) {
        self.unwatch_injection();
        if let Some(token) = self.session_token.take() {
            self.handle.remove(token);
        }
    }
}

/// Reactor driving one device
pub struct BridgeLoop {
    event_loop: EventLoop<'static, LoopState>,
    state: LoopState,
}

impl BridgeLoop {
    pub fn new(device: Box<dyn Device>) -> Result<Self> {
        let event_loop: EventLoop<'static, LoopState> =
            EventLoop::try_new().context("Failed to create event loop")?;

        let mut state = LoopState {
            device,
            handle: event_loop.handle(),
            signal: event_loop.get_signal(),
            session_token: None,
            injection_token: None,
        };

        let fd: OwnedFd = state
            .device
            .session_fd()
            .context("Failed to get session fd")?;
        let token = event_loop
            .handle()
            .insert_source(
                Generic::new(fd, Interest::READ, Mode::Level),
                |_, _, state: &mut LoopState| Ok(state.on_session_ready()),
            )
            .map_err(|e| anyhow::anyhow!("Failed to register session watcher: {}", e.error))?;
        state.session_token = Some(token);

        // The channel may have been offered during negotiation
        state.watch_injection();

        Ok(Self { event_loop, state })
    }

    /// Stop the loop on SIGINT / SIGTERM
    pub fn handle_signals(&mut self) -> Result<()> {
        let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM])
            .context("Failed to set up signal handling")?;
        self.event_loop
            .handle()
            .insert_source(signals, |event, _, state: &mut LoopState| {
                info!("Received {:?}, shutting down", event.signal());
                state.signal.stop();
            })
            .map_err(|e| anyhow::anyhow!("Failed to register signal source: {}", e.error))?;
        Ok(())
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut LoopState {
        &mut self.state
    }

    pub fn is_watching_injection(&self) -> bool {
        self.state.injection_token.is_some()
    }

    pub fn stop_signal(&self) -> LoopSignal {
        self.event_loop.get_signal()
    }

    /// Process one wakeup, waiting at most `timeout`
    pub fn dispatch(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.event_loop
            .dispatch(timeout, &mut self.state)
            .context("Event loop dispatch failed")
    }

    /// Run until stopped by a signal or a lost transport
    pub fn run(&mut self) -> Result<()> {
        info!("Event loop running ({})", self.state.device.name());
        self.event_loop
            .run(None, &mut self.state, |_| {})
            .context("Event loop failed")
    }
}

impl Drop for BridgeLoop {
    fn drop(&mut self) {
        // Watchers go before the protocol objects they watch
        self.state.unwatch_all();
    }
}
