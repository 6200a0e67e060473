//! COSMIC session transport
//!
//! Connects to the Wayland display, binds `cosmic_atspi_manager_v1` from
//! the registry and waits for it to offer the libei socket that carries
//! keyboard events.

use std::io::ErrorKind;
use std::os::fd::OwnedFd;

use log::{debug, info, warn};
use wayland_client::backend::WaylandError;
use wayland_client::protocol::wl_registry;
use wayland_client::{Connection, Dispatch, EventQueue, QueueHandle};

use super::ei::EiChannel;
use super::SessionTransport;
use crate::constants::COSMIC_ATSPI_MANAGER;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{ManagerRequest, SessionEvent};

#[allow(non_upper_case_globals, non_camel_case_types, unused_imports, missing_docs, clippy::all)]
pub mod wire {
    use wayland_client;
    use wayland_client::protocol::*;

    pub mod __interfaces {
        use wayland_client::protocol::__interfaces::*;
        wayland_scanner::generate_interfaces!("protocols/cosmic-atspi-unstable-v1.xml");
    }
    use self::__interfaces::*;

    wayland_scanner::generate_client_code!("protocols/cosmic-atspi-unstable-v1.xml");
}

use wire::cosmic_atspi_manager_v1::{self, CosmicAtspiManagerV1};

/// State dispatched by the dedicated queue
struct CosmicState {
    /// Highest manager version to bind
    max_version: u32,
    manager: Option<CosmicAtspiManagerV1>,
    /// Socket fds offered since the last dispatch
    offered: Vec<OwnedFd>,
}

impl Dispatch<wl_registry::WlRegistry, ()> for CosmicState {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } if interface == COSMIC_ATSPI_MANAGER => {
                if state.manager.is_some() {
                    debug!("Ignoring duplicate {} global", interface);
                    return;
                }
                let version = version.min(state.max_version);
                info!("Binding {} v{}", interface, version);
                state.manager =
                    Some(registry.bind::<CosmicAtspiManagerV1, _, _>(name, version, qh, ()));
            }
            _ => {}
        }
    }
}

impl Dispatch<CosmicAtspiManagerV1, ()> for CosmicState {
    fn event(
        state: &mut Self,
        _: &CosmicAtspiManagerV1,
        event: cosmic_atspi_manager_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let cosmic_atspi_manager_v1::Event::KeyEventsEis { fd } = event;
        debug!("Compositor offered key event socket");
        state.offered.push(fd);
    }
}

/// Wayland connection with the bound AT-SPI manager
pub struct CosmicTransport {
    state: CosmicState,
    queue: EventQueue<CosmicState>,
    connection: Connection,
    /// Name announced in the libei handshake
    client_name: String,
}

impl CosmicTransport {
    /// Connect and complete one registry round-trip
    pub fn connect(max_version: u32, client_name: &str) -> BridgeResult<Self> {
        let connection = Connection::connect_to_env()
            .map_err(|e| BridgeError::TransportUnavailable(e.to_string()))?;

        let mut queue = connection.new_event_queue();
        let qh = queue.handle();
        let _registry = connection.display().get_registry(&qh, ());

        let mut state = CosmicState {
            max_version,
            manager: None,
            offered: Vec::new(),
        };
        queue
            .roundtrip(&mut state)
            .map_err(|e| BridgeError::TransportUnavailable(e.to_string()))?;

        if state.manager.is_none() {
            warn!("Compositor does not advertise {}", COSMIC_ATSPI_MANAGER);
        }

        Ok(Self {
            state,
            queue,
            connection,
            client_name: client_name.to_string(),
        })
    }

    fn manager(&self) -> BridgeResult<&CosmicAtspiManagerV1> {
        self.state
            .manager
            .as_ref()
            .ok_or(BridgeError::CapabilityNotOffered)
    }
}

/// Wire form of the virtual modifier key list (array of native u32)
fn encode_keys(keys: &[u32]) -> Vec<u8> {
    keys.iter().flat_map(|key| key.to_ne_bytes()).collect()
}

impl SessionTransport for CosmicTransport {
    const NAME: &'static str = "cosmic";
    type Channel = EiChannel;

    fn watch_fd(&self) -> BridgeResult<OwnedFd> {
        let fd = self.connection.backend().poll_fd().try_clone_to_owned()?;
        Ok(fd)
    }

    fn capability_bound(&self) -> bool {
        self.state.manager.is_some()
    }

    fn dispatch(&mut self) -> BridgeResult<Vec<SessionEvent>> {
        self.queue
            .dispatch_pending(&mut self.state)
            .map_err(|e| BridgeError::Protocol(e.to_string()))?;

        if let Some(guard) = self.queue.prepare_read() {
            match guard.read() {
                Ok(_) => {}
                Err(WaylandError::Io(e)) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(BridgeError::Protocol(e.to_string())),
            }
        }

        self.queue
            .dispatch_pending(&mut self.state)
            .map_err(|e| BridgeError::Protocol(e.to_string()))?;
        self.flush()?;

        Ok(self
            .state
            .offered
            .drain(..)
            .map(SessionEvent::InjectionChannelOffered)
            .collect())
    }

    fn send(&mut self, request: ManagerRequest) -> BridgeResult<()> {
        let manager = self.manager()?;
        match request {
            ManagerRequest::AddKeyGrab {
                mods,
                virtual_mods,
                key,
            } => manager.add_key_grab(mods, encode_keys(&virtual_mods), key),
            ManagerRequest::RemoveKeyGrab {
                mods,
                virtual_mods,
                key,
            } => manager.remove_key_grab(mods, encode_keys(&virtual_mods), key),
            ManagerRequest::GrabKeyboard => manager.grab_keyboard(),
            ManagerRequest::UngrabKeyboard => manager.ungrab_keyboard(),
        }
        Ok(())
    }

    fn flush(&mut self) -> BridgeResult<()> {
        self.connection
            .flush()
            .map_err(|e| BridgeError::Protocol(e.to_string()))
    }

    fn open_channel(&mut self, fd: OwnedFd) -> BridgeResult<EiChannel> {
        EiChannel::connect(fd, &self.client_name)
    }
}

impl Drop for CosmicTransport {
    fn drop(&mut self) {
        if let Some(manager) = self.state.manager.take() {
            manager.destroy();
            if let Err(e) = self.connection.flush() {
                debug!("Flush on teardown failed: {}", e);
            }
        }
    }
}
