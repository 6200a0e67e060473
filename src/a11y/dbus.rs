//! AT-SPI D-Bus client
//!
//! Resolves the accessibility bus through `org.a11y.Bus` on the session
//! bus, then issues component/accessible queries and synthetic mouse
//! events on it. The bridge is single-threaded, so calls run to
//! completion on a private current-thread tokio runtime.

use anyhow::{Context, Result};
use log::{debug, info};
use tokio::runtime::Runtime;

use super::{AccessibleQuery, AccessibleRef, MouseSynthesizer, Point, Role};
use crate::constants::COORD_TYPE_SCREEN;
use crate::error::{BridgeError, BridgeResult};

/// Path AT-SPI uses for "no object"
const NULL_PATH: &str = "/org/a11y/atspi/null";

// === zbus proxy definitions ===

#[zbus::proxy(
    interface = "org.a11y.Bus",
    default_service = "org.a11y.Bus",
    default_path = "/org/a11y/bus"
)]
trait A11yBus {
    fn get_address(&self) -> zbus::Result<String>;
}

#[zbus::proxy(
    interface = "org.a11y.atspi.DeviceEventController",
    default_service = "org.a11y.atspi.Registry",
    default_path = "/org/a11y/atspi/registry/deviceeventcontroller"
)]
trait DeviceEventController {
    fn generate_mouse_event(&self, x: i32, y: i32, event_name: &str) -> zbus::Result<()>;
}

#[zbus::proxy(
    interface = "org.a11y.atspi.Component",
    default_service = "org.a11y.atspi.Registry",
    default_path = "/org/a11y/atspi/accessible/root"
)]
trait Component {
    fn get_position(&self, coord_type: u32) -> zbus::Result<(i32, i32)>;
}

#[zbus::proxy(
    interface = "org.a11y.atspi.Accessible",
    default_service = "org.a11y.atspi.Registry",
    default_path = "/org/a11y/atspi/accessible/root"
)]
trait Accessible {
    fn get_role(&self) -> zbus::Result<u32>;

    fn get_child_at_index(
        &self,
        index: i32,
    ) -> zbus::Result<(String, zbus::zvariant::OwnedObjectPath)>;
}

// === AtspiClient ===

/// Connection to the accessibility bus
pub struct AtspiClient {
    runtime: Runtime,
    connection: zbus::Connection,
}

impl AtspiClient {
    /// Locate and connect to the accessibility bus
    pub fn connect() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build AT-SPI runtime")?;

        let connection = runtime.block_on(async {
            let session = zbus::Connection::session()
                .await
                .context("Failed to connect to session bus")?;
            let bus = A11yBusProxy::new(&session).await?;
            let address = bus
                .get_address()
                .await
                .context("Failed to query accessibility bus address")?;
            debug!("Accessibility bus address: {}", address);
            let connection = zbus::connection::Builder::address(address.as_str())?
                .build()
                .await
                .context("Failed to connect to accessibility bus")?;
            Ok::<_, anyhow::Error>(connection)
        })?;

        info!("Connected to accessibility bus");
        Ok(Self {
            runtime,
            connection,
        })
    }

    async fn component(&self, object: &AccessibleRef) -> zbus::Result<ComponentProxy<'static>> {
        ComponentProxy::builder(&self.connection)
            .destination(object.bus_name.clone())?
            .path(object.path.clone())?
            .build()
            .await
    }

    async fn accessible(&self, object: &AccessibleRef) -> zbus::Result<AccessibleProxy<'static>> {
        AccessibleProxy::builder(&self.connection)
            .destination(object.bus_name.clone())?
            .path(object.path.clone())?
            .build()
            .await
    }
}

impl AccessibleQuery for AtspiClient {
    fn screen_position(&self, object: &AccessibleRef) -> Option<Point> {
        let result = self.runtime.block_on(async {
            self.component(object)
                .await?
                .get_position(COORD_TYPE_SCREEN)
                .await
        });
        match result {
            Ok((x, y)) => Some(Point::new(x, y)),
            Err(e) => {
                debug!("GetPosition failed for {}{}: {}", object.bus_name, object.path, e);
                None
            }
        }
    }

    fn role(&self, object: &AccessibleRef) -> Option<Role> {
        let result = self
            .runtime
            .block_on(async { self.accessible(object).await?.get_role().await });
        match result {
            Ok(role) => Some(Role(role)),
            Err(e) => {
                debug!("GetRole failed for {}{}: {}", object.bus_name, object.path, e);
                None
            }
        }
    }

    fn child_at_index(&self, object: &AccessibleRef, index: i32) -> Option<AccessibleRef> {
        let result = self.runtime.block_on(async {
            self.accessible(object)
                .await?
                .get_child_at_index(index)
                .await
        });
        match result {
            Ok((_, path)) if path.as_str() == NULL_PATH => None,
            Ok((bus_name, path)) => Some(AccessibleRef::new(bus_name, path.as_str())),
            Err(e) => {
                debug!(
                    "GetChildAtIndex({}) failed for {}{}: {}",
                    index, object.bus_name, object.path, e
                );
                None
            }
        }
    }
}

impl MouseSynthesizer for AtspiClient {
    fn generate_mouse_event(&self, x: i32, y: i32, event_name: &str) -> BridgeResult<()> {
        self.runtime
            .block_on(async {
                DeviceEventControllerProxy::new(&self.connection)
                    .await?
                    .generate_mouse_event(x, y, event_name)
                    .await
            })
            .map_err(|e| BridgeError::Accessibility(e.to_string()))
    }
}
