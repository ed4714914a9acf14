//! btleplug backend for the radio transport.
//!
//! The printer exposes one GATT characteristic that takes writes without
//! response and emits notifications for every reply frame.

use std::io;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, ValueNotification,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{Stream, StreamExt};
use uuid::Uuid;

use super::radio::{RadioAdapter, RadioLink, discovery_timed_out};
use crate::config::RadioConfig;
use crate::error::EtiquetaError;

const SCAN_POLL: Duration = Duration::from_millis(250);

fn parse_uuid(field: &str, raw: &str) -> Result<Uuid, EtiquetaError> {
    Uuid::parse_str(raw)
        .map_err(|e| EtiquetaError::InvalidConfiguration(format!("{} '{}': {}", field, raw, e)))
}

fn ble_error(e: btleplug::Error) -> EtiquetaError {
    EtiquetaError::Connection(format!("bluetooth: {}", e))
}

/// Scans the first local Bluetooth adapter.
pub struct BleAdapter {
    service: Uuid,
    characteristic: Uuid,
    mtu: usize,
}

impl BleAdapter {
    pub fn new(config: &RadioConfig) -> Result<Self, EtiquetaError> {
        Ok(Self {
            service: parse_uuid("service_uuid", &config.service_uuid)?,
            characteristic: parse_uuid("characteristic_uuid", &config.characteristic_uuid)?,
            mtu: config.mtu,
        })
    }

    async fn central() -> Result<Adapter, EtiquetaError> {
        let manager = Manager::new().await.map_err(ble_error)?;
        manager
            .adapters()
            .await
            .map_err(ble_error)?
            .into_iter()
            .next()
            .ok_or_else(|| EtiquetaError::Connection("no bluetooth adapter found".to_string()))
    }

    async fn find(central: &Adapter, selector: &str) -> Result<Peripheral, EtiquetaError> {
        let wanted = selector.to_lowercase();
        loop {
            for peripheral in central.peripherals().await.map_err(ble_error)? {
                let Some(props) = peripheral.properties().await.map_err(ble_error)? else {
                    continue;
                };
                let address = props.address.to_string().to_lowercase();
                let name_matches = props
                    .local_name
                    .as_deref()
                    .is_some_and(|name| name.to_lowercase().starts_with(&wanted));
                if name_matches || address == wanted {
                    tracing::debug!(
                        "Found {} ({})",
                        props.local_name.as_deref().unwrap_or("?"),
                        props.address
                    );
                    return Ok(peripheral);
                }
            }
            tokio::time::sleep(SCAN_POLL).await;
        }
    }

    fn pick_characteristic(&self, peripheral: &Peripheral) -> Option<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == self.characteristic && c.service_uuid == self.service)
    }

    /// Service discovery and subscription on a connected peripheral.
    async fn open_link(
        &self,
        peripheral: &Peripheral,
        selector: &str,
    ) -> Result<BleLink, EtiquetaError> {
        peripheral.discover_services().await.map_err(ble_error)?;

        let characteristic = self.pick_characteristic(peripheral).ok_or_else(|| {
            EtiquetaError::Connection(format!(
                "'{}' has no printer characteristic {}",
                selector, self.characteristic
            ))
        })?;

        peripheral.subscribe(&characteristic).await.map_err(ble_error)?;
        let notifications = peripheral.notifications().await.map_err(ble_error)?;

        Ok(BleLink {
            peripheral: peripheral.clone(),
            characteristic,
            notifications,
            mtu: self.mtu,
        })
    }
}

#[async_trait]
impl RadioAdapter for BleAdapter {
    async fn discover(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Box<dyn RadioLink>, EtiquetaError> {
        let central = Self::central().await?;
        central
            .start_scan(ScanFilter::default())
            .await
            .map_err(ble_error)?;

        let found = tokio::time::timeout(timeout, Self::find(&central, selector)).await;
        if let Err(e) = central.stop_scan().await {
            tracing::warn!("Failed to stop scan: {}", e);
        }
        let peripheral = found.map_err(|_| discovery_timed_out(selector, timeout))??;

        peripheral.connect().await.map_err(ble_error)?;
        match self.open_link(&peripheral, selector).await {
            Ok(link) => Ok(Box::new(link)),
            Err(e) => {
                if let Err(err) = peripheral.disconnect().await {
                    tracing::debug!("Disconnect after failed setup: {}", err);
                }
                Err(e)
            }
        }
    }
}

struct BleLink {
    peripheral: Peripheral,
    characteristic: Characteristic,
    notifications: Pin<Box<dyn Stream<Item = ValueNotification> + Send>>,
    mtu: usize,
}

#[async_trait]
impl RadioLink for BleLink {
    fn mtu(&self) -> usize {
        self.mtu
    }

    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.peripheral
            .write(&self.characteristic, chunk, WriteType::WithoutResponse)
            .await
            .map_err(io::Error::other)
    }

    async fn next_notification(&mut self) -> io::Result<Vec<u8>> {
        loop {
            match self.notifications.next().await {
                Some(n) if n.uuid == self.characteristic.uuid => return Ok(n.value),
                Some(_) => continue,
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "bluetooth notification stream ended",
                    ));
                }
            }
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        if let Err(e) = self.peripheral.unsubscribe(&self.characteristic).await {
            tracing::debug!("Unsubscribe failed: {}", e);
        }
        self.peripheral.disconnect().await.map_err(io::Error::other)
    }
}
