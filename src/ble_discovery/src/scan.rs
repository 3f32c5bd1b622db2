use std::sync::Arc;
use std::time::Duration;
use log::{debug, error, info};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;
use crate::document::Document;
use crate::errors::RadioError;
use crate::events::{EventEmitter, Topic};
use crate::radio::BleImplementationDelegate;
use crate::uuid_encoder::to_uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RemoteDevice {
    pub address: String,
    pub name: String,
    pub signal_strength: i32,
    pub document: Option<Document>,
    #[serde(skip)]
    pub last_read_attempt_at: Option<Instant>
}

impl RemoteDevice {
    pub fn new(address: String, name: String, signal_strength: i32) -> Self {
        return Self {
            address,
            name,
            signal_strength,
            document: None,
            last_read_attempt_at: None
        };
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning
}

#[derive(Clone, Debug)]
pub enum ScanEvent {
    Started,
    Ended { error: Option<String> },
    DeviceAdded(RemoteDevice),
    DeviceUpdated(RemoteDevice),
    DeviceRemoved(RemoteDevice),
    /// Sent after every other event.
    Updated
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScanEventKind {
    Started,
    Ended,
    DeviceAdded,
    DeviceUpdated,
    DeviceRemoved,
    Updated
}

impl Topic for ScanEvent {
    type Kind = ScanEventKind;

    fn kind(&self) -> ScanEventKind {
        return match self {
            ScanEvent::Started => ScanEventKind::Started,
            ScanEvent::Ended { .. } => ScanEventKind::Ended,
            ScanEvent::DeviceAdded(_) => ScanEventKind::DeviceAdded,
            ScanEvent::DeviceUpdated(_) => ScanEventKind::DeviceUpdated,
            ScanEvent::DeviceRemoved(_) => ScanEventKind::DeviceRemoved,
            ScanEvent::Updated => ScanEventKind::Updated
        };
    }
}

#[derive(Debug)]
struct ScanVariables {
    state: ScanState,
    service_filter: Vec<Uuid>,
    devices: Vec<RemoteDevice>
}

/// Tracks which peers are in range. The `on_*` methods are called by the native bridge.
#[derive(Debug)]
pub struct ScanController {
    radio: Arc<dyn BleImplementationDelegate>,
    variables: Mutex<ScanVariables>,
    events: EventEmitter<ScanEvent>
}

impl ScanController {
    pub fn new(radio: Arc<dyn BleImplementationDelegate>) -> Self {
        return Self {
            radio,
            variables: Mutex::new(ScanVariables {
                state: ScanState::Idle,
                service_filter: Vec::new(),
                devices: Vec::new()
            }),
            events: EventEmitter::new()
        };
    }

    pub fn events(&self) -> &EventEmitter<ScanEvent> {
        return &self.events;
    }

    pub fn state(&self) -> ScanState {
        return self.variables.lock().state;
    }

    pub fn is_scanning(&self) -> bool {
        return self.state() == ScanState::Scanning;
    }

    pub fn service_filter(&self) -> Vec<Uuid> {
        return self.variables.lock().service_filter.clone();
    }

    pub fn devices(&self) -> Vec<RemoteDevice> {
        return self.variables.lock().devices.clone();
    }

    pub fn device(&self, address: &str) -> Option<RemoteDevice> {
        return self.variables
            .lock()
            .devices
            .iter()
            .find(|device| device.address == address)
            .cloned();
    }

    /// Service names are mapped with `to_uuid`, so UUID strings and plain names both work.
    pub async fn start_scan<S: AsRef<str>>(&self, service_filter: &[S]) -> Result<(), RadioError> {
        if self.is_scanning() {
            debug!("Scan already running");
            return Ok(());
        }

        let service_filter: Vec<Uuid> = service_filter
            .iter()
            .map(|name| to_uuid(name.as_ref()))
            .collect();

        self.radio.scan(service_filter.clone()).await?;

        {
            let mut variables = self.variables.lock();
            variables.state = ScanState::Scanning;
            variables.service_filter = service_filter;
        }

        info!("Scan started");
        self.events.publish(ScanEvent::Started);
        self.events.publish(ScanEvent::Updated);

        return Ok(());
    }

    pub async fn stop_scan(&self) -> Result<(), RadioError> {
        if !self.is_scanning() {
            return Ok(());
        }

        self.radio.stop_scan().await?;
        self.finish_scan(None);

        return Ok(());
    }

    pub fn on_scan_ended(&self, error: Option<String>) {
        if !self.is_scanning() && error.is_none() {
            return;
        }

        self.finish_scan(error);
    }

    fn finish_scan(&self, error: Option<String>) {
        self.variables.lock().state = ScanState::Idle;

        match &error {
            Some(error) => error!("Scan ended with error: {error}"),
            None => info!("Scan ended")
        }

        self.events.publish(ScanEvent::Ended { error });
        self.events.publish(ScanEvent::Updated);
    }

    pub fn on_device_observed(&self, address: String, name: String, signal_strength: i32) {
        let event = {
            let mut variables = self.variables.lock();

            if variables.state != ScanState::Scanning {
                debug!("Ignoring observation of {address} while not scanning");
                return;
            }

            match variables.devices.iter().position(|device| device.address == address) {
                Some(index) => {
                    let device = &mut variables.devices[index];
                    device.name = name;
                    device.signal_strength = signal_strength;
                    ScanEvent::DeviceUpdated(device.clone())
                }
                None => {
                    debug!("Discovered {name} ({address})");
                    let device = RemoteDevice::new(address, name, signal_strength);
                    variables.devices.push(device.clone());
                    ScanEvent::DeviceAdded(device)
                }
            }
        };

        self.events.publish(event);
        self.events.publish(ScanEvent::Updated);
    }

    pub fn on_device_lost(&self, address: &str) {
        let removed = {
            let mut variables = self.variables.lock();
            let position = variables.devices.iter().position(|device| device.address == address);
            position.map(|position| variables.devices.remove(position))
        };

        let Some(device) = removed else {
            return;
        };

        debug!("Lost {} ({address})", device.name);
        self.events.publish(ScanEvent::DeviceRemoved(device));
        self.events.publish(ScanEvent::Updated);
    }

    /// Stamps the device's read attempt unless one happened within `suppression`.
    /// Returns `false` (and leaves the stamp alone) when the read should be skipped.
    pub fn begin_read_attempt(&self, address: &str, suppression: Duration) -> bool {
        let now = Instant::now();
        let mut variables = self.variables.lock();

        let Some(device) = variables.devices.iter_mut().find(|device| device.address == address) else {
            return false;
        };

        if let Some(last_attempt) = device.last_read_attempt_at {
            if now.duration_since(last_attempt) < suppression {
                return false;
            }
        }

        device.last_read_attempt_at = Some(now);
        return true;
    }

    pub fn attach_document(&self, address: &str, document: Document) -> Option<RemoteDevice> {
        let mut variables = self.variables.lock();
        let device = variables.devices.iter_mut().find(|device| device.address == address)?;
        device.document = Some(document);

        return Some(device.clone());
    }
}
