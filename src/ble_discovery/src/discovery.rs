use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::timeout;
use uuid::Uuid;
use crate::codec::{self, packet_uuid, FramedPacket, Reassembler};
use crate::config::DiscoveryConfig;
use crate::document::Document;
use crate::errors::{DiscoveryError, ReadError, WaitError};
use crate::events::{EventEmitter, Subscription, Topic};
use crate::init_logger;
use crate::publisher::{Characteristic, ServicePublisher};
use crate::radio::BleImplementationDelegate;
use crate::scan::{RemoteDevice, ScanController, ScanEvent, ScanEventKind};
use crate::uuid_encoder::NAMESPACE;
use crate::MESSAGE_CHARACTERISTIC_NAME;

#[derive(Clone, Debug)]
pub enum DiscoveryEvent {
    DocumentFound(RemoteDevice),
    /// The discovered-documents registry changed.
    Updated,
    MessageReceived { data: Bytes, from: String }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiscoveryEventKind {
    DocumentFound,
    Updated,
    MessageReceived
}

impl Topic for DiscoveryEvent {
    type Kind = DiscoveryEventKind;

    fn kind(&self) -> DiscoveryEventKind {
        return match self {
            DiscoveryEvent::DocumentFound(_) => DiscoveryEventKind::DocumentFound,
            DiscoveryEvent::Updated => DiscoveryEventKind::Updated,
            DiscoveryEvent::MessageReceived { .. } => DiscoveryEventKind::MessageReceived
        };
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Unconfigured,
    Configured,
    Active,
    Inactive
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscoveryStatus {
    NotConfigured,
    Disabled,
    Error(String),
    Enabled
}

impl fmt::Display for DiscoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DiscoveryStatus::NotConfigured => write!(f, "not configured"),
            DiscoveryStatus::Disabled => write!(f, "disabled"),
            DiscoveryStatus::Error(message) => write!(f, "{message}"),
            DiscoveryStatus::Enabled => write!(f, "enabled"),
        }
    }
}

#[derive(Clone, Debug)]
struct Session {
    config: DiscoveryConfig,
    service_uuid: Uuid,
    device_identifier: String
}

#[derive(Debug)]
struct DiscoveryVariables {
    state: LifecycleState,
    session: Option<Session>,
    /// Bumped on every enable and disable. Reads only commit when it is unchanged.
    generation: u64,
    document: Document,
    last_error: Option<String>,
    discovered: Vec<RemoteDevice>,
    subscriptions: Vec<Subscription>
}

#[derive(Debug)]
struct DiscoveryInner {
    radio: Arc<dyn BleImplementationDelegate>,
    scanner: Arc<ScanController>,
    publisher: Arc<ServicePublisher>,
    events: EventEmitter<DiscoveryEvent>,
    lifecycle: tokio::sync::Mutex<()>,
    variables: Mutex<DiscoveryVariables>
}

/// Advertises the local document and collects the documents of nearby devices in the same
/// group.
#[derive(Debug, Clone)]
pub struct Discovery {
    inner: Arc<DiscoveryInner>
}

impl Discovery {
    pub fn new(radio: Arc<dyn BleImplementationDelegate>) -> Self {
        let scanner = Arc::new(ScanController::new(radio.clone()));
        let publisher = Arc::new(ServicePublisher::new(radio.clone()));

        return Self::with_components(radio, scanner, publisher);
    }

    /// Uses existing scan and publish components, e.g. when the native bridge already routes
    /// callbacks to them.
    pub fn with_components(radio: Arc<dyn BleImplementationDelegate>, scanner: Arc<ScanController>, publisher: Arc<ServicePublisher>) -> Self {
        init_logger();

        return Self {
            inner: Arc::new(DiscoveryInner {
                radio,
                scanner,
                publisher,
                events: EventEmitter::new(),
                lifecycle: tokio::sync::Mutex::new(()),
                variables: Mutex::new(DiscoveryVariables {
                    state: LifecycleState::Unconfigured,
                    session: None,
                    generation: 0,
                    document: Document::new(),
                    last_error: None,
                    discovered: Vec::new(),
                    subscriptions: Vec::new()
                })
            })
        };
    }

    pub fn events(&self) -> &EventEmitter<DiscoveryEvent> {
        return &self.inner.events;
    }

    pub fn scanner(&self) -> &Arc<ScanController> {
        return &self.inner.scanner;
    }

    pub fn publisher(&self) -> &Arc<ServicePublisher> {
        return &self.inner.publisher;
    }

    pub fn setup(&self, config: DiscoveryConfig) -> Result<(), DiscoveryError> {
        let mut variables = self.inner.variables.lock();

        if variables.session.is_some() {
            return Err(DiscoveryError::AlreadyConfigured);
        }

        if config.group_identifier.is_empty() {
            return Err(DiscoveryError::MissingParameter { name: "group_identifier".to_string() });
        }

        if config.packet_size == 0 {
            return Err(DiscoveryError::InvalidParameter {
                name: "packet_size".to_string(),
                reason: "must be at least 1".to_string()
            });
        }

        if config.max_packets == 0 {
            return Err(DiscoveryError::InvalidParameter {
                name: "max_packets".to_string(),
                reason: "must be at least 1".to_string()
            });
        }

        let service_uuid = Uuid::new_v5(&NAMESPACE, config.group_identifier.as_bytes());
        let device_identifier = config.device_identifier
            .clone()
            .filter(|identifier| !identifier.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        info!("Discovery set up for group {} (service {service_uuid})", config.group_identifier);

        variables.session = Some(Session {
            config,
            service_uuid,
            device_identifier
        });
        variables.state = LifecycleState::Configured;

        return Ok(());
    }

    /// Publishes the current document and starts scanning for the group. Calling it again
    /// while enabled only restarts a scan that ended on its own.
    pub async fn enable(&self) -> Result<(), DiscoveryError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        {
            let variables = self.inner.variables.lock();

            match variables.state {
                LifecycleState::Unconfigured => return Err(DiscoveryError::NotConfigured),
                LifecycleState::Active if self.inner.scanner.is_scanning() => return Ok(()),
                _ => {}
            }
        }

        let result = self.inner.activate().await;

        if let Err(error) = &result {
            error!("Failed to enable discovery: {error}");
            self.inner.variables.lock().last_error = Some(error.to_string());
        }

        return result;
    }

    /// Stops scanning and withdraws the published service.
    pub async fn disable(&self) -> Result<(), DiscoveryError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let (service_uuid, subscriptions) = {
            let mut variables = self.inner.variables.lock();

            if variables.state != LifecycleState::Active {
                return Ok(());
            }

            let Some(service_uuid) = variables.session.as_ref().map(|session| session.service_uuid) else {
                return Ok(());
            };

            variables.state = LifecycleState::Inactive;
            variables.generation += 1;
            (service_uuid, mem::take(&mut variables.subscriptions))
        };

        drop(subscriptions);

        let scan_result = self.inner.scanner.stop_scan().await;
        let withdraw_result = self.inner.publisher.remove_service(service_uuid).await;

        info!("Discovery disabled");

        scan_result?;
        withdraw_result?;

        return Ok(());
    }

    /// Replaces the local document. It is published right away when enabled, otherwise on
    /// the next `enable`. Once set up, a document peers could not read back is rejected and
    /// the previous one is kept.
    pub async fn advertise(&self, document: Document) -> Result<(), DiscoveryError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        if let Some(session) = self.inner.session() {
            encode_packets(&document, &session.config)?;
        }

        self.inner.variables.lock().document = document;

        if self.lifecycle_state() != LifecycleState::Active {
            return Ok(());
        }

        return self.inner.publish().await;
    }

    /// Re-publishes the current document.
    pub async fn save(&self) -> Result<(), DiscoveryError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        return match self.lifecycle_state() {
            LifecycleState::Unconfigured => Err(DiscoveryError::NotConfigured),
            LifecycleState::Active => self.inner.publish().await,
            _ => Ok(())
        };
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        return self.inner.variables.lock().state;
    }

    pub fn status(&self) -> DiscoveryStatus {
        let variables = self.inner.variables.lock();

        return match variables.state {
            LifecycleState::Unconfigured => DiscoveryStatus::NotConfigured,
            LifecycleState::Configured | LifecycleState::Inactive => DiscoveryStatus::Disabled,
            LifecycleState::Active => match &variables.last_error {
                Some(error) => DiscoveryStatus::Error(error.clone()),
                None => DiscoveryStatus::Enabled
            }
        };
    }

    pub fn last_error(&self) -> Option<String> {
        return self.inner.variables.lock().last_error.clone();
    }

    pub fn device_identifier(&self) -> Option<String> {
        return self.inner.variables.lock().session.as_ref().map(|session| session.device_identifier.clone());
    }

    pub fn service_uuid(&self) -> Option<Uuid> {
        return self.inner.variables.lock().session.as_ref().map(|session| session.service_uuid);
    }

    pub fn document(&self) -> Document {
        return self.inner.variables.lock().document.clone();
    }

    pub fn discovered_devices(&self) -> Vec<RemoteDevice> {
        return self.inner.variables.lock().discovered.clone();
    }

    /// Waits for the next found document accepted by `predicate`.
    pub async fn wait_for_document<P>(&self, timeout: Duration, predicate: P) -> Result<RemoteDevice, WaitError>
        where P: Fn(&RemoteDevice) -> bool + Send + Sync + 'static {
        return self.inner.events
            .wait_for_map(DiscoveryEventKind::DocumentFound, timeout, move |event| match event {
                DiscoveryEvent::DocumentFound(device) if predicate(device) => Some(device.clone()),
                _ => None
            })
            .await;
    }
}

impl DiscoveryInner {
    fn session(&self) -> Option<Session> {
        return self.variables.lock().session.clone();
    }

    /// The session if discovery is still enabled in `generation`.
    fn current_session(&self, generation: u64) -> Option<Session> {
        let variables = self.variables.lock();

        if variables.state != LifecycleState::Active || variables.generation != generation {
            return None;
        }

        return variables.session.clone();
    }

    async fn activate(self: &Arc<Self>) -> Result<(), DiscoveryError> {
        let runtime = Handle::try_current().map_err(|_| DiscoveryError::NoRuntime)?;
        let session = self.session().ok_or(DiscoveryError::NotConfigured)?;

        self.variables.lock().last_error = None;

        if let Err(error) = self.publish().await {
            if let Err(withdraw_error) = self.publisher.remove_service(session.service_uuid).await {
                warn!("Failed to withdraw service after publish failure: {withdraw_error}");
            }

            return Err(error);
        }

        if let Err(error) = self.scanner.start_scan(&[session.service_uuid.to_string()]).await {
            if let Err(withdraw_error) = self.publisher.remove_service(session.service_uuid).await {
                warn!("Failed to withdraw service after scan failure: {withdraw_error}");
            }

            return Err(error.into());
        }

        {
            let mut variables = self.variables.lock();
            variables.generation += 1;
            variables.state = LifecycleState::Active;
            variables.subscriptions = self.subscribe_to_scanner(runtime, variables.generation);
        }

        info!("Discovery enabled as {}", session.device_identifier);
        return Ok(());
    }

    fn subscribe_to_scanner(self: &Arc<Self>, runtime: Handle, generation: u64) -> Vec<Subscription> {
        let weak = Arc::downgrade(self);
        let events = self.scanner.events();

        let on_found = {
            let weak = weak.clone();

            move |event: &ScanEvent| {
                let (ScanEvent::DeviceAdded(device) | ScanEvent::DeviceUpdated(device)) = event else {
                    return;
                };

                let Some(inner) = weak.upgrade() else {
                    return;
                };

                let address = device.address.clone();
                runtime.spawn(async move {
                    inner.handle_device_found(address, generation).await;
                });
            }
        };

        let on_lost = {
            let weak = weak.clone();

            move |event: &ScanEvent| {
                if let (ScanEvent::DeviceRemoved(device), Some(inner)) = (event, weak.upgrade()) {
                    inner.handle_device_lost(&device.address);
                }
            }
        };

        let on_ended = move |event: &ScanEvent| {
            if let (ScanEvent::Ended { error: Some(error) }, Some(inner)) = (event, weak.upgrade()) {
                inner.variables.lock().last_error = Some(error.clone());
            }
        };

        return vec![
            events.subscribe(ScanEventKind::DeviceAdded, on_found.clone()),
            events.subscribe(ScanEventKind::DeviceUpdated, on_found),
            events.subscribe(ScanEventKind::DeviceRemoved, on_lost),
            events.subscribe(ScanEventKind::Ended, on_ended),
        ];
    }

    async fn publish(self: &Arc<Self>) -> Result<(), DiscoveryError> {
        let (session, document) = {
            let variables = self.variables.lock();
            let session = variables.session.clone().ok_or(DiscoveryError::NotConfigured)?;
            (session, variables.document.clone())
        };

        let packets = encode_packets(&document, &session.config)?;

        let mut characteristics: Vec<Characteristic> = packets
            .iter()
            .enumerate()
            .map(|(index, packet)| Characteristic::new(packet_uuid(index)).with_value(packet.to_bytes()))
            .collect();

        let weak = Arc::downgrade(self);
        characteristics.push(Characteristic::named(MESSAGE_CHARACTERISTIC_NAME).on_write(move |data, from| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_message(data, from);
            }
        }));

        info!("Publishing document in {} packet(s)", packets.len());
        self.publisher.create_service(session.service_uuid, characteristics).await?;

        return Ok(());
    }

    fn handle_message(&self, data: Bytes, from: String) {
        debug!("Received {} byte(s) from {from}", data.len());
        self.events.publish(DiscoveryEvent::MessageReceived { data, from });
    }

    async fn handle_device_found(self: Arc<Self>, address: String, generation: u64) {
        let Some(session) = self.current_session(generation) else {
            return;
        };

        if !self.scanner.begin_read_attempt(&address, session.config.read_suppression) {
            debug!("Skipping {address}, read attempted recently");
            return;
        }

        let document = match self.read_document(&address, &session).await {
            Ok(document) => document,
            Err(error) => {
                warn!("Failed to read document from {address}: {error}");
                return;
            }
        };

        if self.current_session(generation).is_none() {
            debug!("Discarding document from {address}, discovery was disabled during the read");
            return;
        }

        let Some(device) = self.scanner.attach_document(&address, document) else {
            debug!("Discarding document from {address}, device was lost during the read");
            return;
        };

        self.record_discovered(device);
    }

    /// Reads packets strictly in order until the final frame arrives.
    async fn read_document(&self, address: &str, session: &Session) -> Result<Document, ReadError> {
        let mut reassembler = Reassembler::new();

        for index in 0..session.config.max_packets {
            let read = self.radio.read_characteristic(address, session.service_uuid, packet_uuid(index));

            let frame = match timeout(session.config.read_timeout, read).await {
                Ok(frame) => frame?,
                Err(_) => return Err(ReadError::Timeout { index })
            };

            if reassembler.push(&frame)? {
                return Ok(reassembler.finish()?);
            }
        }

        return Err(ReadError::TooManyPackets { limit: session.config.max_packets });
    }

    /// Replaces whatever this peer published before, and any entry carrying the same `id`.
    fn record_discovered(&self, device: RemoteDevice) {
        let id = document_id(&device);

        {
            let mut variables = self.variables.lock();
            variables.discovered.retain(|existing| {
                existing.address != device.address && (id.is_none() || document_id(existing) != id)
            });
            variables.discovered.push(device.clone());
        }

        info!("Found document {} on {}", id.unwrap_or("without id"), device.address);
        self.events.publish(DiscoveryEvent::DocumentFound(device));
        self.events.publish(DiscoveryEvent::Updated);
    }

    fn handle_device_lost(&self, address: &str) {
        let removed = {
            let mut variables = self.variables.lock();
            let before = variables.discovered.len();
            variables.discovered.retain(|device| device.address != address);
            before != variables.discovered.len()
        };

        if removed {
            self.events.publish(DiscoveryEvent::Updated);
        }
    }
}

fn document_id(device: &RemoteDevice) -> Option<&str> {
    return device.document.as_ref().and_then(Document::id);
}

/// Encodes `document` and checks that a peer with the same configuration can read all of it.
fn encode_packets(document: &Document, config: &DiscoveryConfig) -> Result<Vec<FramedPacket>, DiscoveryError> {
    let packets = codec::encode(document, config.packet_size)?;

    if packets.len() > config.max_packets {
        return Err(DiscoveryError::DocumentTooLarge {
            packets: packets.len(),
            limit: config.max_packets
        });
    }

    return Ok(packets);
}
