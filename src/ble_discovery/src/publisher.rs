use std::collections::HashMap;
use std::fmt;
use std::fmt::Display;
use std::sync::Arc;
use bytes::Bytes;
use futures::future::join_all;
use log::{debug, info, warn};
use parking_lot::Mutex;
use uuid::Uuid;
use crate::errors::RadioError;
use crate::radio::{BleImplementationDelegate, CharacteristicDescriptor};
use crate::uuid_encoder::to_uuid;

pub type WriteHandler = Arc<dyn Fn(Bytes, String) + Send + Sync>;

#[derive(Clone)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub readable: bool,
    pub writable: bool,
    pub value: Option<Bytes>,
    on_write: Option<WriteHandler>
}

impl Characteristic {
    pub fn new(uuid: Uuid) -> Self {
        return Self {
            uuid,
            readable: false,
            writable: false,
            value: None,
            on_write: None
        };
    }

    pub fn named(name: impl Display) -> Self {
        return Self::new(to_uuid(name));
    }

    /// Makes the characteristic readable with a fixed value.
    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.readable = true;
        self.value = Some(value.into());
        return self;
    }

    /// Makes the characteristic writable. The handler receives the written data and the
    /// sender's address.
    pub fn on_write<F>(mut self, handler: F) -> Self where F: Fn(Bytes, String) + Send + Sync + 'static {
        self.writable = true;
        self.on_write = Some(Arc::new(handler));
        return self;
    }

    pub fn descriptor(&self) -> CharacteristicDescriptor {
        return CharacteristicDescriptor {
            uuid: self.uuid,
            readable: self.readable,
            writable: self.writable,
            value: self.value.clone()
        };
    }
}

impl fmt::Debug for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.debug_struct("Characteristic")
            .field("uuid", &self.uuid)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("value", &self.value)
            .finish();
    }
}

#[derive(Debug, Default)]
struct PublisherVariables {
    ready: bool,
    services: HashMap<Uuid, Vec<Characteristic>>
}

/// Owns the locally advertised GATT services and re-registers them whenever the radio
/// comes back, since native advertisement state is lost across power cycles.
#[derive(Debug)]
pub struct ServicePublisher {
    radio: Arc<dyn BleImplementationDelegate>,
    variables: Mutex<PublisherVariables>
}

impl ServicePublisher {
    pub fn new(radio: Arc<dyn BleImplementationDelegate>) -> Self {
        return Self {
            radio,
            variables: Mutex::new(PublisherVariables::default())
        };
    }

    pub fn is_ready(&self) -> bool {
        return self.variables.lock().ready;
    }

    pub fn services(&self) -> Vec<Uuid> {
        return self.variables.lock().services.keys().copied().collect();
    }

    pub fn characteristics(&self, service: Uuid) -> Option<Vec<CharacteristicDescriptor>> {
        return self.variables
            .lock()
            .services
            .get(&service)
            .map(|characteristics| characteristics.iter().map(Characteristic::descriptor).collect());
    }

    /// Registers (or replaces) a service and returns its UUID. When the radio rejects it,
    /// the previously stored list (if any) is kept, so a later replay never advertises it.
    pub async fn create_service(&self, name: impl Display, characteristics: Vec<Characteristic>) -> Result<Uuid, RadioError> {
        let service = to_uuid(name);
        let descriptors: Vec<CharacteristicDescriptor> = characteristics.iter().map(Characteristic::descriptor).collect();

        let previous = self.variables.lock().services.insert(service, characteristics);

        info!("Creating service {service} with {} characteristic(s)", descriptors.len());

        if let Err(error) = self.radio.create_service(service, descriptors).await {
            let mut variables = self.variables.lock();

            match previous {
                Some(previous) => variables.services.insert(service, previous),
                None => variables.services.remove(&service)
            };

            return Err(error);
        }

        return Ok(service);
    }

    pub async fn remove_service(&self, name: impl Display) -> Result<(), RadioError> {
        let service = to_uuid(name);

        if self.variables.lock().services.remove(&service).is_none() {
            debug!("Service {service} is not registered");
            return Ok(());
        }

        info!("Removing service {service}");
        return self.radio.remove_service(service).await;
    }

    pub async fn on_ready_state_changed(&self, ready: bool) {
        let services: Vec<(Uuid, Vec<CharacteristicDescriptor>)> = {
            let mut variables = self.variables.lock();
            let was_ready = variables.ready;
            variables.ready = ready;

            if !ready || was_ready {
                return;
            }

            variables.services
                .iter()
                .map(|(service, characteristics)| (*service, characteristics.iter().map(Characteristic::descriptor).collect()))
                .collect()
        };

        let replays = services.into_iter().map(|(service, descriptors)| async move {
            info!("Recreating service {service} with {} characteristic(s)", descriptors.len());

            if let Err(error) = self.radio.create_service(service, descriptors).await {
                warn!("Failed to recreate service {service}: {error}");
            }
        });

        join_all(replays).await;
    }

    /// Routes a write from a remote device to the characteristic's handler. Returns `false`
    /// when no writable characteristic matched.
    pub fn on_characteristic_written(&self, service: Uuid, characteristic: Uuid, data: impl Into<Bytes>, sender: String) -> bool {
        let handler = self.variables
            .lock()
            .services
            .get(&service)
            .and_then(|characteristics| characteristics.iter().find(|entry| entry.uuid == characteristic))
            .and_then(|entry| entry.on_write.clone());

        let Some(handler) = handler else {
            warn!("Ignoring write from {sender} to {service}/{characteristic}");
            return false;
        };

        handler(data.into(), sender);
        return true;
    }
}
