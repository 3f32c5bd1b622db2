use std::fmt::Debug;
use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;
use crate::errors::RadioError;

/// What the native GATT server is told about a characteristic. Write callbacks never cross
/// this boundary; inbound writes come back through `ServicePublisher::on_characteristic_written`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub uuid: Uuid,
    pub readable: bool,
    pub writable: bool,
    pub value: Option<Bytes>
}

/// The native Bluetooth LE stack. Implemented by the platform bridge and injected into
/// `ScanController`, `ServicePublisher` and `Discovery`.
#[async_trait]
pub trait BleImplementationDelegate: Send + Sync + Debug {
    async fn scan(&self, service_filter: Vec<Uuid>) -> Result<(), RadioError>;
    async fn stop_scan(&self) -> Result<(), RadioError>;
    async fn create_service(&self, service: Uuid, characteristics: Vec<CharacteristicDescriptor>) -> Result<(), RadioError>;
    async fn remove_service(&self, service: Uuid) -> Result<(), RadioError>;
    async fn read_characteristic(&self, address: &str, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>, RadioError>;
}
