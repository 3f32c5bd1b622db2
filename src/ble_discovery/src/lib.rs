pub mod codec;
pub mod config;
pub mod discovery;
pub mod document;
pub mod errors;
pub mod events;
pub mod publisher;
pub mod radio;
pub mod scan;
pub mod uuid_encoder;

pub use config::DiscoveryConfig;
pub use discovery::{Discovery, DiscoveryEvent, DiscoveryEventKind, DiscoveryStatus, LifecycleState};
pub use document::Document;
pub use events::{EventEmitter, Subscription, Topic};
pub use publisher::{Characteristic, ServicePublisher};
pub use radio::{BleImplementationDelegate, CharacteristicDescriptor};
pub use scan::{RemoteDevice, ScanController, ScanEvent, ScanEventKind, ScanState};
pub use uuid_encoder::to_uuid;

pub const MESSAGE_CHARACTERISTIC_NAME: &str = "msg";
pub const DATA_CHARACTERISTIC_PREFIX: &str = "data:";

pub fn init_logger() {
    #[cfg(target_os = "android")]
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Debug)
            .with_tag("ble_discovery"),
    );

    #[cfg(not(target_os = "android"))]
    let _ = env_logger::try_init();
}
