use std::time::Duration;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PACKET_SIZE: usize = 20;
pub const DEFAULT_READ_SUPPRESSION: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_PACKETS: usize = 64;

/// Settings passed to `Discovery::setup`. Both sides of a group must agree on `packet_size`;
/// it is never sent over the air.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub group_identifier: String,
    pub device_identifier: Option<String>,
    pub packet_size: usize,
    #[serde(with = "seconds")]
    pub read_suppression: Duration,
    #[serde(with = "seconds")]
    pub read_timeout: Duration,
    pub max_packets: usize
}

impl DiscoveryConfig {
    pub fn new(group_identifier: impl Into<String>) -> Self {
        return Self {
            group_identifier: group_identifier.into(),
            ..Self::default()
        };
    }

    pub fn with_device_identifier(mut self, device_identifier: impl Into<String>) -> Self {
        self.device_identifier = Some(device_identifier.into());
        return self;
    }

    pub fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        return self;
    }

    pub fn with_read_suppression(mut self, read_suppression: Duration) -> Self {
        self.read_suppression = read_suppression;
        return self;
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        return self;
    }

    pub fn with_max_packets(mut self, max_packets: usize) -> Self {
        self.max_packets = max_packets;
        return self;
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        return Self {
            group_identifier: String::new(),
            device_identifier: None,
            packet_size: DEFAULT_PACKET_SIZE,
            read_suppression: DEFAULT_READ_SUPPRESSION,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_packets: DEFAULT_MAX_PACKETS
        };
    }
}

mod seconds {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> where S: Serializer {
        return serializer.serialize_u64(duration.as_secs());
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error> where D: Deserializer<'de> {
        return Ok(Duration::from_secs(u64::deserialize(deserializer)?));
    }
}
