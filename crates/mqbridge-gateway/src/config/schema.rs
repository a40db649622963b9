use std::net::SocketAddr;
use std::process;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use mqbridge_core::error::{BridgeError, Result};
use mqbridge_core::topic::{Topic, TopicSet};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    pub version: u32,

    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub broker: BrokerSection,

    #[serde(default)]
    pub topics: TopicSection,

    #[serde(default)]
    pub control: ControlSection,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            version: 1,
            gateway: GatewaySection::default(),
            broker: BrokerSection::default(),
            topics: TopicSection::default(),
            control: ControlSection::default(),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(BridgeError::UnsupportedVersion);
        }
        self.gateway.validate()?;
        self.broker.validate()?;
        self.topics.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Per-viewer queue of encoded frames waiting for the socket.
    #[serde(default = "default_queue")]
    pub outbound_queue: usize,

    /// Per-viewer queue of broker messages waiting for the session task.
    #[serde(default = "default_queue")]
    pub broker_queue: usize,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Honor `?topics=` on the viewer URL.
    #[serde(default)]
    pub viewer_topic_filter: bool,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            ping_interval_ms: default_ping_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            outbound_queue: default_queue(),
            broker_queue: default_queue(),
            max_frame_bytes: default_max_frame_bytes(),
            drain_timeout_ms: default_drain_timeout_ms(),
            viewer_topic_filter: false,
        }
    }
}

impl GatewaySection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        if !(5000..=120000).contains(&self.ping_interval_ms) {
            return Err(BridgeError::BadConfig(
                "gateway.ping_interval_ms must be between 5000 and 120000".into(),
            ));
        }
        if !(10000..=600000).contains(&self.idle_timeout_ms) {
            return Err(BridgeError::BadConfig(
                "gateway.idle_timeout_ms must be between 10000 and 600000".into(),
            ));
        }
        if self.idle_timeout_ms <= self.ping_interval_ms {
            return Err(BridgeError::BadConfig(
                "gateway.idle_timeout_ms must be greater than ping_interval_ms".into(),
            ));
        }
        if self.outbound_queue == 0 || self.broker_queue == 0 {
            return Err(BridgeError::BadConfig(
                "gateway.outbound_queue and gateway.broker_queue must be positive".into(),
            ));
        }
        if !(256..=1 << 20).contains(&self.max_frame_bytes) {
            return Err(BridgeError::BadConfig(
                "gateway.max_frame_bytes must be between 256 and 1048576".into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            BridgeError::BadConfig(format!("gateway.listen must be a valid SocketAddr: {e}"))
        })
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

fn default_listen() -> String {
    "0.0.0.0:3000".into()
}
fn default_ping_interval_ms() -> u64 {
    20000
}
fn default_idle_timeout_ms() -> u64 {
    60000
}
fn default_queue() -> usize {
    256
}
fn default_max_frame_bytes() -> usize {
    4096
}
fn default_drain_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerSection {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// Defaults to `server_<8 hex>`, unique per process.
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    /// TCP connect plus CONNACK wait. Applied in whole seconds, rounded up.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_clean_session")]
    pub clean_session: bool,

    /// Capacity of the client's outgoing request queue.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            client_id: None,
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            clean_session: default_clean_session(),
            request_capacity: default_request_capacity(),
        }
    }
}

impl BrokerSection {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(BridgeError::BadConfig("broker.host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(BridgeError::BadConfig("broker.port must not be 0".into()));
        }
        if matches!(&self.client_id, Some(id) if id.is_empty()) {
            return Err(BridgeError::BadConfig("broker.client_id must not be empty".into()));
        }
        if !(5..=3600).contains(&self.keep_alive_secs) {
            return Err(BridgeError::BadConfig(
                "broker.keep_alive_secs must be between 5 and 3600".into(),
            ));
        }
        if !(100..=600000).contains(&self.reconnect_backoff_ms) {
            return Err(BridgeError::BadConfig(
                "broker.reconnect_backoff_ms must be between 100 and 600000".into(),
            ));
        }
        if !(1000..=60000).contains(&self.connect_timeout_ms) {
            return Err(BridgeError::BadConfig(
                "broker.connect_timeout_ms must be between 1000 and 60000".into(),
            ));
        }
        if self.request_capacity == 0 {
            return Err(BridgeError::BadConfig("broker.request_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn client_id(&self) -> String {
        match &self.client_id {
            Some(id) => id.clone(),
            None => generated_client_id(),
        }
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout_secs(&self) -> u64 {
        self.connect_timeout_ms.div_ceil(1000)
    }
}

/// `server_` plus 8 hex digits mixed from the clock and pid.
fn generated_client_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let mixed = nanos ^ process::id().rotate_left(16);
    format!("server_{mixed:08x}")
}

fn default_broker_host() -> String {
    "broker.hivemq.com".into()
}
fn default_broker_port() -> u16 {
    1883
}
fn default_keep_alive_secs() -> u64 {
    30
}
fn default_reconnect_backoff_ms() -> u64 {
    1000
}
fn default_connect_timeout_ms() -> u64 {
    4000
}
fn default_clean_session() -> bool {
    true
}
fn default_request_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopicSection {
    #[serde(default = "default_sensors_topic")]
    pub sensors: String,
    #[serde(default = "default_control_topic")]
    pub control: String,
    #[serde(default = "default_status_topic")]
    pub status: String,
}

impl Default for TopicSection {
    fn default() -> Self {
        Self {
            sensors: default_sensors_topic(),
            control: default_control_topic(),
            status: default_status_topic(),
        }
    }
}

impl TopicSection {
    pub fn validate(&self) -> Result<()> {
        let all = [
            ("topics.sensors", &self.sensors),
            ("topics.control", &self.control),
            ("topics.status", &self.status),
        ];
        for (name, t) in all {
            if t.is_empty() {
                return Err(BridgeError::BadConfig(format!("{name} must not be empty")));
            }
        }
        if self.sensors == self.control || self.sensors == self.status || self.control == self.status {
            return Err(BridgeError::BadConfig("topics must be distinct".into()));
        }
        if self.control.contains(&['+', '#'][..]) {
            return Err(BridgeError::BadConfig(
                "topics.control is published to and must not contain wildcards".into(),
            ));
        }
        Ok(())
    }

    pub fn to_set(&self) -> TopicSet {
        TopicSet {
            sensors: Topic::new(self.sensors.as_str()),
            control: Topic::new(self.control.as_str()),
            status: Topic::new(self.status.as_str()),
        }
    }
}

fn default_sensors_topic() -> String {
    "sensors".into()
}
fn default_control_topic() -> String {
    "control".into()
}
fn default_status_topic() -> String {
    "status".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlSection {
    /// Require `{"interval": 1..=3600}` and publish it canonically. When off,
    /// the viewer's payload is forwarded verbatim.
    #[serde(default = "default_validate")]
    pub validate: bool,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            validate: default_validate(),
        }
    }
}

fn default_validate() -> bool {
    true
}
