//! Broker topics.
//!
//! The bridge works with a fixed set of three topics known at startup. The
//! concrete names come from configuration; `TopicSet` carries them around and
//! classifies incoming topics.

use std::fmt;
use std::sync::Arc;

/// Opaque broker channel name. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(Arc<str>);

impl Topic {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Topic::new(s)
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Topic::new(s)
    }
}

/// Role of a topic within the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Sensors,
    Control,
    Status,
    Other,
}

impl TopicKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TopicKind::Sensors => "sensors",
            TopicKind::Control => "control",
            TopicKind::Status => "status",
            TopicKind::Other => "other",
        }
    }

    /// Parse a kind name as used in viewer query strings.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sensors" => Some(TopicKind::Sensors),
            "control" => Some(TopicKind::Control),
            "status" => Some(TopicKind::Status),
            _ => None,
        }
    }
}

/// The three topics the bridge is wired to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    pub sensors: Topic,
    pub control: Topic,
    pub status: Topic,
}

impl Default for TopicSet {
    fn default() -> Self {
        Self {
            sensors: Topic::new("sensors"),
            control: Topic::new("control"),
            status: Topic::new("status"),
        }
    }
}

impl TopicSet {
    pub fn classify(&self, topic: &Topic) -> TopicKind {
        if *topic == self.sensors {
            TopicKind::Sensors
        } else if *topic == self.control {
            TopicKind::Control
        } else if *topic == self.status {
            TopicKind::Status
        } else {
            TopicKind::Other
        }
    }

    pub fn get(&self, kind: TopicKind) -> Option<&Topic> {
        match kind {
            TopicKind::Sensors => Some(&self.sensors),
            TopicKind::Control => Some(&self.control),
            TopicKind::Status => Some(&self.status),
            TopicKind::Other => None,
        }
    }

    /// Topics the bridge subscribes to on startup.
    pub fn inbound(&self) -> [Topic; 2] {
        [self.sensors.clone(), self.status.clone()]
    }
}
