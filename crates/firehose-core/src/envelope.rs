//! Firehose envelopes.
//!
//! The [`wire`] module mirrors the dropsonde `events.Envelope` protobuf
//! closely enough to decode the payload kinds the exporter aggregates. Every
//! other payload (HTTP start/stop, logs, errors, container metrics) is left to
//! prost's unknown-field skipping, so those envelopes still decode and are
//! surfaced as [`Payload::Other`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use prost::Message;

use crate::error::{ConfigError, EnvelopeError};

/// Generated-style protobuf types for the dropsonde wire format.
pub mod wire {
    use std::collections::HashMap;

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Envelope {
        #[prost(string, required, tag = "1")]
        pub origin: String,
        #[prost(enumeration = "EventType", required, tag = "2")]
        pub event_type: i32,
        #[prost(int64, optional, tag = "6")]
        pub timestamp: Option<i64>,
        #[prost(message, optional, tag = "9")]
        pub value_metric: Option<ValueMetric>,
        #[prost(message, optional, tag = "10")]
        pub counter_event: Option<CounterEvent>,
        #[prost(string, optional, tag = "13")]
        pub deployment: Option<String>,
        #[prost(string, optional, tag = "14")]
        pub job: Option<String>,
        #[prost(string, optional, tag = "15")]
        pub index: Option<String>,
        #[prost(string, optional, tag = "16")]
        pub ip: Option<String>,
        #[prost(map = "string, string", tag = "17")]
        pub tags: HashMap<String, String>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ValueMetric {
        #[prost(string, required, tag = "1")]
        pub name: String,
        #[prost(double, required, tag = "2")]
        pub value: f64,
        #[prost(string, required, tag = "3")]
        pub unit: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct CounterEvent {
        #[prost(string, required, tag = "1")]
        pub name: String,
        #[prost(uint64, required, tag = "2")]
        pub delta: u64,
        #[prost(uint64, optional, tag = "3")]
        pub total: Option<u64>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum EventType {
        HttpStartStop = 4,
        LogMessage = 5,
        ValueMetric = 6,
        CounterEvent = 7,
        Error = 8,
        ContainerMetric = 9,
    }
}

/// The closed set of event kinds carried by the firehose.
///
/// `Error` is the bus's own diagnostic kind; it is accepted and counted but
/// never aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    HttpStartStop,
    LogMessage,
    ValueMetric,
    CounterEvent,
    Error,
    ContainerMetric,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::ContainerMetric,
        EventKind::CounterEvent,
        EventKind::Error,
        EventKind::HttpStartStop,
        EventKind::LogMessage,
        EventKind::ValueMetric,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::HttpStartStop => "HttpStartStop",
            EventKind::LogMessage => "LogMessage",
            EventKind::ValueMetric => "ValueMetric",
            EventKind::CounterEvent => "CounterEvent",
            EventKind::Error => "Error",
            EventKind::ContainerMetric => "ContainerMetric",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| ConfigError::UnknownEventKind(s.to_string()))
    }
}

impl From<wire::EventType> for EventKind {
    fn from(t: wire::EventType) -> Self {
        match t {
            wire::EventType::HttpStartStop => EventKind::HttpStartStop,
            wire::EventType::LogMessage => EventKind::LogMessage,
            wire::EventType::ValueMetric => EventKind::ValueMetric,
            wire::EventType::CounterEvent => EventKind::CounterEvent,
            wire::EventType::Error => EventKind::Error,
            wire::EventType::ContainerMetric => EventKind::ContainerMetric,
        }
    }
}

impl From<EventKind> for wire::EventType {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::HttpStartStop => wire::EventType::HttpStartStop,
            EventKind::LogMessage => wire::EventType::LogMessage,
            EventKind::ValueMetric => wire::EventType::ValueMetric,
            EventKind::CounterEvent => wire::EventType::CounterEvent,
            EventKind::Error => wire::EventType::Error,
            EventKind::ContainerMetric => wire::EventType::ContainerMetric,
        }
    }
}

/// Counter payload: the emitter's last increment and its running total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterEvent {
    pub name: String,
    pub delta: u64,
    pub total: u64,
}

/// Value payload: an instantaneous gauge reading.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueMetric {
    pub name: String,
    pub value: f64,
    pub unit: String,
}

/// Exactly one payload per envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Counter(CounterEvent),
    Value(ValueMetric),
    /// Accepted off the wire but never aggregated.
    Other(EventKind),
}

impl Payload {
    pub fn kind(&self) -> EventKind {
        match self {
            Payload::Counter(_) => EventKind::CounterEvent,
            Payload::Value(_) => EventKind::ValueMetric,
            Payload::Other(kind) => *kind,
        }
    }
}

/// A decoded firehose envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub origin: String,
    /// Emitter timestamp, nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub deployment: String,
    pub job: String,
    pub index: String,
    pub ip: String,
    pub tags: BTreeMap<String, String>,
    pub payload: Payload,
}

impl Envelope {
    /// Create an envelope with empty metadata.
    pub fn new(origin: impl Into<String>, payload: Payload) -> Self {
        Self {
            origin: origin.into(),
            timestamp: 0,
            deployment: String::new(),
            job: String::new(),
            index: String::new(),
            ip: String::new(),
            tags: BTreeMap::new(),
            payload,
        }
    }

    /// Shorthand for a counter envelope.
    pub fn counter(origin: impl Into<String>, name: impl Into<String>, delta: u64, total: u64) -> Self {
        Self::new(
            origin,
            Payload::Counter(CounterEvent {
                name: name.into(),
                delta,
                total,
            }),
        )
    }

    /// Shorthand for a value envelope.
    pub fn value(
        origin: impl Into<String>,
        name: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self::new(
            origin,
            Payload::Value(ValueMetric {
                name: name.into(),
                value,
                unit: unit.into(),
            }),
        )
    }

    /// Set the BOSH job coordinates.
    pub fn with_job(
        mut self,
        deployment: impl Into<String>,
        job: impl Into<String>,
        index: impl Into<String>,
        ip: impl Into<String>,
    ) -> Self {
        self.deployment = deployment.into();
        self.job = job.into();
        self.index = index.into();
        self.ip = ip.into();
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Decode one protobuf-encoded envelope (one websocket frame).
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let raw = wire::Envelope::decode(bytes)?;
        Self::try_from(raw)
    }

    /// Encode back to the wire format.
    ///
    /// Payloads of [`Payload::Other`] kinds are encoded without a body.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        wire::Envelope::from(self).encode_to_vec()
    }
}

impl TryFrom<wire::Envelope> for Envelope {
    type Error = EnvelopeError;

    fn try_from(raw: wire::Envelope) -> Result<Self, Self::Error> {
        let kind: EventKind = wire::EventType::try_from(raw.event_type)
            .map_err(|_| EnvelopeError::UnknownEventType(raw.event_type))?
            .into();

        let payload = match kind {
            EventKind::CounterEvent => {
                let c = raw
                    .counter_event
                    .ok_or(EnvelopeError::MissingPayload(kind))?;
                Payload::Counter(CounterEvent {
                    name: c.name,
                    delta: c.delta,
                    total: c.total.unwrap_or_default(),
                })
            }
            EventKind::ValueMetric => {
                let v = raw
                    .value_metric
                    .ok_or(EnvelopeError::MissingPayload(kind))?;
                Payload::Value(ValueMetric {
                    name: v.name,
                    value: v.value,
                    unit: v.unit,
                })
            }
            other => Payload::Other(other),
        };

        Ok(Self {
            origin: raw.origin,
            timestamp: raw.timestamp.unwrap_or_default(),
            deployment: raw.deployment.unwrap_or_default(),
            job: raw.job.unwrap_or_default(),
            index: raw.index.unwrap_or_default(),
            ip: raw.ip.unwrap_or_default(),
            tags: raw.tags.into_iter().collect(),
            payload,
        })
    }
}

impl From<&Envelope> for wire::Envelope {
    fn from(env: &Envelope) -> Self {
        let (counter_event, value_metric) = match &env.payload {
            Payload::Counter(c) => (
                Some(wire::CounterEvent {
                    name: c.name.clone(),
                    delta: c.delta,
                    total: Some(c.total),
                }),
                None,
            ),
            Payload::Value(v) => (
                None,
                Some(wire::ValueMetric {
                    name: v.name.clone(),
                    value: v.value,
                    unit: v.unit.clone(),
                }),
            ),
            Payload::Other(_) => (None, None),
        };

        wire::Envelope {
            origin: env.origin.clone(),
            event_type: wire::EventType::from(env.kind()) as i32,
            timestamp: Some(env.timestamp),
            value_metric,
            counter_event,
            deployment: Some(env.deployment.clone()),
            job: Some(env.job.clone()),
            index: Some(env.index.clone()),
            ip: Some(env.ip.clone()),
            tags: env.tags.clone().into_iter().collect(),
        }
    }
}
