//! Tracing layer that turns engine log events into serializable envelopes on
//! a channel, so a host can interleave them with simulation events.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// One forwarded log line. `event` is the dotted event key (the tracing
/// message), `fields` the structured key/value pairs attached to it.
#[derive(Debug, Clone, Serialize)]
pub struct LogEnvelope {
    pub at_ms: u64,
    pub level: String,
    pub target: String,
    pub event: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
}

#[derive(Clone)]
pub struct LogForwardLayer {
    sender: Sender<LogEnvelope>,
    target_prefix: Option<String>,
}

/// Layer plus the receiving end of its channel.
pub fn log_channel() -> (LogForwardLayer, Receiver<LogEnvelope>) {
    let (sender, receiver) = unbounded();
    (LogForwardLayer::new(sender), receiver)
}

impl LogForwardLayer {
    pub fn new(sender: Sender<LogEnvelope>) -> Self {
        Self {
            sender,
            target_prefix: None,
        }
    }

    /// Only forward events whose target starts with `prefix`.
    pub fn with_target_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.target_prefix = Some(prefix.into());
        self
    }

    fn accepts(&self, target: &str) -> bool {
        self.target_prefix
            .as_deref()
            .map_or(true, |prefix| target.starts_with(prefix))
    }
}

impl<S: Subscriber> Layer<S> for LogForwardLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !self.accepts(metadata.target()) {
            return;
        }
        let mut collector = FieldCollector::default();
        event.record(&mut collector);
        let envelope = LogEnvelope {
            at_ms: now_ms(),
            level: metadata.level().as_str().to_string(),
            target: metadata.target().to_string(),
            event: collector
                .event
                .unwrap_or_else(|| metadata.name().to_string()),
            fields: collector.fields,
        };
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.sender.send(envelope);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

#[derive(Default)]
struct FieldCollector {
    event: Option<String>,
    fields: BTreeMap<String, Value>,
}

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: Value) {
        match (field.name(), value) {
            ("message", Value::String(text)) => self.event = Some(text),
            ("message", other) => self.event = Some(other.to_string()),
            (name, value) => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldCollector {
    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number);
        self.insert(field, value);
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{value:?}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn forwards_engine_events_with_fields() {
        let (layer, receiver) = log_channel();
        let subscriber =
            tracing_subscriber::registry().with(layer.with_target_prefix("worldgen"));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "worldgen::graph", kind = "npc", radius = 0.5, "entity.coordinate_overlap");
            tracing::info!(target: "elsewhere", "ignored");
        });
        let envelopes: Vec<_> = receiver.try_iter().collect();
        assert_eq!(envelopes.len(), 1);
        let envelope = &envelopes[0];
        assert_eq!(envelope.level, "WARN");
        assert_eq!(envelope.target, "worldgen::graph");
        assert_eq!(envelope.event, "entity.coordinate_overlap");
        assert_eq!(envelope.fields["kind"], "npc");
        assert_eq!(envelope.fields["radius"], 0.5);
    }

    #[test]
    fn non_finite_numbers_become_null() {
        let (layer, receiver) = log_channel();
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "worldgen::pressure", value = f64::NAN, "pressure.clamped");
        });
        let envelope = receiver.try_recv().unwrap();
        assert_eq!(envelope.fields["value"], Value::Null);
    }
}
