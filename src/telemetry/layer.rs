use super::message::{LogLevel, TelemetryMessage};
use crate::queue::BoundedQueue;
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const CRATE_TARGET: &str = "beltgate";
const TELEMETRY_TARGET: &str = "beltgate::telemetry";

/// Copies INFO-and-above crate events into the telemetry queue
///
/// Events from the telemetry module itself are never copied, and a full
/// queue drops the message instead of blocking the caller.
#[derive(Clone)]
pub struct TelemetryLayer {
    queue: Arc<BoundedQueue<TelemetryMessage>>,
    dropped: Arc<AtomicU64>,
}

impl TelemetryLayer {
    pub fn new(queue: Arc<BoundedQueue<TelemetryMessage>>) -> Self {
        Self {
            queue,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn accepts(target: &str, level: &Level) -> bool {
        *level <= Level::INFO
            && (target == CRATE_TARGET || target.starts_with("beltgate::"))
            && !(target == TELEMETRY_TARGET || target.starts_with("beltgate::telemetry::"))
    }
}

impl<S: Subscriber> Layer<S> for TelemetryLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !Self::accepts(metadata.target(), metadata.level()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let level = LogLevel::from_tracing(metadata.level());
        let message = TelemetryMessage::new(level, visitor.finish());
        if self.queue.try_push(message).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Renders the `message` field followed by any `key=value` fields
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields
        } else {
            format!("{} {}", self.message, self.fields)
        }
    }

    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field.name(), format_args!("{}", value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            self.push_field(field.name(), format_args!("{:?}", value));
        }
    }
}
