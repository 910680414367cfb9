//! Tracing setup.
//!
//! Events are fanned out to two places: the terminal formatter, and
//! [`ConsoleLayer`] which records them in the dashboard console as `log`
//! lines. HTTP access events are sink-only.

use crate::console::{ConsoleSource, LineSink};
use std::fmt::{self, Write as _};
use std::io;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::{filter_fn, EnvFilter};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Target used by the HTTP access log.
pub const ACCESS_LOG_TARGET: &str = "sysmon::access";

/// Layer forwarding every event to a [`LineSink`] tagged as [`ConsoleSource::Log`].
pub struct ConsoleLayer {
    sink: Arc<dyn LineSink>,
}

impl ConsoleLayer {
    pub fn new(sink: Arc<dyn LineSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for ConsoleLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let meta = event.metadata();
        let text = if meta.target() == ACCESS_LOG_TARGET {
            visitor.finish()
        } else {
            format!("{} {}: {}", meta.level(), meta.target(), visitor.finish())
        };
        self.sink.write(&text, ConsoleSource::Log);
    }
}

/// Collects the `message` field plus any other fields as `key=value`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={:?}", field.name(), value);
    }
}

/// Terminal formatter plus [`ConsoleLayer`], without a level filter.
///
/// Access-log events reach `sink` only; everything else goes to both.
pub fn layers<S, W>(sink: Arc<dyn LineSink>, terminal: W) -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: io::Write + Clone + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_writer(move || terminal.clone())
        .with_filter(filter_fn(|meta| meta.target() != ACCESS_LOG_TARGET))
        .and_then(ConsoleLayer::new(sink))
}

/// Install the global subscriber.
///
/// `level` is an `EnvFilter` directive; `RUST_LOG` wins when set. Terminal
/// output goes through `terminal`, which should bypass any stderr capture.
pub fn init<W>(level: &str, sink: Arc<dyn LineSink>, terminal: W) -> Result<(), TryInitError>
where
    W: io::Write + Clone + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(layers(sink, terminal))
        .try_init()
}
