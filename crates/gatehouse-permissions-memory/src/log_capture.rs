//! Test subscriber that records emitted events.

use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;

/// One recorded event: its message plus every other field, formatted.
#[derive(Debug, Clone, Default)]
pub(crate) struct CapturedEvent {
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl Visit for CapturedEvent {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let formatted = format!("{:?}", value);
        if field.name() == "message" {
            self.message = formatted;
        } else {
            self.fields.push((field.name().to_string(), formatted));
        }
    }
}

#[derive(Clone, Default)]
struct CaptureLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl<S: tracing::Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut captured = CapturedEvent::default();
        event.record(&mut captured);
        self.events.lock().unwrap().push(captured);
    }
}

/// Events recorded on the current thread until dropped.
pub(crate) struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl LogCapture {
    pub fn start() -> Self {
        let layer = CaptureLayer::default();
        let events = Arc::clone(&layer.events);
        let subscriber = tracing_subscriber::registry().with(layer);
        Self {
            events,
            _guard: tracing::subscriber::set_default(subscriber),
        }
    }

    /// The first recorded event with `message`.
    pub fn find(&self, message: &str) -> Option<CapturedEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|event| event.message == message)
            .cloned()
    }
}
