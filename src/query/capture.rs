//! Scoped capture of diagnostic messages emitted while a command runs.
//!
//! A [`MessageCapture`] owns a `tracing` span with a message buffer attached
//! to it. Drivers with a native message channel push into the buffer through
//! the result sink; drivers that only log their messages (sqlx reports
//! PostgreSQL notices as events under [`NOTICE_TARGET`]) reach it through
//! [`MessageCaptureLayer`], which routes each such event to the nearest
//! enclosing capture span.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Metadata, Span, Subscriber};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Registry;

use crate::db::{InfoMessage, Table};

/// Event target under which sqlx logs PostgreSQL notices.
pub const NOTICE_TARGET: &str = "sqlx::postgres::notice";

const CAPTURE_SPAN: &str = "message_capture";

/// Shared message buffer, stored in the capture span's extensions.
#[derive(Debug, Clone, Default)]
struct CaptureBuffer(Arc<Mutex<Vec<InfoMessage>>>);

impl CaptureBuffer {
    fn push(&self, message: InfoMessage) {
        let mut messages = self.0.lock().unwrap_or_else(|e| e.into_inner());
        messages.push(message);
    }

    fn take(&self) -> Vec<InfoMessage> {
        let mut messages = self.0.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *messages)
    }
}

/// Collects the diagnostic messages of one command.
///
/// Dropping the capture without calling [`finish`](Self::finish) discards the
/// messages and closes its span.
#[derive(Debug)]
pub struct MessageCapture {
    span: Span,
    buffer: CaptureBuffer,
}

impl MessageCapture {
    /// Creates the capture span and attaches an empty buffer to it.
    ///
    /// Without a [`Registry`]-based subscriber the span is inert and only
    /// messages pushed with [`push`](Self::push) are collected.
    pub fn install() -> Self {
        let span = tracing::trace_span!("message_capture");
        let buffer = CaptureBuffer::default();

        span.with_subscriber(|(id, dispatch)| {
            if let Some(registry) = dispatch.downcast_ref::<Registry>() {
                if let Some(span_ref) = registry.span(id) {
                    span_ref.extensions_mut().insert(buffer.clone());
                }
            }
        });

        Self { span, buffer }
    }

    /// The span the command must run in for logged messages to be captured.
    pub fn span(&self) -> Span {
        self.span.clone()
    }

    /// Records a message directly.
    pub fn push(&self, message: InfoMessage) {
        self.buffer.push(message);
    }

    /// Releases the capture and returns the synthetic diagnostic table.
    pub fn finish(self) -> Table {
        Table::information_messages(self.buffer.take())
    }
}

/// Routes driver notice events into the enclosing [`MessageCapture`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCaptureLayer;

impl MessageCaptureLayer {
    /// The layer with its own filter, independent of the log level.
    pub fn filtered<S>() -> impl Layer<S>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        MessageCaptureLayer.with_filter(filter_fn(is_capture_metadata))
    }
}

fn is_capture_metadata(metadata: &Metadata<'_>) -> bool {
    if metadata.is_span() {
        metadata.name() == CAPTURE_SPAN && metadata.target() == module_path!()
    } else {
        metadata.target() == NOTICE_TARGET
    }
}

impl<S> Layer<S> for MessageCaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if event.metadata().target() != NOTICE_TARGET {
            return;
        }

        let Some(scope) = ctx.event_scope(event) else {
            return;
        };

        for span in scope {
            let extensions = span.extensions();
            if let Some(buffer) = extensions.get::<CaptureBuffer>() {
                let mut visitor = MessageVisitor::default();
                event.record(&mut visitor);
                buffer.push(InfoMessage::new(
                    severity_class(event.metadata().level()),
                    visitor.message,
                ));
                return;
            }
        }
    }
}

/// sqlx maps notice severities onto levels; map them back to a class name.
fn severity_class(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "NOTICE",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "LOG",
    }
}

/// Extracts the `message` field of an event.
#[derive(Default)]
pub(crate) struct MessageVisitor {
    pub(crate) message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}
