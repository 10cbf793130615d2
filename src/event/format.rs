/// A single SSE frame before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A published message delivered to a subscriber.
    Standard { id: u64, event: String, data: String },
    /// The last frame of a session that ran out of connection time.
    TimedOut { event: String, data: String },
}

impl SseEvent {
    /// Value of the `event:` line.
    pub fn event_type(&self) -> &str {
        match self {
            SseEvent::Standard { event, .. } | SseEvent::TimedOut { event, .. } => event,
        }
    }
}

/// Renders events into the text written to the response stream.
///
/// Implementations must be stateless; one formatter is shared by every session.
pub trait EventFormatter: Send + Sync {
    fn format(&self, event: &SseEvent) -> String;
}

/// The `text/event-stream` encoding.
///
/// `data` is written verbatim: embedded newlines are not split into
/// multiple `data:` lines. The timeout frame has no colon after `data`;
/// existing clients match on that exact text.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextFormatter;

impl EventFormatter for PlainTextFormatter {
    fn format(&self, event: &SseEvent) -> String {
        match event {
            SseEvent::Standard { id, event, data } => {
                format!("id: {id}\nevent: {event}\ndata: {data}\n\n")
            }
            SseEvent::TimedOut { event, data } => format!("event: {event}\ndata {data}\n\n"),
        }
    }
}
