/// A published message as seen by subscribers.
///
/// Created by the hub when it dequeues a [`Publication`]; `id` is unique and
/// strictly increasing for the lifetime of the process. Shared read-only
/// between sessions through an `Arc` and never retained after fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub topic: String,
    pub body: String,
}

/// A message accepted from a publisher that has not been sequenced yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub body: String,
}

impl Publication {
    pub fn new(topic: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
        }
    }

    pub(crate) fn sequence(self, id: u64) -> Message {
        Message {
            id,
            topic: self.topic,
            body: self.body,
        }
    }
}
