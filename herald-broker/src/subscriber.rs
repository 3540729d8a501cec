//! Subscriber trait and callback adapter

use herald_protocol::Message;

/// Why a subscriber could not take a message
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("Subscriber queue full, message dropped")]
    QueueFull,

    #[error("Subscriber channel closed")]
    Closed,

    #[error("Subscriber rejected message: {0}")]
    Rejected(String),

    #[error("Subscriber panicked: {0}")]
    Panicked(String),
}

impl SubscriberError {
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }
}

/// Receives messages that match its subscription.
///
/// Called on the dispatching task; implementations must not block.
pub trait Subscriber: Send + Sync {
    fn deliver(&self, message: &Message) -> Result<(), SubscriberError>;
}

/// Simple callback-based subscriber
pub struct CallbackHandler<F>
where
    F: Fn(&Message) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: Fn(&Message) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> Subscriber for CallbackHandler<F>
where
    F: Fn(&Message) + Send + Sync,
{
    fn deliver(&self, message: &Message) -> Result<(), SubscriberError> {
        (self.callback)(message);
        Ok(())
    }
}

/// Wrap a closure as a [`Subscriber`]
pub fn callback<F>(f: F) -> CallbackHandler<F>
where
    F: Fn(&Message) + Send + Sync,
{
    CallbackHandler::new(f)
}
