//! Observer-multiplexing subject that fans scrape events out to subscribers.

use std::sync::{PoisonError, RwLock};

use tokio::sync::broadcast;

use crate::event::MetricEvent;

const DEFAULT_CHANNEL_SIZE: usize = 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubjectError {
    #[error("subject is closed")]
    Closed,
}

#[derive(Debug)]
struct Channel {
    sender: broadcast::Sender<MetricEvent>,
    // Keep a receiver alive so publishing without external subscribers
    // succeeds instead of erroring on a closed channel.
    _receiver: broadcast::Receiver<MetricEvent>,
}

/// In-memory subject backed by a tokio broadcast channel. Dropping a
/// subscriber's receiver is the cancellation; `close` ends the subject for
/// everyone.
#[derive(Debug)]
pub struct MemorySubject {
    channel: RwLock<Option<Channel>>,
}

impl MemorySubject {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = broadcast::channel(capacity);
        Self {
            channel: RwLock::new(Some(Channel {
                sender,
                _receiver: receiver,
            })),
        }
    }

    pub fn publish(&self, event: MetricEvent) -> Result<(), SubjectError> {
        let channel = self.channel.read().unwrap_or_else(PoisonError::into_inner);
        match channel.as_ref() {
            Some(channel) => match channel.sender.send(event) {
                Ok(_) => Ok(()),
                Err(_) => Err(SubjectError::Closed),
            },
            None => Err(SubjectError::Closed),
        }
    }

    pub fn subscribe(&self) -> Result<broadcast::Receiver<MetricEvent>, SubjectError> {
        let channel = self.channel.read().unwrap_or_else(PoisonError::into_inner);
        match channel.as_ref() {
            Some(channel) => Ok(channel.sender.subscribe()),
            None => Err(SubjectError::Closed),
        }
    }

    /// Idempotent. Pending receivers drain whatever was already published,
    /// then observe the end of the stream.
    pub fn close(&self) {
        let mut channel = self.channel.write().unwrap_or_else(PoisonError::into_inner);
        *channel = None;
    }

    pub fn is_closed(&self) -> bool {
        self.channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl Default for MemorySubject {
    fn default() -> Self {
        Self::new()
    }
}
