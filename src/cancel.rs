//! Cancellation bus - process-wide broadcast of cancellation intents
//!
//! Active transfer operations subscribe for their own lifetime and decide
//! for themselves whether an intent applies. Nothing is queued or replayed:
//! an intent only reaches subscribers that exist when it is published.

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::transfer::Direction;

const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelScope {
    Upload,
    Download,
    Any,
}

impl CancelScope {
    pub fn covers(self, direction: Direction) -> bool {
        match self {
            CancelScope::Any => true,
            CancelScope::Upload => direction == Direction::Upload,
            CancelScope::Download => direction == Direction::Download,
        }
    }
}

impl From<Direction> for CancelScope {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Upload => CancelScope::Upload,
            Direction::Download => CancelScope::Download,
        }
    }
}

impl std::fmt::Display for CancelScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelScope::Upload => write!(f, "upload"),
            CancelScope::Download => write!(f, "download"),
            CancelScope::Any => write!(f, "any"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelIntent {
    pub scope: CancelScope,
    /// `None` targets whatever is active in the scope.
    pub remote: Option<String>,
}

impl CancelIntent {
    pub fn current(scope: CancelScope) -> Self {
        Self {
            scope,
            remote: None,
        }
    }

    pub fn path(scope: CancelScope, remote: impl Into<String>) -> Self {
        Self {
            scope,
            remote: Some(remote.into()),
        }
    }

    pub fn matches(&self, direction: Direction, remote: &str) -> bool {
        self.scope.covers(direction) && self.remote.as_deref().map_or(true, |path| path == remote)
    }
}

#[derive(Clone)]
pub struct CancellationBus {
    sender: broadcast::Sender<CancelIntent>,
}

impl Default for CancellationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Returns how many subscribers saw the intent.
    pub fn publish(&self, intent: CancelIntent) -> usize {
        debug!("cancel_bus: publish {} {:?}", intent.scope, intent.remote);
        self.sender.send(intent).unwrap_or(0)
    }

    pub fn subscribe(&self) -> CancelSubscription {
        CancelSubscription {
            receiver: Some(self.sender.subscribe()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct CancelSubscription {
    receiver: Option<broadcast::Receiver<CancelIntent>>,
}

impl CancelSubscription {
    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }

    /// Next intent, or `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<CancelIntent> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(intent) => return Some(intent),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("cancel_bus: subscriber lagged by {}", skipped);
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Idempotent.
    pub fn unsubscribe(&mut self) {
        self.receiver = None;
    }
}
