//! Active host transfers, keyed so `file-cancel` can find them

use log::info;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::cancel::CancelIntent;
use crate::transfer::Direction;

struct ActiveTransfer {
    direction: Direction,
    remote: String,
    token: CancellationToken,
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    active: HashMap<u64, ActiveTransfer>,
}

#[derive(Clone, Default)]
pub(crate) struct TransferRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl TransferRegistry {
    /// Register a transfer; it stays cancellable until the guard drops.
    pub fn register(&self, direction: Direction, remote: &str) -> TransferGuard {
        let token = CancellationToken::new();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.next_id += 1;
        let id = state.next_id;
        state.active.insert(
            id,
            ActiveTransfer {
                direction,
                remote: remote.to_string(),
                token: token.clone(),
            },
        );
        TransferGuard {
            id,
            token,
            registry: self.clone(),
        }
    }

    /// Cancel every registered transfer the intent matches.
    pub fn cancel(&self, intent: &CancelIntent) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cancelled = 0;
        for transfer in state.active.values() {
            if intent.matches(transfer.direction, &transfer.remote) {
                info!("host_cancel: {} {}", transfer.direction, transfer.remote);
                transfer.token.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .len()
    }

    fn remove(&self, id: u64) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .remove(&id);
    }
}

pub(crate) struct TransferGuard {
    id: u64,
    token: CancellationToken,
    registry: TransferRegistry,
}

impl TransferGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
