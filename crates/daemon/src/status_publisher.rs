// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 LLM Tunnel Manager Contributors

//! Observer registry for completed health-check passes

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use llm_tunnel_common::StatusSnapshot;

/// Handle returned by [`StatusPublisher::subscribe`]
pub type SubscriptionId = Uuid;

type Subscribers = HashMap<SubscriptionId, mpsc::UnboundedSender<Arc<StatusSnapshot>>>;

/// Receiving end of a subscription.
///
/// Snapshots arrive in pass-completion order. Dropping the subscription
/// is enough to stop delivery; the publisher prunes it on the next pass.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<Arc<StatusSnapshot>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next snapshot; `None` once unsubscribed
    pub async fn recv(&mut self) -> Option<Arc<StatusSnapshot>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<StatusSnapshot>> {
        self.rx.try_recv().ok()
    }
}

/// Fan-out of pass results to any number of subscribers
#[derive(Clone, Default)]
pub struct StatusPublisher {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        // A poisoned map is still a valid map
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.lock().insert(id, tx);
        debug!("Status subscriber {} added", id);
        Subscription { id, rx }
    }

    /// Remove a subscriber; returns false when the id was unknown
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            debug!("Status subscriber {} removed", id);
        }
        removed
    }

    /// Deliver a snapshot to every live subscriber and return how many got it
    pub fn publish(&self, snapshot: Arc<StatusSnapshot>) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|id, tx| {
            let alive = tx.send(snapshot.clone()).is_ok();
            if !alive {
                trace!("Dropping closed status subscriber {}", id);
            }
            alive
        });
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Drop every subscriber, ending their streams
    pub fn close(&self) {
        self.lock().clear();
    }
}
