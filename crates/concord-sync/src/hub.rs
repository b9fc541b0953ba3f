//! Shared entry point for async callers.
//!
//! The [`DiscussionHub`] owns the database and the collaborators behind one
//! async mutex. Every operation runs to completion under the lock, on the
//! blocking thread pool, so operations on the same storage context never
//! interleave. Badge deltas and events are only released after the
//! transaction has committed.

use std::sync::Arc;

use concord_shared::CryptoId;
use concord_store::Database;
use tokio::sync::{mpsc, Mutex};

use crate::collaborators::{BadgeCounters, BadgeTotals, MembershipProvider};
use crate::config::SyncConfig;
use crate::engine::DiscussionEngine;
use crate::error::Result;
use crate::events::{DiscussionEvent, Outcome};

struct HubState {
    db: Database,
    membership: Box<dyn MembershipProvider>,
    config: SyncConfig,
    badges: BadgeCounters,
}

#[derive(Clone)]
pub struct DiscussionHub {
    state: Arc<Mutex<HubState>>,
    events: mpsc::UnboundedSender<DiscussionEvent>,
}

impl DiscussionHub {
    /// Returns the hub and the receiving end of its event stream.
    pub fn new(
        db: Database,
        membership: Box<dyn MembershipProvider>,
        config: SyncConfig,
    ) -> (Self, mpsc::UnboundedReceiver<DiscussionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let state = HubState {
            db,
            membership,
            config,
            badges: BadgeCounters::new(),
        };
        (
            Self {
                state: Arc::new(Mutex::new(state)),
                events,
            },
            rx,
        )
    }

    /// Run one engine operation under the lock and publish its outcome.
    /// Nothing is published when the operation fails.
    pub async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&DiscussionEngine<'_>) -> Result<Outcome<T>> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.state.clone().lock_owned().await;
        let (mut guard, result) = tokio::task::spawn_blocking(move || {
            let result = {
                let engine =
                    DiscussionEngine::new(&guard.db, guard.membership.as_ref(), &guard.config);
                op(&engine)
            };
            (guard, result)
        })
        .await?;
        let outcome = result?;

        outcome.apply_badge_deltas(&mut guard.badges);
        for event in outcome.events {
            if self.events.send(event).is_err() {
                tracing::warn!("event receiver dropped, discarding discussion events");
                break;
            }
        }
        Ok(outcome.value)
    }

    /// Read-only access that needs no publication.
    pub async fn read<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&DiscussionEngine<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.state.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || {
            let engine = DiscussionEngine::new(&guard.db, guard.membership.as_ref(), &guard.config);
            op(&engine)
        })
        .await?
    }

    pub async fn badge_totals(&self, owned_identity: &CryptoId) -> BadgeTotals {
        self.state.lock().await.badges.totals(owned_identity)
    }
}
