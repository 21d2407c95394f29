//! Best-effort notification side channel.
//!
//! A successful message append enqueues a notification for the recipient on
//! a bounded in-process queue; a dedicated worker thread drains the queue
//! and writes notification rows on its own pooled connection. Nothing on
//! this path can fail or delay the originating send: a full queue or a
//! failed write is logged and dropped, never retried and never propagated.

use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::libs::core::models::Notification;
use crate::libs::storage::database::storage_sqlite::{SqliteStore, SqliteTransaction};
use crate::libs::storage::storage_traits::{NotificationStore, StoreError, Transactional};

pub struct NotificationDispatcher {
    tx: Option<SyncSender<Notification>>,
    worker: Option<JoinHandle<()>>,
}

impl NotificationDispatcher {
    /// Spawns the worker thread. `queue_depth` bounds how many undelivered
    /// notifications may be pending before new ones are dropped.
    pub fn spawn(store: SqliteStore, queue_depth: usize) -> Self {
        let (tx, rx) = sync_channel::<Notification>(queue_depth.max(1));
        let worker = thread::Builder::new()
            .name("notification-dispatcher".into())
            .spawn(move || {
                // The loop ends when the sending side is dropped.
                for notification in rx {
                    if let Err(e) = persist(&store, &notification) {
                        warn!(
                            notification_id = %notification.id,
                            user_id = %notification.user_id,
                            error = %e,
                            "failed to persist notification, dropping"
                        );
                    }
                }
            })
            .expect("failed to spawn notification dispatcher thread");
        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// Hands a notification to the worker without blocking. Queue pressure
    /// means drops, by design: this channel promises nothing beyond
    /// best-effort.
    pub fn dispatch(&self, notification: Notification) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => {
                warn!(
                    notification_id = %n.id,
                    user_id = %n.user_id,
                    "notification queue full, dropping"
                );
            }
            Err(TrySendError::Disconnected(n)) => {
                warn!(
                    notification_id = %n.id,
                    "notification dispatcher already stopped, dropping"
                );
            }
        }
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is already queued
        // before exiting.
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("notification dispatcher worker panicked");
            } else {
                debug!("notification dispatcher drained and stopped");
            }
        }
    }
}

fn persist(store: &SqliteStore, notification: &Notification) -> Result<(), StoreError> {
    let mut conn = store.new_connection()?;
    let mut tx = SqliteTransaction::write(&mut conn)?;
    tx.insert_notification(notification)?;
    tx.commit()
}
