//! Session registry implementation
//!
//! The process-wide map from source id to its active session. Sessions are
//! created on first acquire, shared by every later acquire, and torn down a
//! grace period after the last subscriber leaves. At most one capture loop
//! runs per source id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::error::AcquireError;
use crate::config::RelayConfig;
use crate::session::{Session, SessionState, StreamNotice, SubscriberHandle, SubscriberId};
use crate::source::SourceOpener;
use crate::store::{ConfigStore, SourceId};

/// Snapshot of one session's observable state
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Lifecycle state
    pub state: SessionState,
    /// Number of joined subscribers
    pub subscribers: usize,
    /// Frames dropped to full subscriber queues
    pub frames_dropped: u64,
    /// Terminal notice, if the session failed
    pub last_error: Option<StreamNotice>,
}

/// Process-wide registry of active sessions
///
/// The id→session map is the only cross-task shared state; every mutation
/// (create, remove, teardown scheduling) is serialized through its `RwLock`.
/// Grace-timer cancellation and subscriber joins are ordered by the same
/// lock, so a viewer that re-acquires during the grace period always lands
/// on the live session.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SourceId, Arc<Session>>>,
    store: Arc<dyn ConfigStore>,
    opener: Arc<dyn SourceOpener>,
    config: RelayConfig,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new(
        config: RelayConfig,
        store: Arc<dyn ConfigStore>,
        opener: Arc<dyn SourceOpener>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            opener,
            config,
        }
    }

    /// The relay configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Join the session for `id`, creating it on first acquire
    ///
    /// Resolves the source descriptor through the configuration store when
    /// no session exists; fails with `NotFound`/`Inactive` without creating
    /// anything. Concurrent acquires for one id observe a single session.
    pub async fn acquire(self: &Arc<Self>, id: &SourceId) -> Result<SubscriberHandle, AcquireError> {
        // Fast path: join the existing session. The read guard is held
        // across the join so a concurrent grace-timer cancellation (which
        // runs under the write lock) cannot slip between check and join.
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(id) {
                if !session.is_cancelled() && !session.state().is_terminal() {
                    return Ok(session.join());
                }
            }
        }

        // Resolve configuration outside the lock; lookup failures never
        // create a session.
        let descriptor = self
            .store
            .get(id)
            .await
            .ok_or_else(|| AcquireError::NotFound(id.clone()))?;
        if !descriptor.active {
            return Err(AcquireError::Inactive(id.clone()));
        }

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(id) {
            // Another caller won the race; join its session.
            if !existing.is_cancelled() && !existing.state().is_terminal() {
                return Ok(existing.join());
            }
            // A dying session is still registered. Evict it now; its capture
            // task only removes the entry it created, so the replacement
            // below is safe.
            sessions.remove(id);
        }

        let session = Session::new(descriptor, self.config.clone());
        let handle = session.join();
        sessions.insert(id.clone(), Arc::clone(&session));
        drop(sessions);

        self.spawn_capture(session);
        tracing::info!(source = %id, "Session created");
        Ok(handle)
    }

    /// Drop a subscriber from `id`'s session
    ///
    /// When the last subscriber leaves, teardown is scheduled after the
    /// grace period; a re-acquire within the period reuses the session.
    pub async fn release(self: &Arc<Self>, id: &SourceId, subscriber: SubscriberId) {
        let session = {
            let sessions = self.sessions.read().await;
            sessions.get(id).cloned()
        };
        let Some(session) = session else { return };

        session.leave(subscriber);
        if session.subscriber_count() == 0 && !session.is_cancelled() {
            self.schedule_teardown(id.clone(), session);
        }
    }

    /// Cancel every session and wait for the capture tasks to finish
    /// releasing their handles
    pub async fn stop_all(&self) {
        let sessions: Vec<(SourceId, Arc<Session>)> =
            self.sessions.write().await.drain().collect();

        for (_, session) in &sessions {
            session.stop();
        }
        for (id, session) in sessions {
            if let Some(task) = session.take_task() {
                if let Err(e) = task.await {
                    tracing::warn!(source = %id, error = %e, "Capture task join failed");
                }
            }
        }

        tracing::info!("All sessions stopped");
    }

    /// Number of registered sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether a session is registered for `id`
    pub async fn has_session(&self, id: &SourceId) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Observable state of `id`'s session, if registered
    pub async fn session_stats(&self, id: &SourceId) -> Option<SessionStats> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(id)?;
        Some(SessionStats {
            state: session.state(),
            subscribers: session.subscriber_count(),
            frames_dropped: session.frames_dropped(),
            last_error: session.last_error(),
        })
    }

    /// Spawn the capture task; it removes its own registry entry when the
    /// loop exits, whether stopped or failed.
    fn spawn_capture(self: &Arc<Self>, session: Arc<Session>) {
        let registry = Arc::clone(self);
        let runner = Arc::clone(&session);

        let task = tokio::spawn(async move {
            let opener = Arc::clone(&registry.opener);
            runner.run(opener).await;

            let id = &runner.descriptor().id;
            let mut sessions = registry.sessions.write().await;
            let is_current = sessions
                .get(id)
                .map(|current| Arc::ptr_eq(current, &runner))
                .unwrap_or(false);
            if is_current {
                sessions.remove(id);
                tracing::info!(source = %id, state = ?runner.state(), "Session removed");
            }
        });

        session.set_task(task);
    }

    fn schedule_teardown(self: &Arc<Self>, id: SourceId, session: Arc<Session>) {
        let registry = Arc::clone(self);
        let grace = self.config.grace_period;
        let epoch = session.epoch();

        tracing::debug!(
            source = %id,
            grace_ms = grace.as_millis() as u64,
            "Last subscriber left, teardown scheduled"
        );

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;

            // Re-check under the write lock: a viewer that re-acquired
            // during the grace period keeps the session alive. Any join
            // since this timer was scheduled supersedes it, even if the
            // joiner has already left again; that later leave scheduled
            // its own timer with a fresh grace window.
            let sessions = registry.sessions.write().await;
            let still_current = sessions
                .get(&id)
                .map(|current| Arc::ptr_eq(current, &session))
                .unwrap_or(false);

            if still_current && session.epoch() == epoch && session.subscriber_count() == 0 {
                session.stop();
                tracing::info!(source = %id, "Session torn down: no subscribers");
            }
        });
    }
}
