//! Stream sessions
//!
//! A [`Session`] owns one capture handle for one source id: the capture
//! loop task, the subscriber fan-out group, and the lifecycle state machine
//! `Idle → Starting → Running → Stopping` (or `Failed` on unrecoverable
//! errors). The registry guarantees at most one session per source id.

pub mod group;
pub mod payload;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::source::{FrameSource, SourceOpener};
use crate::store::SourceDescriptor;

pub use group::{SubscriberEvent, SubscriberGroup, SubscriberHandle, SubscriberId};
pub use payload::{FramePayload, NoticeKind, StreamNotice};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, capture not yet started
    Idle,
    /// Capture open in progress
    Starting,
    /// Capture loop publishing frames
    Running,
    /// Cancelled; capture handle released or being released
    Stopping,
    /// Unrecoverable open/read error
    Failed,
}

impl SessionState {
    /// Whether the session will never publish another frame
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopping | SessionState::Failed)
    }
}

/// How the capture loop ended
enum LoopExit {
    Cancelled,
    Terminal(StreamNotice),
}

struct SessionInner {
    state: SessionState,
    last_error: Option<StreamNotice>,
}

/// One active stream session
pub struct Session {
    descriptor: SourceDescriptor,
    config: RelayConfig,
    group: SubscriberGroup,
    inner: Mutex<SessionInner>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every join; a pending teardown timer is stale once it moves
    epoch: AtomicU64,
}

impl Session {
    /// Create a session in the `Idle` state
    pub(crate) fn new(descriptor: SourceDescriptor, config: RelayConfig) -> Arc<Self> {
        let group = SubscriberGroup::new(config.subscriber_queue_capacity);

        Arc::new(Self {
            descriptor,
            config,
            group,
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                last_error: None,
            }),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            epoch: AtomicU64::new(0),
        })
    }

    /// The descriptor captured at start time
    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.lock_inner().state
    }

    /// The notice that failed the session, if any
    pub fn last_error(&self) -> Option<StreamNotice> {
        self.lock_inner().last_error.clone()
    }

    /// Number of joined subscribers
    pub fn subscriber_count(&self) -> usize {
        self.group.len()
    }

    /// Total frames dropped to full subscriber queues
    pub fn frames_dropped(&self) -> u64 {
        self.group.frames_dropped()
    }

    /// Register a subscriber with this session's fan-out group
    pub fn join(&self) -> SubscriberHandle {
        self.epoch.fetch_add(1, Ordering::Relaxed);
        let handle = self.group.join();
        tracing::debug!(
            source = %self.descriptor.id,
            subscriber = %handle.id(),
            subscribers = self.group.len(),
            "Subscriber joined"
        );
        handle
    }

    /// Deregister a subscriber; idempotent
    pub fn leave(&self, id: SubscriberId) -> bool {
        let left = self.group.leave(id);
        if left {
            tracing::debug!(
                source = %self.descriptor.id,
                subscriber = %id,
                subscribers = self.group.len(),
                "Subscriber left"
            );
        }
        left
    }

    /// Request cancellation of the capture loop
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Join generation, used to invalidate stale teardown timers
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    pub(crate) fn set_task(&self, task: JoinHandle<()>) {
        *self.task.lock().expect("session lock poisoned") = Some(task);
    }

    pub(crate) fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().expect("session lock poisoned").take()
    }

    /// Run the capture loop to completion
    ///
    /// Opens the capture handle (bounded by the open timeout), publishes
    /// frames at the configured rate, and guarantees the handle is released
    /// on every exit path, including cancellation mid-read and mid-sleep.
    pub(crate) async fn run(self: &Arc<Self>, opener: Arc<dyn SourceOpener>) {
        self.set_state(SessionState::Starting);
        tracing::debug!(source = %self.descriptor.id, uri = %self.descriptor.uri, "Opening capture");

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.set_state(SessionState::Stopping);
                self.group.clear();
                return;
            }
            result = timeout(
                self.config.open_timeout,
                opener.open(&self.descriptor.uri, self.config.jpeg_quality),
            ) => result,
        };

        let mut source = match opened {
            Ok(Ok(source)) => source,
            Ok(Err(e)) => {
                self.fail(StreamNotice::new(NoticeKind::OpenFailed, e.to_string()));
                self.group.clear();
                return;
            }
            Err(_) => {
                self.fail(StreamNotice::new(
                    NoticeKind::OpenFailed,
                    "capture open timed out",
                ));
                self.group.clear();
                return;
            }
        };

        self.set_state(SessionState::Running);
        tracing::info!(source = %self.descriptor.id, "Session running");

        let exit = self.capture_loop(source.as_mut()).await;

        match exit {
            LoopExit::Cancelled => {
                self.set_state(SessionState::Stopping);
                tracing::info!(source = %self.descriptor.id, "Session stopped");
            }
            LoopExit::Terminal(notice) => self.fail(notice),
        }

        // Handle release is unconditional
        source.close().await;
        self.group.clear();
    }

    async fn capture_loop(&self, source: &mut dyn FrameSource) -> LoopExit {
        let interval = self.config.frame_interval();
        let mut seq: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return LoopExit::Cancelled;
            }

            let iteration_start = Instant::now();

            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return LoopExit::Cancelled,
                result = timeout(self.config.read_timeout, source.next_frame()) => result,
            };

            match read {
                Err(_) => {
                    return LoopExit::Terminal(StreamNotice::new(
                        NoticeKind::ReadTimeout,
                        format!("no frame within {:?}", self.config.read_timeout),
                    ));
                }
                Ok(Err(e)) if e.is_per_frame() => {
                    tracing::warn!(source = %self.descriptor.id, error = %e, "Frame skipped");
                    self.group
                        .broadcast_notice(StreamNotice::new(e.notice_kind(), e.to_string()));
                }
                Ok(Err(e)) => {
                    return LoopExit::Terminal(StreamNotice::new(e.notice_kind(), e.to_string()));
                }
                Ok(Ok(data)) => {
                    seq += 1;
                    self.group.broadcast(FramePayload::new(seq, data));
                }
            }

            let elapsed = iteration_start.elapsed();
            if elapsed < interval {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return LoopExit::Cancelled,
                    _ = tokio::time::sleep(interval - elapsed) => {}
                }
            }
        }
    }

    fn fail(&self, notice: StreamNotice) {
        tracing::warn!(
            source = %self.descriptor.id,
            kind = notice.kind.as_str(),
            detail = %notice.message,
            "Session failed"
        );

        {
            let mut inner = self.lock_inner();
            inner.state = SessionState::Failed;
            inner.last_error = Some(notice.clone());
        }

        self.group.broadcast_notice(notice);
    }

    fn set_state(&self, state: SessionState) {
        self.lock_inner().state = state;
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, SessionInner> {
        self.inner.lock().expect("session lock poisoned")
    }
}
