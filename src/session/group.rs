//! Per-session subscriber fan-out
//!
//! Each subscriber owns a bounded frame queue and an out-of-band notice
//! queue. Broadcasting snapshots the member list under the membership lock,
//! then enqueues outside it, so join/leave never contends with an in-flight
//! broadcast beyond that snapshot. A full frame queue drops the new frame for
//! that subscriber only; notices are never dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

use super::payload::{FramePayload, StreamNotice};

/// Identifier for one subscriber within a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something delivered to a subscriber
#[derive(Debug, Clone)]
pub enum SubscriberEvent {
    /// An encoded frame
    Frame(FramePayload),
    /// A failure notice
    Notice(StreamNotice),
}

/// Receiving end held by one viewer connection
///
/// Dropping the handle ends delivery; the group prunes the dead member on
/// its next broadcast.
pub struct SubscriberHandle {
    id: SubscriberId,
    frames: mpsc::Receiver<FramePayload>,
    notices: mpsc::UnboundedReceiver<StreamNotice>,
    notices_closed: bool,
}

impl SubscriberHandle {
    /// This subscriber's id within its group
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next frame or notice
    ///
    /// Notices take priority over queued frames. Returns `None` once the
    /// session is gone and both queues are drained.
    pub async fn next_event(&mut self) -> Option<SubscriberEvent> {
        if self.notices_closed {
            return self.frames.recv().await.map(SubscriberEvent::Frame);
        }

        tokio::select! {
            biased;
            notice = self.notices.recv() => match notice {
                Some(notice) => Some(SubscriberEvent::Notice(notice)),
                None => {
                    self.notices_closed = true;
                    self.frames.recv().await.map(SubscriberEvent::Frame)
                }
            },
            frame = self.frames.recv() => frame.map(SubscriberEvent::Frame),
        }
    }
}

struct Member {
    frames: mpsc::Sender<FramePayload>,
    notices: mpsc::UnboundedSender<StreamNotice>,
}

/// Fan-out broadcaster owned by exactly one session
pub struct SubscriberGroup {
    members: Mutex<HashMap<SubscriberId, Member>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    frames_dropped: AtomicU64,
    /// Terminal notice retained for members joining after the failure
    terminal: Mutex<Option<StreamNotice>>,
}

impl SubscriberGroup {
    /// Create a group whose members get a frame queue of `queue_capacity`
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
            frames_dropped: AtomicU64::new(0),
            terminal: Mutex::new(None),
        }
    }

    /// Register a new subscriber
    ///
    /// A subscriber joining after a terminal notice was broadcast receives
    /// that notice immediately.
    pub fn join(&self) -> SubscriberHandle {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (frame_tx, frame_rx) = mpsc::channel(self.queue_capacity);
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        if let Some(notice) = self.terminal.lock().expect("group lock poisoned").clone() {
            let _ = notice_tx.send(notice);
        }

        self.members.lock().expect("group lock poisoned").insert(
            id,
            Member {
                frames: frame_tx,
                notices: notice_tx,
            },
        );

        SubscriberHandle {
            id,
            frames: frame_rx,
            notices: notice_rx,
            notices_closed: false,
        }
    }

    /// Deregister a subscriber; idempotent
    pub fn leave(&self, id: SubscriberId) -> bool {
        self.members
            .lock()
            .expect("group lock poisoned")
            .remove(&id)
            .is_some()
    }

    /// Number of current members
    pub fn len(&self) -> usize {
        self.members.lock().expect("group lock poisoned").len()
    }

    /// Whether the group has no members
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames dropped to full subscriber queues
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Deliver a frame to every member present at the snapshot
    ///
    /// Enqueue is non-blocking: a member whose queue is full misses this
    /// frame, a member whose handle is gone is pruned.
    pub fn broadcast(&self, payload: FramePayload) {
        let snapshot: Vec<(SubscriberId, mpsc::Sender<FramePayload>)> = {
            let members = self.members.lock().expect("group lock poisoned");
            members
                .iter()
                .map(|(id, member)| (*id, member.frames.clone()))
                .collect()
        };

        let mut dead = Vec::new();
        for (id, sender) in snapshot {
            match sender.try_send(payload.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(subscriber = %id, seq = payload.seq, "Frame dropped: queue full");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(id),
            }
        }

        if !dead.is_empty() {
            let mut members = self.members.lock().expect("group lock poisoned");
            for id in dead {
                members.remove(&id);
            }
        }
    }

    /// Drop every member's sending side
    ///
    /// Called once the owning session is terminal. Subscribers can still
    /// drain already-queued frames and notices, then observe the end of the
    /// subscription.
    pub(crate) fn clear(&self) {
        self.members.lock().expect("group lock poisoned").clear();
    }

    /// Deliver a notice to every member, bypassing the bounded frame queues
    ///
    /// Terminal notices are retained and replayed to late joiners.
    pub fn broadcast_notice(&self, notice: StreamNotice) {
        if notice.is_terminal() {
            *self.terminal.lock().expect("group lock poisoned") = Some(notice.clone());
        }

        let members = self.members.lock().expect("group lock poisoned");
        for member in members.values() {
            let _ = member.notices.send(notice.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::session::NoticeKind;

    fn frame(seq: u64) -> FramePayload {
        FramePayload::new(seq, Bytes::from_static(b"\xff\xd8\xff\xd9"))
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_members() {
        let group = SubscriberGroup::new(4);
        let mut a = group.join();
        let mut b = group.join();

        group.broadcast(frame(1));

        for handle in [&mut a, &mut b] {
            match handle.next_event().await.unwrap() {
                SubscriberEvent::Frame(payload) => assert_eq!(payload.seq, 1),
                other => panic!("expected frame, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_member_joining_after_broadcast_misses_frame() {
        let group = SubscriberGroup::new(4);
        let mut early = group.join();

        group.broadcast(frame(1));
        let mut late = group.join();
        group.broadcast(frame(2));

        match early.next_event().await.unwrap() {
            SubscriberEvent::Frame(payload) => assert_eq!(payload.seq, 1),
            other => panic!("expected frame, got {other:?}"),
        }
        // The late joiner's first frame is seq 2
        match late.next_event().await.unwrap() {
            SubscriberEvent::Frame(payload) => assert_eq!(payload.seq, 2),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let group = SubscriberGroup::new(2);
        let mut slow = group.join();

        group.broadcast(frame(1));
        group.broadcast(frame(2));
        group.broadcast(frame(3)); // dropped: queue holds 1 and 2

        assert_eq!(group.frames_dropped(), 1);

        group.broadcast(frame(4)); // also dropped
        assert_eq!(group.frames_dropped(), 2);

        // Drain one slot; the next broadcast fits again
        match slow.next_event().await.unwrap() {
            SubscriberEvent::Frame(payload) => assert_eq!(payload.seq, 1),
            other => panic!("expected frame, got {other:?}"),
        }
        group.broadcast(frame(5));

        let seqs: Vec<u64> = [
            slow.next_event().await.unwrap(),
            slow.next_event().await.unwrap(),
        ]
        .into_iter()
        .map(|event| match event {
            SubscriberEvent::Frame(payload) => payload.seq,
            other => panic!("expected frame, got {other:?}"),
        })
        .collect();

        // Gaps from drops, never reordering
        assert_eq!(seqs, vec![2, 5]);
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let group = SubscriberGroup::new(4);
        let handle = group.join();
        let id = handle.id();

        assert_eq!(group.len(), 1);
        assert!(group.leave(id));
        assert!(!group.leave(id));
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_handle_pruned_on_broadcast() {
        let group = SubscriberGroup::new(4);
        let handle = group.join();
        drop(handle);

        assert_eq!(group.len(), 1);
        group.broadcast(frame(1));
        assert_eq!(group.len(), 0);
    }

    #[tokio::test]
    async fn test_notice_bypasses_full_frame_queue() {
        let group = SubscriberGroup::new(1);
        let mut handle = group.join();

        group.broadcast(frame(1));
        group.broadcast(frame(2)); // dropped
        group.broadcast_notice(StreamNotice::new(NoticeKind::StreamEnded, "upstream closed"));

        // The notice arrives ahead of the queued frame
        match handle.next_event().await.unwrap() {
            SubscriberEvent::Notice(notice) => assert_eq!(notice.kind, NoticeKind::StreamEnded),
            other => panic!("expected notice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_terminal_notice_replayed_to_late_joiner() {
        let group = SubscriberGroup::new(4);
        group.broadcast_notice(StreamNotice::new(NoticeKind::OpenFailed, "unreachable"));

        let mut late = group.join();
        match late.next_event().await.unwrap() {
            SubscriberEvent::Notice(notice) => assert_eq!(notice.kind, NoticeKind::OpenFailed),
            other => panic!("expected notice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clear_ends_subscriptions_after_drain() {
        let group = SubscriberGroup::new(4);
        let mut handle = group.join();

        group.broadcast(frame(1));
        group.broadcast_notice(StreamNotice::new(NoticeKind::StreamEnded, "done"));
        group.clear();

        // Queued traffic survives the clear, then the subscription ends
        assert!(handle.next_event().await.is_some());
        assert!(handle.next_event().await.is_some());
        assert!(handle.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_per_frame_notice_not_replayed() {
        let group = SubscriberGroup::new(4);
        group.broadcast_notice(StreamNotice::new(NoticeKind::EncodeFailed, "bad frame"));

        let mut late = group.join();
        group.broadcast(frame(1));

        // Late joiner sees only the frame, not the stale per-frame notice
        match late.next_event().await.unwrap() {
            SubscriberEvent::Frame(payload) => assert_eq!(payload.seq, 1),
            other => panic!("expected frame, got {other:?}"),
        }
    }
}
