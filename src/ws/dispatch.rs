//! Fan-out of task events to an assignee's live connections.
//!
//! Delivery is best-effort and at-most-once per connection: the event is
//! not queued or replayed, a failed send evicts the dead connection, and
//! nothing here can fail the task mutation that triggered it. A client
//! that was offline re-syncs through the task query API on reconnect.

use axum::extract::ws::Message;
use std::sync::Arc;

use crate::tasks::{TaskEvent, UserId};
use crate::ws::registry::ConnectionRegistry;

/// Delivers committed task events to every live connection of one user.
/// Cloneable; the mutation pipeline receives a clone at startup and calls
/// [`notify_detached`](Self::notify_detached) once per committed mutation.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Push `event` to every connection registered for `user`. Returns the
    /// number of connections the event was enqueued to.
    ///
    /// Zero registered connections is a normal no-op. A failed send means
    /// the peer is gone: that connection is unregistered and the failure
    /// is swallowed — delivery to the remaining connections continues and
    /// the caller never sees an error. Sends enqueue onto each
    /// connection's writer channel without blocking, so one slow peer
    /// cannot delay the others.
    pub fn notify(&self, user: UserId, event: &TaskEvent) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(user = %user, error = %e, "Failed to serialize task event");
                return 0;
            }
        };
        let msg = Message::Text(payload.into());

        let snapshot = self.registry.connections_for(user);
        if snapshot.is_empty() {
            tracing::trace!(user = %user, task = %event.id, "No live connections, skipping notify");
            return 0;
        }

        let mut delivered = 0;
        for handle in snapshot {
            if handle.send(msg.clone()).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(
                    user = %user,
                    connection = %handle.id(),
                    "Send failed, evicting dead connection"
                );
                self.registry.unregister(user, handle.id());
            }
        }

        tracing::debug!(user = %user, task = %event.id, delivered, "Task event dispatched");
        delivered
    }

    /// Fire-and-forget variant for the mutation pipeline's commit path.
    ///
    /// Enqueues synchronously: serialization and the per-connection pushes
    /// happen inline (none of them block or await), so events committed in
    /// sequence by one caller land on each connection's channel in that
    /// sequence. The network I/O still runs in each connection's writer
    /// task, decoupled from the caller, and any failure is swallowed —
    /// the commit that triggered this can never be failed by delivery.
    pub fn notify_detached(&self, user: UserId, event: TaskEvent) {
        self.notify(user, &event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{Priority, TaskId, TaskStatus};
    use crate::ws::registry::ConnectionHandle;
    use chrono::NaiveDate;
    use tokio::sync::mpsc;

    fn event_for(user: UserId, task: i64) -> TaskEvent {
        TaskEvent {
            id: TaskId(task),
            title: format!("Task {task}"),
            description: None,
            priority: Priority::Medium,
            due_date: NaiveDate::from_ymd_opt(2026, 9, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            assigned_to: user,
            status: TaskStatus::Pending,
        }
    }

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    fn recv_event(rx: &mut mpsc::UnboundedReceiver<Message>) -> TaskEvent {
        match rx.try_recv().expect("expected a delivered frame") {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected Text frame, got {other:?}"),
        }
    }

    fn dispatcher() -> (NotificationDispatcher, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        (NotificationDispatcher::new(registry.clone()), registry)
    }

    #[test]
    fn notify_without_connections_is_a_noop() {
        let (dispatcher, registry) = dispatcher();
        let delivered = dispatcher.notify(UserId(1), &event_for(UserId(1), 10));
        assert_eq!(delivered, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn notify_reaches_every_connection_exactly_once() {
        let (dispatcher, registry) = dispatcher();
        let (c1, mut rx1) = handle();
        let (c2, mut rx2) = handle();
        registry.register(UserId(42), c1);
        registry.register(UserId(42), c2);

        let event = event_for(UserId(42), 10);
        assert_eq!(dispatcher.notify(UserId(42), &event), 2);

        assert_eq!(recv_event(&mut rx1), event);
        assert_eq!(recv_event(&mut rx2), event);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn failed_send_evicts_the_connection() {
        let (dispatcher, registry) = dispatcher();
        let (c1, rx1) = handle();
        registry.register(UserId(7), c1);
        drop(rx1); // peer gone: the writer side of the channel is dead

        assert_eq!(dispatcher.notify(UserId(7), &event_for(UserId(7), 10)), 0);
        assert!(registry.connections_for(UserId(7)).is_empty());

        // Entry removed, so the follow-up notify is a clean no-op.
        assert_eq!(dispatcher.notify(UserId(7), &event_for(UserId(7), 11)), 0);
    }

    #[test]
    fn one_dead_connection_does_not_stop_the_rest() {
        let (dispatcher, registry) = dispatcher();
        let (dead, dead_rx) = handle();
        let (live, mut live_rx) = handle();
        registry.register(UserId(42), dead);
        registry.register(UserId(42), live);
        drop(dead_rx);

        let event = event_for(UserId(42), 10);
        assert_eq!(dispatcher.notify(UserId(42), &event), 1);
        assert_eq!(recv_event(&mut live_rx), event);
        assert_eq!(registry.connection_count(UserId(42)), 1);
    }

    #[test]
    fn unregistered_connection_is_never_reached() {
        let (dispatcher, registry) = dispatcher();
        let (c1, mut rx1) = handle();
        registry.register(UserId(7), c1.clone());
        registry.unregister(UserId(7), c1.id());

        dispatcher.notify(UserId(7), &event_for(UserId(7), 10));
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn sequential_events_arrive_in_order() {
        let (dispatcher, registry) = dispatcher();
        let (c1, mut rx1) = handle();
        registry.register(UserId(7), c1);

        let first = event_for(UserId(7), 1);
        let second = event_for(UserId(7), 2);
        dispatcher.notify(UserId(7), &first);
        dispatcher.notify(UserId(7), &second);

        assert_eq!(recv_event(&mut rx1), first);
        assert_eq!(recv_event(&mut rx1), second);
    }

    #[tokio::test]
    async fn identities_deliver_independently() {
        let (dispatcher, registry) = dispatcher();
        // User A has only a dead connection, user B a live one.
        let (dead, dead_rx) = handle();
        let (live, mut live_rx) = handle();
        registry.register(UserId(1), dead);
        registry.register(UserId(2), live);
        drop(dead_rx);

        let d1 = dispatcher.clone();
        let d2 = dispatcher.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { d1.notify(UserId(1), &event_for(UserId(1), 10)) }),
            tokio::spawn(async move { d2.notify(UserId(2), &event_for(UserId(2), 20)) }),
        );
        assert_eq!(a.unwrap(), 0);
        assert_eq!(b.unwrap(), 1);

        let event = recv_event(&mut live_rx);
        assert_eq!(event.id, TaskId(20));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn detached_notifies_from_one_committing_task_keep_commit_order() {
        let (dispatcher, registry) = dispatcher();
        let (c1, mut rx1) = handle();
        registry.register(UserId(7), c1);

        // One committing context dispatching two mutations back to back,
        // the way the mutation pipeline does after consecutive commits.
        let d = dispatcher.clone();
        let first = event_for(UserId(7), 1);
        let second = event_for(UserId(7), 2);
        let (e1, e2) = (first.clone(), second.clone());
        tokio::spawn(async move {
            d.notify_detached(UserId(7), e1);
            d.notify_detached(UserId(7), e2);
        })
        .await
        .unwrap();

        assert_eq!(recv_event(&mut rx1), first);
        assert_eq!(recv_event(&mut rx1), second);
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_consumer_does_not_delay_other_identities() {
        let (dispatcher, registry) = dispatcher();
        // User A's peer never drains its channel (slow consumer); user B
        // must still see prompt delivery, and neither notify may stall.
        let (slow, _slow_rx) = handle();
        let (live, mut live_rx) = handle();
        registry.register(UserId(1), slow);
        registry.register(UserId(2), live);

        let started = std::time::Instant::now();
        assert_eq!(dispatcher.notify(UserId(1), &event_for(UserId(1), 10)), 1);
        assert_eq!(dispatcher.notify(UserId(2), &event_for(UserId(2), 20)), 1);
        assert!(
            started.elapsed() < std::time::Duration::from_millis(250),
            "notify stalled behind a slow consumer: {:?}",
            started.elapsed()
        );

        let event = recv_event(&mut live_rx);
        assert_eq!(event.id, TaskId(20));
    }

    #[tokio::test]
    async fn notify_detached_delivers_without_the_caller_waiting() {
        let (dispatcher, registry) = dispatcher();
        let (c1, mut rx1) = handle();
        registry.register(UserId(7), c1);

        let event = event_for(UserId(7), 10);
        dispatcher.notify_detached(UserId(7), event.clone());

        let msg = tokio::time::timeout(std::time::Duration::from_secs(1), rx1.recv())
            .await
            .expect("delivery within timeout")
            .expect("channel open");
        match msg {
            Message::Text(text) => {
                let parsed: TaskEvent = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(parsed, event);
            }
            other => panic!("expected Text frame, got {other:?}"),
        }
    }
}
