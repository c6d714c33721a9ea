//! The lifecycle event stream an external observer watches to learn when a
//! stimulus actually starts and when it is over.
//!
//! The queue is bounded. If nobody drains it, the oldest event is dropped to
//! make room, so a forgotten observer can never grow it without limit. A
//! receiver that waits longer than its keep-alive interval gets
//! [StatusMessage::KeepAlive] instead of an event, which is what a streaming
//! front end uses to hold its connection open.

use log::warn;
use serde::Serialize;
use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

/// A coarse lifecycle tag. Within one delivery `Start` always comes before
/// `End`; nothing in between is promised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusEvent {
    /// The thermal writer has begun transmitting
    Start,
    /// Every worker of the delivery has finished
    End,
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::Start => write!(f, "start"),
            StatusEvent::End => write!(f, "end"),
        }
    }
}

/// What a receiver gets back from one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMessage {
    /// A lifecycle event
    Event(StatusEvent),
    /// Nothing happened for a whole keep-alive interval
    KeepAlive,
    /// The producer is gone and the queue is empty
    Closed,
}

impl StatusMessage {
    /// Formats the message as a server-sent-events frame.
    pub fn to_sse_frame(&self) -> Option<String> {
        match self {
            StatusMessage::Event(event) => Some(format!(
                "data: {}\n\n",
                serde_json::json!({ "status": event })
            )),
            StatusMessage::KeepAlive => Some(": keep-alive\n\n".to_owned()),
            StatusMessage::Closed => None,
        }
    }
}

#[derive(Debug, Default)]
struct Queue {
    events: VecDeque<StatusEvent>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    queue: Mutex<Queue>,
    ready: Condvar,
}

/// Creates a connected sender and receiver holding at most `capacity`
/// undelivered events.
pub fn channel(capacity: usize, keep_alive: Duration) -> (StatusSender, StatusReceiver) {
    let shared = Arc::new(Shared::default());
    (
        StatusSender {
            shared: Arc::clone(&shared),
            capacity: capacity.max(1),
        },
        StatusReceiver { shared, keep_alive },
    )
}

/// The producing half. Dropping it closes the stream once the queue drains.
#[derive(Debug)]
pub struct StatusSender {
    shared: Arc<Shared>,
    capacity: usize,
}

impl StatusSender {
    /// Queues an event, dropping the oldest one if the queue is full.
    pub fn publish(&self, event: StatusEvent) {
        let mut queue = match self.shared.queue.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        if queue.events.len() >= self.capacity {
            if let Some(dropped) = queue.events.pop_front() {
                warn!("Status queue full, dropping undelivered {:?}", dropped);
            }
        }
        queue.events.push_back(event);
        self.shared.ready.notify_one();
    }
}

impl Drop for StatusSender {
    fn drop(&mut self) {
        let mut queue = match self.shared.queue.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.closed = true;
        self.shared.ready.notify_all();
    }
}

/// The consuming half. There is exactly one per stream.
#[derive(Debug)]
pub struct StatusReceiver {
    shared: Arc<Shared>,
    keep_alive: Duration,
}

impl StatusReceiver {
    /// Waits for the next event for at most one keep-alive interval.
    pub fn next_message(&self) -> StatusMessage {
        self.wait(self.keep_alive)
    }

    /// Returns a queued event without waiting, if there is one.
    pub fn try_next(&self) -> Option<StatusEvent> {
        match self.shared.queue.lock() {
            Ok(mut queue) => queue.events.pop_front(),
            Err(poisoned) => poisoned.into_inner().events.pop_front(),
        }
    }

    fn wait(&self, timeout: Duration) -> StatusMessage {
        let deadline = Instant::now() + timeout;
        let mut queue = match self.shared.queue.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            if let Some(event) = queue.events.pop_front() {
                return StatusMessage::Event(event);
            }
            if queue.closed {
                return StatusMessage::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return StatusMessage::KeepAlive;
            }
            queue = match self.shared.ready.wait_timeout(queue, deadline - now) {
                Ok((queue, _)) => queue,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

/// Iterates over events until the stream closes, yielding keep-alives while
/// idle.
impl Iterator for StatusReceiver {
    type Item = StatusMessage;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_message() {
            StatusMessage::Closed => None,
            message => Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn events_arrive_in_order() {
        let (tx, rx) = channel(8, Duration::from_millis(50));
        tx.publish(StatusEvent::Start);
        tx.publish(StatusEvent::End);
        assert_eq!(rx.next_message(), StatusMessage::Event(StatusEvent::Start));
        assert_eq!(rx.next_message(), StatusMessage::Event(StatusEvent::End));
    }

    #[test]
    fn idle_wait_yields_keep_alive() {
        let (_tx, rx) = channel(8, Duration::from_millis(20));
        assert_eq!(rx.next_message(), StatusMessage::KeepAlive);
    }

    #[test]
    fn dropping_sender_closes_after_drain() {
        let (tx, rx) = channel(8, Duration::from_millis(20));
        tx.publish(StatusEvent::End);
        drop(tx);
        let collected: Vec<_> = rx.collect();
        assert_eq!(collected, vec![StatusMessage::Event(StatusEvent::End)]);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let (tx, rx) = channel(2, Duration::from_millis(20));
        tx.publish(StatusEvent::Start);
        tx.publish(StatusEvent::End);
        tx.publish(StatusEvent::Start);
        assert_eq!(rx.try_next(), Some(StatusEvent::End));
        assert_eq!(rx.try_next(), Some(StatusEvent::Start));
        assert_eq!(rx.try_next(), None);
    }

    #[test]
    fn wakes_on_publish_from_another_thread() {
        let (tx, rx) = channel(8, Duration::from_secs(5));
        let th = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.publish(StatusEvent::Start);
        });
        assert_eq!(rx.next_message(), StatusMessage::Event(StatusEvent::Start));
        th.join().unwrap();
    }

    #[test]
    fn sse_frames() {
        assert_eq!(
            StatusMessage::Event(StatusEvent::Start).to_sse_frame().unwrap(),
            "data: {\"status\":\"start\"}\n\n"
        );
        assert_eq!(
            StatusMessage::KeepAlive.to_sse_frame().unwrap(),
            ": keep-alive\n\n"
        );
        assert_eq!(StatusMessage::Closed.to_sse_frame(), None);
    }
}
