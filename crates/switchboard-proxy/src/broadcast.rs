//! One-leader, many-subscriber response fan-out
//!
//! The leader publishes response chunks into a replay buffer; every
//! subscriber replays the buffered prefix in order and then follows the
//! live tail. A subscribe racing a publish observes the chunk exactly once
//! because delivery is driven by a per-subscriber index into the buffer.
//!
//! The broadcaster also owns the lifecycle signal for the leader's upstream
//! work: when the last subscriber drops before completion, a cancellation
//! token fires and the leader abandons the fetch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::ProxyError;

/// Status line and content type of the response being broadcast
///
/// Set exactly once by the leader before the first chunk is published.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// HTTP status to replicate to every subscriber
    pub status: u16,
    /// Content type of the body
    pub content_type: String,
}

impl ResponseHead {
    /// Whether the response is an SSE stream
    pub fn is_event_stream(&self) -> bool {
        self.content_type.starts_with("text/event-stream")
    }
}

/// Terminal state of a closed broadcaster
#[derive(Debug, Clone)]
pub enum Terminal {
    /// Response completed normally
    Ok,
    /// Response ended in an error all subscribers observe
    Error(ProxyError),
}

#[derive(Default)]
struct Replay {
    chunks: Vec<Bytes>,
    closed: Option<Terminal>,
}

/// Fan-out of one upstream response to any number of subscribers
pub struct Broadcaster {
    replay: Mutex<Replay>,
    notify: Notify,
    head: OnceLock<ResponseHead>,
    subscribers: AtomicUsize,
    cancel: CancellationToken,
    created_at: Instant,
}

impl Broadcaster {
    /// Create an open broadcaster with no subscribers
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            replay: Mutex::new(Replay::default()),
            notify: Notify::new(),
            head: OnceLock::new(),
            subscribers: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
            created_at: Instant::now(),
        })
    }

    /// Record the response head; first caller wins
    pub fn set_head(&self, head: ResponseHead) {
        let _ = self.head.set(head);
        self.notify.notify_waiters();
    }

    /// The response head, if the leader has produced one
    pub fn head(&self) -> Option<&ResponseHead> {
        self.head.get()
    }

    /// Append a chunk and wake waiting subscribers
    ///
    /// Publishing to a closed broadcaster is a no-op: closed broadcasters
    /// are immutable.
    pub fn publish(&self, chunk: Bytes) {
        {
            let mut replay = self.replay.lock().expect("broadcast lock poisoned");
            if replay.closed.is_some() {
                return;
            }
            replay.chunks.push(chunk);
        }
        self.notify.notify_waiters();
    }

    /// Close successfully; idempotent
    pub fn close_ok(&self) {
        self.close(Terminal::Ok);
    }

    /// Close with an error every current and future subscriber observes;
    /// idempotent (the first close wins)
    pub fn close_error(&self, error: ProxyError) {
        self.close(Terminal::Error(error));
    }

    fn close(&self, terminal: Terminal) {
        {
            let mut replay = self.replay.lock().expect("broadcast lock poisoned");
            if replay.closed.is_some() {
                return;
            }
            replay.closed = Some(terminal);
        }
        self.notify.notify_waiters();
    }

    /// Whether at least one chunk has been published
    ///
    /// This is the failover commit point: once true, no further candidate
    /// may be tried.
    pub fn has_published(&self) -> bool {
        !self.replay.lock().expect("broadcast lock poisoned").chunks.is_empty()
    }

    /// Terminal state, if closed
    pub fn terminal(&self) -> Option<Terminal> {
        self.replay.lock().expect("broadcast lock poisoned").closed.clone()
    }

    /// Whether the broadcaster closed with an error
    pub fn closed_with_error(&self) -> bool {
        matches!(self.terminal(), Some(Terminal::Error(_)))
    }

    /// Number of attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Relaxed)
    }

    /// Token that fires when the last subscriber is gone before completion
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// When this broadcaster was created
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Attach a subscriber starting from the first chunk
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        self.subscribers.fetch_add(1, Ordering::Relaxed);
        Subscription {
            broadcaster: Arc::clone(self),
            index: 0,
            error_delivered: false,
        }
    }

    /// Wait until the head is set or the broadcaster is closed
    pub async fn ready(&self) {
        loop {
            let notified = self.notify.notified();
            if self.head.get().is_some() || self.terminal().is_some() {
                return;
            }
            notified.await;
        }
    }
}

/// One subscriber's position in a broadcast
pub struct Subscription {
    broadcaster: Arc<Broadcaster>,
    index: usize,
    error_delivered: bool,
}

impl Subscription {
    /// Next chunk in publication order
    ///
    /// Returns `None` when the stream completed (after an error terminal,
    /// the error is yielded exactly once, then `None`).
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, ProxyError>> {
        loop {
            // Create the wakeup future before checking state so a publish
            // racing this check cannot be missed
            let notified = self.broadcaster.notify.notified();

            {
                let replay = self.broadcaster.replay.lock().expect("broadcast lock poisoned");
                if self.index < replay.chunks.len() {
                    let chunk = replay.chunks[self.index].clone();
                    self.index += 1;
                    return Some(Ok(chunk));
                }
                match &replay.closed {
                    Some(Terminal::Ok) => return None,
                    Some(Terminal::Error(error)) => {
                        if self.error_delivered {
                            return None;
                        }
                        self.error_delivered = true;
                        return Some(Err(error.clone()));
                    }
                    None => {}
                }
            }

            notified.await;
        }
    }

    /// The broadcaster this subscription belongs to
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let remaining = self.broadcaster.subscribers.fetch_sub(1, Ordering::Relaxed) - 1;
        if remaining == 0 && self.broadcaster.terminal().is_none() {
            // Last interested client left; tell the leader to stop
            self.broadcaster.cancel.cancel();
        }
    }
}
