//! Progress reporter
//!
//! Fans runner events out to subscribers over a bounded broadcast channel.
//! Publishing never waits on a subscriber: a subscriber that falls more than
//! `buffer` events behind loses the intermediate events and instead receives
//! the latest status of every step it missed.

use crate::event::Event;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

struct Inner {
    sender: Mutex<Option<broadcast::Sender<Event>>>,
    latest: Mutex<Vec<Event>>,
    seq: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Clone)]
pub struct ProgressReporter {
    inner: Arc<Inner>,
}

impl ProgressReporter {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                sender: Mutex::new(Some(sender)),
                latest: Mutex::new(Vec::new()),
                seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn publish(&self, mut event: Event) {
        event.seq = self.inner.seq.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut latest = lock(&self.inner.latest);
            match latest.iter_mut().find(|e| e.step_key == event.step_key) {
                Some(slot) => *slot = event.clone(),
                None => latest.push(event.clone()),
            }
        }

        if let Some(sender) = lock(&self.inner.sender).as_ref() {
            // Only fails when nobody is subscribed.
            let _ = sender.send(event);
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let receiver = lock(&self.inner.sender).as_ref().map(|s| s.subscribe());
        Subscription {
            receiver,
            inner: self.inner.clone(),
            last_seq: self.inner.seq.load(Ordering::SeqCst),
            pending: VecDeque::new(),
        }
    }

    /// Latest event per step, in the order steps were first seen.
    pub fn latest(&self) -> Vec<Event> {
        lock(&self.inner.latest).clone()
    }

    /// End every subscription once it has drained what was already published.
    pub fn close(&self) {
        lock(&self.inner.sender).take();
    }
}

pub struct Subscription {
    receiver: Option<broadcast::Receiver<Event>>,
    inner: Arc<Inner>,
    last_seq: u64,
    pending: VecDeque<Event>,
}

impl Subscription {
    /// Next event, or `None` once the reporter is closed.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                self.last_seq = event.seq;
                return Some(event);
            }

            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) if event.seq <= self.last_seq => continue,
                Ok(event) => {
                    self.last_seq = event.seq;
                    return Some(event);
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "progress subscriber lagged, collapsing to latest status");
                    let mut collapsed: Vec<Event> = lock(&self.inner.latest)
                        .iter()
                        .filter(|e| e.seq > self.last_seq)
                        .cloned()
                        .collect();
                    collapsed.sort_by_key(|e| e.seq);
                    self.pending.extend(collapsed);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
