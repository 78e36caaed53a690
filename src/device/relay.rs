use std::sync::{Arc, Mutex};
use futures::channel::mpsc::{channel, Receiver, Sender};
use log::{debug, warn};

use crate::device::types::{Event, EventKind};

/// Fans events out to every subscriber, in emit order.
///
/// Delivery is best effort: a subscriber whose queue is full misses the event
/// and closed subscribers are removed on the next emit.
#[derive(Clone, Default)]
pub struct EventRelay {
    subscribers: Arc<Mutex<Vec<Sender<Event>>>>,
}

impl EventRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, buffer: usize) -> Receiver<Event> {
        let (sender, receiver) = channel::<Event>(buffer);
        self.lock_subscribers().push(sender);
        receiver
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    /// Returns the number of subscribers that accepted the event.
    pub fn emit(&self, kind: EventKind, payload: Option<String>) -> usize {
        let event = Event { kind, payload };
        let mut delivered = 0;

        debug!("Broadcast {}", kind);

        self.lock_subscribers().retain_mut(|sender| {
            match sender.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                },
                Err(err) if err.is_disconnected() => false,
                Err(_) => {
                    warn!("Subscriber queue is full, dropping {}", kind);
                    true
                },
            }
        });

        delivered
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Sender<Event>>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
