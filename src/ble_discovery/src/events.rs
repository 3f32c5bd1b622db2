use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use crate::errors::WaitError;

/// An event enum with a fieldless companion enum used as its topic.
pub trait Topic: Clone + Send + Sync + 'static {
    type Kind: Copy + Eq + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listener<E: Topic> {
    id: u64,
    kind: Option<E::Kind>,
    handler: Handler<E>
}

struct Listeners<E: Topic> {
    next_id: u64,
    entries: Vec<Listener<E>>
}

pub struct EventEmitter<E: Topic> {
    listeners: Arc<Mutex<Listeners<E>>>
}

impl<E: Topic> EventEmitter<E> {
    pub fn new() -> Self {
        return Self {
            listeners: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new()
            }))
        };
    }

    pub fn subscribe<F>(&self, kind: E::Kind, handler: F) -> Subscription where F: Fn(&E) + Send + Sync + 'static {
        return self.add_listener(Some(kind), Arc::new(handler));
    }

    pub fn subscribe_all<F>(&self, handler: F) -> Subscription where F: Fn(&E) + Send + Sync + 'static {
        return self.add_listener(None, Arc::new(handler));
    }

    fn add_listener(&self, kind: Option<E::Kind>, handler: Handler<E>) -> Subscription {
        let id = {
            let mut listeners = self.listeners.lock();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push(Listener { id, kind, handler });
            id
        };

        let listeners = Arc::downgrade(&self.listeners);

        return Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().entries.retain(|listener| listener.id != id);
            }
        });
    }

    /// Calls every matching handler in subscription order. Handlers run without the listener
    /// lock held, so they may subscribe or cancel subscriptions themselves.
    pub fn publish(&self, event: E) {
        let kind = event.kind();

        let handlers: Vec<Handler<E>> = self.listeners
            .lock()
            .entries
            .iter()
            .filter(|listener| listener.kind.map_or(true, |listener_kind| listener_kind == kind))
            .map(|listener| listener.handler.clone())
            .collect();

        for handler in handlers {
            handler(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        return self.listeners.lock().entries.len();
    }

    pub async fn wait_for(&self, kind: E::Kind, timeout: Duration) -> Result<E, WaitError> {
        return self.wait_for_matching(kind, timeout, |_| true).await;
    }

    /// Resolves with the first `kind` event accepted by `predicate`, or fails with
    /// `WaitError::Timeout`. The temporary listener is gone by the time this returns.
    pub async fn wait_for_matching<P>(&self, kind: E::Kind, timeout: Duration, predicate: P) -> Result<E, WaitError>
        where P: Fn(&E) -> bool + Send + Sync + 'static {
        return self.wait_for_map(kind, timeout, move |event| predicate(event).then(|| event.clone())).await;
    }

    /// Like `wait_for_matching`, but `select` both filters and extracts the value.
    pub async fn wait_for_map<T, F>(&self, kind: E::Kind, timeout: Duration, select: F) -> Result<T, WaitError>
        where T: Send + 'static, F: Fn(&E) -> Option<T> + Send + Sync + 'static {
        let (sender, receiver) = oneshot::channel::<T>();
        let sender = Mutex::new(Some(sender));

        let subscription = self.subscribe(kind, move |event| {
            let Some(value) = select(event) else {
                return;
            };

            if let Some(sender) = sender.lock().take() {
                let _ = sender.send(value);
            }
        });

        let result = tokio::time::timeout(timeout, receiver).await;
        subscription.cancel();

        return match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(WaitError::Closed),
            Err(_) => Err(WaitError::Timeout { timeout })
        };
    }
}

impl<E: Topic> Default for EventEmitter<E> {
    fn default() -> Self {
        return Self::new();
    }
}

impl<E: Topic> Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.debug_struct("EventEmitter")
            .field("listeners", &self.listener_count())
            .finish();
    }
}

/// Keeps a listener registered. Dropping it removes the listener.
#[must_use = "dropping a Subscription removes its listener"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send>>
}

impl Subscription {
    fn new<F>(remove: F) -> Self where F: FnOnce() + Send + 'static {
        return Self {
            remove: Some(Box::new(remove))
        };
    }

    pub fn cancel(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish();
    }
}
