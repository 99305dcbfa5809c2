use crate::common::INVALIDATION_EVENT;
use crate::errors::{ErrorKind, WarrenError, WarrenResult};
use basu::error::BasuError;
use basu::event::Event;
use basu::{EventBus, Handle, HandlerId};
use std::marker::PhantomData;
use std::sync::Arc;

/// Publishes events to registered listeners.
///
/// A thin wrapper over a `basu` event bus bound to a single event type. The
/// invalidation tracker publishes one event per refresh pass through it, and
/// every registered observer listener receives that event.
///
/// # Example
///
/// ```ignore
/// let event_bus: WarrenEventBus<InvalidationInfo, ObserverListener> = WarrenEventBus::new();
/// let subscriber = event_bus.register(listener)?;
/// event_bus.publish(info)?;
/// event_bus.deregister(subscriber)?;
/// ```
#[derive(Clone)]
pub struct WarrenEventBus<E, L> {
    inner: Arc<WarrenEventBusInner<E, L>>,
}

impl<E, L> Default for WarrenEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, L> WarrenEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    pub fn new() -> Self {
        WarrenEventBus {
            inner: Arc::new(WarrenEventBusInner::new()),
        }
    }

    /// Registers a listener and returns the reference needed to deregister it.
    pub fn register(&self, listener: L) -> WarrenResult<SubscriberRef> {
        self.inner.register(listener)
    }

    pub fn deregister(&self, subscriber: SubscriberRef) -> WarrenResult<()> {
        self.inner.deregister(subscriber)
    }

    /// Publishes an event to every registered listener. A bus without listeners
    /// returns immediately.
    pub fn publish(&self, event: E) -> WarrenResult<()> {
        self.inner.publish(event)
    }

    pub fn close(&self) -> WarrenResult<()> {
        self.inner.close()
    }

    pub fn has_listeners(&self) -> bool {
        self.inner.has_listeners()
    }
}

/// Handle of a listener registered on a [`WarrenEventBus`].
pub struct SubscriberRef {
    pub(crate) inner: HandlerId,
}

impl SubscriberRef {
    pub fn new(inner: HandlerId) -> Self {
        SubscriberRef { inner }
    }
}

struct WarrenEventBusInner<E, L> {
    event_bus: EventBus<E>,
    phantom_data: PhantomData<L>,
}

impl<E, L> WarrenEventBusInner<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    fn new() -> Self {
        WarrenEventBusInner {
            event_bus: EventBus::new(),
            phantom_data: PhantomData,
        }
    }

    fn register(&self, listener: L) -> WarrenResult<SubscriberRef> {
        self.event_bus
            .subscribe(INVALIDATION_EVENT, Box::new(listener))
            .map(SubscriberRef::new)
            .map_err(Self::warren_error)
    }

    fn deregister(&self, subscriber: SubscriberRef) -> WarrenResult<()> {
        self.event_bus
            .unsubscribe(INVALIDATION_EVENT, &subscriber.inner)
            .map(|_| ())
            .map_err(Self::warren_error)
    }

    fn publish(&self, event: E) -> WarrenResult<()> {
        let handler_count = match self.event_bus.get_handler_count(INVALIDATION_EVENT) {
            Ok(count) => count,
            // nobody ever subscribed
            Err(BasuError::EventTypeNotFOUND) => return Ok(()),
            Err(e) => return Err(Self::warren_error(e)),
        };

        if handler_count == 0 {
            return Ok(());
        }

        let basu_event = Event::new(event);
        self.event_bus
            .publish(INVALIDATION_EVENT, &basu_event)
            .map(|_| ())
            .map_err(Self::warren_error)
    }

    fn close(&self) -> WarrenResult<()> {
        self.event_bus.clear().map(|_| ()).map_err(Self::warren_error)
    }

    fn has_listeners(&self) -> bool {
        match self.event_bus.get_handler_count(INVALIDATION_EVENT) {
            Ok(count) => count > 0,
            Err(BasuError::EventTypeNotFOUND) => false,
            Err(e) => {
                log::warn!("Failed to check listeners: {}, defaulting to false", e);
                false
            }
        }
    }

    fn warren_error(e: BasuError) -> WarrenError {
        match e {
            BasuError::EventTypeNotFOUND => WarrenError::new(
                "Event bus error: no listener was ever registered for invalidation events",
                ErrorKind::EventError,
            ),
            BasuError::MutexPoisoned => WarrenError::new(
                "Event bus error: internal mutex poisoned",
                ErrorKind::EventError,
            ),
            BasuError::HandlerError(e) => {
                let error_message = e
                    .source()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| e.to_string());
                WarrenError::new(
                    &format!("Observer failed: {}", error_message),
                    ErrorKind::EventError,
                )
            }
        }
    }
}
