use crate::error::AppError;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

pub type SubscriberCallback<T> = Arc<dyn Fn(&T) -> Result<(), AppError> + Send + Sync>;

/// Opaque handle returned by [`FanoutBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionToken(u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct FanoutBus<T> {
    next_id: AtomicU64,
    subscribers: Mutex<BTreeMap<SubscriptionToken, SubscriberCallback<T>>>,
}

impl<T> Default for FanoutBus<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<T> std::fmt::Debug for FanoutBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutBus")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl<T> FanoutBus<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionToken
    where
        F: Fn(&T) -> Result<(), AppError> + Send + Sync + 'static,
    {
        let token = SubscriptionToken(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().insert(token, Arc::new(callback));
        token
    }

    /// Returns whether the token was still registered; repeated calls are harmless.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.subscribers.lock().remove(&token).is_some()
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    /// Delivers `payload` to every subscriber registered when the call
    /// starts. Errors and panics are logged per subscriber and never stop
    /// delivery to the rest; failing subscribers stay registered.
    pub fn publish(&self, payload: &T) -> PublishReport {
        let snapshot: Vec<(SubscriptionToken, SubscriberCallback<T>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(token, callback)| (*token, Arc::clone(callback)))
            .collect();

        let mut report = PublishReport::default();
        for (token, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    error!(subscriber = token.0, error = %err, "log subscriber returned an error");
                }
                Err(_) => {
                    report.failed += 1;
                    error!(subscriber = token.0, "log subscriber panicked");
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_subscriber(
        bus: &FanoutBus<String>,
        counter: &Arc<AtomicUsize>,
    ) -> SubscriptionToken {
        let counter = Arc::clone(counter);
        bus.subscribe(move |_payload: &String| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn failing_subscriber_does_not_block_others() {
        let bus = FanoutBus::<String>::new();
        let counters: Vec<Arc<AtomicUsize>> =
            (0..4).map(|_| Arc::new(AtomicUsize::new(0))).collect();

        counting_subscriber(&bus, &counters[0]);
        counting_subscriber(&bus, &counters[1]);
        bus.subscribe(|_payload: &String| Err(AppError::Subscriber("render failed".to_string())));
        counting_subscriber(&bus, &counters[2]);
        counting_subscriber(&bus, &counters[3]);

        let report = bus.publish(&"tick".to_string());

        assert_eq!(report, PublishReport { delivered: 4, failed: 1 });
        for counter in &counters {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
        assert_eq!(bus.len(), 5);
    }

    #[test]
    fn panicking_subscriber_is_contained() {
        let bus = FanoutBus::<String>::new();
        let counter = Arc::new(AtomicUsize::new(0));

        bus.subscribe(|_payload: &String| panic!("subscriber bug"));
        counting_subscriber(&bus, &counter);

        let report = bus.publish(&"tick".to_string());
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        bus.publish(&"tick".to_string());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = FanoutBus::<String>::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let token = counting_subscriber(&bus, &counter);

        assert!(bus.unsubscribe(token));
        assert!(!bus.unsubscribe(token));
        bus.publish(&"ignored".to_string());

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(bus.is_empty());
    }

    #[test]
    fn subscribers_added_during_publish_wait_for_next_event() {
        let bus = Arc::new(FanoutBus::<String>::new());
        let late_counter = Arc::new(AtomicUsize::new(0));

        let registering_bus = Arc::clone(&bus);
        let registering_counter = Arc::clone(&late_counter);
        bus.subscribe(move |_payload: &String| {
            let counter = Arc::clone(&registering_counter);
            registering_bus.subscribe(move |_payload: &String| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        let report = bus.publish(&"first".to_string());
        assert_eq!(report.delivered, 1);
        assert_eq!(late_counter.load(Ordering::SeqCst), 0);

        bus.publish(&"second".to_string());
        assert_eq!(late_counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscriber_removed_during_publish_still_receives_current_event() {
        let bus = Arc::new(FanoutBus::<String>::new());
        let victim_counter = Arc::new(AtomicUsize::new(0));

        let removing_bus = Arc::clone(&bus);
        let victim_token = Arc::new(Mutex::new(None::<SubscriptionToken>));
        let token_slot = Arc::clone(&victim_token);
        bus.subscribe(move |_payload: &String| {
            if let Some(token) = *token_slot.lock() {
                removing_bus.unsubscribe(token);
            }
            Ok(())
        });
        let token = counting_subscriber(&bus, &victim_counter);
        *victim_token.lock() = Some(token);

        bus.publish(&"first".to_string());
        assert_eq!(victim_counter.load(Ordering::SeqCst), 1);

        bus.publish(&"second".to_string());
        assert_eq!(victim_counter.load(Ordering::SeqCst), 1);
    }
}
