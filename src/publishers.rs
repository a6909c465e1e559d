//! The four publisher singletons and the observer contract consumed by
//! the UI layer.
//!
//! Each publisher owns an insertion-ordered subscription registry behind
//! its own lock, per the concurrency model's "service -> book -> side ->
//! publisher -> user" lock ordering: a publisher never calls back into a
//! book or the service while holding its own lock, only out to user
//! observers.

use std::sync::{Mutex, RwLock};

use indexmap::{IndexMap, IndexSet};
use tracing::warn;

use crate::error::EngineError;
use crate::messages::{CancelMessage, FillMessage, MarketMessage};
use crate::price::Price;

/// The observer contract a connected user exposes to the engine.
///
/// Callbacks run on the publishing thread while the publisher's lock is
/// held (see the concurrency model) — implementations must perform only
/// local, non-engine-reentrant updates here.
pub trait UserObserver: Send + Sync {
    fn accept_last_sale(&self, product: &str, price: Price, volume: u64);
    fn accept_fill(&self, msg: &FillMessage);
    fn accept_cancel(&self, msg: &CancelMessage);
    fn accept_market_message(&self, state: &str);
    fn accept_ticker(&self, product: &str, price: Price, direction: char);
    fn accept_current_market(&self, product: &str, buy_price: Price, buy_volume: u64, sell_price: Price, sell_volume: u64);
}

/// An insertion-ordered `product -> subscribers` registry shared by every
/// publisher: a lock-guarded map keyed by product, each value an
/// insertion-ordered set of subscribed user names.
#[derive(Default)]
struct Registry {
    by_product: IndexMap<String, IndexSet<String>>,
}

impl Registry {
    fn subscribe(&mut self, user: &str, product: &str) -> Result<(), EngineError> {
        let subscribers = self.by_product.entry(product.to_string()).or_default();
        if !subscribers.insert(user.to_string()) {
            return Err(EngineError::AlreadySubscribed {
                user: user.to_string(),
                product: product.to_string(),
            });
        }
        Ok(())
    }

    fn unsubscribe(&mut self, user: &str, product: &str) -> Result<(), EngineError> {
        let removed = self
            .by_product
            .get_mut(product)
            .is_some_and(|subscribers| subscribers.shift_remove(user));
        if !removed {
            return Err(EngineError::NotSubscribed {
                user: user.to_string(),
                product: product.to_string(),
            });
        }
        Ok(())
    }

    fn subscribers_of(&self, product: &str) -> Vec<String> {
        self.by_product
            .get(product)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn all_products(&self) -> Vec<String> {
        self.by_product.keys().cloned().collect()
    }
}

pub type ObserverLookup = dyn Fn(&str) -> Option<std::sync::Arc<dyn UserObserver>> + Send + Sync;

/// Publishes top-of-book snapshots, deduplicated by the caller (the book
/// computes its own fingerprint before calling this).
pub struct CurrentMarketPublisher {
    registry: RwLock<Registry>,
    observers: std::sync::Arc<ObserverLookup>,
}

impl CurrentMarketPublisher {
    pub fn new(observers: std::sync::Arc<ObserverLookup>) -> Self {
        CurrentMarketPublisher {
            registry: RwLock::new(Registry::default()),
            observers,
        }
    }

    pub fn subscribe(&self, user: &str, product: &str) -> Result<(), EngineError> {
        self.registry.write().expect("lock poisoned").subscribe(user, product)
    }

    pub fn unsubscribe(&self, user: &str, product: &str) -> Result<(), EngineError> {
        self.registry.write().expect("lock poisoned").unsubscribe(user, product)
    }

    /// Deliver `(symbol, buyPrice, buyVol, sellPrice, sellVol)` to every
    /// subscriber of `symbol`; absent prices are replaced with $0.00.
    pub fn publish_current_market(
        &self,
        symbol: &str,
        buy_price: Option<Price>,
        buy_volume: u64,
        sell_price: Option<Price>,
        sell_volume: u64,
    ) {
        let buy_price = buy_price.unwrap_or_else(Price::zero);
        let sell_price = sell_price.unwrap_or_else(Price::zero);
        let subscribers = self.registry.read().expect("lock poisoned").subscribers_of(symbol);
        for user in subscribers {
            if let Some(observer) = (self.observers)(&user) {
                observer.accept_current_market(symbol, buy_price, buy_volume, sell_price, sell_volume);
            }
        }
    }
}

/// Publishes last-sale events, then cascades into the ticker publisher.
pub struct LastSalePublisher {
    registry: RwLock<Registry>,
    observers: std::sync::Arc<ObserverLookup>,
}

impl LastSalePublisher {
    pub fn new(observers: std::sync::Arc<ObserverLookup>) -> Self {
        LastSalePublisher {
            registry: RwLock::new(Registry::default()),
            observers,
        }
    }

    pub fn subscribe(&self, user: &str, product: &str) -> Result<(), EngineError> {
        self.registry.write().expect("lock poisoned").subscribe(user, product)
    }

    pub fn unsubscribe(&self, user: &str, product: &str) -> Result<(), EngineError> {
        self.registry.write().expect("lock poisoned").unsubscribe(user, product)
    }

    pub fn publish_last_sale(&self, ticker: &TickerPublisher, symbol: &str, price: Option<Price>, volume: u64) {
        let price = price.unwrap_or_else(Price::zero);
        let subscribers = self.registry.read().expect("lock poisoned").subscribers_of(symbol);
        for user in &subscribers {
            if let Some(observer) = (self.observers)(user) {
                observer.accept_last_sale(symbol, price, volume);
            }
        }
        ticker.publish_ticker(symbol, price);
    }
}

/// Publishes a direction-arrow ticker stream derived from last-sale
/// history. The direction mapping is load-bearing and must match
/// verbatim: space on first observation, `=` if unchanged, `↓` if the
/// price fell, `↑` if it rose.
pub struct TickerPublisher {
    registry: RwLock<Registry>,
    last_seen: Mutex<IndexMap<String, Price>>,
    observers: std::sync::Arc<ObserverLookup>,
}

impl TickerPublisher {
    pub fn new(observers: std::sync::Arc<ObserverLookup>) -> Self {
        TickerPublisher {
            registry: RwLock::new(Registry::default()),
            last_seen: Mutex::new(IndexMap::new()),
            observers,
        }
    }

    pub fn subscribe(&self, user: &str, product: &str) -> Result<(), EngineError> {
        self.registry.write().expect("lock poisoned").subscribe(user, product)
    }

    pub fn unsubscribe(&self, user: &str, product: &str) -> Result<(), EngineError> {
        self.registry.write().expect("lock poisoned").unsubscribe(user, product)
    }

    pub fn publish_ticker(&self, symbol: &str, price: Price) {
        let direction = {
            let mut last_seen = self.last_seen.lock().expect("lock poisoned");
            let direction = match last_seen.get(symbol) {
                None => ' ',
                Some(previous) => match previous.compare_to(&price) {
                    Some(std::cmp::Ordering::Equal) => '=',
                    Some(std::cmp::Ordering::Greater) => '\u{2193}', // previous > new: price fell
                    Some(std::cmp::Ordering::Less) => '\u{2191}',    // previous < new: price rose
                    None => ' ',
                },
            };
            last_seen.insert(symbol.to_string(), price);
            direction
        };

        let subscribers = self.registry.read().expect("lock poisoned").subscribers_of(symbol);
        for user in subscribers {
            if let Some(observer) = (self.observers)(&user) {
                observer.accept_ticker(symbol, price, direction);
            }
        }
    }
}

/// Publishes fills, cancels, and market-state transitions. Fills/cancels
/// are delivered only to the subscriber whose user name equals the
/// message's user; market messages broadcast to every subscriber on
/// every product registry (one message per subscription).
pub struct MessagePublisher {
    registry: RwLock<Registry>,
    observers: std::sync::Arc<ObserverLookup>,
}

impl MessagePublisher {
    pub fn new() -> Self {
        MessagePublisher {
            registry: RwLock::new(Registry::default()),
            observers: std::sync::Arc::new(|_: &str| None),
        }
    }

    pub fn with_observer_lookup(observers: std::sync::Arc<ObserverLookup>) -> Self {
        MessagePublisher {
            registry: RwLock::new(Registry::default()),
            observers,
        }
    }

    pub fn subscribe(&self, user: &str, product: &str) -> Result<(), EngineError> {
        self.registry.write().expect("lock poisoned").subscribe(user, product)
    }

    pub fn unsubscribe(&self, user: &str, product: &str) -> Result<(), EngineError> {
        self.registry.write().expect("lock poisoned").unsubscribe(user, product)
    }

    pub fn publish_fill(&self, msg: FillMessage) {
        if let Some(observer) = (self.observers)(&msg.user) {
            if self.user_is_subscribed(&msg.user, &msg.product) {
                observer.accept_fill(&msg);
            }
        }
    }

    pub fn publish_cancel(&self, msg: CancelMessage) {
        if let Some(observer) = (self.observers)(&msg.user) {
            if self.user_is_subscribed(&msg.user, &msg.product) {
                observer.accept_cancel(&msg);
            }
        }
    }

    /// Deliver to every known subscriber on every product registry: one
    /// message per (user, product) subscription.
    pub fn publish_market_message(&self, msg: MarketMessage) {
        let registry = self.registry.read().expect("lock poisoned");
        let rendered = msg.to_string();
        for product in registry.all_products() {
            for user in registry.subscribers_of(&product) {
                match (self.observers)(&user) {
                    Some(observer) => observer.accept_market_message(&rendered),
                    None => warn!(user, "market message subscriber has no live observer"),
                }
            }
        }
    }

    fn user_is_subscribed(&self, user: &str, product: &str) -> bool {
        self.registry
            .read()
            .expect("lock poisoned")
            .subscribers_of(product)
            .iter()
            .any(|u| u == user)
    }
}

impl Default for MessagePublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::side::Side;
    use crate::tradable::Tradable;
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Default)]
    struct RecordingObserver {
        fills: StdMutex<Vec<FillMessage>>,
        cancels: StdMutex<Vec<CancelMessage>>,
        tickers: StdMutex<Vec<(Price, char)>>,
        market_messages: StdMutex<Vec<String>>,
    }

    impl UserObserver for RecordingObserver {
        fn accept_last_sale(&self, _product: &str, _price: Price, _volume: u64) {}
        fn accept_fill(&self, msg: &FillMessage) {
            self.fills.lock().unwrap().push(msg.clone());
        }
        fn accept_cancel(&self, msg: &CancelMessage) {
            self.cancels.lock().unwrap().push(msg.clone());
        }
        fn accept_market_message(&self, state: &str) {
            self.market_messages.lock().unwrap().push(state.to_string());
        }
        fn accept_ticker(&self, _product: &str, price: Price, direction: char) {
            self.tickers.lock().unwrap().push((price, direction));
        }
        fn accept_current_market(&self, _p: &str, _bp: Price, _bv: u64, _sp: Price, _sv: u64) {}
    }

    fn observer_lookup(o: Arc<RecordingObserver>) -> Arc<ObserverLookup> {
        Arc::new(move |user: &str| {
            if user == "A" {
                Some(o.clone() as Arc<dyn UserObserver>)
            } else {
                None
            }
        })
    }

    #[test]
    fn subscribe_rejects_duplicate() {
        let publisher = CurrentMarketPublisher::new(Arc::new(|_| None));
        publisher.subscribe("A", "IBM").unwrap();
        assert!(publisher.subscribe("A", "IBM").is_err());
    }

    #[test]
    fn unsubscribe_rejects_absent() {
        let publisher = CurrentMarketPublisher::new(Arc::new(|_| None));
        assert!(publisher.unsubscribe("A", "IBM").is_err());
    }

    #[test]
    fn message_publisher_only_delivers_to_matching_user() {
        let observer = Arc::new(RecordingObserver::default());
        let publisher = MessagePublisher::with_observer_lookup(observer_lookup(observer.clone()));
        publisher.subscribe("A", "IBM").unwrap();

        let t = Tradable::new_order("A", "IBM", Price::Limit(1000), Side::Buy, 10).unwrap();
        publisher.publish_fill(FillMessage::for_tradable(&t, 10, "leaving 0"));

        let other = Tradable::new_order("B", "IBM", Price::Limit(1000), Side::Buy, 10).unwrap();
        publisher.publish_fill(FillMessage::for_tradable(&other, 10, "leaving 0"));

        assert_eq!(observer.fills.lock().unwrap().len(), 1);
    }

    #[test]
    fn ticker_direction_sequence() {
        let observer = Arc::new(RecordingObserver::default());
        let ticker = TickerPublisher::new(observer_lookup(observer.clone()));
        ticker.subscribe("A", "IBM").unwrap();

        ticker.publish_ticker("IBM", Price::Limit(1000));
        ticker.publish_ticker("IBM", Price::Limit(1000));
        ticker.publish_ticker("IBM", Price::Limit(900));
        ticker.publish_ticker("IBM", Price::Limit(1100));

        let directions: Vec<char> = observer.tickers.lock().unwrap().iter().map(|(_, d)| *d).collect();
        assert_eq!(directions, vec![' ', '=', '\u{2193}', '\u{2191}']);
    }

    #[test]
    fn market_message_delivered_per_subscription() {
        let observer = Arc::new(RecordingObserver::default());
        let publisher = MessagePublisher::with_observer_lookup(observer_lookup(observer.clone()));
        publisher.subscribe("A", "IBM").unwrap();
        publisher.subscribe("A", "AAPL").unwrap();

        publisher.publish_market_message(MarketMessage {
            state: crate::side::MarketState::Open,
        });

        assert_eq!(observer.market_messages.lock().unwrap().len(), 2);
    }
}
