//! UserCommandService: the client-facing command gateway. Owns session
//! identity (connect/disconnect, connection ids), authorizes every
//! subsequent operation against that session, and proxies to
//! `ProductService` or the appropriate publisher. Also wires each
//! connected user's `Position` so it updates itself from that user's own
//! fill and last-sale callbacks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use indexmap::IndexMap;
use tracing::info;

use crate::clock::next_monotonic_timestamp;
use crate::error::EngineError;
use crate::position::Position;
use crate::price::Price;
use crate::product_service::ProductService;
use crate::publishers::{
    CurrentMarketPublisher, LastSalePublisher, MessagePublisher, ObserverLookup, TickerPublisher, UserObserver,
};
use crate::side::{self, MarketState, Side};
use crate::tradable::TradableDto;

/// Registry of live connected users, shared by every publisher via a
/// lookup closure: publishers hold only a back-handle into this
/// directory, not a direct reference to `UserCommandService`, to avoid a
/// cyclic owner graph.
///
/// Stores the concrete `ConnectedUser` (not a type-erased `Arc<dyn
/// UserObserver>`) so that position reads (`getStockPositionValue` and
/// friends) can reach a connected user's `Position` directly, without a
/// downcast.
#[derive(Default)]
struct UserDirectory {
    connected: RwLock<IndexMap<String, Arc<ConnectedUser>>>,
}

impl UserDirectory {
    fn lookup(&self, user: &str) -> Option<Arc<dyn UserObserver>> {
        self.connected
            .read()
            .expect("lock poisoned")
            .get(user)
            .map(|u| u.clone() as Arc<dyn UserObserver>)
    }

    fn get(&self, user: &str) -> Option<Arc<ConnectedUser>> {
        self.connected.read().expect("lock poisoned").get(user).cloned()
    }

    fn insert(&self, user: String, connected: Arc<ConnectedUser>) {
        self.connected.write().expect("lock poisoned").insert(user, connected);
    }

    fn remove(&self, user: &str) {
        self.connected.write().expect("lock poisoned").shift_remove(user);
    }
}

/// Wraps the caller-supplied observer for one connected user: updates
/// that user's `Position` from fills and last-sale callbacks, then
/// forwards every callback on to the real observer unchanged.
struct ConnectedUser {
    position: Mutex<Position>,
    inner: Arc<dyn UserObserver>,
}

impl UserObserver for ConnectedUser {
    fn accept_last_sale(&self, product: &str, price: Price, volume: u64) {
        self.position.lock().expect("lock poisoned").update_last_sale(product, price);
        self.inner.accept_last_sale(product, price, volume);
    }

    fn accept_fill(&self, msg: &crate::messages::FillMessage) {
        self.position
            .lock()
            .expect("lock poisoned")
            .update_position(&msg.product, msg.price, msg.side, msg.volume);
        self.inner.accept_fill(msg);
    }

    fn accept_cancel(&self, msg: &crate::messages::CancelMessage) {
        self.inner.accept_cancel(msg);
    }

    fn accept_market_message(&self, state: &str) {
        self.inner.accept_market_message(state);
    }

    fn accept_ticker(&self, product: &str, price: Price, direction: char) {
        self.inner.accept_ticker(product, price, direction);
    }

    fn accept_current_market(&self, product: &str, buy_price: Price, buy_volume: u64, sell_price: Price, sell_volume: u64) {
        self.inner
            .accept_current_market(product, buy_price, buy_volume, sell_price, sell_volume);
    }
}

struct Connection {
    id: u64,
}

/// The client-facing gateway. Every operation other than `connect` takes
/// `(user, connId)` and is authorized by `verify_user` before it is
/// allowed to touch `ProductService` or a publisher.
pub struct UserCommandService {
    product_service: Arc<ProductService>,
    current_market_publisher: Arc<CurrentMarketPublisher>,
    last_sale_publisher: Arc<LastSalePublisher>,
    ticker_publisher: Arc<TickerPublisher>,
    message_publisher: Arc<MessagePublisher>,
    directory: Arc<UserDirectory>,
    connections: Mutex<HashMap<String, Connection>>,
}

impl UserCommandService {
    pub fn new() -> Self {
        let directory = Arc::new(UserDirectory::default());

        let message_publisher = Arc::new(MessagePublisher::with_observer_lookup(lookup_fn(&directory)));
        let current_market_publisher = Arc::new(CurrentMarketPublisher::new(lookup_fn(&directory)));
        let last_sale_publisher = Arc::new(LastSalePublisher::new(lookup_fn(&directory)));
        let ticker_publisher = Arc::new(TickerPublisher::new(lookup_fn(&directory)));

        let product_service = Arc::new(ProductService::new(
            current_market_publisher.clone(),
            last_sale_publisher.clone(),
            ticker_publisher.clone(),
            message_publisher.clone(),
        ));

        UserCommandService {
            product_service,
            current_market_publisher,
            last_sale_publisher,
            ticker_publisher,
            message_publisher,
            directory,
            connections: Mutex::new(HashMap::new()),
        }
    }

    // ---- session identity -------------------------------------------------

    /// Connect `user`, registering `observer` to receive every callback
    /// this user is subscribed to. Returns the connection id. Fails with
    /// `AlreadyConnected` on a duplicate connect.
    pub fn connect(&self, user: &str, observer: Arc<dyn UserObserver>) -> Result<u64, EngineError> {
        let user = side::normalize(user)?;
        let mut connections = self.connections.lock().expect("lock poisoned");
        if connections.contains_key(&user) {
            return Err(EngineError::AlreadyConnected(user));
        }

        let id = next_monotonic_timestamp();
        let connected = Arc::new(ConnectedUser {
            position: Mutex::new(Position::new()),
            inner: observer,
        });
        self.directory.insert(user.clone(), connected);
        connections.insert(user, Connection { id });
        Ok(id)
    }

    /// Disconnect `user`, discarding their connection, observer and
    /// `Position`.
    pub fn disconnect(&self, user: &str, conn_id: u64) -> Result<(), EngineError> {
        let user = self.verify_user(user, conn_id)?;
        self.connections.lock().expect("lock poisoned").remove(&user);
        self.directory.remove(&user);
        Ok(())
    }

    /// Authorize an operation: fails with `UserNotConnected` for an
    /// unknown user, `InvalidConnectionId` for a known user whose id does
    /// not match the live session. Returns the normalized user name.
    fn verify_user(&self, user: &str, conn_id: u64) -> Result<String, EngineError> {
        let user = side::normalize(user)?;
        let connections = self.connections.lock().expect("lock poisoned");
        match connections.get(&user) {
            None => Err(EngineError::UserNotConnected(user)),
            Some(conn) if conn.id != conn_id => Err(EngineError::InvalidConnectionId(user)),
            Some(_) => Ok(user),
        }
    }

    // ---- admin surface ------------------------------------------------

    pub fn create_product(&self, symbol: &str) -> Result<(), EngineError> {
        self.product_service.create_product(symbol)
    }

    pub fn set_market_state(&self, state: MarketState) -> Result<(), EngineError> {
        self.product_service.set_market_state(state)
    }

    pub fn get_market_state(&self) -> MarketState {
        self.product_service.market_state()
    }

    pub fn get_products(&self) -> Vec<String> {
        self.product_service.products()
    }

    // ---- order / quote commands ----------------------------------------

    pub fn submit_order(
        &self,
        user: &str,
        conn_id: u64,
        product: &str,
        price: Price,
        volume: u64,
        side: Side,
    ) -> Result<String, EngineError> {
        let user = self.verify_user(user, conn_id)?;
        let product = side::normalize(product)?;
        info!(%user, %product, ?side, volume, "submit order");
        self.product_service.submit_order(&product, price, volume, side, &user)
    }

    pub fn submit_order_cancel(
        &self,
        user: &str,
        conn_id: u64,
        product: &str,
        side: Side,
        order_id: &str,
    ) -> Result<(), EngineError> {
        let user = self.verify_user(user, conn_id)?;
        let product = side::normalize(product)?;
        self.product_service.submit_order_cancel(&product, side, order_id, &user)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn submit_quote(
        &self,
        user: &str,
        conn_id: u64,
        product: &str,
        buy_price: Price,
        buy_volume: u64,
        sell_price: Price,
        sell_volume: u64,
    ) -> Result<(), EngineError> {
        let user = self.verify_user(user, conn_id)?;
        let product = side::normalize(product)?;
        self.product_service
            .submit_quote(&product, &user, buy_price, buy_volume, sell_price, sell_volume)
    }

    pub fn submit_quote_cancel(&self, user: &str, conn_id: u64, product: &str) -> Result<(), EngineError> {
        let user = self.verify_user(user, conn_id)?;
        let product = side::normalize(product)?;
        self.product_service.submit_quote_cancel(&product, &user)
    }

    // ---- subscriptions --------------------------------------------------

    pub fn subscribe_current_market(&self, user: &str, conn_id: u64, product: &str) -> Result<(), EngineError> {
        let user = self.verify_user(user, conn_id)?;
        self.current_market_publisher.subscribe(&user, &side::normalize(product)?)
    }

    pub fn unsubscribe_current_market(&self, user: &str, conn_id: u64, product: &str) -> Result<(), EngineError> {
        let user = self.verify_user(user, conn_id)?;
        self.current_market_publisher.unsubscribe(&user, &side::normalize(product)?)
    }

    pub fn subscribe_last_sale(&self, user: &str, conn_id: u64, product: &str) -> Result<(), EngineError> {
        let user = self.verify_user(user, conn_id)?;
        self.last_sale_publisher.subscribe(&user, &side::normalize(product)?)
    }

    pub fn unsubscribe_last_sale(&self, user: &str, conn_id: u64, product: &str) -> Result<(), EngineError> {
        let user = self.verify_user(user, conn_id)?;
        self.last_sale_publisher.unsubscribe(&user, &side::normalize(product)?)
    }

    pub fn subscribe_ticker(&self, user: &str, conn_id: u64, product: &str) -> Result<(), EngineError> {
        let user = self.verify_user(user, conn_id)?;
        self.ticker_publisher.subscribe(&user, &side::normalize(product)?)
    }

    pub fn unsubscribe_ticker(&self, user: &str, conn_id: u64, product: &str) -> Result<(), EngineError> {
        let user = self.verify_user(user, conn_id)?;
        self.ticker_publisher.unsubscribe(&user, &side::normalize(product)?)
    }

    pub fn subscribe_messages(&self, user: &str, conn_id: u64, product: &str) -> Result<(), EngineError> {
        let user = self.verify_user(user, conn_id)?;
        self.message_publisher.subscribe(&user, &side::normalize(product)?)
    }

    pub fn unsubscribe_messages(&self, user: &str, conn_id: u64, product: &str) -> Result<(), EngineError> {
        let user = self.verify_user(user, conn_id)?;
        self.message_publisher.unsubscribe(&user, &side::normalize(product)?)
    }

    // ---- reads ------------------------------------------------------------

    pub fn get_book_depth(&self, user: &str, conn_id: u64, product: &str) -> Result<(Vec<String>, Vec<String>), EngineError> {
        let _user = self.verify_user(user, conn_id)?;
        self.product_service.book_depth(&side::normalize(product)?)
    }

    pub fn get_orders_with_remaining_qty(
        &self,
        user: &str,
        conn_id: u64,
        product: &str,
    ) -> Result<Vec<TradableDto>, EngineError> {
        let user = self.verify_user(user, conn_id)?;
        self.product_service
            .orders_with_remaining_qty(&side::normalize(product)?, &user)
    }

    // ---- position reads -----------------------------------------------

    pub fn get_stock_position_value(&self, user: &str, conn_id: u64, product: &str) -> Result<Price, EngineError> {
        let user = self.verify_user(user, conn_id)?;
        let observer = self.connected_observer(&user)?;
        let product = side::normalize(product)?;
        Ok(observer.position.lock().expect("lock poisoned").stock_position_value(&product))
    }

    pub fn get_all_stock_value(&self, user: &str, conn_id: u64) -> Result<Price, EngineError> {
        let user = self.verify_user(user, conn_id)?;
        let observer = self.connected_observer(&user)?;
        Ok(observer.position.lock().expect("lock poisoned").all_stock_value())
    }

    pub fn get_net_account_value(&self, user: &str, conn_id: u64) -> Result<Price, EngineError> {
        let user = self.verify_user(user, conn_id)?;
        let observer = self.connected_observer(&user)?;
        Ok(observer.position.lock().expect("lock poisoned").net_account_value())
    }

    pub fn get_account_costs(&self, user: &str, conn_id: u64) -> Result<Price, EngineError> {
        let user = self.verify_user(user, conn_id)?;
        let observer = self.connected_observer(&user)?;
        Ok(observer.position.lock().expect("lock poisoned").account_costs())
    }

    fn connected_observer(&self, user: &str) -> Result<Arc<ConnectedUser>, EngineError> {
        self.directory
            .get(user)
            .ok_or_else(|| EngineError::UserNotConnected(user.to_string()))
    }
}

impl Default for UserCommandService {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the `ObserverLookup` closure a publisher uses to resolve a user
/// name to their live observer, backed by the shared directory.
fn lookup_fn(directory: &Arc<UserDirectory>) -> Arc<ObserverLookup> {
    let directory = directory.clone();
    Arc::new(move |user: &str| directory.lookup(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{CancelMessage, FillMessage};

    #[derive(Default)]
    struct NullObserver;
    impl UserObserver for NullObserver {
        fn accept_last_sale(&self, _product: &str, _price: Price, _volume: u64) {}
        fn accept_fill(&self, _msg: &FillMessage) {}
        fn accept_cancel(&self, _msg: &CancelMessage) {}
        fn accept_market_message(&self, _state: &str) {}
        fn accept_ticker(&self, _product: &str, _price: Price, _direction: char) {}
        fn accept_current_market(&self, _p: &str, _bp: Price, _bv: u64, _sp: Price, _sv: u64) {}
    }

    #[test]
    fn connect_rejects_duplicate() {
        let svc = UserCommandService::new();
        svc.connect("A", Arc::new(NullObserver)).unwrap();
        assert!(matches!(svc.connect("a", Arc::new(NullObserver)), Err(EngineError::AlreadyConnected(_))));
    }

    #[test]
    fn operations_require_matching_connection_id() {
        let svc = UserCommandService::new();
        let id = svc.connect("A", Arc::new(NullObserver)).unwrap();
        svc.create_product("IBM").unwrap();
        svc.set_market_state(MarketState::Preopen).unwrap();

        assert!(matches!(
            svc.submit_order("A", id + 1, "IBM", Price::Limit(1000), 10, Side::Buy),
            Err(EngineError::InvalidConnectionId(_))
        ));
        assert!(matches!(
            svc.submit_order("B", 0, "IBM", Price::Limit(1000), 10, Side::Buy),
            Err(EngineError::UserNotConnected(_))
        ));
        assert!(svc.submit_order("A", id, "IBM", Price::Limit(1000), 10, Side::Buy).is_ok());
    }

    #[test]
    fn disconnect_then_operate_fails() {
        let svc = UserCommandService::new();
        let id = svc.connect("A", Arc::new(NullObserver)).unwrap();
        svc.disconnect("A", id).unwrap();
        assert!(matches!(svc.get_market_state_guarded("A", id), Err(EngineError::UserNotConnected(_))));
    }

    impl UserCommandService {
        fn get_market_state_guarded(&self, user: &str, conn_id: u64) -> Result<MarketState, EngineError> {
            self.verify_user(user, conn_id)?;
            Ok(self.get_market_state())
        }
    }
}
