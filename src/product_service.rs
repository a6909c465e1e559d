//! ProductService: the per-process registry of symbols and the
//! market-state machine (CLOSED -> PREOPEN -> OPEN -> CLOSED).
//!
//! This is modeled as an explicitly constructed component rather than a
//! language-level singleton: the application wires one `ProductService`
//! through the constructors of whatever owns it (here,
//! `UserCommandService`).

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use tracing::info;

use crate::error::EngineError;
use crate::messages::MarketMessage;
use crate::price::Price;
use crate::product_book::ProductBook;
use crate::publishers::{CurrentMarketPublisher, LastSalePublisher, MessagePublisher, TickerPublisher};
use crate::side::{MarketState, Side};
use crate::tradable::{Quote, Tradable};

/// Owns every symbol's `ProductBook` plus the single market-state
/// variable shared by all of them, and the four publishers every book
/// reports through.
pub struct ProductService {
    books: Mutex<IndexMap<String, ProductBook>>,
    state: Mutex<MarketState>,
    current_market_publisher: Arc<CurrentMarketPublisher>,
    last_sale_publisher: Arc<LastSalePublisher>,
    ticker_publisher: Arc<TickerPublisher>,
    message_publisher: Arc<MessagePublisher>,
}

impl ProductService {
    pub fn new(
        current_market_publisher: Arc<CurrentMarketPublisher>,
        last_sale_publisher: Arc<LastSalePublisher>,
        ticker_publisher: Arc<TickerPublisher>,
        message_publisher: Arc<MessagePublisher>,
    ) -> Self {
        ProductService {
            books: Mutex::new(IndexMap::new()),
            state: Mutex::new(MarketState::Closed),
            current_market_publisher,
            last_sale_publisher,
            ticker_publisher,
            message_publisher,
        }
    }

    pub fn market_state(&self) -> MarketState {
        *self.state.lock().expect("lock poisoned")
    }

    pub fn products(&self) -> Vec<String> {
        self.books.lock().expect("lock poisoned").keys().cloned().collect()
    }

    /// Register a new symbol. Fails with `ProductAlreadyExists` on a
    /// duplicate `createProduct`.
    pub fn create_product(&self, symbol: &str) -> Result<(), EngineError> {
        let symbol = crate::side::normalize(symbol)?;
        let mut books = self.books.lock().expect("lock poisoned");
        if books.contains_key(&symbol) {
            return Err(EngineError::ProductAlreadyExists(symbol));
        }
        books.insert(
            symbol.clone(),
            ProductBook::new(
                symbol,
                self.current_market_publisher.clone(),
                self.last_sale_publisher.clone(),
                self.ticker_publisher.clone(),
                self.message_publisher.clone(),
            ),
        );
        Ok(())
    }

    /// Drive the market-state machine. Only CLOSED->PREOPEN,
    /// PREOPEN->OPEN and OPEN->CLOSED are legal; anything else fails with
    /// `InvalidMarketStateTransition`. On entering OPEN every book is
    /// opened (crossed); on entering CLOSED every book is closed
    /// (cancel-all). A `MarketMessage` is published to every message
    /// subscriber after a successful transition.
    pub fn set_market_state(&self, next: MarketState) -> Result<(), EngineError> {
        {
            let mut current = self.state.lock().expect("lock poisoned");
            if !current.can_transition_to(next) {
                return Err(EngineError::InvalidMarketStateTransition {
                    from: *current,
                    to: next,
                });
            }
            *current = next;
        }

        info!(state = ?next, "market state transition");

        let mut books = self.books.lock().expect("lock poisoned");
        match next {
            MarketState::Open => {
                for book in books.values_mut() {
                    book.open_market();
                }
            }
            MarketState::Closed => {
                for book in books.values_mut() {
                    book.close_market();
                }
            }
            MarketState::Preopen => {}
        }
        drop(books);

        self.message_publisher
            .publish_market_message(MarketMessage { state: next });
        Ok(())
    }

    /// Submit a standalone order for `symbol`. Fails with
    /// `InvalidMarketState` when the market is CLOSED, and with
    /// `InvalidData` for a MKT order submitted during PREOPEN.
    pub fn submit_order(
        &self,
        symbol: &str,
        price: Price,
        volume: u64,
        side: Side,
        user: &str,
    ) -> Result<String, EngineError> {
        let state = self.market_state();
        if state == MarketState::Closed {
            return Err(EngineError::InvalidMarketState {
                operation: "submitOrder".to_string(),
                current: state,
            });
        }
        if state == MarketState::Preopen && price.is_market() {
            return Err(EngineError::InvalidData(
                "MKT orders are not accepted while the market is PREOPEN".to_string(),
            ));
        }

        let order = Tradable::new_order(user, symbol, price, side, volume)?;
        let id = order.id().to_string();

        let mut books = self.books.lock().expect("lock poisoned");
        let book = books
            .get_mut(symbol)
            .ok_or_else(|| EngineError::NoSuchProduct(symbol.to_string()))?;
        book.submit_order(order, state)?;
        Ok(id)
    }

    /// Submit a two-sided quote for `symbol`.
    pub fn submit_quote(
        &self,
        symbol: &str,
        user: &str,
        buy_price: Price,
        buy_volume: u64,
        sell_price: Price,
        sell_volume: u64,
    ) -> Result<(), EngineError> {
        let state = self.market_state();
        if state == MarketState::Closed {
            return Err(EngineError::InvalidMarketState {
                operation: "submitQuote".to_string(),
                current: state,
            });
        }

        let quote = Quote::new(user, symbol, buy_price, buy_volume, sell_price, sell_volume)?;

        let mut books = self.books.lock().expect("lock poisoned");
        let book = books
            .get_mut(symbol)
            .ok_or_else(|| EngineError::NoSuchProduct(symbol.to_string()))?;
        book.submit_quote(quote, state)
    }

    /// Cancel a resting order. Permitted in any state except CLOSED.
    pub fn submit_order_cancel(
        &self,
        symbol: &str,
        side: Side,
        order_id: &str,
        user: &str,
    ) -> Result<(), EngineError> {
        let state = self.market_state();
        if state == MarketState::Closed {
            return Err(EngineError::InvalidMarketState {
                operation: "submitOrderCancel".to_string(),
                current: state,
            });
        }

        let mut books = self.books.lock().expect("lock poisoned");
        let book = books
            .get_mut(symbol)
            .ok_or_else(|| EngineError::NoSuchProduct(symbol.to_string()))?;
        book.submit_order_cancel(side, order_id, user)
    }

    /// Cancel a user's live quote on `symbol`. Permitted in any state
    /// except CLOSED.
    pub fn submit_quote_cancel(&self, symbol: &str, user: &str) -> Result<(), EngineError> {
        let state = self.market_state();
        if state == MarketState::Closed {
            return Err(EngineError::InvalidMarketState {
                operation: "submitQuoteCancel".to_string(),
                current: state,
            });
        }

        let mut books = self.books.lock().expect("lock poisoned");
        let book = books
            .get_mut(symbol)
            .ok_or_else(|| EngineError::NoSuchProduct(symbol.to_string()))?;
        book.submit_quote_cancel(user);
        Ok(())
    }

    pub fn book_depth(&self, symbol: &str) -> Result<(Vec<String>, Vec<String>), EngineError> {
        let books = self.books.lock().expect("lock poisoned");
        let book = books
            .get(symbol)
            .ok_or_else(|| EngineError::NoSuchProduct(symbol.to_string()))?;
        Ok(book.book_depth())
    }

    pub fn orders_with_remaining_qty(
        &self,
        symbol: &str,
        user: &str,
    ) -> Result<Vec<crate::tradable::TradableDto>, EngineError> {
        let books = self.books.lock().expect("lock poisoned");
        let book = books
            .get(symbol)
            .ok_or_else(|| EngineError::NoSuchProduct(symbol.to_string()))?;
        Ok(book.orders_with_remaining_qty(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn service() -> ProductService {
        let message_publisher = Arc::new(MessagePublisher::new());
        ProductService::new(
            Arc::new(CurrentMarketPublisher::new(Arc::new(|_| None))),
            Arc::new(LastSalePublisher::new(Arc::new(|_| None))),
            Arc::new(TickerPublisher::new(Arc::new(|_| None))),
            message_publisher,
        )
    }

    #[test]
    fn create_product_rejects_duplicate() {
        let svc = service();
        svc.create_product("IBM").unwrap();
        assert!(matches!(svc.create_product("ibm"), Err(EngineError::ProductAlreadyExists(_))));
    }

    #[test]
    fn state_machine_accepts_only_the_three_legal_edges() {
        let svc = service();
        assert!(svc.set_market_state(MarketState::Open).is_err());
        svc.set_market_state(MarketState::Preopen).unwrap();
        assert!(svc.set_market_state(MarketState::Preopen).is_err());
        svc.set_market_state(MarketState::Open).unwrap();
        svc.set_market_state(MarketState::Closed).unwrap();
    }

    #[test]
    fn submit_order_rejected_while_closed() {
        let svc = service();
        svc.create_product("IBM").unwrap();
        let err = svc
            .submit_order("IBM", Price::Limit(1000), 10, Side::Buy, "A")
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidMarketState { .. }));
    }

    #[test]
    fn market_order_rejected_in_preopen() {
        let svc = service();
        svc.create_product("IBM").unwrap();
        svc.set_market_state(MarketState::Preopen).unwrap();
        let err = svc
            .submit_order("IBM", Price::Market, 10, Side::Buy, "A")
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidData(_)));
    }

    #[test]
    fn aggressive_cross_on_open_produces_fills_and_empties_book() {
        let svc = service();
        svc.create_product("IBM").unwrap();
        svc.set_market_state(MarketState::Preopen).unwrap();
        svc.submit_order("IBM", Price::Limit(1000), 100, Side::Buy, "A").unwrap();
        svc.submit_order("IBM", Price::Limit(1000), 100, Side::Sell, "B").unwrap();
        svc.set_market_state(MarketState::Open).unwrap();

        let (buy_depth, sell_depth) = svc.book_depth("IBM").unwrap();
        assert_eq!(buy_depth, vec!["<Empty>".to_string()]);
        assert_eq!(sell_depth, vec!["<Empty>".to_string()]);
    }
}
