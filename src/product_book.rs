//! ProductBook: owns the BUY and SELL sides of one symbol, and everything
//! that needs a view of both at once — opening/closing the market,
//! routing cancels, and deriving current-market/last-sale publications.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use tracing::debug;

use crate::book_side::BookSide;
use crate::error::EngineError;
use crate::messages::{CancelMessage, FillMessage};
use crate::price::Price;
use crate::publishers::{CurrentMarketPublisher, LastSalePublisher, MessagePublisher, TickerPublisher};
use crate::side::{MarketState, Side};
use crate::tradable::{Quote, Tradable, TradableDto};

/// Per-symbol log of tradables that have been fully consumed or
/// cancelled, keyed by their own price, used only to diagnose
/// too-late-to-cancel.
#[derive(Default)]
pub struct Archive {
    entries: IndexMap<Price, Vec<TradableDto>>,
}

impl Archive {
    pub fn add(&mut self, dto: TradableDto) {
        self.entries.entry(dto.price).or_default().push(dto);
    }

    /// Scan every archived entry for a live (non-quote) order matching
    /// `user`/`order_id`.
    pub fn find_order(&self, user: &str, order_id: &str) -> Option<TradableDto> {
        self.entries
            .values()
            .flatten()
            .find(|dto| !dto.is_quote && dto.user == user && dto.id == order_id)
            .cloned()
    }
}

/// One symbol's order book: two `BookSide`s, the set of users currently
/// holding a live quote, the shared archive, and current-market
/// dedup state.
pub struct ProductBook {
    symbol: String,
    buy: BookSide,
    sell: BookSide,
    quote_users: HashSet<String>,
    archive: Arc<Mutex<Archive>>,
    last_published_fingerprint: Mutex<Option<String>>,
    current_market_publisher: Arc<CurrentMarketPublisher>,
    last_sale_publisher: Arc<LastSalePublisher>,
    ticker_publisher: Arc<TickerPublisher>,
    message_publisher: Arc<MessagePublisher>,
}

impl ProductBook {
    pub fn new(
        symbol: impl Into<String>,
        current_market_publisher: Arc<CurrentMarketPublisher>,
        last_sale_publisher: Arc<LastSalePublisher>,
        ticker_publisher: Arc<TickerPublisher>,
        message_publisher: Arc<MessagePublisher>,
    ) -> Self {
        let archive = Arc::new(Mutex::new(Archive::default()));
        ProductBook {
            symbol: symbol.into(),
            buy: BookSide::new(Side::Buy, archive.clone(), message_publisher.clone()),
            sell: BookSide::new(Side::Sell, archive.clone(), message_publisher.clone()),
            quote_users: HashSet::new(),
            archive,
            last_published_fingerprint: Mutex::new(None),
            current_market_publisher,
            last_sale_publisher,
            ticker_publisher,
            message_publisher,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::Buy => &self.buy,
            Side::Sell => &self.sell,
        }
    }

    pub fn book_depth(&self) -> (Vec<String>, Vec<String>) {
        (self.buy.book_depth(), self.sell.book_depth())
    }

    /// Every live order (either side) belonging to `user`, for
    /// `getOrdersWithRemainingQty`.
    pub fn orders_with_remaining_qty(&self, user: &str) -> Vec<TradableDto> {
        let mut orders = self.buy.orders_for_user(user);
        orders.extend(self.sell.orders_for_user(user));
        orders
    }

    /// Submit a standalone order. In PREOPEN it simply rests; otherwise it
    /// is matched against the opposite side first.
    pub fn submit_order(&mut self, mut order: Tradable, state: MarketState) -> Result<(), EngineError> {
        if state == MarketState::Preopen {
            self.own_side_mut(order.side()).add_to_book(order);
            return Ok(());
        }

        let fills = self.opposite_side_mut(order.side()).try_trade(&mut order);

        if !fills.is_empty() {
            self.publish_current_market();
            self.publish_last_sale_from(&fills);
        }

        if order.remaining_volume() > 0 {
            if order.price().is_market() {
                let detail = "Cancelled".to_string();
                let msg = CancelMessage::for_tradable(&order, order.remaining_volume(), detail);
                self.message_publisher.publish_cancel(msg);
            } else {
                self.own_side_mut(order.side()).add_to_book(order);
                self.publish_current_market();
            }
        } else {
            // Fully consumed as the aggressor: not archived by the match
            // itself when it clears exactly at a full-takeout boundary
            // (book_side::do_trade only archives the resting leg there).
            // Archive it ourselves so a later cancel attempt reports
            // "Too late to cancel." instead of OrderNotFound.
            self.archive_consumed(order);
        }

        Ok(())
    }

    /// Submit a two-sided quote, replacing any prior quote by this user.
    pub fn submit_quote(&mut self, quote: Quote, state: MarketState) -> Result<(), EngineError> {
        let user = quote.buy.user().to_string();
        if self.quote_users.contains(&user) {
            self.buy.remove_quote(&user);
            self.sell.remove_quote(&user);
            self.publish_current_market();
        }

        self.submit_order(quote.buy, state)?;
        self.submit_order(quote.sell, state)?;
        self.quote_users.insert(user);
        self.publish_current_market();
        Ok(())
    }

    /// Cancel a live order by id on the given side. Falls back to the
    /// archive to distinguish "too late to cancel" from "never existed".
    pub fn submit_order_cancel(&mut self, side: Side, order_id: &str, user: &str) -> Result<(), EngineError> {
        let found = self.own_side_mut(side).submit_order_cancel(order_id);
        if found.is_some() {
            self.publish_current_market();
            return Ok(());
        }

        let archived = self.archive.lock().expect("archive mutex poisoned").find_order(user, order_id);
        match archived {
            Some(dto) => {
                let msg = CancelMessage::from_fields(
                    dto.user,
                    dto.product,
                    dto.price,
                    dto.cancelled_volume,
                    "Too late to cancel.",
                    dto.side,
                    dto.id,
                    dto.is_quote,
                );
                self.message_publisher.publish_cancel(msg);
                Ok(())
            }
            None => Err(EngineError::OrderNotFound {
                user: user.to_string(),
                id: order_id.to_string(),
            }),
        }
    }

    /// Cancel this user's quote (both sides, wherever present).
    pub fn submit_quote_cancel(&mut self, user: &str) {
        self.buy.submit_quote_cancel(user);
        self.sell.submit_quote_cancel(user);
        self.quote_users.remove(user);
        self.publish_current_market();
    }

    /// Cross the book while both tops exist and cross, draining the BUY
    /// top bucket against the SELL side one entry at a time.
    pub fn open_market(&mut self) {
        loop {
            let (buy_top, sell_top) = match (self.buy.top_of_book_price(), self.sell.top_of_book_price()) {
                (Some(b), Some(s)) => (b, s),
                _ => break,
            };

            let crossing = buy_top.is_market() || sell_top.is_market() || buy_top.greater_than_or_equal(&sell_top);
            if !crossing {
                break;
            }

            let entry_id = {
                let bucket = self.buy.top_of_book_entries();
                match bucket.first() {
                    Some(t) => t.id().to_string(),
                    None => break,
                }
            };

            let mut entry = match self.buy.take_by_id(&entry_id) {
                Some(t) => t,
                None => break,
            };

            let fills = self.sell.try_trade(&mut entry);
            if !fills.is_empty() {
                self.publish_last_sale_from(&fills);
            }

            if entry.remaining_volume() > 0 {
                self.buy.add_to_book(entry);
            } else {
                // Same fully-consumed-aggressor gap as `submit_order`: the
                // BUY entry driving this crossing loop is removed from the
                // book via `take_by_id` and may be fully filled without
                // ever being archived by `do_trade`.
                self.archive_consumed(entry);
            }

            self.publish_current_market();
        }
    }

    /// Cancel everything on both sides and republish current market.
    pub fn close_market(&mut self) {
        self.buy.cancel_all();
        self.sell.cancel_all();
        self.quote_users.clear();
        self.publish_current_market();
    }

    fn own_side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Buy => &mut self.buy,
            Side::Sell => &mut self.sell,
        }
    }

    fn opposite_side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Buy => &mut self.sell,
            Side::Sell => &mut self.buy,
        }
    }

    /// Archive a tradable that was fully consumed as the aggressor in a
    /// cross, so `submitOrderCancel`'s too-late-to-cancel fallback can
    /// find it. Its remaining volume is already 0 by the time it reaches
    /// here, so the archived cancelled volume is its full original
    /// volume — the total amount no longer available to cancel.
    fn archive_consumed(&self, mut t: Tradable) {
        t.set_cancelled_volume(t.original_volume())
            .expect("remaining is already 0, so cancelled <= original always holds");
        self.archive.lock().expect("archive mutex poisoned").add(t.to_dto());
    }

    /// Compute the current-market fingerprint and publish only if it has
    /// changed since the last publication.
    fn publish_current_market(&mut self) {
        let buy_price = self.buy.top_of_book_price();
        let buy_volume = self.buy.top_of_book_volume();
        let sell_price = self.sell.top_of_book_price();
        let sell_volume = self.sell.top_of_book_volume();

        let fingerprint = format!(
            "{}|{}|{}|{}",
            buy_price.unwrap_or_else(Price::zero),
            buy_volume,
            sell_price.unwrap_or_else(Price::zero),
            sell_volume
        );

        let mut last = self.last_published_fingerprint.lock().expect("lock poisoned");
        if last.as_deref() == Some(fingerprint.as_str()) {
            return;
        }
        *last = Some(fingerprint);
        drop(last);

        debug!(symbol = %self.symbol, "publishing current market");
        self.current_market_publisher
            .publish_current_market(&self.symbol, buy_price, buy_volume, sell_price, sell_volume);
    }

    /// From the fill map produced by matching one incoming, extract the
    /// fill with the lowest price (total order over cents) and report it
    /// as the last sale — independent of the incoming order's side.
    fn publish_last_sale_from(&self, fills: &IndexMap<crate::messages::FillKey, FillMessage>) {
        let lowest = fills
            .values()
            .min_by(|a, b| a.price.cents().cmp(&b.price.cents()).then(Ordering::Equal));
        if let Some(fill) = lowest {
            self.last_sale_publisher
                .publish_last_sale(&self.ticker_publisher, &self.symbol, Some(fill.price), fill.volume);
        }
    }
}
