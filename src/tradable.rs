//! Tradable: the common representation of working interest — an Order,
//! or one side of a Quote.
//!
//! `Order` and `QuoteSide` are not separate structs: both delegate to one
//! concrete [`Tradable`] record plus a [`TradableKind`] tag. Orders and
//! quote-sides share the same `<user><product><price>+ts` id-generation
//! scheme; behavior is otherwise identical.

use std::fmt;

use crate::clock::next_monotonic_timestamp;
use crate::error::EngineError;
use crate::price::Price;
use crate::side::{self, Side};

/// Distinguishes an `Order` from one side of a `Quote`. Both share the
/// same `Tradable` representation and mutation rules.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TradableKind {
    Order,
    QuoteSide,
}

/// A unit of working interest: an order, or one side of a quote.
///
/// Invariant, enforced on every mutation: `remaining_volume +
/// cancelled_volume <= original_volume`.
#[derive(Debug, Clone)]
pub struct Tradable {
    id: String,
    user: String,
    product: String,
    price: Price,
    side: Side,
    original_volume: u64,
    remaining_volume: u64,
    cancelled_volume: u64,
    kind: TradableKind,
}

impl Tradable {
    fn new(
        user: &str,
        product: &str,
        price: Price,
        side: Side,
        original_volume: u64,
        kind: TradableKind,
    ) -> Result<Tradable, EngineError> {
        let user = side::normalize(user)?;
        let product = side::normalize(product)?;
        if original_volume == 0 {
            return Err(EngineError::InvalidData(
                "original volume must be > 0".to_string(),
            ));
        }

        let id = format!(
            "{user}{product}{price}+{ts}",
            ts = next_monotonic_timestamp()
        );

        Ok(Tradable {
            id,
            user,
            product,
            price,
            side,
            original_volume,
            remaining_volume: original_volume,
            cancelled_volume: 0,
            kind,
        })
    }

    /// Construct a new standalone order.
    pub fn new_order(
        user: &str,
        product: &str,
        price: Price,
        side: Side,
        volume: u64,
    ) -> Result<Tradable, EngineError> {
        Tradable::new(user, product, price, side, volume, TradableKind::Order)
    }

    /// Construct one side of a quote (the other side is a second, separate
    /// `Tradable` with the opposite side/price/volume).
    pub fn new_quote_side(
        user: &str,
        product: &str,
        price: Price,
        side: Side,
        volume: u64,
    ) -> Result<Tradable, EngineError> {
        Tradable::new(user, product, price, side, volume, TradableKind::QuoteSide)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn price(&self) -> Price {
        self.price
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn original_volume(&self) -> u64 {
        self.original_volume
    }

    pub fn remaining_volume(&self) -> u64 {
        self.remaining_volume
    }

    pub fn cancelled_volume(&self) -> u64 {
        self.cancelled_volume
    }

    pub fn is_quote(&self) -> bool {
        self.kind == TradableKind::QuoteSide
    }

    pub fn is_filled(&self) -> bool {
        self.remaining_volume == 0
    }

    /// Set remaining volume. Fails if it would violate `remaining +
    /// cancelled <= original`.
    pub fn set_remaining_volume(&mut self, n: u64) -> Result<(), EngineError> {
        if n.saturating_add(self.cancelled_volume) > self.original_volume {
            return Err(EngineError::InvalidData(format!(
                "remaining volume {n} + cancelled {} exceeds original {}",
                self.cancelled_volume, self.original_volume
            )));
        }
        self.remaining_volume = n;
        Ok(())
    }

    /// Set cancelled volume. Fails if it would violate `remaining +
    /// cancelled <= original`.
    pub fn set_cancelled_volume(&mut self, n: u64) -> Result<(), EngineError> {
        if n.saturating_add(self.remaining_volume) > self.original_volume {
            return Err(EngineError::InvalidData(format!(
                "cancelled volume {n} + remaining {} exceeds original {}",
                self.remaining_volume, self.original_volume
            )));
        }
        self.cancelled_volume = n;
        Ok(())
    }

    /// Reduce `remaining_volume` by `qty` (used by the matching processor).
    /// `qty` must not exceed the current remaining volume.
    pub fn reduce_remaining(&mut self, qty: u64) -> Result<(), EngineError> {
        let new_remaining = self
            .remaining_volume
            .checked_sub(qty)
            .ok_or_else(|| EngineError::InvalidData("fill exceeds remaining volume".to_string()))?;
        self.set_remaining_volume(new_remaining)
    }

    pub fn to_dto(&self) -> TradableDto {
        TradableDto {
            id: self.id.clone(),
            user: self.user.clone(),
            product: self.product.clone(),
            price: self.price,
            side: self.side,
            original_volume: self.original_volume,
            remaining_volume: self.remaining_volume,
            cancelled_volume: self.cancelled_volume,
            is_quote: self.is_quote(),
        }
    }
}

/// Immutable external snapshot of a [`Tradable`], returned by operations
/// like `removeQuote` that hand a caller a point-in-time view.
#[derive(Debug, Clone, PartialEq)]
pub struct TradableDto {
    pub id: String,
    pub user: String,
    pub product: String,
    pub price: Price,
    pub side: Side,
    pub original_volume: u64,
    pub remaining_volume: u64,
    pub cancelled_volume: u64,
    pub is_quote: bool,
}

impl fmt::Display for TradableDto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x {} (remaining {}, cancelled {})",
            self.price, self.original_volume, self.remaining_volume, self.cancelled_volume
        )
    }
}

/// A two-sided quote: one BUY `Tradable` and one SELL `Tradable` for the
/// same user/product, inserted atomically.
#[derive(Debug, Clone)]
pub struct Quote {
    pub buy: Tradable,
    pub sell: Tradable,
}

impl Quote {
    /// Validate and construct a quote: `sell.price > buy.price`, both
    /// prices > 0, both volumes > 0.
    pub fn new(
        user: &str,
        product: &str,
        buy_price: Price,
        buy_volume: u64,
        sell_price: Price,
        sell_volume: u64,
    ) -> Result<Quote, EngineError> {
        if buy_price.is_negative() || buy_price.equals(&Price::Limit(0)) || buy_price.is_market() {
            return Err(EngineError::InvalidData(
                "quote buy price must be a positive LIMIT price".to_string(),
            ));
        }
        if sell_price.is_negative() || sell_price.equals(&Price::Limit(0)) || sell_price.is_market()
        {
            return Err(EngineError::InvalidData(
                "quote sell price must be a positive LIMIT price".to_string(),
            ));
        }
        if !sell_price.greater_than(&buy_price) {
            return Err(EngineError::InvalidData(
                "quote sell price must be greater than buy price".to_string(),
            ));
        }
        if buy_volume == 0 || sell_volume == 0 {
            return Err(EngineError::InvalidData(
                "quote volumes must be > 0".to_string(),
            ));
        }

        let buy = Tradable::new_quote_side(user, product, buy_price, Side::Buy, buy_volume)?;
        let sell = Tradable::new_quote_side(user, product, sell_price, Side::Sell, sell_volume)?;
        Ok(Quote { buy, sell })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(cents: i64) -> Price {
        Price::Limit(cents)
    }

    #[test]
    fn construction_normalizes_user_and_product() {
        let t = Tradable::new_order(" alice ", " ibm ", p(1000), Side::Buy, 10).unwrap();
        assert_eq!(t.user(), "ALICE");
        assert_eq!(t.product(), "IBM");
    }

    #[test]
    fn rejects_zero_volume() {
        assert!(Tradable::new_order("A", "IBM", p(1000), Side::Buy, 0).is_err());
    }

    #[test]
    fn ids_are_unique_and_monotonic_in_time_order() {
        let a = Tradable::new_order("A", "IBM", p(1000), Side::Buy, 10).unwrap();
        let b = Tradable::new_order("A", "IBM", p(1000), Side::Buy, 10).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn volume_invariant_enforced_on_setters() {
        let mut t = Tradable::new_order("A", "IBM", p(1000), Side::Buy, 10).unwrap();
        assert!(t.set_cancelled_volume(11).is_err());
        t.set_cancelled_volume(4).unwrap();
        assert!(t.set_remaining_volume(7).is_err());
        t.set_remaining_volume(6).unwrap();
    }

    #[test]
    fn quote_requires_sell_above_buy_and_positive_prices() {
        assert!(Quote::new("A", "IBM", p(999), 10, p(1001), 10).is_ok());
        assert!(Quote::new("A", "IBM", p(1001), 10, p(999), 10).is_err());
        assert!(Quote::new("A", "IBM", p(0), 10, p(1001), 10).is_err());
        assert!(Quote::new("A", "IBM", p(999), 0, p(1001), 10).is_err());
    }
}
