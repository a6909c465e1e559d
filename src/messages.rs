//! Immutable events emitted by the engine: fills, cancels, and
//! market-state transitions.

use std::fmt;

use crate::price::Price;
use crate::side::{MarketState, Side};
use crate::tradable::Tradable;

/// The key fills are coalesced under within one `doTrade`, and merged
/// under across a `tryTrade`'s successive `doTrade` calls: `user + id +
/// price`.
pub type FillKey = (String, String, Price);

/// A single fill event for one leg (resting or incoming) of a trade.
#[derive(Debug, Clone, PartialEq)]
pub struct FillMessage {
    pub user: String,
    pub product: String,
    pub price: Price,
    pub volume: u64,
    pub details: String,
    pub side: Side,
    /// Internal tradable id — always present, used for fill-key
    /// aggregation regardless of whether it is rendered.
    pub id: String,
    is_quote: bool,
}

impl FillMessage {
    /// Build a fill for `t`, traded at `t.price()` itself (used only where
    /// the trade-price rule does not apply, e.g. in tests).
    pub fn for_tradable(t: &Tradable, volume: u64, details: impl Into<String>) -> FillMessage {
        Self::at_price(t, t.price(), volume, details)
    }

    /// Build a fill for `t` at an explicit trade price: both legs of one
    /// match share the same trade price, which is the resting leg's price
    /// unless that leg was MKT.
    pub fn at_price(t: &Tradable, price: Price, volume: u64, details: impl Into<String>) -> FillMessage {
        FillMessage {
            user: t.user().to_string(),
            product: t.product().to_string(),
            price,
            volume,
            details: details.into(),
            side: t.side(),
            id: t.id().to_string(),
            is_quote: t.is_quote(),
        }
    }

    pub fn key(&self) -> FillKey {
        (self.user.clone(), self.id.clone(), self.price)
    }
}

impl fmt::Display for FillMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "User: {}, Product: {}, Price: {}, Volume: {}, Details: {}, Side: {}",
            self.user,
            self.product,
            self.price,
            self.volume,
            self.details,
            self.side.as_str()
        )?;
        if !self.is_quote {
            write!(f, ", Id: {}", self.id)?;
        }
        Ok(())
    }
}

/// A cancel event: outstanding volume removed from a tradable.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelMessage {
    pub user: String,
    pub product: String,
    pub price: Price,
    pub volume: u64,
    pub details: String,
    pub side: Side,
    pub id: String,
    is_quote: bool,
}

impl CancelMessage {
    pub fn for_tradable(t: &Tradable, volume: u64, details: impl Into<String>) -> CancelMessage {
        CancelMessage {
            user: t.user().to_string(),
            product: t.product().to_string(),
            price: t.price(),
            volume,
            details: details.into(),
            side: t.side(),
            id: t.id().to_string(),
            is_quote: t.is_quote(),
        }
    }

    /// Build a cancel directly from field values rather than a live
    /// `Tradable` — used for the too-late-to-cancel path, which only has
    /// an archived snapshot to work from.
    #[allow(clippy::too_many_arguments)]
    pub fn from_fields(
        user: impl Into<String>,
        product: impl Into<String>,
        price: Price,
        volume: u64,
        details: impl Into<String>,
        side: Side,
        id: impl Into<String>,
        is_quote: bool,
    ) -> CancelMessage {
        CancelMessage {
            user: user.into(),
            product: product.into(),
            price,
            volume,
            details: details.into(),
            side,
            id: id.into(),
            is_quote,
        }
    }
}

impl fmt::Display for CancelMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "User: {}, Product: {}, Price: {}, Volume: {}, Details: {}, Side: {}",
            self.user,
            self.product,
            self.price,
            self.volume,
            self.details,
            self.side.as_str()
        )?;
        if !self.is_quote {
            write!(f, ", Id: {}", self.id)?;
        }
        Ok(())
    }
}

/// A market-state transition event, broadcast to every message-publisher
/// subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketMessage {
    pub state: MarketState,
}

impl fmt::Display for MarketMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_message_renders_with_id_for_orders() {
        let t = Tradable::new_order("A", "IBM", Price::Limit(1000), Side::Buy, 10).unwrap();
        let msg = FillMessage::for_tradable(&t, 10, "leaving 0");
        let rendered = msg.to_string();
        assert!(rendered.starts_with("User: A, Product: IBM, Price: $10.00, Volume: 10, Details: leaving 0, Side: BUY"));
        assert!(rendered.contains(", Id: "));
    }

    #[test]
    fn fill_message_omits_id_for_quote_sides() {
        let t = Tradable::new_quote_side("A", "IBM", Price::Limit(1000), Side::Buy, 10).unwrap();
        let msg = FillMessage::for_tradable(&t, 10, "leaving 0");
        assert!(!msg.to_string().contains("Id:"));
    }

    #[test]
    fn market_message_renders_bracketed_state() {
        let msg = MarketMessage {
            state: MarketState::Open,
        };
        assert_eq!(msg.to_string(), "[OPEN]");
    }
}
