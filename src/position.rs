//! Position: a single user's per-product share holdings, running account
//! costs, and last-sale cache, maintained by that user's own observer
//! callbacks.

use std::collections::HashMap;

use crate::price::Price;
use crate::side::Side;

/// Per-user ledger: signed share balances by product, a running LIMIT-price
/// cost basis, and the latest last-sale price seen per product.
///
/// Created on first user construction; mutated only by the owning user's
/// accept callbacks; destroyed with the user.
#[derive(Debug, Default, Clone)]
pub struct Position {
    holdings: HashMap<String, i64>,
    account_costs: i64,
    last_sale: HashMap<String, Price>,
}

impl Position {
    pub fn new() -> Self {
        Position::default()
    }

    /// Running account costs in cents: BUY subtracts `price * volume`,
    /// SELL adds it.
    pub fn account_costs(&self) -> Price {
        Price::Limit(self.account_costs)
    }

    pub fn holdings(&self, product: &str) -> i64 {
        *self.holdings.get(product).unwrap_or(&0)
    }

    /// Apply one fill's effect on this user's holdings and cost basis.
    /// BUY adds shares and subtracts `price * volume` from account costs;
    /// SELL subtracts shares and adds. A holding that nets to zero is
    /// removed rather than left as an explicit zero entry.
    pub fn update_position(&mut self, product: &str, price: Price, side: Side, volume: u64) {
        let cents = price.cents().unwrap_or(0);
        let signed_volume = volume as i64;
        let cost = cents * signed_volume;

        let delta = match side {
            Side::Buy => signed_volume,
            Side::Sell => -signed_volume,
        };
        match side {
            Side::Buy => self.account_costs -= cost,
            Side::Sell => self.account_costs += cost,
        }

        let entry = self.holdings.entry(product.to_string()).or_insert(0);
        *entry += delta;
        if *entry == 0 {
            self.holdings.remove(product);
        }
    }

    /// Record the latest last-sale price observed for `product`.
    pub fn update_last_sale(&mut self, product: &str, price: Price) {
        self.last_sale.insert(product.to_string(), price);
    }

    pub fn last_sale(&self, product: &str) -> Option<Price> {
        self.last_sale.get(product).copied()
    }

    /// `lastSale(p) * holdings(p)` for `product`; `$0.00` if there has
    /// been no last sale for it.
    pub fn stock_position_value(&self, product: &str) -> Price {
        let price = self.last_sale(product).unwrap_or(Price::zero());
        let cents = price.cents().unwrap_or(0) * self.holdings(product);
        Price::Limit(cents)
    }

    /// Sum of `lastSale(p) * holdings(p)` over every held product.
    pub fn all_stock_value(&self) -> Price {
        let total: i64 = self
            .holdings
            .keys()
            .map(|product| {
                let price = self.last_sale(product).unwrap_or(Price::zero());
                price.cents().unwrap_or(0) * self.holdings(product)
            })
            .sum();
        Price::Limit(total)
    }

    /// `accountCosts + getAllStockValue`.
    pub fn net_account_value(&self) -> Price {
        let total = self.account_costs
            + self.all_stock_value().cents().expect("all_stock_value is always a LIMIT price");
        Price::Limit(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_adds_shares_and_subtracts_cost() {
        let mut pos = Position::new();
        pos.update_position("IBM", Price::Limit(1000), Side::Buy, 10);
        assert_eq!(pos.holdings("IBM"), 10);
        assert_eq!(pos.account_costs(), Price::Limit(-10_000));
    }

    #[test]
    fn sell_subtracts_shares_and_adds_cost() {
        let mut pos = Position::new();
        pos.update_position("IBM", Price::Limit(1000), Side::Sell, 10);
        assert_eq!(pos.holdings("IBM"), -10);
        assert_eq!(pos.account_costs(), Price::Limit(10_000));
    }

    #[test]
    fn zeroed_holding_is_removed() {
        let mut pos = Position::new();
        pos.update_position("IBM", Price::Limit(1000), Side::Buy, 10);
        pos.update_position("IBM", Price::Limit(1100), Side::Sell, 10);
        assert_eq!(pos.holdings("IBM"), 0);
        assert!(!pos.holdings.contains_key("IBM"));
    }

    #[test]
    fn stock_value_is_zero_with_no_last_sale() {
        let mut pos = Position::new();
        pos.update_position("IBM", Price::Limit(1000), Side::Buy, 10);
        assert_eq!(pos.stock_position_value("IBM"), Price::zero());
    }

    #[test]
    fn net_account_value_combines_costs_and_stock_value() {
        let mut pos = Position::new();
        pos.update_position("IBM", Price::Limit(1000), Side::Buy, 10);
        pos.update_last_sale("IBM", Price::Limit(1200));
        assert_eq!(pos.all_stock_value(), Price::Limit(12_000));
        assert_eq!(pos.net_account_value(), Price::Limit(-10_000 + 12_000));
    }
}
