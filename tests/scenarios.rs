//! End-to-end scenarios (S1-S6) driven entirely through
//! `UserCommandService`, the same surface a real client uses.

use std::sync::{Arc, Mutex};

use engine_core::{CancelMessage, FillMessage, MarketState, Price, Side, UserCommandService, UserObserver};

#[derive(Default)]
struct RecordingObserver {
    fills: Mutex<Vec<FillMessage>>,
    cancels: Mutex<Vec<CancelMessage>>,
    last_sales: Mutex<Vec<(String, Price, u64)>>,
    tickers: Mutex<Vec<(String, Price, char)>>,
    current_markets: Mutex<Vec<(String, Price, u64, Price, u64)>>,
}

impl UserObserver for RecordingObserver {
    fn accept_last_sale(&self, product: &str, price: Price, volume: u64) {
        self.last_sales.lock().unwrap().push((product.to_string(), price, volume));
    }

    fn accept_fill(&self, msg: &FillMessage) {
        self.fills.lock().unwrap().push(msg.clone());
    }

    fn accept_cancel(&self, msg: &CancelMessage) {
        self.cancels.lock().unwrap().push(msg.clone());
    }

    fn accept_market_message(&self, _state: &str) {}

    fn accept_ticker(&self, product: &str, price: Price, direction: char) {
        self.tickers.lock().unwrap().push((product.to_string(), price, direction));
    }

    fn accept_current_market(&self, product: &str, buy_price: Price, buy_volume: u64, sell_price: Price, sell_volume: u64) {
        self.current_markets
            .lock()
            .unwrap()
            .push((product.to_string(), buy_price, buy_volume, sell_price, sell_volume));
    }
}

fn connect(svc: &UserCommandService, user: &str, product: &str) -> (u64, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::default());
    let id = svc.connect(user, observer.clone()).unwrap();
    svc.subscribe_messages(user, id, product).unwrap();
    svc.subscribe_last_sale(user, id, product).unwrap();
    svc.subscribe_current_market(user, id, product).unwrap();
    svc.subscribe_ticker(user, id, product).unwrap();
    (id, observer)
}

fn p(cents: i64) -> Price {
    Price::Limit(cents)
}

/// S1 Aggressive cross: BUY 100@$10 vs SELL 100@$10, crossed by OPEN.
#[test]
fn s1_aggressive_cross() {
    let svc = UserCommandService::new();
    svc.create_product("IBM").unwrap();
    svc.set_market_state(MarketState::Preopen).unwrap();

    let (a_id, a_obs) = connect(&svc, "A", "IBM");
    let (b_id, b_obs) = connect(&svc, "B", "IBM");

    svc.submit_order("A", a_id, "IBM", p(1000), 100, Side::Buy).unwrap();
    svc.submit_order("B", b_id, "IBM", p(1000), 100, Side::Sell).unwrap();

    svc.set_market_state(MarketState::Open).unwrap();

    let a_fills = a_obs.fills.lock().unwrap();
    assert_eq!(a_fills.len(), 1);
    assert_eq!(a_fills[0].price, p(1000));
    assert_eq!(a_fills[0].volume, 100);
    assert_eq!(a_fills[0].details, "leaving 0");

    let b_fills = b_obs.fills.lock().unwrap();
    assert_eq!(b_fills.len(), 1);
    assert_eq!(b_fills[0].price, p(1000));
    assert_eq!(b_fills[0].volume, 100);
    assert_eq!(b_fills[0].details, "leaving 0");

    let a_last_sale = a_obs.last_sales.lock().unwrap();
    assert_eq!(a_last_sale.last().unwrap(), &("IBM".to_string(), p(1000), 100));

    let (buy_depth, sell_depth) = svc.get_book_depth("A", a_id, "IBM").unwrap();
    assert_eq!(buy_depth, vec!["<Empty>".to_string()]);
    assert_eq!(sell_depth, vec!["<Empty>".to_string()]);
}

/// S2 Partial fill: SELL 100@$10 resting, BUY 60@$10 arrives.
#[test]
fn s2_partial_fill() {
    let svc = UserCommandService::new();
    svc.create_product("IBM").unwrap();
    svc.set_market_state(MarketState::Preopen).unwrap();
    svc.set_market_state(MarketState::Open).unwrap();

    let (a_id, a_obs) = connect(&svc, "A", "IBM");
    let (b_id, b_obs) = connect(&svc, "B", "IBM");

    svc.submit_order("A", a_id, "IBM", p(1000), 100, Side::Sell).unwrap();
    svc.submit_order("B", b_id, "IBM", p(1000), 60, Side::Buy).unwrap();

    let a_fills = a_obs.fills.lock().unwrap();
    assert_eq!(a_fills.len(), 1);
    assert_eq!(a_fills[0].volume, 60);
    assert_eq!(a_fills[0].details, "leaving 40");

    let b_fills = b_obs.fills.lock().unwrap();
    assert_eq!(b_fills.len(), 1);
    assert_eq!(b_fills[0].volume, 60);
    assert_eq!(b_fills[0].details, "leaving 0");

    let (_, sell_depth) = svc.get_book_depth("A", a_id, "IBM").unwrap();
    assert_eq!(sell_depth, vec!["$10.00 x 40".to_string()]);

    let last_sale = b_obs.last_sales.lock().unwrap();
    assert_eq!(last_sale.last().unwrap(), &("IBM".to_string(), p(1000), 60));
}

/// S3 Market-order residue cancelled: empty sell side, BUY MKT x 50.
#[test]
fn s3_market_order_residue_cancelled() {
    let svc = UserCommandService::new();
    svc.create_product("IBM").unwrap();
    svc.set_market_state(MarketState::Preopen).unwrap();
    svc.set_market_state(MarketState::Open).unwrap();

    let (b_id, b_obs) = connect(&svc, "B", "IBM");
    svc.submit_order("B", b_id, "IBM", Price::Market, 50, Side::Buy).unwrap();

    assert!(b_obs.fills.lock().unwrap().is_empty());
    let cancels = b_obs.cancels.lock().unwrap();
    assert_eq!(cancels.len(), 1);
    assert_eq!(cancels[0].details, "Cancelled");
    assert_eq!(cancels[0].volume, 50);
}

/// S4 Too-late-to-cancel: after S1's cross, A tries to cancel the
/// consumed BUY order.
#[test]
fn s4_too_late_to_cancel() {
    let svc = UserCommandService::new();
    svc.create_product("IBM").unwrap();
    svc.set_market_state(MarketState::Preopen).unwrap();

    let (a_id, a_obs) = connect(&svc, "A", "IBM");
    let (b_id, _b_obs) = connect(&svc, "B", "IBM");

    let order_id = svc.submit_order("A", a_id, "IBM", p(1000), 100, Side::Buy).unwrap();
    svc.submit_order("B", b_id, "IBM", p(1000), 100, Side::Sell).unwrap();
    svc.set_market_state(MarketState::Open).unwrap();

    svc.submit_order_cancel("A", a_id, "IBM", Side::Buy, &order_id).unwrap();

    let cancels = a_obs.cancels.lock().unwrap();
    assert_eq!(cancels.len(), 1);
    assert_eq!(cancels[0].details, "Too late to cancel.");
    assert_eq!(cancels[0].volume, 100);
}

/// S5 Quote replacement: a user's second quote fully replaces the first.
#[test]
fn s5_quote_replacement() {
    let svc = UserCommandService::new();
    svc.create_product("IBM").unwrap();
    svc.set_market_state(MarketState::Preopen).unwrap();
    svc.set_market_state(MarketState::Open).unwrap();

    let (a_id, _a_obs) = connect(&svc, "A", "IBM");

    svc.submit_quote("A", a_id, "IBM", p(999), 10, p(1001), 10).unwrap();
    svc.submit_quote("A", a_id, "IBM", p(998), 20, p(1002), 20).unwrap();

    let (buy_depth, sell_depth) = svc.get_book_depth("A", a_id, "IBM").unwrap();
    assert_eq!(buy_depth, vec!["$9.98 x 20".to_string()]);
    assert_eq!(sell_depth, vec!["$10.02 x 20".to_string()]);
}

/// S6 Ticker sequence: $10.00 -> $10.00 -> $9.00 -> $11.00 yields
/// space, '=', down-arrow, up-arrow.
#[test]
fn s6_ticker_sequence() {
    let svc = UserCommandService::new();
    svc.create_product("IBM").unwrap();
    svc.set_market_state(MarketState::Preopen).unwrap();
    svc.set_market_state(MarketState::Open).unwrap();

    let (x_id, x_obs) = connect(&svc, "X", "IBM");

    let sequence = [1000i64, 1000, 900, 1100];
    for (i, cents) in sequence.iter().enumerate() {
        let seller = format!("SELLER{i}");
        let buyer = format!("BUYER{i}");
        let s_id = svc.connect(&seller, Arc::new(RecordingObserver::default())).unwrap();
        let b_id = svc.connect(&buyer, Arc::new(RecordingObserver::default())).unwrap();
        svc.submit_order(&seller, s_id, "IBM", p(*cents), 10, Side::Sell).unwrap();
        svc.submit_order(&buyer, b_id, "IBM", p(*cents), 10, Side::Buy).unwrap();
    }

    let directions: Vec<char> = x_obs.tickers.lock().unwrap().iter().map(|(_, _, d)| *d).collect();
    assert_eq!(directions, vec![' ', '=', '\u{2193}', '\u{2191}']);

    let _ = x_id;
}

/// Market-state machine: only the three named edges are legal.
#[test]
fn state_machine_rejects_illegal_transitions() {
    let svc = UserCommandService::new();
    assert!(svc.set_market_state(MarketState::Open).is_err());
    assert!(svc.set_market_state(MarketState::Closed).is_err());
    svc.set_market_state(MarketState::Preopen).unwrap();
    assert!(svc.set_market_state(MarketState::Closed).is_err());
    svc.set_market_state(MarketState::Open).unwrap();
    assert!(svc.set_market_state(MarketState::Preopen).is_err());
    svc.set_market_state(MarketState::Closed).unwrap();
}

/// Session faults: unknown user and wrong connection id.
#[test]
fn session_faults() {
    let svc = UserCommandService::new();
    let observer = Arc::new(RecordingObserver::default());
    let id = svc.connect("A", observer).unwrap();
    assert!(svc.disconnect("nobody", 0).is_err());
    assert!(svc.disconnect("A", id + 1).is_err());
    svc.disconnect("A", id).unwrap();
    assert!(svc.disconnect("A", id).is_err());
}

/// Position ledger round-trip: accountCosts reflects the
/// sum of sell proceeds minus buy costs across accepted fills.
#[test]
fn position_ledger_round_trip() {
    let svc = UserCommandService::new();
    svc.create_product("IBM").unwrap();
    svc.set_market_state(MarketState::Preopen).unwrap();

    let (a_id, _a_obs) = connect(&svc, "A", "IBM");
    let (b_id, _b_obs) = connect(&svc, "B", "IBM");

    svc.submit_order("A", a_id, "IBM", p(1000), 100, Side::Buy).unwrap();
    svc.submit_order("B", b_id, "IBM", p(1000), 100, Side::Sell).unwrap();
    svc.set_market_state(MarketState::Open).unwrap();

    assert_eq!(svc.get_account_costs("A", a_id).unwrap().cents(), Some(-100_000));
    assert_eq!(svc.get_account_costs("B", b_id).unwrap().cents(), Some(100_000));

    // Marked to the same last-sale price the trade printed at, the
    // position's stock value exactly offsets its cost basis.
    assert_eq!(svc.get_net_account_value("A", a_id).unwrap().cents(), Some(0));
    assert_eq!(svc.get_net_account_value("B", b_id).unwrap().cents(), Some(0));
}
