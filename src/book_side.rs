//! One side of one symbol's book, plus the price-time matching algorithm
//! (`TradeProcessor`) that runs against it.
//!
//! A `BookSide` does not hold a reference back to its owning
//! `ProductBook`. Instead it holds a small back-handle — the shared
//! archive and the message publisher — supplied at construction, so it
//! can record retired tradables and publish cancel/fill events without a
//! cyclic `Arc`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use tracing::debug;

use crate::messages::{CancelMessage, FillKey, FillMessage};
use crate::price::Price;
use crate::product_book::Archive;
use crate::publishers::MessagePublisher;
use crate::side::Side;
use crate::tradable::{Tradable, TradableDto};

/// One price-sorted side (BUY or SELL) of one symbol's book.
pub struct BookSide {
    side: Side,
    buckets: IndexMap<Price, VecDeque<Tradable>>,
    archive: Arc<Mutex<Archive>>,
    message_publisher: Arc<MessagePublisher>,
}

impl BookSide {
    pub fn new(side: Side, archive: Arc<Mutex<Archive>>, message_publisher: Arc<MessagePublisher>) -> Self {
        BookSide {
            side,
            buckets: IndexMap::new(),
            archive,
            message_publisher,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Best price under this side's ordering (MKT, if present, is
    /// unconditionally best); `None` if empty.
    pub fn top_of_book_price(&self) -> Option<Price> {
        if self.buckets.contains_key(&Price::Market) {
            return Some(Price::Market);
        }
        self.buckets
            .keys()
            .copied()
            .reduce(|best, candidate| if self.is_better(candidate, best) { candidate } else { best })
    }

    /// Sum of remaining volume at the best price; 0 if empty.
    pub fn top_of_book_volume(&self) -> u64 {
        match self.top_of_book_price() {
            Some(price) => self.volume_at(&price),
            None => 0,
        }
    }

    pub fn volume_at(&self, price: &Price) -> u64 {
        self.buckets
            .get(price)
            .map(|bucket| bucket.iter().map(|t| t.remaining_volume()).sum())
            .unwrap_or(0)
    }

    /// `["<price> x <volume>", ...]` in side order; `["<Empty>"]` if empty.
    pub fn book_depth(&self) -> Vec<String> {
        if self.buckets.is_empty() {
            return vec!["<Empty>".to_string()];
        }
        let mut prices: Vec<Price> = self.buckets.keys().copied().collect();
        prices.sort_by(|a, b| {
            if self.is_better(*a, *b) {
                std::cmp::Ordering::Less
            } else if self.is_better(*b, *a) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });
        prices
            .into_iter()
            .map(|p| format!("{} x {}", p, self.volume_at(&p)))
            .collect()
    }

    /// `true` if `candidate` is strictly better than `incumbent` under this
    /// side's ordering (BUY descending, SELL ascending; MKT always best).
    fn is_better(&self, candidate: Price, incumbent: Price) -> bool {
        match (candidate.is_market(), incumbent.is_market()) {
            (true, true) => false,
            (true, false) => true,
            (false, true) => false,
            (false, false) => match self.side {
                Side::Buy => candidate.greater_than(&incumbent),
                Side::Sell => candidate.less_than(&incumbent),
            },
        }
    }

    /// Append to the per-price sequence at `t.price()`, creating the
    /// bucket if absent.
    pub fn add_to_book(&mut self, t: Tradable) {
        self.buckets.entry(t.price()).or_default().push_back(t);
    }

    /// Snapshot of the entries currently resting at this side's top price
    /// (empty if the side is empty), used by `ProductBook::open_market` to
    /// walk the crossing bucket one entry at a time.
    pub fn top_of_book_entries(&self) -> Vec<Tradable> {
        match self.top_of_book_price() {
            Some(price) => self.buckets.get(&price).map(|b| b.iter().cloned().collect()).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Remove and return a live entry by id, from any price bucket on
    /// this side.
    pub fn take_by_id(&mut self, id: &str) -> Option<Tradable> {
        self.remove_matching(|t| t.id() == id)
    }

    /// Locate and remove this user's quote-side entry, if any. Does not
    /// archive or publish — callers decide whether the removal is an
    /// explicit cancel (which archives and publishes) or an implicit
    /// replacement (which does not).
    pub fn remove_quote(&mut self, user: &str) -> Option<Tradable> {
        self.remove_matching(|t| t.is_quote() && t.user() == user)
    }

    /// Remove a live (non-quote) order by id, publish its cancel, and
    /// archive it. Returns `None` (without side effects) if not found,
    /// signalling the caller to check `too late to cancel`.
    pub fn submit_order_cancel(&mut self, order_id: &str) -> Option<TradableDto> {
        let removed = self.remove_matching(|t| !t.is_quote() && t.id() == order_id)?;
        let dto = removed.to_dto();
        let detail = format!("{} Order Cancelled", self.side.as_str());
        let msg = CancelMessage::for_tradable(&removed, removed.remaining_volume(), detail);
        debug!(order_id, side = ?self.side, "order cancelled");
        self.message_publisher.publish_cancel(msg);
        retire(&self.archive, removed);
        Some(dto)
    }

    /// Remove this user's quote-side entry (if present), publish its
    /// cancel, and archive it. No-op if the user has no quote here.
    pub fn submit_quote_cancel(&mut self, user: &str) {
        if let Some(removed) = self.remove_quote(user) {
            let detail = format!("Quote {}-Side Cancelled", self.side.as_str());
            let msg = CancelMessage::for_tradable(&removed, removed.remaining_volume(), detail);
            self.message_publisher.publish_cancel(msg);
            retire(&self.archive, removed);
        }
    }

    /// Cancel every resting entry: quotes via `submitQuoteCancel`, orders
    /// via `submitOrderCancel`. Snapshots before iterating so cancelling
    /// one entry never invalidates the walk over the rest.
    pub fn cancel_all(&mut self) {
        let snapshot: Vec<Tradable> = self.buckets.values().flatten().cloned().collect();
        for t in snapshot {
            if t.is_quote() {
                self.submit_quote_cancel(t.user());
            } else {
                self.submit_order_cancel(t.id());
            }
        }
    }

    /// Snapshot of every live (non-quote) order belonging to `user` on
    /// this side, used by `getOrdersWithRemainingQty`.
    pub fn orders_for_user(&self, user: &str) -> Vec<TradableDto> {
        self.buckets
            .values()
            .flatten()
            .filter(|t| !t.is_quote() && t.user() == user)
            .map(Tradable::to_dto)
            .collect()
    }

    /// Drop the bucket at `price` if it has become empty.
    pub fn clear_if_empty(&mut self, price: &Price) {
        if self.buckets.get(price).is_some_and(VecDeque::is_empty) {
            self.buckets.shift_remove(price);
        }
    }

    /// Repeatedly match `incoming` against this side while it still has
    /// remaining volume, this side is non-empty, and `incoming` crosses
    /// this side's top of book (or is itself MKT). Publishes every fill
    /// produced before returning.
    pub fn try_trade(&mut self, incoming: &mut Tradable) -> IndexMap<FillKey, FillMessage> {
        let mut merged: IndexMap<FillKey, FillMessage> = IndexMap::new();

        loop {
            if incoming.remaining_volume() == 0 || self.is_empty() {
                break;
            }
            let top = self.top_of_book_price().expect("checked non-empty above");
            let crosses = incoming.price().is_market() || crosses(self.side, incoming.price(), top);
            if !crosses {
                break;
            }

            let fills = self.do_trade(incoming);
            for (key, fill) in fills {
                // Merge-across-calls semantics: overwrite, not sum.
                merged.insert(key, fill);
            }
        }

        for fill in merged.values() {
            self.message_publisher.publish_fill(fill.clone());
        }

        merged
    }

    /// Match `incoming` against the entries currently resting at this
    /// side's top-of-book price, in arrival order, until `incoming` is
    /// exhausted or that one bucket is exhausted.
    fn do_trade(&mut self, incoming: &mut Tradable) -> IndexMap<FillKey, FillMessage> {
        let mut fills: IndexMap<FillKey, FillMessage> = IndexMap::new();
        let mut retired: Vec<Tradable> = Vec::new();

        let top = match self.top_of_book_price() {
            Some(p) => p,
            None => return fills,
        };

        if let Some(bucket) = self.buckets.get_mut(&top) {
            while incoming.remaining_volume() > 0 && !bucket.is_empty() {
                let resting = bucket.front_mut().expect("checked non-empty");
                let trade_price = if resting.price().is_market() {
                    incoming.price()
                } else {
                    resting.price()
                };

                if incoming.remaining_volume() >= resting.remaining_volume() {
                    // Full takeout of the resting entry.
                    let trade_qty = resting.remaining_volume();
                    let incoming_leaving = incoming.remaining_volume() - trade_qty;

                    merge_fill(&mut fills, FillMessage::at_price(resting, trade_price, trade_qty, "leaving 0"));
                    merge_fill(
                        &mut fills,
                        FillMessage::at_price(
                            incoming,
                            trade_price,
                            trade_qty,
                            format!("leaving {incoming_leaving}"),
                        ),
                    );

                    incoming
                        .reduce_remaining(trade_qty)
                        .expect("trade_qty bounded by incoming's remaining volume");

                    let mut consumed = bucket.pop_front().expect("checked non-empty");
                    consumed
                        .set_remaining_volume(0)
                        .expect("zeroing remaining never violates the volume invariant");
                    consumed
                        .set_cancelled_volume(trade_qty)
                        .expect("trade_qty is the resting entry's own old remaining volume");
                    retired.push(consumed);
                } else {
                    // Partial takeout of the resting entry; incoming is exhausted.
                    let trade_qty = incoming.remaining_volume();
                    let resting_leaving = resting.remaining_volume() - trade_qty;

                    merge_fill(
                        &mut fills,
                        FillMessage::at_price(resting, trade_price, trade_qty, format!("leaving {resting_leaving}")),
                    );
                    merge_fill(&mut fills, FillMessage::at_price(incoming, trade_price, trade_qty, "leaving 0"));

                    resting
                        .reduce_remaining(trade_qty)
                        .expect("trade_qty bounded by resting's remaining volume");
                    incoming
                        .reduce_remaining(trade_qty)
                        .expect("trade_qty equals incoming's remaining volume");

                    let mut incoming_snapshot = incoming.clone();
                    incoming_snapshot
                        .set_cancelled_volume(trade_qty)
                        .expect("trade_qty is incoming's own old remaining volume");
                    retired.push(incoming_snapshot);
                    break;
                }
            }
        }
        self.clear_if_empty(&top);

        if !retired.is_empty() {
            let mut archive = self.archive.lock().expect("archive mutex poisoned");
            for t in retired {
                archive.add(t.to_dto());
            }
        }

        fills
    }

    fn remove_matching<F: Fn(&Tradable) -> bool>(&mut self, pred: F) -> Option<Tradable> {
        let mut target: Option<(Price, usize)> = None;
        'outer: for (price, bucket) in self.buckets.iter() {
            for (idx, t) in bucket.iter().enumerate() {
                if pred(t) {
                    target = Some((*price, idx));
                    break 'outer;
                }
            }
        }
        let (price, idx) = target?;
        let bucket = self.buckets.get_mut(&price)?;
        let removed = bucket.remove(idx);
        self.clear_if_empty(&price);
        removed
    }
}

/// Sum volume and overwrite details for fills sharing a key, within one
/// `doTrade` call.
fn merge_fill(fills: &mut IndexMap<FillKey, FillMessage>, new: FillMessage) {
    let key = new.key();
    match fills.get_mut(&key) {
        Some(existing) => {
            existing.volume += new.volume;
            existing.details = new.details;
        }
        None => {
            fills.insert(key, new);
        }
    }
}

/// Whether `incoming_price` crosses `top`, where `this_side` is the side
/// being crossed (the resting side, not the incoming order's own side):
/// an incoming SELL crosses a BUY (bid) top if its price is at or below
/// the bid; an incoming BUY crosses a SELL (ask) top if its price is at
/// or above the ask.
fn crosses(this_side: Side, incoming_price: Price, top: Price) -> bool {
    match this_side {
        Side::Buy => incoming_price.less_than_or_equal(&top),
        Side::Sell => incoming_price.greater_than_or_equal(&top),
    }
}

/// Retire a tradable being removed from the book (cancelled or fully
/// consumed): capture its current remaining volume, zero the remaining
/// volume, then set the cancelled volume to the captured amount. This
/// ordering is load-bearing — setting cancelled before zeroing remaining
/// would momentarily violate `remaining + cancelled <= original`.
fn retire(archive: &Arc<Mutex<Archive>>, mut t: Tradable) {
    let old_remaining = t.remaining_volume();
    t.set_remaining_volume(0)
        .expect("zeroing remaining never violates the volume invariant");
    t.set_cancelled_volume(old_remaining)
        .expect("old remaining never exceeds original volume");
    archive.lock().expect("archive mutex poisoned").add(t.to_dto());
}
