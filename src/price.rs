//! Price: an immutable fixed-point money value with a process-global
//! flyweight factory, plus the MKT sentinel.
//!
//! `Price` is a small `Copy` enum, so two `Price::Limit(n)` values with
//! equal cents are already indistinguishable by ordinary Rust value
//! semantics. The [`PriceFactory`] singleton still exists as the single
//! construction path (mirroring the "Singletons and global state" design
//! note): all string/cents parsing goes through it, so there is exactly
//! one place that can produce a malformed `Price`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, OnceLock};

use crate::error::EngineError;

/// An immutable money value: either a signed cents amount (LIMIT) or the
/// MKT sentinel ("any price").
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Price {
    Limit(i64),
    Market,
}

impl Price {
    /// Cents for a LIMIT price, `None` for MKT.
    pub fn cents(&self) -> Option<i64> {
        match self {
            Price::Limit(c) => Some(*c),
            Price::Market => None,
        }
    }

    pub fn is_market(&self) -> bool {
        matches!(self, Price::Market)
    }

    /// `false` for MKT; otherwise `cents < 0`.
    pub fn is_negative(&self) -> bool {
        matches!(self, Price::Limit(c) if *c < 0)
    }

    /// Total order over cents. `None` whenever either operand is MKT —
    /// operations that require ordering with MKT must fail rather than
    /// silently pick an arbitrary order.
    pub fn compare_to(&self, other: &Price) -> Option<Ordering> {
        match (self, other) {
            (Price::Limit(a), Price::Limit(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// `false` whenever either operand is MKT.
    pub fn greater_than(&self, other: &Price) -> bool {
        self.compare_to(other) == Some(Ordering::Greater)
    }

    /// `false` whenever either operand is MKT.
    pub fn greater_than_or_equal(&self, other: &Price) -> bool {
        matches!(
            self.compare_to(other),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        )
    }

    /// `false` whenever either operand is MKT.
    pub fn less_than(&self, other: &Price) -> bool {
        self.compare_to(other) == Some(Ordering::Less)
    }

    /// `false` whenever either operand is MKT.
    pub fn less_than_or_equal(&self, other: &Price) -> bool {
        matches!(
            self.compare_to(other),
            Some(Ordering::Less) | Some(Ordering::Equal)
        )
    }

    /// Domain equality: `false` whenever either operand is MKT, even
    /// MKT-vs-MKT. Distinct from `PartialEq`/`==`, which is the ordinary
    /// structural equality used when `Price` is a map key.
    pub fn equals(&self, other: &Price) -> bool {
        self.compare_to(other) == Some(Ordering::Equal)
    }

    pub fn add(&self, other: &Price) -> Result<Price, EngineError> {
        match (self, other) {
            (Price::Limit(a), Price::Limit(b)) => Ok(PriceFactory::make_limit_cents(a + b)),
            _ => Err(EngineError::InvalidPriceOperation(
                "cannot add a MKT price".to_string(),
            )),
        }
    }

    pub fn subtract(&self, other: &Price) -> Result<Price, EngineError> {
        match (self, other) {
            (Price::Limit(a), Price::Limit(b)) => Ok(PriceFactory::make_limit_cents(a - b)),
            _ => Err(EngineError::InvalidPriceOperation(
                "cannot subtract a MKT price".to_string(),
            )),
        }
    }

    pub fn multiply(&self, factor: i64) -> Result<Price, EngineError> {
        match self {
            Price::Limit(a) => Ok(PriceFactory::make_limit_cents(a * factor)),
            Price::Market => Err(EngineError::InvalidPriceOperation(
                "cannot multiply a MKT price".to_string(),
            )),
        }
    }

    /// `$0.00` in place of a null/absent price, used wherever an absent
    /// top-of-book price is reported downstream (publisher fan-out).
    pub fn zero() -> Price {
        Price::Limit(0)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Price::Market => write!(f, "MKT"),
            Price::Limit(cents) => {
                let negative = *cents < 0;
                let abs_cents = cents.unsigned_abs();
                let dollars = abs_cents / 100;
                let remainder = abs_cents % 100;
                let grouped = group_thousands(dollars);
                if negative {
                    write!(f, "-${grouped}.{remainder:02}")
                } else {
                    write!(f, "${grouped}.{remainder:02}")
                }
            }
        }
    }
}

fn group_thousands(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut groups = Vec::new();
    while n > 0 {
        groups.push(format!("{:03}", n % 1000));
        n /= 1000;
    }
    // The most-significant group shouldn't be zero-padded.
    let mut groups: Vec<String> = groups.into_iter().rev().collect();
    if let Some(first) = groups.first_mut() {
        *first = first.trim_start_matches('0').to_string();
        if first.is_empty() {
            *first = "0".to_string();
        }
    }
    groups.join(",")
}

/// Process-global flyweight registry for LIMIT prices, plus the
/// MKT factory method. Lookups and inserts are serialized behind a
/// single mutex, as required for shared global state accessed from
/// multiple threads (see the concurrency model).
pub struct PriceFactory;

static REGISTRY: OnceLock<Mutex<HashMap<i64, Price>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<i64, Price>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

impl PriceFactory {
    /// Parse an optionally `$`-prefixed, comma-grouped decimal amount and
    /// return the canonical LIMIT `Price` for it (half-away-from-zero
    /// rounding to the nearest cent).
    pub fn make_limit(raw: &str) -> Result<Price, EngineError> {
        let cents = parse_cents(raw)?;
        Ok(Self::make_limit_cents(cents))
    }

    /// Canonical LIMIT `Price` for a given integer cents amount.
    pub fn make_limit_cents(cents: i64) -> Price {
        let mut guard = registry().lock().expect("price registry poisoned");
        *guard.entry(cents).or_insert(Price::Limit(cents))
    }

    /// The canonical MKT singleton.
    pub fn make_market() -> Price {
        Price::Market
    }
}

/// Parse a decimal money string into integer cents.
///
/// Accepts an optional leading `-`, an optional `$`, and comma grouping
/// (`"$1,234.5"`, `"-12.345"`, `"10"`). Rounds the fractional part to the
/// nearest cent, half away from zero.
fn parse_cents(raw: &str) -> Result<i64, EngineError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(EngineError::InvalidData(
            "empty price string".to_string(),
        ));
    }

    let mut chars = s;
    let negative = if let Some(rest) = chars.strip_prefix('-') {
        chars = rest;
        true
    } else {
        false
    };
    let chars = chars.strip_prefix('$').unwrap_or(chars);
    let cleaned: String = chars.chars().filter(|c| *c != ',').collect();

    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(EngineError::InvalidData(format!(
            "malformed price: {raw}"
        )));
    }

    let mut parts = cleaned.splitn(2, '.');
    let integer_part = parts.next().unwrap_or("0");
    let fractional_part = parts.next().unwrap_or("");
    if parts.next().is_some() {
        return Err(EngineError::InvalidData(format!(
            "malformed price: {raw}"
        )));
    }

    let integer_part = if integer_part.is_empty() {
        "0"
    } else {
        integer_part
    };
    let whole: i64 = integer_part
        .parse()
        .map_err(|_| EngineError::InvalidData(format!("malformed price: {raw}")))?;

    // Round the fractional digits to two places, half away from zero,
    // by inspecting the third digit (if present) as the rounding digit.
    let mut frac_digits: Vec<u32> = fractional_part
        .chars()
        .map(|c| c.to_digit(10).unwrap_or(0))
        .collect();
    frac_digits.resize(3, 0);
    let mut cents_fraction = frac_digits[0] as i64 * 10 + frac_digits[1] as i64;
    if frac_digits[2] >= 5 {
        cents_fraction += 1;
    }

    let mut total_cents = whole * 100 + cents_fraction;
    if negative {
        total_cents = -total_cents;
    }
    Ok(total_cents)
}
