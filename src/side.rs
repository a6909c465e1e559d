//! Side, market state, and the normalization rule applied to every
//! external string input (trim + upper-case, per the external interface
//! contract).

use crate::error::EngineError;

/// Order/quote side: Buy or Sell.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Parse from an upper-cased string (`"BUY"` / `"SELL"`).
    ///
    /// Callers are expected to have already trimmed and upper-cased the
    /// raw input; this keeps normalization in one place (`normalize_side`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Market-state machine: CLOSED -> PREOPEN -> OPEN -> CLOSED, no other edges.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MarketState {
    Closed,
    Preopen,
    Open,
}

impl MarketState {
    /// Returns `true` if `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: MarketState) -> bool {
        matches!(
            (self, next),
            (MarketState::Closed, MarketState::Preopen)
                | (MarketState::Preopen, MarketState::Open)
                | (MarketState::Open, MarketState::Closed)
        )
    }

    /// Renders as `"[<STATE>]"`, per the external textual format.
    pub fn render(self) -> String {
        let name = match self {
            MarketState::Closed => "CLOSED",
            MarketState::Preopen => "PREOPEN",
            MarketState::Open => "OPEN",
        };
        format!("[{name}]")
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CLOSED" => Some(MarketState::Closed),
            "PREOPEN" => Some(MarketState::Preopen),
            "OPEN" => Some(MarketState::Open),
            _ => None,
        }
    }
}

/// Trim and upper-case a raw external string (user name, symbol, side,
/// state) per the normalization rule in the external interfaces section.
/// Fails with `InvalidData` if the result is empty.
pub fn normalize(raw: &str) -> Result<String, EngineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidData(
            "expected a non-empty string".to_string(),
        ));
    }
    Ok(trimmed.to_uppercase())
}

pub fn normalize_side(raw: &str) -> Result<Side, EngineError> {
    let normalized = normalize(raw)?;
    Side::parse(&normalized)
        .ok_or_else(|| EngineError::InvalidData(format!("invalid side: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_trims_and_upcases() {
        assert_eq!(normalize("  ibm  ").unwrap(), "IBM");
    }

    #[test]
    fn normalize_rejects_blank() {
        assert!(normalize("   ").is_err());
    }

    #[test]
    fn side_parses_case_sensitively_after_normalization() {
        assert_eq!(normalize_side(" buy ").unwrap(), Side::Buy);
        assert!(normalize_side("bid").is_err());
    }

    #[test]
    fn market_state_transitions() {
        assert!(MarketState::Closed.can_transition_to(MarketState::Preopen));
        assert!(MarketState::Preopen.can_transition_to(MarketState::Open));
        assert!(MarketState::Open.can_transition_to(MarketState::Closed));
        assert!(!MarketState::Closed.can_transition_to(MarketState::Open));
        assert!(!MarketState::Open.can_transition_to(MarketState::Preopen));
    }
}
