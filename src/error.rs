//! Typed error taxonomy shared across every component boundary.
//!
//! Every variant here corresponds to one named failure in the engine's
//! error taxonomy. Validation failures are raised by the outermost layer
//! that first observes the bad argument, before any state is mutated, so a
//! rejected operation never leaves a book half-updated.

use thiserror::Error;

/// A single engine-wide error taxonomy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Null/empty/malformed argument, or an out-of-range volume.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Arithmetic or ordering attempted on/with a MKT or null price.
    #[error("invalid price operation: {0}")]
    InvalidPriceOperation(String),

    /// Operation not allowed in the current market state.
    #[error("invalid market state for {operation}: market is {current:?}")]
    InvalidMarketState {
        operation: String,
        current: crate::side::MarketState,
    },

    /// Illegal market-state transition requested.
    #[error("invalid market state transition: {from:?} -> {to:?}")]
    InvalidMarketStateTransition {
        from: crate::side::MarketState,
        to: crate::side::MarketState,
    },

    /// Unknown symbol referenced.
    #[error("no such product: {0}")]
    NoSuchProduct(String),

    /// `createProduct` called for a symbol that already exists.
    #[error("product already exists: {0}")]
    ProductAlreadyExists(String),

    /// A cancel could not locate the order, live or archived.
    #[error("order not found: user={user} id={id}")]
    OrderNotFound { user: String, id: String },

    /// `connect` called twice for the same user without disconnecting.
    #[error("user already connected: {0}")]
    AlreadyConnected(String),

    /// Operation attempted by a user with no active connection.
    #[error("user not connected: {0}")]
    UserNotConnected(String),

    /// Connection id supplied does not match the live session.
    #[error("invalid connection id for user: {0}")]
    InvalidConnectionId(String),

    /// Duplicate `subscribe` for the same (user, product) pair.
    #[error("already subscribed: user={user} product={product}")]
    AlreadySubscribed { user: String, product: String },

    /// `unSubscribe` for a (user, product) pair that was never subscribed.
    #[error("not subscribed: user={user} product={product}")]
    NotSubscribed { user: String, product: String },
}

pub type EngineResult<T> = Result<T, EngineError>;
