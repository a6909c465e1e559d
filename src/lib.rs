//! engine-core
//!
//! A stock-exchange simulation core: per-symbol price-time order books
//! and matching, the market-state machine, the four publisher fan-outs,
//! and the client-facing command gateway.
//!
//! - [`price`] — the `Price` flyweight and MKT sentinel.
//! - [`tradable`] — `Tradable`/`Order`/`Quote`, the uniform view of
//!   working interest.
//! - [`messages`] — `FillMessage`/`CancelMessage`/`MarketMessage`.
//! - [`book_side`] — one side of a symbol's book, plus price-time
//!   matching (`TradeProcessor`).
//! - [`product_book`] — owns both sides of one symbol.
//! - [`product_service`] — the symbol registry and market-state machine.
//! - [`publishers`] — current-market, last-sale, ticker and message
//!   fan-out, and the `UserObserver` contract.
//! - [`user_command_service`] — session identity, authorization, and
//!   per-user `Position` accounting.

pub mod book_side;
pub mod clock;
pub mod error;
pub mod messages;
pub mod position;
pub mod price;
pub mod product_book;
pub mod product_service;
pub mod publishers;
pub mod side;
pub mod tradable;
pub mod user_command_service;

pub use error::{EngineError, EngineResult};
pub use messages::{CancelMessage, FillMessage, MarketMessage};
pub use position::Position;
pub use price::{Price, PriceFactory};
pub use product_book::ProductBook;
pub use product_service::ProductService;
pub use publishers::{CurrentMarketPublisher, LastSalePublisher, MessagePublisher, TickerPublisher, UserObserver};
pub use side::{MarketState, Side};
pub use tradable::{Quote, Tradable, TradableDto};
pub use user_command_service::UserCommandService;
