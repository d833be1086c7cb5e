//! Session module - position lifecycle, order history and completion

pub mod ancestry;
pub mod model;
pub mod service;

pub use ancestry::{OpenPosition, OrderGraph};
pub use model::{Session, TradeOrder};
pub use service::SessionService;
