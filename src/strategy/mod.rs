//! Strategy module for per-tick position decisions
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Monitor tick (one per symbol)                              │
//! │       │                                                     │
//! │       ▼                                                     │
//! │  DecisionEngine.evaluate(session, plan, price)              │
//! │    1. ProtectiveExit  - both hedge legs losing              │
//! │    2. TrailingStop    - lock in gains on retrace            │
//! │    3. Hedge trigger   - offset a losing main (HEDGING)      │
//! │    4. Averaging gate  - add to a deep loser                 │
//! │       │                                                     │
//! │       ▼ (at most one Action)                                │
//! │  Orchestrator                                               │
//! │    - sizes the order, submits, awaits the fill              │
//! │    - commits the TradeOrder to the session                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`DecisionEngine`]: runs the rules in priority order
//! - [`Action`]: open or close order requested by the engine
//! - [`TrailingStop`], [`ProtectiveExit`], [`averaging`]: individual rules
//! - [`FeeSchedule`], [`order_quantity`]: commission and sizing helpers

pub mod averaging;
mod engine;
mod fees;
pub mod pnl;
mod protective;
mod sizing;
mod trailing;
mod types;

pub use engine::DecisionEngine;
pub use fees::FeeSchedule;
pub use protective::{ArmedExit, Leg, ProtectiveExit, ProtectiveSignal};
pub use sizing::{order_quantity, quantize_price};
pub use trailing::{TrailingSignal, TrailingStop};
pub use types::{Action, ActionReason};
