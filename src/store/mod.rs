//! Store module - in-memory implementations of the catalog and price traits

pub mod memory;

pub use memory::{InMemoryPlanCatalog, InMemoryPriceFeed, InMemorySessionCatalog};
