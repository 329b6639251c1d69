//! EthSettle Common Types
//!
//! Shared types used across the EthSettle crates: normalized wallet
//! addresses, ETH amounts and their wei conversion, operation identifiers
//! and the closed error taxonomy returned by the settlement coordinator.

pub mod identifiers;
pub mod monetary;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
pub use time::*;
