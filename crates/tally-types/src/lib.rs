//! Tally Types
//!
//! Value types shared across the Tally workspace. `FactValue` is the dynamically
//! typed field value carried by every fact, compared by constraints and folded by
//! accumulators in `tally-core`.

#![deny(missing_docs)]

mod types;
pub use types::FactValue;
