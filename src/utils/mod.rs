//! Shared utilities.

pub mod money;

pub use money::{floor_share, rounded_weighted_average, saturating_release};
