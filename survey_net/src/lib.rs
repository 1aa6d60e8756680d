//! Least squares adjustment of survey control networks.

pub mod error;
pub mod geometry;
pub mod io;
pub mod reporting;
pub mod surveying;

pub use error::AdjustmentError;
pub use surveying::{adjust_network, AdjustmentConfig, AdjustmentResult, Network};
