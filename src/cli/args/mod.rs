//! Shared CLI argument types

mod common;
mod global;
mod params;

pub use common::OutputFormat;
pub use global::GlobalOptions;
pub use params::{Param, params_object};
