//! Output formatting for CLI results

use serde::Serialize;

use crate::error::Result;

pub mod formatters;
pub mod json;
pub mod table;

pub use json::format_json;
pub use table::format_table;

/// Print `data` wrapped in the JSON output envelope
pub fn print_json<T: Serialize + ?Sized>(data: &T) -> Result<()> {
    println!("{}", format_json(data)?);
    Ok(())
}
