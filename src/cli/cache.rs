//! Cache management commands

use colored::Colorize;
use serde_json::json;
use tabled::Tabled;

use crate::cache::TableStats;
use crate::cli::{CommandContext, OutputFormat};
use crate::error::Result;
use crate::output::formatters::{format_size, format_timestamp};
use crate::output::{format_table, print_json};

#[derive(Tabled)]
struct TableRow {
    #[tabled(rename = "TABLE")]
    table: String,
    #[tabled(rename = "ENTRIES")]
    entries: usize,
    #[tabled(rename = "PENDING")]
    pending: usize,
    #[tabled(rename = "SIZE")]
    size: String,
    #[tabled(rename = "NEWEST")]
    newest: String,
}

impl From<&TableStats> for TableRow {
    fn from(stats: &TableStats) -> Self {
        Self {
            table: stats.table.clone(),
            entries: stats.entries,
            pending: stats.pending_entries,
            size: format_size(stats.stored_bytes),
            newest: format_timestamp(stats.newest_entry),
        }
    }
}

/// Show cache status/statistics
pub fn status(ctx: &CommandContext) -> Result<()> {
    let stats = ctx.cache.stats()?;
    let path = ctx.cache.db_path().display().to_string();

    match ctx.format {
        OutputFormat::Json => print_json(&json!({
            "path": path,
            "tables": stats,
        }))?,
        OutputFormat::Table => {
            let rows: Vec<TableRow> = stats.iter().map(TableRow::from).collect();
            println!("{}", format_table(&rows));
        }
        OutputFormat::Pretty => {
            let entries: usize = stats.iter().map(|t| t.entries).sum();
            let bytes: usize = stats.iter().map(|t| t.stored_bytes).sum();

            println!("{}", "Cache Status".bold());
            println!("────────────────────────────────────────");
            println!("Location:       {}", path);
            println!("Entries:        {}", entries);
            println!("Stored size:    {}", format_size(bytes));

            for table in &stats {
                println!();
                println!("{}", table.table.bold());
                println!("  Entries:      {}", table.entries);
                println!("  Pending:      {}", table.pending_entries);
                println!("  Size:         {}", format_size(table.stored_bytes));
                println!("  Oldest entry: {}", format_timestamp(table.oldest_entry));
                println!("  Newest entry: {}", format_timestamp(table.newest_entry));
            }
        }
    }

    Ok(())
}

/// Clear one client's entries, or everything
pub fn clear(ctx: &CommandContext, client: Option<&str>) -> Result<()> {
    let stats = ctx.cache.clear(client)?;

    match ctx.format {
        OutputFormat::Json => print_json(&json!({
            "client": client,
            "entries_removed": stats.entries_removed,
            "success": true,
        }))?,
        _ => {
            if stats.entries_removed > 0 {
                println!(
                    "{} Cleared {} cache entries",
                    "✓".green(),
                    stats.entries_removed
                );
            } else {
                println!("Cache was already empty");
            }
        }
    }

    Ok(())
}

/// Show the cache database path
pub fn path(ctx: &CommandContext) -> Result<()> {
    let path = ctx.cache.db_path().display().to_string();
    match ctx.format {
        OutputFormat::Json => print_json(&json!({ "path": path }))?,
        _ => println!("{}", path),
    }
    Ok(())
}

/// Show the table a client's responses are stored in
pub fn table(ctx: &CommandContext, client: &str) -> Result<()> {
    ctx.config.client(client)?;
    let table = ctx.cache.get_table_name(client)?;
    match ctx.format {
        OutputFormat::Json => print_json(&json!({ "client": client, "table": table }))?,
        _ => println!("{}", table),
    }
    Ok(())
}
