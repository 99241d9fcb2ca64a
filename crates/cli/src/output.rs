//! Terminal output for testforge commands

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Render summary rows for the human formats. Machine formats go through
/// [`print_document`] with the full records instead of the rows.
pub fn render_rows<T: TableDisplay>(rows: &[T], empty: &str, format: OutputFormat) -> String {
    if rows.is_empty() {
        return empty.to_string();
    }

    match format {
        OutputFormat::Plain => rows
            .iter()
            .map(|row| {
                T::headers()
                    .iter()
                    .zip(row.row())
                    .map(|(header, value)| format!("{}: {}", header, value))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect::<Vec<_>>()
            .join("\n---\n"),
        _ => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(T::headers());
            for row in rows {
                table.add_row(row.row());
            }
            table.to_string()
        }
    }
}

pub fn print_rows<T: TableDisplay>(rows: &[T], empty: &str, format: OutputFormat) {
    println!("{}", render_rows(rows, empty, format));
}

/// Print a whole document in a machine format; tables fall back to JSON
pub fn print_document<T: Serialize + ?Sized>(value: &T, format: OutputFormat) {
    match format {
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(value).unwrap_or_default()),
        _ => println!("{}", serde_json::to_string_pretty(value).unwrap_or_default()),
    }
}

/// Machine formats print documents instead of tables and status lines
pub fn is_structured(format: OutputFormat) -> bool {
    matches!(format, OutputFormat::Json | OutputFormat::Yaml)
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("{} {}", "→".cyan(), message);
}
