//! Output formatting utilities
//!
//! Rendered objects go to stdout; status messages go to stderr so that a
//! manifest on stdout can be piped straight into other tools.

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};
use thiserror::Error;
use workload_lib::QosClass;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// YAML format (default)
    #[default]
    Yaml,
    /// JSON format
    Json,
    /// Table format
    Table,
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to render YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Render a serializable value as YAML or JSON
///
/// `Table` falls back to YAML for values that have no tabular form.
pub fn render<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<String, OutputError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml | OutputFormat::Table => Ok(serde_yaml::to_string(value)?),
    }
}

/// Print a table from a list of items, or the items as YAML/JSON
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) -> Result<(), OutputError> {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No items found".yellow());
                return Ok(());
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json | OutputFormat::Yaml => {
            println!("{}", render(items, format)?.trim_end());
        }
    }
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    eprintln!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    eprintln!("{} {}", "ℹ".blue().bold(), message);
}

/// Color a QoS class by how strongly it protects the pod
pub fn color_qos(class: QosClass) -> String {
    match class {
        QosClass::Guaranteed => class.as_str().green().to_string(),
        QosClass::Burstable => class.as_str().yellow().to_string(),
        QosClass::BestEffort => class.as_str().red().to_string(),
    }
}

/// Placeholder for an unset table cell
pub fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}
