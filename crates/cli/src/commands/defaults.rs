//! Show registered resource defaults

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;
use workload_lib::{DefaultsSnapshot, ResourceName};

use crate::output::{self, or_dash, print_info, OutputFormat};

/// Row for the defaults table
#[derive(Debug, Serialize, Tabled)]
struct DefaultsRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Limit")]
    limit: String,
    #[tabled(rename = "Request")]
    request: String,
}

fn rows(snapshot: &DefaultsSnapshot) -> Vec<DefaultsRow> {
    [ResourceName::Cpu, ResourceName::Memory]
        .into_iter()
        .filter(|name| snapshot.limits.contains_key(name) || snapshot.requests.contains_key(name))
        .map(|name| DefaultsRow {
            resource: name.to_string(),
            limit: or_dash(snapshot.limits.get(&name).map(String::as_str)),
            request: or_dash(snapshot.requests.get(&name).map(String::as_str)),
        })
        .collect()
}

/// Print the defaults used for QoS auto-upgrade
pub fn show_defaults(snapshot: &DefaultsSnapshot, format: OutputFormat) -> Result<()> {
    if snapshot.limits.is_empty() && snapshot.requests.is_empty() {
        print_info("No defaults registered, set default_limits and default_requests in the config");
    }
    output::print_table(&rows(snapshot), format)?;
    Ok(())
}
