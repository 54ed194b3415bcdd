//! Environment variable loading.

use std::env;

/// Read a variable, treating empty values as unset.
pub(crate) fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a boolean variable. Accepts true/false, 1/0, yes/no, on/off.
pub(crate) fn env_bool(name: &str) -> Result<Option<bool>, String> {
    match env_var(name) {
        None => Ok(None),
        Some(raw) => parse_bool(&raw)
            .map(Some)
            .ok_or_else(|| format!("Invalid boolean for {name}: {raw}")),
    }
}

/// Parse a comma separated list, dropping empty entries.
pub(crate) fn env_list(name: &str) -> Option<Vec<String>> {
    env_var(name).map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
