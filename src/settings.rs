use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::patterns::Service;

/// Per-guild behaviour switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    pub enabled_services: Vec<Service>,
    pub mention_users: bool,
    pub delete_original: bool,
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            enabled_services: default_services(),
            mention_users: true,
            delete_original: true,
        }
    }
}

impl GuildSettings {
    pub fn new(enabled_services: Vec<Service>, mention_users: bool, delete_original: bool) -> Self {
        Self {
            enabled_services,
            mention_users,
            delete_original,
        }
        .normalized()
    }

    /// Drop duplicate services (first occurrence wins) and refill an empty set
    pub fn normalized(mut self) -> Self {
        let mut seen = Vec::with_capacity(self.enabled_services.len());
        self.enabled_services.retain(|service| {
            if seen.contains(service) {
                false
            } else {
                seen.push(*service);
                true
            }
        });
        if self.enabled_services.is_empty() {
            self.enabled_services = default_services();
        }
        self
    }

    pub fn is_enabled(&self, service: Service) -> bool {
        self.enabled_services.contains(&service)
    }
}

/// Every service, in display order
pub fn default_services() -> Vec<Service> {
    Service::ALL.to_vec()
}

/// Encode the enabled services for the `enabled_services` column
pub fn encode_services(services: &[Service]) -> String {
    let names: Vec<&str> = services.iter().map(|s| s.as_str()).collect();
    // serializing a list of &str cannot fail
    serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string())
}

/// Decode the `enabled_services` column.
///
/// Accepts JSON arrays as well as the legacy bracketed form with single or
/// double quotes (`['Twitter', "Reddit"]`). Empty, unparseable or entirely
/// unknown values decode to the default set.
pub fn decode_services(raw: Option<&str>) -> Vec<Service> {
    let raw = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return default_services(),
    };

    let names = match serde_json::from_str::<Vec<String>>(raw) {
        Ok(names) => names,
        Err(_) => parse_legacy_list(raw),
    };

    let mut services = Vec::with_capacity(names.len());
    for name in names {
        match name.parse::<Service>() {
            Ok(service) if !services.contains(&service) => services.push(service),
            Ok(_) => {}
            Err(e) => warn!("Ignoring stored service entry: {}", e),
        }
    }

    if services.is_empty() {
        default_services()
    } else {
        services
    }
}

fn parse_legacy_list(raw: &str) -> Vec<String> {
    let inner = raw.trim();
    let inner = inner.strip_prefix('[').unwrap_or(inner);
    let inner = inner.strip_suffix(']').unwrap_or(inner);
    inner
        .split(',')
        .map(|part| part.trim().trim_matches(|c| c == '"' || c == '\'').trim())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
