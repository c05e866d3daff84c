//! Database row and policy types.

use serde::{Deserialize, Serialize};

use crate::status::{AppDefinition, AppStatus};

/// One persisted app status row.
#[derive(Debug, Clone)]
pub struct AppEntryRow {
    pub id: i64,
    pub app_id: String,
    pub description: Option<String>,
    pub is_alive: bool,
    pub is_http_reachable: Option<bool>,
    pub is_https_reachable: Option<bool>,
}

impl AppEntryRow {
    /// Rebuild a domain status from a persisted row. The stored app id
    /// carries the "A" prefix; the definition is reconstructed from the
    /// bare name and description.
    pub fn to_status(&self) -> AppStatus {
        let name = self.app_id.strip_prefix('A').unwrap_or(&self.app_id);
        AppStatus {
            app: AppDefinition::new(name, self.description.as_deref().unwrap_or("")),
            is_running: self.is_alive,
            is_http_reachable: self.is_http_reachable,
            is_https_reachable: self.is_https_reachable,
        }
    }
}

/// Retention for one resource id prefix (longest-match wins at config level).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRetention {
    pub id_prefix: String,
    pub max_age_ms: i64,
}

/// Purge policy: an optional global age plus optional per-resource ages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_age_ms: Option<i64>,
    pub per_resource: Vec<ResourceRetention>,
}

impl RetentionPolicy {
    pub fn is_empty(&self) -> bool {
        self.max_age_ms.is_none() && self.per_resource.is_empty()
    }
}
