use serde::{Deserialize, Serialize};

/// Whether dirty blocks may rewrite the warehouse attribute definition
/// itself (caption, description, data type, unit, termlist).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentUpdatePolicy {
    /// Only when the acting user administers attributes.
    #[default]
    AdminOnly,
    /// Never; only the survey link is maintained.
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncPolicy {
    #[serde(default)]
    pub content_updates: ContentUpdatePolicy,
}

impl SyncPolicy {
    pub fn allows_content_update(&self, is_attribute_admin: bool) -> bool {
        match self.content_updates {
            ContentUpdatePolicy::AdminOnly => is_attribute_admin,
            ContentUpdatePolicy::Never => false,
        }
    }
}

/// Site-wide connection settings for the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WarehouseSettings {
    #[serde(default)]
    pub website_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_checklist_id: Option<i64>,
    /// Comma separated spatial reference systems offered to recorders.
    #[serde(default)]
    pub spatial_systems: String,
    /// Scheme and host prefixed to resource paths in list responses.
    #[serde(default)]
    pub base_url: String,
    /// Read lookup terms through the uncached view, as form editors do.
    #[serde(default)]
    pub no_termlist_cache: bool,
    #[serde(default)]
    pub sync: SyncPolicy,
}

impl WarehouseSettings {
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw)
    }

    pub fn spatial_system_list(&self) -> Vec<String> {
        self.spatial_systems
            .split(',')
            .map(str::trim)
            .filter(|system| !system.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_settings_use_defaults() {
        let settings = WarehouseSettings::from_json_str("  ").expect("settings");
        assert_eq!(settings, WarehouseSettings::default());
        assert_eq!(settings.sync.content_updates, ContentUpdatePolicy::AdminOnly);
    }

    #[test]
    fn spatial_systems_split_on_commas() {
        let settings = WarehouseSettings::from_json_str(
            r#"{"website_id": 3, "spatial_systems": "OSGB, 4326,,OSIE"}"#,
        )
        .expect("settings");
        assert_eq!(settings.spatial_system_list(), vec!["OSGB", "4326", "OSIE"]);
    }

    #[test]
    fn never_policy_blocks_admins() {
        let policy = SyncPolicy {
            content_updates: ContentUpdatePolicy::Never,
        };
        assert!(!policy.allows_content_update(true));
        assert!(SyncPolicy::default().allows_content_update(true));
        assert!(!SyncPolicy::default().allows_content_update(false));
    }
}
