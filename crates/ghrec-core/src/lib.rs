//! Repository record model and the remote descriptor it is reconciled from.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "ghrec-core";

/// Raw byte counts per language, as reported by the hosting API.
pub type LanguageSizes = BTreeMap<String, u64>;

/// Percentage share per language, rounded to one decimal place.
pub type LanguageShares = BTreeMap<String, f64>;

/// Parsed funding declaration, platform name to one or many targets, in document order.
pub type FundingManifest = serde_yaml::Mapping;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserRef {
    pub login: String,
    #[serde(default)]
    pub id: Option<u64>,
}

impl UserRef {
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OrganizationRef {
    pub login: String,
    #[serde(default)]
    pub id: Option<u64>,
}

impl OrganizationRef {
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLicense {
    pub name: String,
    #[serde(default)]
    pub spdx_id: Option<String>,
}

/// Read-only view of a repository as reported by the hosting API.
///
/// Every field is optional: `None` means the API reported the field as null or
/// omitted it, and reconciliation keeps whatever the record already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RemoteRepository {
    pub node_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub default_branch: Option<String>,
    pub topics: Option<Vec<String>>,
    pub size: Option<u64>,
    pub archived: Option<bool>,
    pub fork: Option<bool>,
    pub is_template: Option<bool>,
    pub has_downloads: Option<bool>,
    pub has_issues: Option<bool>,
    pub has_pages: Option<bool>,
    pub has_projects: Option<bool>,
    pub has_wiki: Option<bool>,
    pub forks_count: Option<u64>,
    pub open_issues_count: Option<u64>,
    pub stargazers_count: Option<u64>,
    pub subscribers_count: Option<u64>,
    pub watchers_count: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub pushed_at: Option<DateTime<Utc>>,
    pub license: Option<RemoteLicense>,
    pub owner: Option<UserRef>,
    pub organization: Option<OrganizationRef>,
}

/// Locally persisted repository state.
///
/// `key` is always the lowercased `name`; `owner` and `organization` are weak
/// references whose lifecycle belongs to the storage layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryRecord {
    pub node_id: String,
    pub name: String,
    pub key: String,
    pub description: String,
    pub homepage: String,
    pub default_branch: String,
    pub license: String,
    pub languages: LanguageShares,
    pub topics: Vec<String>,
    /// Size in KB.
    pub size: u64,
    pub pages_status: String,

    pub is_archived: bool,
    pub is_fork: bool,
    pub is_template: bool,
    pub is_empty: bool,
    pub is_owasp_repository: bool,
    pub is_owasp_site_repository: bool,

    pub has_downloads: bool,
    pub has_issues: bool,
    pub has_pages: bool,
    pub has_projects: bool,
    pub has_wiki: bool,

    pub has_funding_yml: bool,
    pub is_funding_policy_compliant: bool,
    pub funding_yml: FundingManifest,

    pub commits_count: u64,
    pub contributors_count: u64,
    pub forks_count: u64,
    pub open_issues_count: u64,
    pub stars_count: u64,
    pub subscribers_count: u64,
    pub watchers_count: u64,

    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub pushed_at: Option<DateTime<Utc>>,

    pub organization: Option<OrganizationRef>,
    pub owner: Option<UserRef>,
}

impl Default for RepositoryRecord {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            name: String::new(),
            key: String::new(),
            description: String::new(),
            homepage: String::new(),
            default_branch: String::new(),
            license: String::new(),
            languages: LanguageShares::new(),
            topics: Vec::new(),
            size: 0,
            pages_status: String::new(),
            is_archived: false,
            is_fork: false,
            is_template: false,
            is_empty: false,
            is_owasp_repository: false,
            is_owasp_site_repository: false,
            has_downloads: false,
            has_issues: false,
            has_pages: false,
            has_projects: false,
            has_wiki: false,
            has_funding_yml: false,
            is_funding_policy_compliant: true,
            funding_yml: FundingManifest::new(),
            commits_count: 0,
            contributors_count: 0,
            forks_count: 0,
            open_issues_count: 0,
            stars_count: 0,
            subscribers_count: 0,
            watchers_count: 0,
            created_at: None,
            updated_at: None,
            pushed_at: None,
            organization: None,
            owner: None,
        }
    }
}

impl RepositoryRecord {
    pub fn owner_login(&self) -> &str {
        self.owner.as_ref().map(|o| o.login.as_str()).unwrap_or_default()
    }

    /// Lookup pair the storage layer keeps unique.
    pub fn unique_key(&self) -> (&str, &str) {
        (self.key.as_str(), self.owner_login())
    }
}

impl fmt::Display for RepositoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_login(), self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_defaults_to_compliant_without_funding_file() {
        let record = RepositoryRecord::default();
        assert!(record.is_funding_policy_compliant);
        assert!(!record.has_funding_yml);
        assert!(record.funding_yml.is_empty());
        assert!(record.languages.is_empty());
    }

    #[test]
    fn display_joins_owner_login_and_name() {
        let record = RepositoryRecord {
            name: "Nest".to_string(),
            owner: Some(UserRef::new("OWASP")),
            ..Default::default()
        };
        assert_eq!(record.to_string(), "OWASP/Nest");

        let orphan = RepositoryRecord {
            name: "Nest".to_string(),
            ..Default::default()
        };
        assert_eq!(orphan.to_string(), "/Nest");
    }

    #[test]
    fn remote_descriptor_treats_null_and_missing_fields_as_absent() {
        let remote: RemoteRepository = serde_json::from_str(
            r#"{
                "name": "Nest",
                "description": null,
                "stargazers_count": 12,
                "license": {"key": "mit", "name": "MIT License", "spdx_id": "MIT"},
                "owner": {"login": "OWASP", "id": 1, "type": "Organization"}
            }"#,
        )
        .expect("parse descriptor");

        assert_eq!(remote.name.as_deref(), Some("Nest"));
        assert_eq!(remote.description, None);
        assert_eq!(remote.homepage, None);
        assert_eq!(remote.stargazers_count, Some(12));
        assert_eq!(remote.license.map(|l| l.name).as_deref(), Some("MIT License"));
        assert_eq!(remote.owner.map(|o| o.login).as_deref(), Some("OWASP"));
    }

    #[test]
    fn record_parses_from_partial_json_with_defaults() {
        let record: RepositoryRecord =
            serde_json::from_str(r#"{"name": "Nest", "key": "nest", "stars_count": 3}"#)
                .expect("parse record");
        assert_eq!(record.stars_count, 3);
        assert!(record.is_funding_policy_compliant);
        assert_eq!(record.unique_key(), ("nest", ""));
    }
}
