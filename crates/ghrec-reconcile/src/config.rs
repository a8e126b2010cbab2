//! Reconciliation settings: the umbrella organization and its funding policy.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_ORGANIZATION_LOGIN: &str = "owasp";
pub const DEFAULT_FUNDING_DOMAIN: &str = "//owasp.org";
pub const DEFAULT_FUNDING_PATH: &str = ".github/FUNDING.yml";
pub const DEFAULT_SITE_REPOSITORY_PREFIXES: &[&str] =
    &["www-chapter-", "www-committee-", "www-event", "www-project-"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Login of the canonical umbrella organization, compared case-insensitively.
    pub organization_login: String,
    /// Substring a `custom` funding target must contain.
    pub funding_domain: String,
    pub funding_path: String,
    pub site_repository_prefixes: Vec<String>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            organization_login: DEFAULT_ORGANIZATION_LOGIN.to_string(),
            funding_domain: DEFAULT_FUNDING_DOMAIN.to_string(),
            funding_path: DEFAULT_FUNDING_PATH.to_string(),
            site_repository_prefixes: DEFAULT_SITE_REPOSITORY_PREFIXES
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl ReconcileConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            organization_login: std::env::var("GHREC_ORGANIZATION_LOGIN")
                .unwrap_or(defaults.organization_login),
            funding_domain: std::env::var("GHREC_FUNDING_DOMAIN")
                .unwrap_or(defaults.funding_domain),
            funding_path: std::env::var("GHREC_FUNDING_PATH").unwrap_or(defaults.funding_path),
            site_repository_prefixes: std::env::var("GHREC_SITE_PREFIXES")
                .map(|v| parse_prefix_list(&v))
                .unwrap_or(defaults.site_repository_prefixes),
        }
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn is_umbrella_organization(&self, login: &str) -> bool {
        login.to_lowercase() == self.organization_login.to_lowercase()
    }
}

fn parse_prefix_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Decides whether a repository key names one of the organization's website repositories.
pub trait SiteRepositoryPredicate: Send + Sync {
    fn is_site_repository(&self, key: &str) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct PrefixSitePredicate {
    prefixes: Vec<String>,
}

impl PrefixSitePredicate {
    pub fn new(prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self::new(config.site_repository_prefixes.iter().cloned())
    }
}

impl SiteRepositoryPredicate for PrefixSitePredicate {
    fn is_site_repository(&self, key: &str) -> bool {
        self.prefixes.iter().any(|prefix| key.starts_with(prefix.as_str()))
    }
}
