//! Fixture-first inputs: captured remote payloads replayed without network access.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use ghrec_core::{LanguageSizes, OrganizationRef, RemoteRepository, RepositoryRecord, UserRef};
use ghrec_remote::{ContentAccessor, RemoteContent, RemoteError, TotalCount};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::Aggregates;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureBundle {
    pub fixture_id: String,
    pub captured_from_url: String,
    pub fetched_at: DateTime<Utc>,
    pub repository: RemoteRepository,
    #[serde(default)]
    pub commits: Option<FixtureCount>,
    #[serde(default)]
    pub contributors: Option<FixtureCount>,
    #[serde(default)]
    pub languages: Option<LanguageSizes>,
    #[serde(default)]
    pub organization: Option<OrganizationRef>,
    #[serde(default)]
    pub owner: Option<UserRef>,
    /// Plain-text file bodies keyed by repository path.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl FixtureBundle {
    pub fn aggregates(&self) -> Aggregates<'_> {
        Aggregates {
            commits: self.commits.as_ref().map(|c| c as &dyn TotalCount),
            contributors: self.contributors.as_ref().map(|c| c as &dyn TotalCount),
            languages: self.languages.clone(),
            organization: self.organization.clone(),
            owner: self.owner.clone(),
        }
    }

    pub fn contents(&self) -> FixtureContents {
        FixtureContents {
            files: self.files.clone(),
        }
    }
}

/// Captured collection total, or the marker for a repository without commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureCount {
    Total(u64),
    Empty,
}

#[async_trait]
impl TotalCount for FixtureCount {
    async fn total_count(&self) -> Result<u64, RemoteError> {
        match self {
            Self::Total(count) => Ok(*count),
            Self::Empty => Err(RemoteError::EmptyRepository),
        }
    }
}

/// Serves files the way the contents endpoint does, base64 encoded.
#[derive(Debug, Clone, Default)]
pub struct FixtureContents {
    files: BTreeMap<String, String>,
}

impl FixtureContents {
    pub fn with_file(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            files: BTreeMap::from([(path.into(), text.into())]),
        }
    }
}

#[async_trait]
impl ContentAccessor for FixtureContents {
    async fn get_contents(&self, path: &str) -> Result<RemoteContent, RemoteError> {
        let text = self.files.get(path).ok_or_else(|| RemoteError::NotFound {
            resource: path.to_string(),
        })?;
        Ok(RemoteContent {
            path: path.to_string(),
            encoding: Some("base64".to_string()),
            content: BASE64.encode(text.as_bytes()),
        })
    }
}

pub fn load_fixture_bundle(path: impl AsRef<Path>) -> Result<FixtureBundle> {
    read_json_file(path)
}

/// Loads a previously reconciled record, or a fresh one when no path is given.
pub fn load_record(path: Option<&Path>) -> Result<RepositoryRecord> {
    match path {
        Some(path) => read_json_file(path),
        None => Ok(RepositoryRecord::default()),
    }
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}
