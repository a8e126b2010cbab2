//! Reconciles a stored repository record with state fetched from the hosting API.

pub mod config;
pub mod fixture;
pub mod funding;

use ghrec_core::{
    LanguageShares, LanguageSizes, OrganizationRef, RemoteRepository, RepositoryRecord, UserRef,
};
use ghrec_remote::{ContentAccessor, RemoteError, TotalCount};
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

pub use config::{PrefixSitePredicate, ReconcileConfig, SiteRepositoryPredicate};
pub use funding::{FundingCompliance, FundingPolicy};

pub const CRATE_NAME: &str = "ghrec-reconcile";

/// Errors that abort a reconciliation call. The record handed in is consumed,
/// so a partially updated value never reaches the caller.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("reading commit count: {0}")]
    Commits(#[source] RemoteError),
    #[error("reading contributor count: {0}")]
    Contributors(#[source] RemoteError),
    #[error("fetching funding declaration: {0}")]
    FundingFetch(#[source] RemoteError),
    #[error("malformed funding declaration: {0}")]
    MalformedFundingDeclaration(String),
}

/// Optional inputs folded into the record. `None` leaves the matching record
/// fields alone, except for `organization` and `owner`, which are always
/// overwritten.
#[derive(Default)]
pub struct Aggregates<'a> {
    pub commits: Option<&'a dyn TotalCount>,
    pub contributors: Option<&'a dyn TotalCount>,
    pub languages: Option<LanguageSizes>,
    pub organization: Option<OrganizationRef>,
    pub owner: Option<UserRef>,
}

pub struct Reconciler {
    config: ReconcileConfig,
    policy: FundingPolicy,
    site_predicate: Box<dyn SiteRepositoryPredicate>,
}

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        let policy = FundingPolicy::from_config(&config);
        let site_predicate = Box::new(PrefixSitePredicate::from_config(&config));
        Self {
            config,
            policy,
            site_predicate,
        }
    }

    pub fn with_site_predicate(mut self, predicate: Box<dyn SiteRepositoryPredicate>) -> Self {
        self.site_predicate = predicate;
        self
    }

    pub async fn reconcile(
        &self,
        current: RepositoryRecord,
        remote: &RemoteRepository,
        aggregates: Aggregates<'_>,
        contents: &dyn ContentAccessor,
    ) -> Result<RepositoryRecord, ReconcileError> {
        let span = info_span!(
            "reconcile",
            repository = remote.name.as_deref().unwrap_or(current.name.as_str()),
            owner = aggregates.owner.as_ref().map(|o| o.login.as_str()).unwrap_or_default()
        );
        self.reconcile_inner(current, remote, aggregates, contents)
            .instrument(span)
            .await
    }

    async fn reconcile_inner(
        &self,
        mut record: RepositoryRecord,
        remote: &RemoteRepository,
        aggregates: Aggregates<'_>,
        contents: &dyn ContentAccessor,
    ) -> Result<RepositoryRecord, ReconcileError> {
        apply_remote_fields(&mut record, remote);

        record.key = record.name.to_lowercase();
        record.is_owasp_repository = aggregates
            .organization
            .as_ref()
            .is_some_and(|org| self.config.is_umbrella_organization(&org.login));
        record.is_owasp_site_repository = self.site_predicate.is_site_repository(&record.key);

        if let Some(commits) = aggregates.commits {
            match commits.total_count().await {
                Ok(count) => record.commits_count = count,
                Err(RemoteError::EmptyRepository) => {
                    debug!("repository has no commits, marking empty");
                    record.is_empty = true;
                }
                Err(err) => return Err(ReconcileError::Commits(err)),
            }
        }

        if let Some(contributors) = aggregates.contributors {
            record.contributors_count = contributors
                .total_count()
                .await
                .map_err(ReconcileError::Contributors)?;
        }

        if let Some(sizes) = &aggregates.languages {
            record.languages = normalize_languages(sizes);
        }

        record.license = remote
            .license
            .as_ref()
            .map(|license| license.name.clone())
            .unwrap_or_default();

        self.apply_funding(&mut record, contents).await?;

        record.organization = aggregates.organization;
        record.owner = aggregates.owner;

        Ok(record)
    }

    async fn apply_funding(
        &self,
        record: &mut RepositoryRecord,
        contents: &dyn ContentAccessor,
    ) -> Result<(), ReconcileError> {
        let file = match contents.get_contents(&self.config.funding_path).await {
            Ok(file) => file,
            Err(RemoteError::NotFound { .. }) => {
                debug!(path = %self.config.funding_path, "no funding declaration");
                record.has_funding_yml = false;
                record.is_funding_policy_compliant = true;
                return Ok(());
            }
            Err(err) => return Err(ReconcileError::FundingFetch(err)),
        };

        let manifest = funding::parse_manifest(&funding::decode_content(&file)?)?;
        let compliance = self.policy.evaluate(&manifest);
        if let FundingCompliance::NonCompliant { platform, target } = &compliance {
            warn!(%platform, %target, "funding declaration is not policy compliant");
        }

        record.funding_yml = manifest;
        record.has_funding_yml = true;
        record.is_funding_policy_compliant = compliance.is_compliant();
        Ok(())
    }
}

fn override_value<T>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}

/// Copies every field the remote reports; absent fields keep their stored value.
pub fn apply_remote_fields(record: &mut RepositoryRecord, remote: &RemoteRepository) {
    override_value(&mut record.node_id, remote.node_id.clone());
    override_value(&mut record.name, remote.name.clone());
    override_value(&mut record.description, remote.description.clone());
    override_value(&mut record.homepage, remote.homepage.clone());
    override_value(&mut record.default_branch, remote.default_branch.clone());
    override_value(&mut record.topics, remote.topics.clone());
    override_value(&mut record.size, remote.size);

    override_value(&mut record.is_archived, remote.archived);
    override_value(&mut record.is_fork, remote.fork);
    override_value(&mut record.is_template, remote.is_template);
    override_value(&mut record.has_downloads, remote.has_downloads);
    override_value(&mut record.has_issues, remote.has_issues);
    override_value(&mut record.has_pages, remote.has_pages);
    override_value(&mut record.has_projects, remote.has_projects);
    override_value(&mut record.has_wiki, remote.has_wiki);

    override_value(&mut record.forks_count, remote.forks_count);
    override_value(&mut record.open_issues_count, remote.open_issues_count);
    override_value(&mut record.stars_count, remote.stargazers_count);
    override_value(&mut record.subscribers_count, remote.subscribers_count);
    override_value(&mut record.watchers_count, remote.watchers_count);

    record.created_at = remote.created_at.or(record.created_at);
    record.updated_at = remote.updated_at.or(record.updated_at);
    record.pushed_at = remote.pushed_at.or(record.pushed_at);
}

/// Converts byte counts into percentage shares with one decimal place.
///
/// Shares are rounded independently and may not add up to exactly 100.0.
pub fn normalize_languages(sizes: &LanguageSizes) -> LanguageShares {
    let total = sizes.values().fold(0u64, |acc, size| acc.saturating_add(*size));
    if total == 0 {
        return LanguageShares::new();
    }
    sizes
        .iter()
        .map(|(language, size)| {
            let share = *size as f64 * 100.0 / total as f64;
            (language.clone(), (share * 10.0).round() / 10.0)
        })
        .collect()
}
