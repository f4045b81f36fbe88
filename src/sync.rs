//! Sync Engine - Orchestrates sequential repository mirroring
//!
//! This module drives one complete run: it walks the owned and starred
//! listings in turn and hands every listed repository to the GitClient,
//! strictly one after another and in listing order.

use crate::config::Config;
use crate::git::{create_private_dir, GitClient, SyncResult};
use crate::github::{GitHubClient, RepositoryRecord};
use crate::runner::CommandRunner;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// The two repository collections that get mirrored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Repositories the user owns or has access to, mirrored to `root/users`
    Owned,
    /// Repositories the user starred, mirrored to `root/starred`
    Starred,
}

impl Category {
    pub fn directory_name(&self) -> &'static str {
        match self {
            Category::Owned => "users",
            Category::Starred => "starred",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Owned => write!(f, "owned"),
            Category::Starred => write!(f, "starred"),
        }
    }
}

/// Where one category's listing comes from and where it lands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub category: Category,
    pub local_root: PathBuf,
    pub endpoint: String,
}

/// Results from syncing one category
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub category: Category,
    pub total_repositories: usize,
    pub cloned: usize,
    pub updated: usize,
    pub abandoned: usize,
    pub exhausted: usize,
    pub skipped: usize,
    pub planned: usize,
    pub duplicates_dropped: usize,
    pub duration: Duration,
    pub results: Vec<SyncResult>,
}

impl SyncSummary {
    /// Compile summary from per-repository results
    pub fn compile(
        category: Category,
        results: Vec<SyncResult>,
        duplicates_dropped: usize,
        duration: Duration,
    ) -> Self {
        let mut summary = Self {
            category,
            total_repositories: results.len(),
            cloned: 0,
            updated: 0,
            abandoned: 0,
            exhausted: 0,
            skipped: 0,
            planned: 0,
            duplicates_dropped,
            duration,
            results: Vec::new(),
        };

        for result in &results {
            match result {
                SyncResult::Cloned { .. } => summary.cloned += 1,
                SyncResult::Updated { .. } => summary.updated += 1,
                SyncResult::Abandoned { .. } => summary.abandoned += 1,
                SyncResult::Exhausted { .. } => summary.exhausted += 1,
                SyncResult::Skipped { .. } => summary.skipped += 1,
                SyncResult::Planned { .. } => summary.planned += 1,
            }
        }

        summary.results = results;
        summary
    }
}

/// The main sync engine that orchestrates a mirror run
pub struct SyncEngine {
    config: Arc<Config>,
    github_client: GitHubClient,
    git_client: GitClient,
    dry_run: bool,
}

impl SyncEngine {
    /// Create a sync engine running real git processes
    pub fn new(config: Config) -> Result<Self> {
        let runner = CommandRunner::from_config(&config.sync);
        Self::with_runner(config, runner)
    }

    /// Create a sync engine around a caller-supplied command runner
    pub fn with_runner(config: Config, runner: CommandRunner) -> Result<Self> {
        config.validate()?;

        let github_client = GitHubClient::new(&config)?;
        let git_client = GitClient::new(runner, &config.sync);

        Ok(Self {
            config: Arc::new(config),
            github_client,
            git_client,
            dry_run: false,
        })
    }

    /// Fetch listings and report planned actions without changing anything on disk
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self.git_client = self.git_client.with_dry_run(dry_run);
        self
    }

    /// Owned then starred, below the configured root
    pub fn targets(&self) -> Vec<SyncTarget> {
        let root = self.config.root_dir();

        [
            (Category::Owned, &self.config.api.owned_endpoint),
            (Category::Starred, &self.config.api.starred_endpoint),
        ]
        .into_iter()
        .map(|(category, endpoint)| SyncTarget {
            category,
            local_root: root.join(category.directory_name()),
            endpoint: endpoint.clone(),
        })
        .collect()
    }

    /// Run a complete mirror pass, optionally limited to one category
    ///
    /// Fatal errors (root creation, listing failures, repository directory
    /// creation under the `abort` policy) end the run immediately; categories
    /// not yet started are not attempted.
    pub async fn run(&self, only: Option<Category>) -> Result<Vec<SyncSummary>> {
        let root = self.config.root_dir();

        info!(
            "Mirror run starting (user: {}, repo_root_dir: {})",
            self.config.user,
            root.display()
        );

        if tokio::fs::metadata(&root).await.is_err() {
            if self.dry_run {
                info!("[dry-run] Would create repos dir: {}", root.display());
            } else {
                info!("Repos dir does not exist, creating: {}", root.display());
                create_private_dir(&root)
                    .await
                    .with_context(|| format!("Failed to create repos dir {}", root.display()))?;
            }
        }

        let mut summaries = Vec::new();

        for target in self.targets() {
            if only.is_some_and(|category| category != target.category) {
                debug!("Skipping {} repositories", target.category);
                continue;
            }

            let summary = self
                .sync_target(&target)
                .await
                .with_context(|| format!("Failed to sync {} repositories", target.category))?;
            summaries.push(summary);
        }

        info!("Finished");
        Ok(summaries)
    }

    /// Fetch one listing and reconcile every repository in it, in order
    pub async fn sync_target(&self, target: &SyncTarget) -> Result<SyncSummary> {
        let start_time = Instant::now();

        info!(
            "Syncing {} repositories into {} from {}",
            target.category,
            target.local_root.display(),
            target.endpoint
        );

        let listing = self.github_client.fetch_all(&target.endpoint).await?;
        info!(
            "{} listing returned {} repositories",
            target.category,
            listing.records.len()
        );

        let (records, duplicates_dropped) = if self.config.sync.dedupe {
            dedupe_records(listing.records)
        } else {
            (listing.records, 0)
        };

        if duplicates_dropped > 0 {
            warn!(
                "Dropped {} duplicate entries from the {} listing",
                duplicates_dropped, target.category
            );
        }

        let mut results = Vec::with_capacity(records.len());
        for record in &records {
            let result = self
                .git_client
                .sync_repository(&target.local_root, record)
                .await?;

            match &result {
                SyncResult::Exhausted { path, command } => {
                    error!("Giving up on {} for now: {} kept failing", path.display(), command)
                }
                SyncResult::Abandoned { path, reason } => {
                    info!("Left {} as is: {}", path.display(), reason)
                }
                other => debug!("Sync completed: {:?}", other),
            }

            results.push(result);
        }

        let summary = SyncSummary::compile(
            target.category,
            results,
            duplicates_dropped,
            start_time.elapsed(),
        );

        info!(
            "{} sync completed in {:.2}s: {} cloned, {} updated, {} abandoned, {} exhausted, {} skipped, {} planned",
            summary.category,
            summary.duration.as_secs_f64(),
            summary.cloned,
            summary.updated,
            summary.abandoned,
            summary.exhausted,
            summary.skipped,
            summary.planned
        );

        Ok(summary)
    }
}

/// Keep the first record of every `full_name`, preserving order
///
/// Returns the surviving records and how many were dropped.
pub fn dedupe_records(records: Vec<RepositoryRecord>) -> (Vec<RepositoryRecord>, usize) {
    let before = records.len();
    let mut seen = HashSet::new();

    let unique: Vec<RepositoryRecord> = records
        .into_iter()
        .filter(|record| seen.insert(record.full_name.clone()))
        .collect();

    let dropped = before - unique.len();
    (unique, dropped)
}
