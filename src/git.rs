use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{DirectoryErrorPolicy, SyncConfig};
use crate::github::RepositoryRecord;
use crate::runner::{CommandRunner, CommandSpec, RunOutcome};

/// Git operations handler that reconciles one repository at a time
#[derive(Clone)]
pub struct GitClient {
    runner: CommandRunner,
    git_binary: String,
    on_directory_error: DirectoryErrorPolicy,
    dry_run: bool,
}

/// What reconciliation would do for a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoAction {
    /// Directory absent: create it and clone
    Clone,
    /// Directory present: hard reset, then rebase pull
    Update,
}

impl fmt::Display for RepoAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoAction::Clone => write!(f, "clone"),
            RepoAction::Update => write!(f, "reset + pull"),
        }
    }
}

/// Result of a sync operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    /// Repository was successfully cloned
    Cloned { path: PathBuf },
    /// Existing working copy was reset and pulled
    Updated { path: PathBuf },
    /// A command stopped early on a permanent condition
    Abandoned { path: PathBuf, reason: String },
    /// A command kept failing until the attempt limit
    Exhausted { path: PathBuf, command: String },
    /// Repository was not touched
    Skipped { path: PathBuf, reason: String },
    /// Dry run: what would have happened
    Planned { path: PathBuf, action: RepoAction },
}

impl GitClient {
    pub fn new(runner: CommandRunner, config: &SyncConfig) -> Self {
        Self {
            runner,
            git_binary: config.git_binary.clone(),
            on_directory_error: config.on_directory_error,
            dry_run: false,
        }
    }

    /// Only report planned actions; never touch the filesystem or run git
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Local working copy location for `full_name` below `root`
    ///
    /// Only plain path segments are accepted, so a listing cannot point
    /// outside of `root`.
    pub fn get_repo_directory(root: &Path, full_name: &str) -> Result<PathBuf> {
        let relative = Path::new(full_name);

        let mut segments = 0;
        for component in relative.components() {
            match component {
                Component::Normal(_) => segments += 1,
                _ => return Err(anyhow!("Unsafe repository name: {:?}", full_name)),
            }
        }

        if segments == 0 {
            return Err(anyhow!("Empty repository name"));
        }

        Ok(root.join(relative))
    }

    /// Make the working copy of `record` below `root` match the remote
    ///
    /// Only directory creation failures under the `abort` policy are
    /// returned as errors; command failures end up in the [`SyncResult`].
    pub async fn sync_repository(&self, root: &Path, record: &RepositoryRecord) -> Result<SyncResult> {
        info!("Syncing repository: {} ({})", record.full_name, record.clone_locator);

        let path = match Self::get_repo_directory(root, &record.full_name) {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping {}: {}", record.full_name, e);
                return Ok(SyncResult::Skipped {
                    path: root.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };

        let exists = tokio::fs::metadata(&path).await.is_ok();
        let action = if exists {
            RepoAction::Update
        } else {
            RepoAction::Clone
        };

        if self.dry_run {
            info!("[dry-run] Would {} {}", action, path.display());
            return Ok(SyncResult::Planned { path, action });
        }

        match action {
            RepoAction::Clone => self.clone_repository(record, path).await,
            RepoAction::Update => Ok(self.update_repository(path).await),
        }
    }

    async fn clone_repository(&self, record: &RepositoryRecord, path: PathBuf) -> Result<SyncResult> {
        info!("Local directory not found, creating: {}", path.display());

        if let Err(e) = create_private_dir(&path).await {
            match self.on_directory_error {
                DirectoryErrorPolicy::Abort => {
                    return Err(e).with_context(|| {
                        format!("Failed to create repository directory {}", path.display())
                    });
                }
                DirectoryErrorPolicy::Skip => {
                    warn!("Failed to create {}: {}, skipping", path.display(), e);
                    return Ok(SyncResult::Skipped {
                        path,
                        reason: format!("Failed to create directory: {}", e),
                    });
                }
            }
        }

        info!("Cloning repository: {} -> {}", record.full_name, path.display());

        let command = self.clone_command(&record.clone_locator, &path);
        let outcome = self.runner.run(&command).await;
        debug!("{} finished after {} attempt(s)", command, outcome.attempts());

        let result = match outcome {
            RunOutcome::Succeeded { .. } => SyncResult::Cloned { path },
            RunOutcome::Abandoned { reason, .. } => SyncResult::Abandoned { path, reason },
            RunOutcome::Exhausted { .. } => SyncResult::Exhausted {
                path,
                command: command.to_string(),
            },
        };

        Ok(result)
    }

    async fn update_repository(&self, path: PathBuf) -> SyncResult {
        debug!("Updating existing working copy: {}", path.display());

        let reset = self.reset_command(&path);
        let reset_outcome = self.runner.run(&reset).await;

        let pull = self.pull_command(&path);
        let pull_outcome = self.runner.run(&pull).await;

        // Report the worse of the two commands
        match (reset_outcome, pull_outcome) {
            (RunOutcome::Exhausted { .. }, _) => SyncResult::Exhausted {
                path,
                command: reset.to_string(),
            },
            (_, RunOutcome::Exhausted { .. }) => SyncResult::Exhausted {
                path,
                command: pull.to_string(),
            },
            (RunOutcome::Abandoned { reason, .. }, _) | (_, RunOutcome::Abandoned { reason, .. }) => {
                SyncResult::Abandoned { path, reason }
            }
            _ => SyncResult::Updated { path },
        }
    }

    pub fn clone_command(&self, locator: &str, destination: &Path) -> CommandSpec {
        CommandSpec::new(
            self.git_binary.as_str(),
            [
                "clone".to_string(),
                locator.to_string(),
                destination.to_string_lossy().into_owned(),
            ],
        )
    }

    pub fn reset_command(&self, path: &Path) -> CommandSpec {
        self.working_copy_command(path, ["reset", "--hard"])
    }

    pub fn pull_command(&self, path: &Path) -> CommandSpec {
        self.working_copy_command(path, ["pull", "--rebase"])
    }

    /// Command confined to the repository at `path`
    ///
    /// Git must not discover an enclosing repository when `path` holds no
    /// `.git` of its own, so discovery stops at the parent directory.
    fn working_copy_command(&self, path: &Path, args: [&str; 2]) -> CommandSpec {
        let ceiling = path.parent().unwrap_or(path);

        CommandSpec::new(self.git_binary.as_str(), args)
            .in_dir(path)
            .with_env(GIT_CEILING_DIRECTORIES, ceiling.to_string_lossy())
    }
}

/// Directories above which git stops looking for a repository
pub const GIT_CEILING_DIRECTORIES: &str = "GIT_CEILING_DIRECTORIES";

/// Create `path` and any missing parents, readable by the owner only
pub async fn create_private_dir(path: &Path) -> std::io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);

    #[cfg(unix)]
    builder.mode(0o700);

    builder.create(path).await
}
