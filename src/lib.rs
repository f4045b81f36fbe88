//! mirror-mygithub - keep local mirrors of your GitHub repositories
//!
//! Walks the owned and starred repository listings of a GitHub account and
//! clones or refreshes every repository below a local root, so code survives
//! removal from the remote. Meant to be run periodically, e.g. from cron.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`github`]: Paginated listing client
//! - [`runner`]: External command execution with bounded retries
//! - [`git`]: Per-repository clone / reset + pull reconciliation
//! - [`sync`]: Orchestration of a complete mirror run

pub mod config;
pub mod git;
pub mod github;
pub mod runner;
pub mod sync;

pub use config::Config;
pub use git::{GitClient, RepoAction, SyncResult};
pub use github::{GitHubClient, Listing, RepositoryRecord};
pub use runner::{CommandRunner, CommandSpec, RunOutcome};
pub use sync::{Category, SyncEngine, SyncSummary, SyncTarget};
