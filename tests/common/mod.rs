//! Common test utilities and helpers for mirror-mygithub tests
#![allow(dead_code)]

use async_trait::async_trait;
use mirror_mygithub::runner::{
    CommandAttempt, CommandExecutor, CommandRunner, CommandSpec, ExitOutcome, MarkerClassifier,
};
use mirror_mygithub::Config;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Scratch directory plus a config pointing at a mock API
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub root: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().join("mirror");

        Self { temp_dir, root }
    }

    /// Config for user `alice` against `server`, with no delays
    pub fn config(&self, server: &MockServer) -> Config {
        let mut config = Config::new("alice", "t", self.root.to_string_lossy());
        config.api.base_url = server.uri();
        config.api.page_delay_ms = 0;
        config.sync.retry_delay_ms = 0;
        config
    }

    pub fn write_config(&self, content: &str) -> PathBuf {
        let config_path = self.temp_dir.path().join("config.json");
        std::fs::write(&config_path, content).expect("Failed to write test config");
        config_path
    }
}

/// Records every command; answers success unless a subcommand is scripted to fail
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<CommandSpec>>,
    failing: Vec<(String, ExitOutcome, String)>,
}

impl RecordingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every invocation of `subcommand` with `exit` and `stderr`
    pub fn failing(subcommand: &str, exit: ExitOutcome, stderr: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failing: vec![(subcommand.to_string(), exit, stderr.to_string())],
        })
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn subcommands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|spec| spec.args.first().cloned())
            .collect()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, spec: &CommandSpec, attempt_index: u32) -> CommandAttempt {
        self.calls.lock().unwrap().push(spec.clone());

        let (exit, stderr) = self
            .failing
            .iter()
            .find(|(subcommand, _, _)| spec.args.first() == Some(subcommand))
            .map(|(_, exit, stderr)| (exit.clone(), stderr.clone()))
            .unwrap_or((ExitOutcome::Success, String::new()));

        CommandAttempt {
            attempt_index,
            stdout: String::new(),
            stderr,
            exit,
        }
    }
}

/// Runner over `executor` using the classifier and limits from `config`
pub fn runner(config: &Config, executor: Arc<RecordingExecutor>) -> CommandRunner {
    CommandRunner::new(
        executor,
        Arc::new(MarkerClassifier::from_config(&config.sync)),
        config.sync.max_attempts,
        Duration::ZERO,
    )
}

/// Listing entry as the GitHub API would return it
pub fn repo_json(full_name: &str) -> Value {
    json!({
        "full_name": full_name,
        "ssh_url": format!("git@host:{}.git", full_name),
        "clone_url": format!("https://host/{}.git", full_name),
        "private": false,
    })
}

pub fn repo_page(full_names: &[&str]) -> Value {
    Value::Array(full_names.iter().map(|name| repo_json(name)).collect())
}

/// Mount a paginated listing for `endpoint`: one mock per page, each expected once
///
/// The first page is matched on the `per_page` query the client adds, later
/// pages on `page=N` taken from the `Link` header of the previous one.
pub async fn mount_listing(server: &MockServer, endpoint: &str, pages: &[&[&str]]) {
    for (index, names) in pages.iter().enumerate() {
        let page_number = index + 1;
        let mut response = ResponseTemplate::new(200).set_body_json(repo_page(names));

        if page_number < pages.len() {
            let link = format!(
                r#"<{}{}?page={}>; rel="next", <{}{}?page={}>; rel="last""#,
                server.uri(),
                endpoint,
                page_number + 1,
                server.uri(),
                endpoint,
                pages.len()
            );
            response = response.insert_header("link", link.as_str());
        }

        let mock = Mock::given(method("GET")).and(path(endpoint));
        let mock = if page_number == 1 {
            mock.and(query_param("per_page", "100"))
        } else {
            mock.and(query_param("page", page_number.to_string().as_str()))
        };

        mock.respond_with(response)
            .expect(1)
            .mount(server)
            .await;
    }
}
