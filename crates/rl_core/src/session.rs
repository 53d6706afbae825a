use crate::app_error::AppResult;
use crate::db::open_db;
use crate::store::{insert_run, RunRecord, SESSION_DB_FILE};
use crate::sync::Synchronizer;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::process::Command;
use uuid::Uuid;

type Enricher = Box<dyn Fn(&mut Map<String, Value>) + Send + Sync>;

/// One process session's run record under construction. `save` persists it
/// locally and, when a remote location is configured, runs a full sync cycle
/// so the record becomes visible to peers.
pub struct SessionStore {
    working_dir: PathBuf,
    remote_location: Option<String>,
    session_id: String,
    data: Map<String, Value>,
    enrichers: Vec<Enricher>,
}

impl SessionStore {
    pub fn new(working_dir: &Path, remote_location: Option<String>) -> Self {
        let mut store = Self {
            working_dir: working_dir.to_path_buf(),
            remote_location,
            session_id: Uuid::new_v4().to_string(),
            data: Map::new(),
            enrichers: Vec::new(),
        };
        store.register_enricher(enrich_git_branch);
        store
    }

    pub fn with_session_id(mut self, session_id: &str) -> Self {
        self.session_id = session_id.to_string();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn location(&self) -> PathBuf {
        self.working_dir.join(SESSION_DB_FILE)
    }

    pub fn remote_location(&self) -> Option<&str> {
        self.remote_location.as_deref()
    }

    /// Values that cannot be encoded as JSON are stored as their debug
    /// representation instead of failing the session.
    pub fn insert_field<T: serde::Serialize + std::fmt::Debug>(&mut self, key: &str, value: T) {
        match serde_json::to_value(&value) {
            Ok(v) => {
                self.data.insert(key.to_string(), v);
            }
            Err(e) => {
                tracing::warn!(
                    key,
                    error = %e,
                    "session value is not json-encodable, storing its debug string"
                );
                self.data
                    .insert(key.to_string(), Value::String(format!("{value:?}")));
            }
        }
    }

    pub fn register_enricher(
        &mut self,
        enricher: impl Fn(&mut Map<String, Value>) + Send + Sync + 'static,
    ) {
        self.enrichers.push(Box::new(enricher));
    }

    fn to_blob(&self) -> String {
        let mut data = self.data.clone();
        for enricher in &self.enrichers {
            enricher(&mut data);
        }
        Value::Object(data).to_string()
    }

    pub fn save(&self) -> AppResult<()> {
        let conn = open_db(&self.location())?;
        insert_run(
            &conn,
            &RunRecord {
                id: self.session_id.clone(),
                blob: self.to_blob(),
            },
        )?;
        drop(conn);

        let Some(remote_location) = self.remote_location.as_deref() else {
            return Ok(());
        };
        match Synchronizer::new(&self.working_dir, Some(remote_location)) {
            Ok(synchronizer) => {
                synchronizer.sync()?;
            }
            Err(e) => {
                tracing::warn!(
                    code = %e.code,
                    error = %e.message,
                    remote = remote_location,
                    "remote location is not usable, skipping sync"
                );
            }
        }
        Ok(())
    }
}

/// Adds the current branch under the `git` metadata key. Leaves the
/// metadata unmodified when the key is absent, not an object, or git state
/// is unavailable.
pub fn enrich_git_branch(data: &mut Map<String, Value>) {
    let Some(Value::Object(git)) = data.get_mut("git") else {
        return;
    };
    match current_git_branch() {
        Some(branch) => {
            git.insert("branch".to_string(), Value::String(branch));
        }
        None => {
            tracing::debug!("git branch unavailable, leaving git metadata unmodified");
        }
    }
}

fn current_git_branch() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if branch.is_empty() {
        return None;
    }
    Some(branch)
}
