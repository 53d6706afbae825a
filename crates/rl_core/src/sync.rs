use crate::app_error::{AppError, AppResult};
use crate::db::open_db;
use crate::identity::{remote_db_name, store_identity};
use crate::store::{all_runs, insert_run, RUN_DUPLICATE, SESSION_DB_FILE};
use crate::transport::{transport_for, RemoteLocation, RemoteTransport};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReportV1 {
    pub peers_listed: usize,
    pub peers_fetched: usize,
    pub runs_merged: usize,
    pub runs_duplicate: usize,
    pub runs_failed: usize,
    pub uploaded: bool,
}

pub struct Synchronizer {
    working_dir: PathBuf,
    identity: String,
    remote: Option<Box<dyn RemoteTransport>>,
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("working_dir", &self.working_dir)
            .field("identity", &self.identity)
            .field("remote", &self.remote.as_ref().map(|r| r.location()))
            .finish()
    }
}

impl Synchronizer {
    pub fn new(working_dir: &Path, remote_location: Option<&str>) -> AppResult<Self> {
        let remote = match remote_location {
            Some(raw) => Some(transport_for(&RemoteLocation::parse(raw)?)),
            None => None,
        };
        Ok(Self {
            working_dir: working_dir.to_path_buf(),
            identity: store_identity(),
            remote,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn local_db_path(&self) -> PathBuf {
        self.working_dir.join(SESSION_DB_FILE)
    }

    /// One full download -> merge -> upload cycle. Without a configured
    /// remote this is a no-op. Only local-store open failures escape; every
    /// remote or per-record failure is logged and contained.
    pub fn sync(&self) -> AppResult<SyncReportV1> {
        let mut report = SyncReportV1::default();
        let Some(remote) = self.remote.as_deref() else {
            return Ok(report);
        };

        let downloaded = self.download(remote, &mut report);
        self.merge(&downloaded, &mut report)?;
        self.upload(remote, &mut report);
        Ok(report)
    }

    fn download(&self, remote: &dyn RemoteTransport, report: &mut SyncReportV1) -> Vec<PathBuf> {
        let names = match remote.list_db_objects() {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(
                    code = %e.code,
                    error = %e.message,
                    remote = %remote.location().display(),
                    "listing remote databases failed, skipping download phase"
                );
                return Vec::new();
            }
        };
        report.peers_listed = names.len();

        let mut fetched = Vec::new();
        for name in names {
            if name == SESSION_DB_FILE {
                tracing::warn!(
                    peer = %name,
                    "remote object collides with the local store file name, skipping"
                );
                continue;
            }
            let dest = self.working_dir.join(&name);
            match remote.fetch(&name, &dest) {
                Ok(()) => fetched.push(dest),
                Err(e) => {
                    tracing::warn!(
                        peer = %name,
                        code = %e.code,
                        error = %e.message,
                        "failed downloading peer database, continuing with remaining peers"
                    );
                }
            }
        }
        report.peers_fetched = fetched.len();
        fetched
    }

    fn merge(&self, peers: &[PathBuf], report: &mut SyncReportV1) -> AppResult<()> {
        if peers.is_empty() {
            return Ok(());
        }

        let conn = match open_db(&self.local_db_path()) {
            Ok(conn) => conn,
            Err(e) => {
                // Peer files are disposable copies, never keep them around.
                remove_peer_files(peers);
                return Err(e);
            }
        };

        for peer in peers {
            if let Err(e) = merge_peer_file(&conn, peer, report) {
                tracing::warn!(
                    peer = %peer.display(),
                    code = %e.code,
                    error = %e.message,
                    "failed merging peer database, continuing with remaining peers"
                );
            }
            if let Err(e) = fs::remove_file(peer) {
                tracing::warn!(
                    peer = %peer.display(),
                    error = %e,
                    "failed deleting transient peer database"
                );
            }
        }
        Ok(())
    }

    fn upload(&self, remote: &dyn RemoteTransport, report: &mut SyncReportV1) {
        let src = self.local_db_path();
        if !src.exists() {
            tracing::debug!("local store has not been created yet, nothing to upload");
            return;
        }
        match remote.put(&src, &remote_db_name(&self.identity)) {
            Ok(()) => report.uploaded = true,
            Err(e) => {
                tracing::warn!(
                    code = %e.code,
                    error = %e.message,
                    remote = %remote.location().display(),
                    "uploading local database failed"
                );
            }
        }
    }
}

fn merge_peer_file(conn: &Connection, peer: &Path, report: &mut SyncReportV1) -> AppResult<()> {
    let peer_conn =
        Connection::open_with_flags(peer, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(|e| {
            AppError::new(
                "RL_PEER_DB_INVALID",
                "sync",
                "failed to open peer database",
                false,
                serde_json::json!({ "error": e.to_string(), "path": peer }),
            )
        })?;

    let runs = all_runs(&peer_conn)?;
    for run in runs {
        match insert_run(conn, &run) {
            Ok(()) => report.runs_merged += 1,
            Err(e) if e.code == RUN_DUPLICATE => {
                report.runs_duplicate += 1;
                tracing::debug!(run_id = %run.id, "run already present, skipping");
            }
            Err(e) => {
                report.runs_failed += 1;
                tracing::warn!(
                    run_id = %run.id,
                    code = %e.code,
                    error = %e.message,
                    "failed inserting run from peer database"
                );
            }
        }
    }
    Ok(())
}

fn remove_peer_files(peers: &[PathBuf]) {
    for peer in peers {
        if let Err(e) = fs::remove_file(peer) {
            tracing::warn!(
                peer = %peer.display(),
                error = %e,
                "failed deleting transient peer database"
            );
        }
    }
}
