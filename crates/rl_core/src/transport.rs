use crate::app_error::{AppError, AppResult};
use crate::transport_s3::S3RemoteTransport;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DB_EXTENSION: &str = "db";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteLocation {
    FilePath { path: String },
    S3 { bucket: String, prefix: String },
}

impl RemoteLocation {
    pub fn parse(raw: &str) -> AppResult<Self> {
        if raw.trim().is_empty() {
            return Err(AppError::new(
                "RL_REMOTE_LOCATION_INVALID",
                "transport",
                "remote location is required",
                false,
                serde_json::json!({ "location": raw }),
            ));
        }

        if let Some(rest) = raw.strip_prefix("s3://") {
            let mut parts = rest.splitn(2, '/');
            let bucket = parts.next().unwrap_or_default().trim();
            let prefix = parts.next().unwrap_or_default().trim_matches('/');
            if bucket.is_empty() {
                return Err(AppError::new(
                    "RL_REMOTE_LOCATION_INVALID",
                    "transport",
                    "s3 location missing bucket",
                    false,
                    serde_json::json!({ "location": raw }),
                ));
            }
            return Ok(RemoteLocation::S3 {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
            });
        }

        if let Some(rest) = raw.strip_prefix("file://") {
            if rest.trim().is_empty() {
                return Err(AppError::new(
                    "RL_REMOTE_LOCATION_INVALID",
                    "transport",
                    "file location missing path",
                    false,
                    serde_json::json!({ "location": raw }),
                ));
            }
            return Ok(RemoteLocation::FilePath {
                path: rest.to_string(),
            });
        }

        if raw.contains("://") {
            return Err(AppError::new(
                "RL_REMOTE_LOCATION_UNSUPPORTED",
                "transport",
                "unsupported remote location scheme",
                false,
                serde_json::json!({ "location": raw }),
            ));
        }

        Ok(RemoteLocation::FilePath {
            path: raw.to_string(),
        })
    }

    pub fn display(&self) -> String {
        match self {
            RemoteLocation::FilePath { path } => path.clone(),
            RemoteLocation::S3 { bucket, prefix } => {
                if prefix.is_empty() {
                    format!("s3://{}", bucket)
                } else {
                    format!("s3://{}/{}", bucket, prefix)
                }
            }
        }
    }
}

pub trait RemoteTransport: Send + Sync {
    fn location(&self) -> RemoteLocation;

    /// Base names of the `*.db` objects currently published at the location.
    fn list_db_objects(&self) -> AppResult<Vec<String>>;

    /// Complete-or-absent copy of one remote object to `dest`.
    fn fetch(&self, name: &str, dest: &Path) -> AppResult<()>;

    fn put(&self, src: &Path, name: &str) -> AppResult<()>;
}

pub fn transport_for(location: &RemoteLocation) -> Box<dyn RemoteTransport> {
    match location {
        RemoteLocation::FilePath { path } => Box::new(FsRemoteTransport::new(Path::new(path))),
        RemoteLocation::S3 { bucket, prefix } => {
            Box::new(S3RemoteTransport::new(bucket.clone(), prefix.clone()))
        }
    }
}

pub(crate) fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

pub(crate) fn commit_part(part: &Path, dest: &Path) -> AppResult<()> {
    fs::rename(part, dest).map_err(|e| {
        let _ = fs::remove_file(part);
        AppError::new(
            "RL_REMOTE_UNAVAILABLE",
            "transport",
            "failed to move downloaded object into place",
            true,
            serde_json::json!({ "error": e.to_string(), "from": part, "to": dest }),
        )
    })
}

#[derive(Debug, Clone)]
pub struct FsRemoteTransport {
    pub root: PathBuf,
}

impl FsRemoteTransport {
    pub fn new(path: &Path) -> Self {
        Self {
            root: path.to_path_buf(),
        }
    }
}

impl RemoteTransport for FsRemoteTransport {
    fn location(&self) -> RemoteLocation {
        RemoteLocation::FilePath {
            path: self.root.display().to_string(),
        }
    }

    fn list_db_objects(&self) -> AppResult<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            AppError::new(
                "RL_REMOTE_UNAVAILABLE",
                "transport",
                "failed to list remote directory",
                true,
                serde_json::json!({ "error": e.to_string(), "path": self.root }),
            )
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                AppError::new(
                    "RL_REMOTE_UNAVAILABLE",
                    "transport",
                    "failed to read remote directory entry",
                    true,
                    serde_json::json!({ "error": e.to_string(), "path": self.root }),
                )
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(DB_EXTENSION) {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn fetch(&self, name: &str, dest: &Path) -> AppResult<()> {
        let src = self.root.join(name);
        let part = part_path(dest);
        if let Err(e) = fs::copy(&src, &part) {
            let _ = fs::remove_file(&part);
            return Err(AppError::new(
                "RL_REMOTE_UNAVAILABLE",
                "transport",
                "failed to copy remote object",
                true,
                serde_json::json!({ "error": e.to_string(), "from": src, "to": part }),
            ));
        }
        commit_part(&part, dest)
    }

    fn put(&self, src: &Path, name: &str) -> AppResult<()> {
        fs::create_dir_all(&self.root).map_err(|e| {
            AppError::new(
                "RL_REMOTE_UNAVAILABLE",
                "transport",
                "failed to create remote directory",
                true,
                serde_json::json!({ "error": e.to_string(), "path": self.root }),
            )
        })?;
        fs::copy(src, self.root.join(name)).map_err(|e| {
            AppError::new(
                "RL_REMOTE_UNAVAILABLE",
                "transport",
                "failed to upload local database",
                true,
                serde_json::json!({ "error": e.to_string(), "from": src, "name": name }),
            )
        })?;
        Ok(())
    }
}
