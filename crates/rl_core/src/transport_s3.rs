use crate::app_error::{AppError, AppResult};
use crate::transport::{commit_part, part_path, RemoteLocation, RemoteTransport, DB_EXTENSION};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct S3RemoteTransport {
    pub bucket: String,
    pub prefix: String,
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub emulate_root: Option<PathBuf>,
}

impl S3RemoteTransport {
    pub fn new(bucket: String, prefix: String) -> Self {
        Self {
            bucket,
            prefix,
            endpoint_url: std::env::var("RUNLOG_S3_ENDPOINT").ok(),
            region: std::env::var("RUNLOG_S3_REGION").ok(),
            emulate_root: std::env::var("RUNLOG_S3_EMULATE_ROOT")
                .ok()
                .map(PathBuf::from),
        }
    }

    pub fn key_for(&self, leaf: &str) -> String {
        if self.prefix.is_empty() {
            leaf.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_matches('/'), leaf)
        }
    }

    fn emulated_dir(&self) -> Option<PathBuf> {
        self.emulate_root.as_ref().map(|root| {
            let mut p = root.join(&self.bucket);
            if !self.prefix.is_empty() {
                p = p.join(self.prefix.trim_matches('/'));
            }
            p
        })
    }

    fn classify_remote_error(message: &str) -> (&'static str, bool) {
        let lower = message.to_ascii_lowercase();
        if lower.contains("credential")
            || lower.contains("accessdenied")
            || lower.contains("signature")
            || lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("403")
        {
            ("RL_REMOTE_AUTH_FAILED", false)
        } else {
            ("RL_REMOTE_UNAVAILABLE", true)
        }
    }

    fn map_remote_error(&self, message: String, operation: &str, key: &str) -> AppError {
        let (code, retryable) = Self::classify_remote_error(&message);
        AppError::new(
            code,
            "transport",
            &format!("failed {operation} s3 object"),
            retryable,
            serde_json::json!({
                "error": message,
                "bucket": self.bucket,
                "key": key
            }),
        )
    }

    fn run_async<T>(&self, fut: impl std::future::Future<Output = AppResult<T>>) -> AppResult<T> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                AppError::new(
                    "RL_REMOTE_UNAVAILABLE",
                    "transport",
                    "failed creating async runtime for s3 transport",
                    true,
                    serde_json::json!({ "error": e.to_string() }),
                )
            })?;
        rt.block_on(fut)
    }

    async fn build_client(
        endpoint_url: Option<String>,
        region: Option<String>,
    ) -> AppResult<aws_sdk_s3::Client> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_sdk_s3::config::Region::new(region));
        }
        if let Some(endpoint) = endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let cfg = loader.load().await;
        Ok(aws_sdk_s3::Client::new(&cfg))
    }
}

impl RemoteTransport for S3RemoteTransport {
    fn location(&self) -> RemoteLocation {
        RemoteLocation::S3 {
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
        }
    }

    fn list_db_objects(&self) -> AppResult<Vec<String>> {
        if let Some(dir) = self.emulated_dir() {
            if !dir.exists() {
                return Ok(Vec::new());
            }
            let entries = fs::read_dir(&dir).map_err(|e| {
                AppError::new(
                    "RL_REMOTE_UNAVAILABLE",
                    "transport",
                    "failed to list emulated s3 prefix",
                    true,
                    serde_json::json!({ "error": e.to_string(), "path": dir }),
                )
            })?;
            let mut names = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some(DB_EXTENSION) {
                    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                        names.push(name.to_string());
                    }
                }
            }
            names.sort();
            return Ok(names);
        }

        let bucket = self.bucket.clone();
        let prefix = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix.trim_matches('/'))
        };
        let endpoint = self.endpoint_url.clone();
        let region = self.region.clone();
        let this = self.clone();
        self.run_async(async move {
            let client = Self::build_client(endpoint, region).await?;
            let mut names = Vec::new();
            let mut continuation: Option<String> = None;
            loop {
                let mut req = client.list_objects_v2().bucket(&bucket).prefix(&prefix);
                if let Some(token) = continuation.take() {
                    req = req.continuation_token(token);
                }
                let resp = req
                    .send()
                    .await
                    .map_err(|e| this.map_remote_error(e.to_string(), "listing", &prefix))?;
                for obj in resp.contents() {
                    let Some(key) = obj.key() else { continue };
                    if !key.ends_with(".db") {
                        continue;
                    }
                    let base = key.rsplit('/').next().unwrap_or(key);
                    names.push(base.to_string());
                }
                if resp.is_truncated().unwrap_or(false) {
                    continuation = resp.next_continuation_token().map(str::to_string);
                } else {
                    break;
                }
            }
            names.sort();
            Ok(names)
        })
    }

    fn fetch(&self, name: &str, dest: &Path) -> AppResult<()> {
        let part = part_path(dest);

        if let Some(dir) = self.emulated_dir() {
            let src = dir.join(name);
            if let Err(e) = fs::copy(&src, &part) {
                let _ = fs::remove_file(&part);
                return Err(AppError::new(
                    "RL_REMOTE_UNAVAILABLE",
                    "transport",
                    "failed to copy emulated s3 object",
                    true,
                    serde_json::json!({ "error": e.to_string(), "from": src, "to": part }),
                ));
            }
            return commit_part(&part, dest);
        }

        let bucket = self.bucket.clone();
        let key = self.key_for(name);
        let endpoint = self.endpoint_url.clone();
        let region = self.region.clone();
        let this = self.clone();
        let bytes = self.run_async(async move {
            let client = Self::build_client(endpoint, region).await?;
            let out = client
                .get_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| this.map_remote_error(e.to_string(), "reading", &key))?;
            let bytes = out.body.collect().await.map_err(|e| {
                this.map_remote_error(e.to_string(), "collecting response body for", &key)
            })?;
            Ok(bytes.into_bytes().to_vec())
        })?;

        if let Err(e) = fs::write(&part, &bytes) {
            let _ = fs::remove_file(&part);
            return Err(AppError::new(
                "RL_REMOTE_UNAVAILABLE",
                "transport",
                "failed to write downloaded object",
                true,
                serde_json::json!({ "error": e.to_string(), "path": part }),
            ));
        }
        commit_part(&part, dest)
    }

    fn put(&self, src: &Path, name: &str) -> AppResult<()> {
        let payload = fs::read(src).map_err(|e| {
            AppError::new(
                "RL_REMOTE_UNAVAILABLE",
                "transport",
                "failed to read local database for upload",
                true,
                serde_json::json!({ "error": e.to_string(), "path": src }),
            )
        })?;

        if let Some(dir) = self.emulated_dir() {
            fs::create_dir_all(&dir).map_err(|e| {
                AppError::new(
                    "RL_REMOTE_UNAVAILABLE",
                    "transport",
                    "failed to create emulated s3 prefix",
                    true,
                    serde_json::json!({ "error": e.to_string(), "path": dir }),
                )
            })?;
            fs::write(dir.join(name), &payload).map_err(|e| {
                AppError::new(
                    "RL_REMOTE_UNAVAILABLE",
                    "transport",
                    "failed to write emulated s3 object",
                    true,
                    serde_json::json!({ "error": e.to_string(), "path": dir.join(name) }),
                )
            })?;
            return Ok(());
        }

        let bucket = self.bucket.clone();
        let key = self.key_for(name);
        let endpoint = self.endpoint_url.clone();
        let region = self.region.clone();
        let this = self.clone();
        self.run_async(async move {
            let client = Self::build_client(endpoint, region).await?;
            client
                .put_object()
                .bucket(&bucket)
                .key(&key)
                .content_type("application/octet-stream")
                .body(payload.into())
                .send()
                .await
                .map_err(|e| this.map_remote_error(e.to_string(), "writing", &key))?;
            Ok(())
        })
    }
}
