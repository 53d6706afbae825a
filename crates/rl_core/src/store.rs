use crate::app_error::{AppError, AppResult};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

pub const SESSION_DB_FILE: &str = "session_store.db";

pub const RUN_DUPLICATE: &str = "RL_RUN_DUPLICATE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub blob: String,
}

pub fn insert_run(conn: &Connection, record: &RunRecord) -> AppResult<()> {
    conn.execute(
        "INSERT INTO runs (id, blob) VALUES (?1, ?2)",
        params![record.id, record.blob],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            AppError::new(
                RUN_DUPLICATE,
                "store",
                "run id already present",
                false,
                serde_json::json!({ "run_id": record.id }),
            )
        } else {
            AppError::new(
                "RL_STORE_WRITE_FAILED",
                "store",
                "failed to insert run record",
                false,
                serde_json::json!({ "error": e.to_string(), "run_id": record.id }),
            )
        }
    })?;
    Ok(())
}

pub fn all_runs(conn: &Connection) -> AppResult<Vec<RunRecord>> {
    let mut stmt = conn.prepare("SELECT id, blob FROM runs").map_err(|e| {
        AppError::new(
            "RL_STORE_READ_FAILED",
            "store",
            "failed to prepare runs query",
            false,
            serde_json::json!({ "error": e.to_string() }),
        )
    })?;

    let rows = stmt
        .query_map([], |row| {
            Ok(RunRecord {
                id: row.get(0)?,
                blob: row.get(1)?,
            })
        })
        .map_err(|e| {
            AppError::new(
                "RL_STORE_READ_FAILED",
                "store",
                "failed to query runs",
                false,
                serde_json::json!({ "error": e.to_string() }),
            )
        })?;

    let mut runs = Vec::new();
    for row in rows {
        runs.push(row.map_err(|e| {
            AppError::new(
                "RL_STORE_READ_FAILED",
                "store",
                "failed to decode run row",
                false,
                serde_json::json!({ "error": e.to_string() }),
            )
        })?);
    }
    Ok(runs)
}

pub fn run_count(conn: &Connection) -> AppResult<i64> {
    conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))
        .map_err(|e| {
            AppError::new(
                "RL_STORE_READ_FAILED",
                "store",
                "failed to count runs",
                false,
                serde_json::json!({ "error": e.to_string() }),
            )
        })
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
