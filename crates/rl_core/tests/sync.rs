use rl_core::db::open_db;
use rl_core::store::{all_runs, insert_run, run_count, RunRecord, SESSION_DB_FILE};
use rl_core::sync::Synchronizer;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn make_peer_db(path: &Path, ids: &[&str]) {
    let conn = open_db(path).expect("open peer db");
    for id in ids {
        insert_run(
            &conn,
            &RunRecord {
                id: id.to_string(),
                blob: format!("{{\"session\":\"{id}\"}}"),
            },
        )
        .expect("insert peer run");
    }
}

fn local_ids(work: &Path) -> BTreeSet<String> {
    let conn = open_db(&work.join(SESSION_DB_FILE)).expect("open local db");
    all_runs(&conn)
        .expect("all runs")
        .into_iter()
        .map(|r| r.id)
        .collect()
}

fn leftover_db_files(work: &Path) -> Vec<String> {
    std::fs::read_dir(work)
        .expect("read work dir")
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name != SESSION_DB_FILE)
        .filter(|name| name.ends_with(".db") || name.ends_with(".part"))
        .collect()
}

#[test]
fn sync_without_remote_is_a_noop() {
    let root = tempfile::tempdir().expect("tempdir").keep();
    let work = root.join("work");
    std::fs::create_dir_all(&work).expect("mkdir work");

    let synchronizer = Synchronizer::new(&work, None).expect("synchronizer");
    let report = synchronizer.sync().expect("sync");

    assert_eq!(report.peers_listed, 0);
    assert_eq!(report.runs_merged, 0);
    assert!(!report.uploaded);
    assert!(!work.join(SESSION_DB_FILE).exists());
}

#[test]
fn sync_rejects_unsupported_remote_scheme() {
    let root = tempfile::tempdir().expect("tempdir").keep();
    let err = Synchronizer::new(&root, Some("ftp://host/share")).expect_err("expected parse error");
    assert_eq!(err.code, "RL_REMOTE_LOCATION_UNSUPPORTED");
}

#[test]
fn sync_merges_disjoint_peers_and_uploads() {
    let _guard = env_lock().lock().expect("env lock");
    std::env::set_var("RUNLOG_STORE_USERNAME", "tester");

    let root = tempfile::tempdir().expect("tempdir").keep();
    let work = root.join("work");
    let remote = root.join("remote");
    std::fs::create_dir_all(&work).expect("mkdir work");
    make_peer_db(&remote.join("alice.db"), &["run-1"]);
    make_peer_db(&remote.join("bob.db"), &["run-2"]);
    make_peer_db(&remote.join("carol.db"), &["run-3"]);

    let synchronizer =
        Synchronizer::new(&work, Some(remote.to_string_lossy().as_ref())).expect("synchronizer");
    let report = synchronizer.sync().expect("sync");

    assert_eq!(report.peers_listed, 3);
    assert_eq!(report.peers_fetched, 3);
    assert_eq!(report.runs_merged, 3);
    assert_eq!(report.runs_duplicate, 0);
    assert_eq!(report.runs_failed, 0);
    assert!(report.uploaded);

    let ids = local_ids(&work);
    assert_eq!(
        ids,
        ["run-1", "run-2", "run-3"]
            .into_iter()
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
    );
    assert!(leftover_db_files(&work).is_empty(), "transient peer files remain");
    assert!(remote.join("tester.db").exists());

    std::env::remove_var("RUNLOG_STORE_USERNAME");
}

#[test]
fn sync_skips_records_already_seen_in_other_peers() {
    let _guard = env_lock().lock().expect("env lock");
    std::env::set_var("RUNLOG_STORE_USERNAME", "tester");

    let root = tempfile::tempdir().expect("tempdir").keep();
    let work = root.join("work");
    let remote = root.join("remote");
    std::fs::create_dir_all(&work).expect("mkdir work");
    make_peer_db(&remote.join("alice.db"), &["run-1"]);
    make_peer_db(&remote.join("bob.db"), &["run-2"]);
    make_peer_db(&remote.join("carol.db"), &["run-3"]);
    make_peer_db(&remote.join("dave.db"), &["run-3"]);

    let synchronizer =
        Synchronizer::new(&work, Some(remote.to_string_lossy().as_ref())).expect("synchronizer");
    let report = synchronizer.sync().expect("sync");

    assert_eq!(report.peers_fetched, 4);
    assert_eq!(report.runs_merged, 3);
    assert_eq!(report.runs_duplicate, 1);

    let conn = open_db(&work.join(SESSION_DB_FILE)).expect("open local db");
    assert_eq!(run_count(&conn).expect("count"), 3);

    std::env::remove_var("RUNLOG_STORE_USERNAME");
}

#[test]
fn sync_twice_with_same_remote_state_is_idempotent() {
    let _guard = env_lock().lock().expect("env lock");
    std::env::set_var("RUNLOG_STORE_USERNAME", "tester");

    let root = tempfile::tempdir().expect("tempdir").keep();
    let work = root.join("work");
    let remote = root.join("remote");
    std::fs::create_dir_all(&work).expect("mkdir work");
    make_peer_db(&remote.join("alice.db"), &["run-1"]);
    make_peer_db(&remote.join("bob.db"), &["run-2"]);

    let synchronizer =
        Synchronizer::new(&work, Some(remote.to_string_lossy().as_ref())).expect("synchronizer");
    synchronizer.sync().expect("first sync");
    let second = synchronizer.sync().expect("second sync");

    assert_eq!(second.runs_merged, 0);
    assert_eq!(local_ids(&work).len(), 2);
    assert!(leftover_db_files(&work).is_empty());

    std::env::remove_var("RUNLOG_STORE_USERNAME");
}

#[test]
fn listing_failure_degrades_to_local_noop() {
    let root = tempfile::tempdir().expect("tempdir").keep();
    let work = root.join("work");
    std::fs::create_dir_all(&work).expect("mkdir work");
    let missing_remote = root.join("remote-that-does-not-exist");

    let synchronizer = Synchronizer::new(&work, Some(missing_remote.to_string_lossy().as_ref()))
        .expect("synchronizer");
    let report = synchronizer.sync().expect("sync");

    assert_eq!(report.peers_listed, 0);
    assert_eq!(report.runs_merged, 0);
    assert!(!report.uploaded);
    assert!(!work.join(SESSION_DB_FILE).exists());
}

#[test]
fn corrupt_peer_does_not_block_healthy_peers() {
    let root = tempfile::tempdir().expect("tempdir").keep();
    let work = root.join("work");
    let remote = root.join("remote");
    std::fs::create_dir_all(&work).expect("mkdir work");
    make_peer_db(&remote.join("alice.db"), &["run-1"]);
    std::fs::write(remote.join("broken.db"), b"this is not a sqlite database")
        .expect("write corrupt peer");

    let synchronizer =
        Synchronizer::new(&work, Some(remote.to_string_lossy().as_ref())).expect("synchronizer");
    let report = synchronizer.sync().expect("sync");

    assert_eq!(report.peers_fetched, 2);
    assert_eq!(report.runs_merged, 1);
    assert_eq!(local_ids(&work), BTreeSet::from(["run-1".to_string()]));
    assert!(leftover_db_files(&work).is_empty(), "transient peer files remain");
}

#[test]
fn upload_failure_is_contained() {
    let root = tempfile::tempdir().expect("tempdir").keep();
    let work = root.join("work");
    std::fs::create_dir_all(&work).expect("mkdir work");
    // A regular file as the remote location makes every remote call fail.
    let remote = root.join("remote-is-a-file");
    std::fs::write(&remote, b"blocker").expect("write blocker");

    let conn = open_db(&work.join(SESSION_DB_FILE)).expect("open local db");
    insert_run(
        &conn,
        &RunRecord {
            id: "run-local".to_string(),
            blob: "{}".to_string(),
        },
    )
    .expect("insert local run");
    drop(conn);

    let synchronizer =
        Synchronizer::new(&work, Some(remote.to_string_lossy().as_ref())).expect("synchronizer");
    let report = synchronizer.sync().expect("sync");

    assert!(!report.uploaded);
    assert_eq!(local_ids(&work), BTreeSet::from(["run-local".to_string()]));
}

#[test]
fn sync_via_emulated_s3_round_trips() {
    let _guard = env_lock().lock().expect("env lock");
    let root = tempfile::tempdir().expect("tempdir").keep();
    let work = root.join("work");
    let emulated_s3 = root.join("emulated-s3");
    std::fs::create_dir_all(&work).expect("mkdir work");
    std::env::set_var(
        "RUNLOG_S3_EMULATE_ROOT",
        emulated_s3.to_string_lossy().as_ref(),
    );
    std::env::set_var("RUNLOG_STORE_USERNAME", "tester");

    make_peer_db(&emulated_s3.join("demo-bucket/runlog/alice.db"), &["run-1"]);

    let synchronizer =
        Synchronizer::new(&work, Some("s3://demo-bucket/runlog")).expect("synchronizer");
    let report = synchronizer.sync().expect("sync");

    assert_eq!(report.peers_fetched, 1);
    assert_eq!(report.runs_merged, 1);
    assert!(report.uploaded);
    assert_eq!(local_ids(&work), BTreeSet::from(["run-1".to_string()]));

    let uploaded = emulated_s3.join("demo-bucket/runlog/tester.db");
    assert!(uploaded.exists());
    let conn = open_db(&uploaded).expect("open uploaded copy");
    assert_eq!(run_count(&conn).expect("count"), 1);

    std::env::remove_var("RUNLOG_STORE_USERNAME");
    std::env::remove_var("RUNLOG_S3_EMULATE_ROOT");
}
