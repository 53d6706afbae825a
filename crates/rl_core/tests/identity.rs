use rl_core::identity::{store_identity, STORE_USERNAME_ENV};
use std::sync::{Mutex, OnceLock};

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

#[test]
fn env_override_takes_precedence() {
    let _guard = env_lock().lock().expect("env lock");
    std::env::set_var(STORE_USERNAME_ENV, "override-user");
    assert_eq!(store_identity(), "override-user");
    std::env::remove_var(STORE_USERNAME_ENV);
}

#[test]
fn blank_override_falls_back_to_os_user() {
    let _guard = env_lock().lock().expect("env lock");
    let saved_logname = std::env::var("LOGNAME").ok();
    std::env::set_var(STORE_USERNAME_ENV, "   ");
    std::env::set_var("LOGNAME", "fallback-user");

    assert_eq!(store_identity(), "fallback-user");

    std::env::remove_var(STORE_USERNAME_ENV);
    match saved_logname {
        Some(value) => std::env::set_var("LOGNAME", value),
        None => std::env::remove_var("LOGNAME"),
    }
}

#[test]
fn identity_is_never_empty() {
    let _guard = env_lock().lock().expect("env lock");
    assert!(!store_identity().trim().is_empty());
}
