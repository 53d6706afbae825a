use std::env;

pub const STORE_USERNAME_ENV: &str = "RUNLOG_STORE_USERNAME";

// Conventional OS user variables, in precedence order.
const USER_ENV_VARS: [&str; 4] = ["LOGNAME", "USER", "LNAME", "USERNAME"];

pub fn store_identity() -> String {
    if let Ok(name) = env::var(STORE_USERNAME_ENV) {
        if !name.trim().is_empty() {
            return name;
        }
    }
    for var in USER_ENV_VARS {
        if let Ok(name) = env::var(var) {
            if !name.trim().is_empty() {
                return name;
            }
        }
    }
    "unknown".to_string()
}

pub fn remote_db_name(identity: &str) -> String {
    format!("{identity}.db")
}
