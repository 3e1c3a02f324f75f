use std::env;
use std::str::FromStr;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Read an env var, treating empty values as unset.
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Parse an env var, logging and ignoring values that do not parse.
pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env_opt(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
