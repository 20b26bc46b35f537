//! Fixed names used by the configuration layer

pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const DEFAULT_THREAD_NAME: &str = "warden-worker";
pub const DEFAULT_LOG_FILTER: &str = "info,warden=debug";

pub const ENV_WORKER_THREADS: &str = "WARDEN_WORKER_THREADS";
pub const ENV_INLINE_BLOCK_WARNING_MS: &str = "WARDEN_INLINE_BLOCK_WARNING_MS";
pub const ENV_PROGRESS_COALESCE: &str = "WARDEN_PROGRESS_COALESCE";
pub const ENV_LOG: &str = "WARDEN_LOG";
