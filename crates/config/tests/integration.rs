//! Integration tests for config

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;
    use warden_config::*;

    // Mutex to ensure env var tests don't run concurrently
    static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        std::env::remove_var(constants::ENV_WORKER_THREADS);
        std::env::remove_var(constants::ENV_INLINE_BLOCK_WARNING_MS);
        std::env::remove_var(constants::ENV_PROGRESS_COALESCE);
        std::env::remove_var(constants::ENV_LOG);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[scheduler]
worker_threads = 6
thread_name = "gdal-worker"

[locking]
inline_block_warning_ms = 250

[progress]
coalesce = false

[logging]
filter = "warn"
json = true
        "#
        )
        .unwrap();

        let config = Config::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.scheduler.worker_threads, 6);
        assert_eq!(config.scheduler.thread_name, "gdal-worker");
        assert_eq!(config.locking.inline_block_warning_ms, 250);
        assert_eq!(
            config.locking.inline_block_warning(),
            std::time::Duration::from_millis(250)
        );
        assert!(!config.progress.coalesce);
        assert_eq!(config.logging.filter, "warn");
        assert!(config.logging.json);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml("[locking]\ninline_block_warning_ms = 10\n").unwrap();
        assert_eq!(config.locking.inline_block_warning_ms, 10);
        assert_eq!(config.scheduler.worker_threads, 0);
        assert_eq!(config.scheduler.thread_name, constants::DEFAULT_THREAD_NAME);
        assert!(config.progress.coalesce);
        assert_eq!(config.logging.filter, constants::DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_invalid_toml() {
        let result = Config::from_toml("[scheduler\nworker_threads = ");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load_from_file(std::path::Path::new("/nonexistent/warden.toml"));
        assert!(matches!(
            result,
            Err(warden_errors::Error::Config(
                warden_errors::ConfigError::NotFound { .. }
            ))
        ));
    }

    #[test]
    fn test_merge_env() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        clear_env();

        std::env::set_var(constants::ENV_WORKER_THREADS, "3");
        std::env::set_var(constants::ENV_INLINE_BLOCK_WARNING_MS, "5");
        std::env::set_var(constants::ENV_PROGRESS_COALESCE, "no");
        std::env::set_var(constants::ENV_LOG, "trace");

        let mut config = Config::default();
        config.merge_env().unwrap();

        assert_eq!(config.scheduler.worker_threads, 3);
        assert_eq!(config.worker_threads(), 3);
        assert_eq!(config.locking.inline_block_warning_ms, 5);
        assert!(!config.progress.coalesce);
        assert_eq!(config.logging.filter, "trace");

        clear_env();
    }

    #[test]
    fn test_invalid_env_value() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        clear_env();

        std::env::set_var(constants::ENV_WORKER_THREADS, "lots");

        let mut config = Config::default();
        let result = config.merge_env();
        assert!(result.is_err());

        clear_env();
    }

    #[test]
    fn test_calculate_worker_threads() {
        assert_eq!(calculate_worker_threads(4), 4);
        assert!(calculate_worker_threads(0) >= 1);
    }
}
