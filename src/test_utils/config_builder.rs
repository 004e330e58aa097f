use crate::config::AppConfig;
use crate::runtime::ingestor::IngestPolicy;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Builder for test `AppConfig` instances backed by temporary directories
pub struct TestConfigBuilder {
    config: AppConfig,
    temp_dirs: Vec<TempDir>,
}

impl TestConfigBuilder {
    /// No durability, millisecond polling, everything else at its default
    pub fn new() -> Self {
        let config = AppConfig {
            node_rpc_url: "http://127.0.0.1:8232".to_string(), // Placeholder
            node_rpc_auth: None,
            db_path: None,
            cache_max_blocks: 100,
            start_height: Some(0),
            activation_upgrade_id: "76b809bb".to_string(),
            ingest: IngestPolicy {
                poll_interval: Duration::from_millis(1),
                retry_backoff_step: Duration::from_millis(1),
                ..IngestPolicy::default()
            },
            http_host: None,
            max_range_blocks: 100,
            log_filter: "debug".to_string(),
        };

        Self { config, temp_dirs: Vec::new() }
    }

    /// Point `db_path` at a fresh temporary directory
    pub fn with_store(mut self) -> Self {
        let path = self.create_temp_dir();
        self.config.db_path = Some(path);
        self
    }

    pub fn with_cache_max_blocks(mut self, max: usize) -> Self {
        self.config.cache_max_blocks = max;
        self
    }

    pub fn with_start_height(mut self, height: u32) -> Self {
        self.config.start_height = Some(height);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.ingest.max_retries = max_retries;
        self
    }

    pub fn with_reorg_limits(mut self, rollback_depth: u32, max_reorg_depth: u32) -> Self {
        self.config.ingest.rollback_depth = rollback_depth;
        self.config.ingest.max_reorg_depth = max_reorg_depth;
        self
    }

    /// Create a new temporary directory and return its path
    pub fn create_temp_dir(&mut self) -> PathBuf {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().to_path_buf();
        self.temp_dirs.push(temp_dir);
        path
    }

    /// Build and return the config along with temp directory handles
    /// The caller must keep the TempDir handles alive to prevent cleanup
    pub fn build(self) -> (AppConfig, Vec<TempDir>) {
        (self.config, self.temp_dirs)
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder_defaults() {
        let (config, temp_dirs) = TestConfigBuilder::new().build();

        assert!(config.db_path.is_none());
        assert_eq!(config.start_height, Some(0));
        assert_eq!(config.ingest.max_retries, 10);
        assert!(temp_dirs.is_empty());
    }

    #[test]
    fn test_store_dir_outlives_builder() {
        let (config, temp_dirs) =
            TestConfigBuilder::new().with_store().with_reorg_limits(3, 30).build();

        assert!(config.db_path.as_ref().unwrap().exists());
        assert_eq!(config.ingest.rollback_depth, 3);
        assert_eq!(temp_dirs.len(), 1);
    }
}
