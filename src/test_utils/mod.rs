// Test utilities for lightgate integration testing

pub use tempfile::TempDir;

pub mod chain_builder;
pub mod config_builder;
pub mod mock_node;
pub mod sleeper;
pub mod tx_builder;

pub use chain_builder::{BuiltBlock, ChainBuilder};
pub use config_builder::TestConfigBuilder;
pub use mock_node::MockNode;
pub use sleeper::RecordingSleeper;
pub use tx_builder::TxBuilder;
