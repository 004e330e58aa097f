// Common utilities for integration tests

mod test_harness;

// Re-export test utilities for convenience in integration tests
#[allow(unused_imports)]
pub use lightgate::test_utils::{ChainBuilder, MockNode, TestConfigBuilder};

pub use test_harness::GatewayTestHarness;
