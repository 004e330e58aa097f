pub mod config;
pub mod core;
pub mod node_rpc;
pub mod runtime;
pub mod server;

// Chain builder, mock node and config builder shared by unit and
// integration tests.
pub mod test_utils;
