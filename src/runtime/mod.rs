pub mod block_cache;
pub mod cache_store;
pub mod clock;
pub mod ingestor;
pub mod reader;
