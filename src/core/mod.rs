pub mod block;
pub mod blockfetcher;
pub mod compact_size;
pub mod errors;
pub mod hash;
pub mod header;
pub mod transaction;
