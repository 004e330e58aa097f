use thiserror::Error;

/// Raised by the header codec and block-level validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("could not read {field}: truncated input")]
    TruncatedInput { field: &'static str },
    #[error("could not read {field}: non-canonical CompactSize prefix")]
    NonCanonicalCompactSize { field: &'static str },
    #[error("received overlong message ({extra} trailing bytes)")]
    OverlongMessage { extra: usize },
    #[error("received unexpected height block: wanted {expected}, got {actual}")]
    UnexpectedHeight { expected: u32, actual: u32 },
    #[error("unsupported transaction version {version} (group id {version_group_id:#010x})")]
    UnsupportedTransactionVersion { version: u32, version_group_id: u32 },
    #[error("could not decode transaction {index}: {reason}")]
    InvalidTransaction { index: usize, reason: String },
    #[error("coinbase does not commit to a block height")]
    MissingCoinbaseHeight,
}

/// A non-contiguous append. Only the ingestor writes the cache, so this always
/// means its own cursor bookkeeping is wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cache is not contiguous: expected height {expected}, got {actual}")]
pub struct ConsistencyError {
    pub expected: u32,
    pub actual: u32,
}

/// Failures talking to the node. All of these are retryable; "height not
/// available yet" is not an error and is reported as `Ok(None)` instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("node rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("node transport error: {0}")]
    Transport(String),
    #[error("invalid node response: {0}")]
    InvalidResponse(String),
}

/// Failure fetching a single height, at either the node or the block level.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("error requesting block: {0}")]
    Node(#[from] NodeError),
    #[error("error parsing block: {0}")]
    Decode(#[from] DecodeError),
}

/// Terminal conditions of the ingestion loop. Each one needs an operator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("unable to reach node after {retries} consecutive failures: {last_error}")]
    UnreachableNode { retries: u32, last_error: FetchError },
    #[error("cache add failed: {0}")]
    Consistency(#[from] ConsistencyError),
    #[error("reorg exceeded max of {max} blocks (rolled back {depth})")]
    ReorgDepthExceeded { depth: u32, max: u32 },
}

/// Errors surfaced to read-path callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("block requested is newer than latest block ({0})")]
    BeyondTip(u32),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}
