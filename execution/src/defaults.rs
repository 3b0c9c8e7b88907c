//! Default configuration values.

/// Identity system phases and queries run as (`"app-manager"`).
pub const DEFAULT_RUNTIME_IDENTITY: &[u8] = b"app-manager";
pub const DEFAULT_MAX_BLOCK_TRANSACTIONS: usize = 5_000;
pub const DEFAULT_QUERY_GAS_LIMIT: u64 = 1_000_000;
pub const DEFAULT_LOG_LEVEL: &str = "info";
