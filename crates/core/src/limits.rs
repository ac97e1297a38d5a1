//! Defaults and caps shared across the workspace (§6, §9)

/// Default cap on fixed-width Unicode fields (`U{N}`) absent explicit config.
pub const DEFAULT_MAX_UNICODE: usize = 256;

/// Default quantization scale applied to a REAL key when the dataset's
/// `quantization` map has no entry for it (§4.2).
pub const DEFAULT_QUANTIZATION_SCALE: f64 = 1e3;

/// Row-chunk size used while hashing/writing part data (§4.3).
pub const MAX_HASH_CHUNK_BYTES: usize = 16 * 1024 * 1024;

/// Default age after which an unclaimed staging claim is considered stale
/// and eligible for `reclaim_stale` (§4.7).
pub const DEFAULT_STALE_CLAIM_AGE_SECS: i64 = 30 * 60;

/// Default age after which a leftover `*.part.tmp` file is removed on the
/// next publish to the same directory (§4.4, §5).
pub const DEFAULT_TMP_CLEANUP_AGE_SECS: i64 = 24 * 60 * 60;

/// Default SQLite busy timeout (§4.5).
pub const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5_000;

/// Initial backoff for immediate-transaction retries (§4.5, §9).
pub const RETRY_INITIAL_BACKOFF_MS: u64 = 20;

/// Upper bound on immediate-transaction retry attempts before giving up.
pub const RETRY_MAX_ATTEMPTS: u32 = 8;

/// `select_and_claim_prefix` reads at most this multiple of `part_rows`
/// unclaimed rows before building its prefix (§4.7).
pub const CLAIM_SCAN_MULTIPLE: i64 = 8;

/// Upper bound on the number of distinct subsets a single `hot_subsets`
/// sweep considers at once during a crash-safe `flush()` (§4.7, §4.8).
pub const DEFAULT_HOT_SWEEP_LIMIT: i64 = 1024;
