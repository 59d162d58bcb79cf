/// Default maximum message key length accepted by a consumer
pub const DEFAULT_MAX_KEY_BYTES: usize = 256;

/// Default maximum chunk length accepted by a consumer
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 64 * 1024;

/// Default chunk size used by a producer
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Buffer capacity for the read and write halves of a connection
pub const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Default delay between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

/// How long teardown waits for the outbound pump to flush
pub const PUMP_DRAIN_TIMEOUT_MS: u64 = 2000;
