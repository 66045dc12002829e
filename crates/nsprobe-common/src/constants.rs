//! System-wide constants and default values.
//!
//! The timing and sizing defaults seed
//! [`NsprobeConfig::default`](crate::config::NsprobeConfig).

/// Interval between readiness checks on the result channel, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Maximum number of bytes moved per pipe read or write.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Budget for the read header (error code and payload size), in milliseconds.
pub const DEFAULT_READ_HEADER_TIMEOUT_MS: u64 = 20_000;

/// Budget for the read payload, in milliseconds.
pub const DEFAULT_READ_PAYLOAD_TIMEOUT_MS: u64 = 120_000;

/// Budget for the complete stat frame, in milliseconds.
pub const DEFAULT_STAT_TIMEOUT_MS: u64 = 30_000;

/// Ceiling for waiting on worker exit before it is killed, in milliseconds.
pub const DEFAULT_REAP_TIMEOUT_MS: u64 = 60_000;

/// Interval between non-blocking exit-status checks, in milliseconds.
pub const DEFAULT_REAP_INTERVAL_MS: u64 = 100;

/// Nanoseconds per second, used to pack and unpack file timestamps.
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Mount point of procfs on the host.
pub const PROC_ROOT: &str = "/proc";

/// Per-thread namespace directory used to identify the caller's namespaces.
pub const THREAD_SELF_NS_DIR: &str = "/proc/thread-self/ns";

/// Environment variable naming a prefix under which the host filesystem is mounted.
pub const HOSTFS_ENV: &str = "HOSTFS";

/// Environment variable holding a default namespace descriptor path.
pub const CONTAINER_MOUNT_ENV: &str = "CONTAINER_MOUNT";

/// Environment variable pointing at a JSON configuration file.
pub const CONFIG_ENV: &str = "NSPROBE_CONFIG";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "nsprobe";
