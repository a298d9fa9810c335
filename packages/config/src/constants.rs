// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used by the execution engine

// Sandbox Limits
pub const HACKLENS_EXEC_TIMEOUT_SECS: &str = "HACKLENS_EXEC_TIMEOUT_SECS";
pub const HACKLENS_EXEC_MEMORY_MB: &str = "HACKLENS_EXEC_MEMORY_MB";
pub const HACKLENS_EXEC_CPU_CORES: &str = "HACKLENS_EXEC_CPU_CORES";
pub const HACKLENS_EXEC_PIDS_LIMIT: &str = "HACKLENS_EXEC_PIDS_LIMIT";
pub const HACKLENS_EXEC_WORKDIR: &str = "HACKLENS_EXEC_WORKDIR";

// Admission & Concurrency
pub const HACKLENS_EXEC_MAX_CONCURRENT: &str = "HACKLENS_EXEC_MAX_CONCURRENT";
pub const HACKLENS_EXEC_QUEUE_TIMEOUT_SECS: &str = "HACKLENS_EXEC_QUEUE_TIMEOUT_SECS";

// Request & Output Bounds
pub const HACKLENS_EXEC_MAX_OUTPUT_BYTES: &str = "HACKLENS_EXEC_MAX_OUTPUT_BYTES";
pub const HACKLENS_EXEC_MAX_SOURCE_BYTES: &str = "HACKLENS_EXEC_MAX_SOURCE_BYTES";

// Image Handling
pub const HACKLENS_EXEC_PULL_POLICY: &str = "HACKLENS_EXEC_PULL_POLICY";
pub const HACKLENS_EXEC_PULL_TIMEOUT_SECS: &str = "HACKLENS_EXEC_PULL_TIMEOUT_SECS";

// Cleanup
pub const HACKLENS_EXEC_TEARDOWN_TIMEOUT_SECS: &str = "HACKLENS_EXEC_TEARDOWN_TIMEOUT_SECS";

// Docker Engine (read by bollard's connect_with_defaults)
pub const DOCKER_HOST: &str = "DOCKER_HOST";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";

/// Every engine variable, in the order the CLI prints them.
pub const ALL_EXEC_VARS: &[&str] = &[
    HACKLENS_EXEC_TIMEOUT_SECS,
    HACKLENS_EXEC_MEMORY_MB,
    HACKLENS_EXEC_CPU_CORES,
    HACKLENS_EXEC_PIDS_LIMIT,
    HACKLENS_EXEC_WORKDIR,
    HACKLENS_EXEC_MAX_CONCURRENT,
    HACKLENS_EXEC_QUEUE_TIMEOUT_SECS,
    HACKLENS_EXEC_MAX_OUTPUT_BYTES,
    HACKLENS_EXEC_MAX_SOURCE_BYTES,
    HACKLENS_EXEC_PULL_POLICY,
    HACKLENS_EXEC_PULL_TIMEOUT_SECS,
    HACKLENS_EXEC_TEARDOWN_TIMEOUT_SECS,
];
