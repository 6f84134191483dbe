//! System-wide constants and default paths.

/// Prefix for run temp directories created by the job runner.
pub const TEMP_DIR_PREFIX: &str = "hashdist-run-job-";

/// File-name prefix for side-channel log FIFOs inside the run temp dir.
pub const LOG_PIPE_PREFIX: &str = "logpipe-";

/// Chunk size for reads from child pipes and log FIFOs.
pub const LOG_PIPE_BUFSIZE: usize = 4096;

/// Cadence of the supervisor poll loop, in milliseconds.
pub const POLL_INTERVAL_MS: u16 = 50;

/// Separator for path-list environment variables (`HDIST_IMPORT_PATHS`,
/// `prepend_path`/`append_path` targets).
#[cfg(unix)]
pub const PATH_LIST_SEPARATOR: &str = ":";

/// Separator for path-list environment variables.
#[cfg(not(unix))]
pub const PATH_LIST_SEPARATOR: &str = ";";

/// Shell used for interactive debug sessions unless overridden.
pub const DEFAULT_DEBUG_SHELL: &str = "/bin/bash";

/// Application name used in CLI output.
pub const APP_NAME: &str = "hdist";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "hdist";
