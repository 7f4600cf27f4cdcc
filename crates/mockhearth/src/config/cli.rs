use clap::Parser;

/// Command-line surface. Any flag left unset falls back to the value from
/// `--config` (if given), then to the built-in default (§6 Configuration).
#[derive(Debug, Parser)]
#[command(name = "mockhearth", about = "Programmable HTTP mock server")]
pub struct Args {
    /// Root directory of scenario YAML files.
    #[arg(long, env = "MOCKHEARTH_ROOT")]
    pub root: Option<String>,

    /// Optional YAML config file layered under the CLI flags.
    #[arg(long)]
    pub config: Option<String>,

    /// HTTP listen port.
    #[arg(long, env = "MOCKHEARTH_PORT")]
    pub port: Option<u16>,

    /// Capacity of the trace ring buffer.
    #[arg(long)]
    pub trace_capacity: Option<usize>,

    /// Default template engine applied when a scenario's `engine` is unset.
    #[arg(long)]
    pub default_engine: Option<String>,

    /// Rate-limiter entry TTL, in seconds.
    #[arg(long)]
    pub rate_limit_ttl_secs: Option<u64>,

    /// Watcher debounce window, in milliseconds.
    #[arg(long)]
    pub watch_debounce_ms: Option<u64>,

    /// Per-connection read timeout, in seconds.
    #[arg(long)]
    pub read_timeout_secs: Option<u64>,

    /// Per-connection write timeout, in seconds.
    #[arg(long)]
    pub write_timeout_secs: Option<u64>,

    /// Idle connection timeout, in seconds.
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,

    /// Grace period for in-flight requests to finish after a shutdown signal, in seconds.
    #[arg(long)]
    pub shutdown_timeout_secs: Option<u64>,

    /// Log level (trace|debug|info|warn|error).
    #[arg(long, env = "RUST_LOG")]
    pub log_level: Option<String>,
}
