use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "wsmitm", version, about = "MITM relay for JSON-over-WebSocket traffic")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml", env = "WSMITM_CONFIG")]
    pub config: PathBuf,

    /// Listen address (overrides config file setting)
    #[arg(long, env = "WSMITM_LISTEN")]
    pub listen: Option<String>,

    /// Upstream WebSocket URL (overrides config file setting)
    #[arg(long, env = "WSMITM_UPSTREAM")]
    pub upstream: Option<String>,

    /// Forward proxy URL; enables proxying the upstream dial
    #[arg(long, env = "WSMITM_PROXY")]
    pub proxy: Option<String>,

    /// Event log path (overrides config file setting)
    #[arg(long, env = "WSMITM_EVENT_LOG")]
    pub event_log: Option<PathBuf>,
}
