use clap::Parser;
use std::path::PathBuf;

/// Concierge - conversational agent orchestrator
#[derive(Parser, Debug, Clone)]
#[command(name = "concierge", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "CONCIERGE_CONFIG", default_value = "concierge.toml")]
    pub config: PathBuf,

    /// Server host address
    #[arg(long, env = "CONCIERGE_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(long, env = "CONCIERGE_PORT")]
    pub port: Option<u16>,

    /// LLM model identifier
    #[arg(long, env = "CONCIERGE_MODEL")]
    pub model: Option<String>,

    /// Base URL for an OpenAI-compatible endpoint
    #[arg(long, env = "CONCIERGE_LLM_BASE_URL")]
    pub llm_base_url: Option<String>,

    /// Directory for pool persistence (disables persistence when unset)
    #[arg(long, env = "CONCIERGE_POOL_DIR")]
    pub pool_dir: Option<PathBuf>,
}
