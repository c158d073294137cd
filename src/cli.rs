use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "srcdst")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Keep EC2 source/destination check disabled on every Kubernetes node", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Watch cluster nodes and disable source/destination check on each
    Run(RunArgs),

    /// Resolve node provider IDs to EC2 instance IDs (offline)
    Resolve(ResolveArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Run
// ============================================================================

#[derive(Args)]
pub struct RunArgs {
    /// AWS region (defaults to the AWS provider chain, e.g. instance metadata)
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Seconds between full re-deliveries of every known node
    #[arg(long, env = "SRCDST_RESYNC_SECS", default_value = "60",
          value_parser = clap::value_parser!(u64).range(1..))]
    pub resync_secs: u64,

    /// Attempts for writing the node annotation on transient API errors
    #[arg(long, env = "SRCDST_PERSIST_ATTEMPTS", default_value = "3",
          value_parser = clap::value_parser!(u32).range(1..))]
    pub persist_attempts: u32,

    /// Base backoff between annotation write attempts, in milliseconds
    #[arg(long, env = "SRCDST_PERSIST_BACKOFF_MS", default_value = "500")]
    pub persist_backoff_ms: u64,

    /// Timeout for a single EC2 API operation, in seconds
    #[arg(long, env = "SRCDST_API_TIMEOUT_SECS", default_value = "30",
          value_parser = clap::value_parser!(u64).range(1..))]
    pub api_timeout_secs: u64,
}

// ============================================================================
// Resolve
// ============================================================================

#[derive(Args)]
pub struct ResolveArgs {
    /// Provider IDs, e.g. aws:///us-west-2a/i-0123456789abcdef0
    #[arg(required = true)]
    pub provider_ids: Vec<String>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}
