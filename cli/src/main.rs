//! callguard CLI — drive the simulated resiliency service through the client stack.
//!
//! Usage:
//! ```bash
//! # One unary call that takes 3–4 s, bounded by a 2 s deadline
//! callguard unary --min-delay 3 --max-delay 4 --codes 0 --timeout-ms 2000
//!
//! # Ten bidirectional messages, a third of them failing
//! callguard bidi --count 10 --codes 0,0,2
//!
//! # Watch the breaker trip and recover
//! callguard breaker --count 30 --codes 2,0 --interval-ms 1000
//! ```

mod commands;
mod logging;
mod settings;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::settings::Settings;

#[derive(Parser)]
#[command(
    name = "callguard",
    about = "Exercise the callguard client stack against a simulated service",
    long_about = "
Runs unary and streaming calls through logging, credential, timeout and
circuit-breaker interceptors against an in-process resiliency service that
replies after a random delay with a random status code.

ENVIRONMENT VARIABLES:
  CALLGUARD_USERNAME   Username for basic auth when the config has none
  CALLGUARD_PASSWORD   Password for basic auth when the config has none
  RUST_LOG             Overrides the configured log filter
",
    version
)]
struct Cli {
    /// YAML file with `log`, `client` and `sim` sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit debug-level logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Request shape shared by every call.
#[derive(Args, Debug, Clone)]
pub struct CallArgs {
    /// Lower bound of the simulated delay, in delay units
    #[arg(long, default_value_t = 0)]
    pub min_delay: i32,
    /// Upper bound of the simulated delay, in delay units
    #[arg(long, default_value_t = 0)]
    pub max_delay: i32,
    /// Status codes the service picks from (0 = OK, 2 = Unknown, ...)
    #[arg(long, value_delimiter = ',', default_value = "0")]
    pub codes: Vec<u32>,
    /// Caller deadline for the whole call, in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// One request, one reply
    Unary {
        #[command(flatten)]
        call: CallArgs,
    },

    /// One request, several replies
    #[command(name = "server-stream")]
    ServerStream {
        #[command(flatten)]
        call: CallArgs,
    },

    /// Several requests, one reply
    #[command(name = "client-stream")]
    ClientStream {
        #[command(flatten)]
        call: CallArgs,
        /// Requests to send
        #[arg(long, default_value_t = 5)]
        count: usize,
    },

    /// Requests and replies flowing concurrently
    Bidi {
        #[command(flatten)]
        call: CallArgs,
        /// Requests to send
        #[arg(long, default_value_t = 5)]
        count: usize,
    },

    /// Repeated unary calls through a circuit breaker
    Breaker {
        #[command(flatten)]
        call: CallArgs,
        /// Calls to make
        #[arg(long, default_value_t = 20)]
        count: usize,
        /// Pause between calls, in milliseconds
        #[arg(long, default_value_t = 1_000)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if cli.verbose {
        settings.log.level = "debug".into();
    }
    logging::init_tracing(&settings.log);

    match cli.command {
        Commands::Unary { call } => commands::unary(&settings, &call).await,
        Commands::ServerStream { call } => commands::server_stream(&settings, &call).await,
        Commands::ClientStream { call, count } => {
            commands::client_stream(&settings, &call, count).await
        }
        Commands::Bidi { call, count } => commands::bidi(&settings, &call, count).await,
        Commands::Breaker {
            call,
            count,
            interval_ms,
        } => commands::breaker(&settings, &call, count, interval_ms).await,
    }
}
