mod cmd;
mod context;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use cmd::{actions::ActionsSubcommand, config::ConfigSubcommand, digest::DigestArg};
use context::Ctx;

#[derive(Parser)]
#[command(
    name = "leadwatch",
    about = "CRM lead triage agent: polls leads, proposes actions, executes what the operator approves",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file
    #[arg(long, global = true, env = "LEADWATCH_CONFIG", default_value = "leadwatch.yaml")]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the poll loop, digest jobs and HTTP server until Ctrl-C
    Run {
        /// Skip the HTTP server (no webhook, no API)
        #[arg(long)]
        no_server: bool,
    },

    /// Run one poll cycle and exit
    Poll,

    /// Run the critical-lead workflow for one lead
    Process { lead_id: u64 },

    /// Score one lead in detail, using what was remembered about it
    Analyze { lead_id: u64 },

    /// Inspect and decide on proposed actions
    Actions {
        #[command(subcommand)]
        subcommand: ActionsSubcommand,
    },

    /// Show the score history of a lead
    Scores {
        lead_id: u64,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Render a digest and send it to the operator
    Digest {
        #[arg(value_enum)]
        kind: DigestArg,
    },

    /// Validate or create the config file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let ctx = Ctx {
        config_path: cli.config,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Run { no_server } => cmd::run::run(&ctx, no_server),
        Commands::Poll => cmd::poll::run(&ctx),
        Commands::Process { lead_id } => cmd::leads::process(&ctx, lead_id),
        Commands::Analyze { lead_id } => cmd::leads::analyze(&ctx, lead_id),
        Commands::Actions { subcommand } => cmd::actions::run(&ctx, subcommand),
        Commands::Scores { lead_id, limit } => cmd::leads::scores(&ctx, lead_id, limit),
        Commands::Digest { kind } => cmd::digest::run(&ctx, kind),
        Commands::Config { subcommand } => cmd::config::run(&ctx, subcommand),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
