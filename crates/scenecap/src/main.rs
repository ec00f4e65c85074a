//! scenecap launcher
//!
//! Runs the interactive wizard by default; each menu action is also
//! available as a subcommand.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use scenecap::config::Config;
use scenecap_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "scenecap")]
#[command(about = "Discover, capture and replay smart-lighting scene commands")]
#[command(version)]
struct Cli {
    /// Environment file holding the API key and path overrides
    #[arg(long, global = true, env = "SCENECAP_ENV_FILE", default_value = ".env")]
    env_file: PathBuf,

    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive menu (default)
    Wizard,

    /// Refresh devices and DIY scenes from the cloud, addresses from the LAN
    Sync,

    /// Rediscover device addresses on the LAN
    RefreshIps,

    /// Capture a scene's control message through the instrumentation
    Capture,

    /// Rebuild each device's command list from the command registry
    RefreshCommands,

    /// Send captured commands to a device
    Send {
        /// Device name, registry variable or identifier
        device: String,

        /// Command key; every command of the device when omitted
        #[arg(short, long)]
        command: Option<String>,
    },

    /// Show the effective configuration
    Config,
}

fn run_command(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Wizard => cli::wizard::run(config),
        Commands::Sync => {
            let key = config
                .api_key
                .clone()
                .ok_or_else(|| cli::error::HelpfulError::missing_api_key(&config.env_file))?;
            let rt = cli::runtime()?;
            cli::run_sync(&config, &key, &rt)?;
            Ok(())
        }
        Commands::RefreshIps => {
            let rt = cli::runtime()?;
            cli::run_refresh_ips(&config, &rt)
        }
        Commands::Capture => {
            let mut prompter = cli::prompt::Prompter::stdio();
            cli::capture::run(&config, &mut prompter)
        }
        Commands::RefreshCommands => cli::run_refresh_commands(&config),
        Commands::Send { device, command } => {
            let rt = cli::runtime()?;
            cli::send::run_direct(&config, &device, command.as_deref(), &rt)
        }
        Commands::Config => {
            cli::print_config(&config);
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Wizard);

    // Keep log lines from interleaving with the menu
    let interactive = matches!(command, Commands::Wizard | Commands::Capture);
    if let Err(err) = init_logging(LogConfig {
        app_name: "scenecap",
        verbose: cli.verbose,
        interactive,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    let result = Config::load(&cli.env_file)
        .and_then(|config| run_command(command, config))
        .map_err(cli::error::explain);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{:?}", err);
            ExitCode::from(1)
        }
    }
}
