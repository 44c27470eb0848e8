use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use breakwatch::config::{self, BreakConfig};
use breakwatch::{
    BreakCore, BreakCoreHandle, ConsoleCallbacks, CoreStatus, FullScreenGate, NoFullScreenGate,
    XpropGate,
};

#[derive(Parser)]
#[command(name = "breakwatch")]
#[command(
    about = "Rest break reminder that alternates short and long breaks and stays quiet during full-screen applications"
)]
#[command(version)]
struct Cli {
    /// Configuration directory (default: ~/.config/breakwatch)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the break scheduler (control it with skip/toggle/restart/status/quit on stdin)
    Run {
        /// Override the break interval (minutes)
        #[arg(long)]
        interval: Option<u64>,
        /// Never postpone breaks for full-screen applications
        #[arg(long)]
        no_fullscreen_check: bool,
        /// Do not reload the configuration when the file changes
        #[arg(long)]
        no_watch: bool,
        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
        /// Enable debug mode
        #[arg(long)]
        debug: bool,
    },
    /// Report whether a full-screen application is active
    CheckFullscreen,
    /// Print the effective break configuration
    ShowConfig {
        /// Output format (yaml or json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },
}

/// Commands accepted on stdin while running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlCommand {
    Skip,
    Toggle,
    Start,
    Stop,
    Restart,
    Status,
    Quit,
}

impl FromStr for ControlCommand {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "skip" | "s" => Ok(Self::Skip),
            "toggle" | "pause" | "resume" | "t" => Ok(Self::Toggle),
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            "status" => Ok(Self::Status),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            other => bail!("Unknown command: {}", other),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (verbose, debug) = match &cli.command {
        Commands::Run { verbose, debug, .. } => (*verbose, *debug),
        _ => (false, false),
    };
    init_tracing(verbose, debug);

    let config_dir = cli.config.unwrap_or_else(config::default_config_dir);

    match cli.command {
        Commands::Run {
            interval,
            no_fullscreen_check,
            no_watch,
            ..
        } => {
            let gate: Arc<dyn FullScreenGate> = if no_fullscreen_check {
                Arc::new(NoFullScreenGate)
            } else {
                Arc::new(XpropGate::default())
            };
            run_breaks(&config_dir, interval, gate, !no_watch).await?;
        }
        Commands::CheckFullscreen => {
            let found = XpropGate::default().is_full_screen_app_found().await;
            if found {
                println!("Full-screen application detected, breaks would be postponed");
            } else {
                println!("No full-screen application detected");
            }
        }
        Commands::ShowConfig { format } => {
            let config = config::load_break_config(&config_dir)?;
            match config::find_config_file(&config_dir) {
                Some(path) => eprintln!("Loaded configuration from: {}", path.display()),
                None => eprintln!(
                    "No configuration file in {}, using defaults",
                    config_dir.display()
                ),
            }
            match format.as_str() {
                "yaml" | "yml" => print!("{}", serde_yaml::to_string(&config)?),
                "json" => println!("{}", serde_json::to_string_pretty(&config)?),
                other => bail!("Unsupported format: {}", other),
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, debug: bool) {
    let filter = if debug {
        EnvFilter::new("trace")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_run_config(config_dir: &Path, interval: Option<u64>) -> Result<BreakConfig> {
    let mut config = config::load_break_config(config_dir)?;
    if let Some(minutes) = interval {
        config.break_interval = minutes;
    }
    config.validate()?;
    Ok(config)
}

async fn next_change(changes: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Run the scheduler until Ctrl+C or `quit`
async fn run_breaks(
    config_dir: &Path,
    interval: Option<u64>,
    gate: Arc<dyn FullScreenGate>,
    watch: bool,
) -> Result<()> {
    let config = load_run_config(config_dir, interval)?;
    let mut current_hash = config::config_hash(&config)?;

    let core = BreakCore::spawn(Arc::new(ConsoleCallbacks::new()), gate);
    core.initialize(config).await?;
    let status = core.start().await?;
    info!(
        "Breaks scheduled, next check at {}",
        status
            .next_break_check
            .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string())
    );

    // Keep the watcher alive for the whole run
    let (_watcher, mut changes) = if watch {
        match config::watch_config_dir(config_dir) {
            Ok((watcher, rx)) => (Some(watcher), Some(rx)),
            Err(e) => {
                warn!("Not watching {} for changes: {}", config_dir.display(), e);
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match line.parse::<ControlCommand>() {
                        Ok(ControlCommand::Quit) => break,
                        Ok(command) => {
                            if let Err(e) = handle_control(&core, command).await {
                                error!("Command failed: {}", e);
                            }
                        }
                        Err(e) => warn!("{}", e),
                    },
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!("Stopped reading commands: {}", e);
                        stdin_open = false;
                    }
                }
            }
            Some(()) = next_change(&mut changes) => {
                match load_run_config(config_dir, interval) {
                    Ok(config) => {
                        let hash = config::config_hash(&config)?;
                        if hash == current_hash {
                            continue;
                        }
                        info!("Configuration change detected, restarting breaks");
                        core.initialize(config).await?;
                        core.restart().await?;
                        current_hash = hash;
                    }
                    Err(e) => error!("Keeping previous configuration: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    core.shutdown().await?;
    Ok(())
}

async fn handle_control(core: &BreakCoreHandle, command: ControlCommand) -> Result<()> {
    let status = match command {
        ControlCommand::Skip => core.skip_break().await?,
        ControlCommand::Toggle => core.toggle_active_state().await?,
        ControlCommand::Start => core.start().await?,
        ControlCommand::Stop => core.stop().await?,
        ControlCommand::Restart => core.restart().await?,
        ControlCommand::Status | ControlCommand::Quit => core.status().await?,
    };
    print_status(&status)?;
    Ok(())
}

fn print_status(status: &CoreStatus) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(status)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_commands() {
        assert_eq!("skip".parse::<ControlCommand>().unwrap(), ControlCommand::Skip);
        assert_eq!(" Pause ".parse::<ControlCommand>().unwrap(), ControlCommand::Toggle);
        assert_eq!("q".parse::<ControlCommand>().unwrap(), ControlCommand::Quit);
        assert_eq!(
            "restart".parse::<ControlCommand>().unwrap(),
            ControlCommand::Restart
        );
        assert!("launch".parse::<ControlCommand>().is_err());
    }

    #[test]
    fn test_interval_override() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = load_run_config(temp_dir.path(), Some(40)).unwrap();
        assert_eq!(config.break_interval, 40);

        assert!(load_run_config(temp_dir.path(), Some(0)).is_err());
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::parse_from([
            "breakwatch",
            "--config",
            "/tmp/cfg",
            "run",
            "--interval",
            "5",
            "--no-fullscreen-check",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/cfg")));
        match cli.command {
            Commands::Run {
                interval,
                no_fullscreen_check,
                no_watch,
                ..
            } => {
                assert_eq!(interval, Some(5));
                assert!(no_fullscreen_check);
                assert!(!no_watch);
            }
            _ => panic!("expected run command"),
        }
    }
}
