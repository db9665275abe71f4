use anyhow::{Context, bail};
use app::App;
use clap::{Parser, Subcommand};
use config::Config;
use flexi_logger::{
    Age, Cleanup, Criterion, Duplicate, FileSpec, LogSpecBuilder, Logger, LoggerHandle, Naming,
};
use futures::StreamExt;
use log::{LevelFilter, info};
use services::{
    Observer,
    command::{self, Command as Request},
    compositor::{Compositor, hyprctl::Hyprctl, socket},
    logind, upower,
};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::{env, path::PathBuf, process::ExitCode, time::Duration};
use tokio_util::sync::CancellationToken;

mod app;
mod config;
mod event;
mod monitors;
mod planner;
mod profile;
mod services;
mod state;
#[cfg(test)]
mod testing;

const LOG_DIR: &str = "/tmp/hyprdock";
const DEBUG_ENV: &str = "HYPRDOCK_DEBUG";
/// Time the daemon gets to rearrange displays before the machine sleeps.
const SUSPEND_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "hyprdock", version, about = "Keeps Hyprland displays in line with the lid and power state")]
struct Cli {
    /// Path to the config file (defaults to ~/.config/hyprdock/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon.
    Listen,
    /// Record the connected displays in the config file.
    SaveDisplays {
        /// Connector of the built-in panel, if it cannot be guessed
        #[arg(long, value_name = "NAME")]
        laptop: Option<String>,
    },
    /// Tell the daemon the machine is about to sleep.
    Suspend,
    /// Tell the daemon the machine has resumed.
    Wake,
    /// Check every profile in the config file and report problems.
    Validate,
}

fn log_level(configured: LevelFilter, verbose: bool) -> LevelFilter {
    let forced = env::var(DEBUG_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("true"));
    if verbose || forced {
        LevelFilter::Debug
    } else {
        configured
    }
}

fn init_logger(level: LevelFilter, to_file: bool) -> anyhow::Result<LoggerHandle> {
    let logger = Logger::with(LogSpecBuilder::new().module("hyprdock", level).build());

    let logger = if to_file {
        logger
            .log_to_file(FileSpec::default().directory(LOG_DIR))
            .duplicate_to_stderr(Duplicate::All)
            .rotate(
                Criterion::Age(Age::Day),
                Naming::Timestamps,
                Cleanup::KeepLogFiles(7),
            )
    } else {
        logger.log_to_stderr()
    };

    logger.start().context("starting logger")
}

fn shutdown_on_signal(token: CancellationToken) -> anyhow::Result<signal_hook_tokio::Handle> {
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("installing signal handlers")?;
    let handle = signals.handle();

    tokio::spawn(async move {
        if let Some(signal) = signals.next().await {
            info!("received signal {signal}; shutting down");
            token.cancel();
        }
    });

    Ok(handle)
}

async fn listen(path: PathBuf, config: Config, verbose: bool) -> anyhow::Result<()> {
    let _logger = init_logger(log_level(config.log_level(), verbose), true)?;

    if !socket::is_available() {
        bail!("Hyprland does not seem to be running");
    }
    let compositor = Hyprctl::locate()?;
    let bus = zbus::Connection::system()
        .await
        .context("connecting to the system bus")?;

    let token = CancellationToken::new();
    let signals = shutdown_on_signal(token.clone())?;

    let mut observers = vec![
        Observer::new("compositor", socket::run_listener),
        Observer::new("lid", {
            let bus = bus.clone();
            move |tx, token| upower::run_lid_listener(bus, tx, token)
        }),
        Observer::new("power", {
            let bus = bus.clone();
            move |tx, token| upower::run_power_listener(bus, tx, token)
        }),
        Observer::new("config", move |tx, token| config::watch(path, tx, token)),
        Observer::new("command", |tx, token| {
            command::run_listener(command::socket_path(), tx, token)
        }),
    ];
    if config.follow_system_sleep {
        observers.push(Observer::new("logind", move |tx, token| {
            logind::run_listener(bus, tx, token)
        }));
    }

    info!("starting with {} profile(s)", config.profiles.len());
    let listener = services::listen(observers, token);
    let res = App::new(compositor, config).run(listener).await;

    signals.close();
    res
}

async fn save_displays(path: PathBuf, laptop: Option<String>, verbose: bool) -> anyhow::Result<()> {
    let mut config = Config::load_or_create(&path)?;
    let _logger = init_logger(log_level(config.log_level(), verbose), false)?;

    let displays = Hyprctl::locate()?
        .list_displays()
        .await
        .context("listing displays")?;

    let saved = config.absorb_displays(&displays, laptop.as_deref())?;
    config.write(&path)?;

    for (label, name) in saved {
        println!("{label}: {name}");
    }
    println!("saved to {}", path.display());
    Ok(())
}

async fn request(request: Request, verbose: bool) -> anyhow::Result<()> {
    let _logger = init_logger(log_level(LevelFilter::Warn, verbose), false)?;

    command::send(&command::socket_path(), request).await?;
    if request == Request::Suspend {
        tokio::time::sleep(SUSPEND_GRACE).await;
    }
    Ok(())
}

fn validate(path: PathBuf) -> anyhow::Result<()> {
    let config = Config::read(&path)?;
    let profiles = profile::build_profiles(&config);

    let mut invalid = 0;
    for profile in &profiles {
        if profile.valid {
            println!("{}: ok", profile.name);
        } else {
            invalid += 1;
            println!(
                "{}: invalid ({})",
                profile.name,
                profile.invalid_reasons.join("; ")
            );
        }
    }

    if invalid > 0 {
        bail!("{invalid} of {} profile(s) invalid", profiles.len());
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let path = cli
        .config
        .as_deref()
        .map(config::expand_path)
        .unwrap_or_else(config::default_path);

    match cli.command {
        Command::Listen => {
            let config = Config::load_or_create(&path)?;
            listen(path, config, cli.verbose).await
        }
        Command::SaveDisplays { laptop } => save_displays(path, laptop, cli.verbose).await,
        Command::Suspend => request(Request::Suspend, cli.verbose).await,
        Command::Wake => request(Request::Wake, cli.verbose).await,
        Command::Validate => validate(path),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("hyprdock: {e:#}");
            ExitCode::FAILURE
        }
    }
}
