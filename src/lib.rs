// src/lib.rs
//
// CANViewer: send and receive CAN frames over slcan adapters or SocketCAN
// interfaces from an interactive console.

#[macro_use]
mod logging;

pub mod app;
pub mod command;
pub mod composer;
pub mod connection;
pub mod display;
pub mod filter;
pub mod io;
pub mod settings;
pub mod transmit;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use app::{spawn_stdin_reader, App, AppOptions};
use composer::Radix;
use display::ConsoleLog;
use io::{SystemOpener, TransportKind};

// ============================================================================
// Command Line
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "canviewer", version, about = "CAN send and receive console")]
pub struct Cli {
    /// CAN type
    #[arg(short, long, value_enum, default_value_t = TransportKind::Slcan)]
    pub can: TransportKind,

    /// Initial radix for id and data fields
    #[arg(short, long, value_enum, default_value_t = Radix::Decimal)]
    pub radix: Radix,

    /// Bitrate (e.g. 500k, 1M, 250000); overrides the saved value
    #[arg(short, long)]
    pub bitrate: Option<String>,

    /// Bring the SocketCAN interface up at the bitrate before connecting (uses pkexec)
    #[arg(long)]
    pub configure_interface: bool,

    /// Write diagnostic logs to this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Settings file (default: <config dir>/canviewer/settings.json)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Do not print diagnostic logs on stderr
    #[arg(short, long)]
    pub quiet: bool,
}

// ============================================================================
// Entry Point
// ============================================================================

pub fn run() {
    let cli = Cli::parse();

    logging::set_stderr_logging(!cli.quiet);
    if let Some(dir) = &cli.log_dir {
        if let Err(e) = logging::init_file_logging(dir) {
            eprintln!("[setup] Failed to start file logging: {}", e);
        }
    }

    let settings_path = match cli.settings.clone() {
        Some(path) => Some(path),
        None => match settings::settings_path() {
            Ok(path) => Some(path),
            Err(e) => {
                tlog!("[setup] {}; settings will not be saved", e);
                None
            }
        },
    };

    let saved = match &settings_path {
        Some(path) => settings::load_settings(path).unwrap_or_else(|e| {
            tlog!("[setup] {}; using defaults", e);
            settings::AppSettings::default()
        }),
        None => settings::AppSettings::default(),
    };

    let options = AppOptions {
        kind: cli.can,
        radix: cli.radix,
        bitrate: cli.bitrate.clone().unwrap_or(saved.bitrate),
        settings_path,
    };
    tlog!(
        "[setup] CAN type: {}, radix: {}, bitrate: {}",
        options.kind,
        options.radix,
        options.bitrate
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("[setup] Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let opener = Arc::new(SystemOpener {
        configure_socketcan: cli.configure_interface,
    });

    runtime.block_on(async move {
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_stdin_reader(tx.clone());
        let app = App::new(options, opener, Arc::new(ConsoleLog::stdout()), tx);
        app.run(rx).await;
    });

    // The stdin reader may still be parked in a blocking read
    runtime.shutdown_background();
    logging::stop_file_logging();
}
