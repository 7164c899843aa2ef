pub mod app;
pub mod cli;
pub mod db;
pub mod events;
pub mod records;
pub mod serial;
pub mod settings;
pub mod utils;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::{debug, info};

use cli::{ArgsParser, Cmd, LinkArgs};
use serial::SerialPortSelector;
use settings::{
    debug_enabled, resolve_data_dir, SerialSettings, SettingsStore, SETTINGS_FILE_NAME,
};

pub use app::AppState;

pub async fn run() -> Result<()> {
    // RUST_LOG overrides the default level.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = ArgsParser::parse();
    let data_dir = resolve_data_dir(args.data_dir);
    debug!("using data directory {}", data_dir.display());

    match args.cmd {
        Cmd::Ports => serial::commands::print_ports(),
        Cmd::Monitor { link } => {
            let state = open_state(&data_dir, &link)?;
            serial::commands::monitor(&state).await
        }
        Cmd::Capture {
            category,
            wait_secs,
            link,
        } => {
            let state = open_state(&data_dir, &link)?;
            serial::commands::capture(&state, &category, Duration::from_secs(wait_secs)).await
        }
        Cmd::Records { cmd } => {
            let state = open_state(&data_dir, &LinkArgs::default())?;
            records::commands::run(&state, cmd).await
        }
    }
}

fn open_state(data_dir: &std::path::Path, link: &LinkArgs) -> Result<AppState> {
    std::fs::create_dir_all(data_dir)?;
    let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE_NAME))?;
    let serial = merge_link_args(settings.serial(), link);
    if link.save {
        settings.update_serial(serial.clone())?;
        info!("saved serial defaults to {}", settings.path().display());
    }

    let selector = SerialPortSelector::new(serial.port.clone());
    AppState::open(
        data_dir,
        Box::new(selector),
        serial.link_config(),
        debug_enabled(),
    )
}

/// Command-line flags win over stored settings.
fn merge_link_args(stored: SerialSettings, link: &LinkArgs) -> SerialSettings {
    SerialSettings {
        port: link.port.clone().or(stored.port),
        baud_rate: link.baud.unwrap_or(stored.baud_rate),
        idle_timeout_secs: link.idle_timeout_secs.or(stored.idle_timeout_secs),
        ..stored
    }
}
