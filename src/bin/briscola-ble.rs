use std::path::PathBuf;
use clap::Parser;
use log::{error, info};
use uuid::Uuid;
use briscola_ble::{init_logging, run};
use briscola_ble::device::constants::make_player_name_uuid;
use briscola_ble::error::{AppRunError, ConfigError};
use briscola_ble::shell::ShellOptions;

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Scans for a briscola BLE peer, connects to the first one found and prints GATT events.", long_about = None)]
struct Args {
    /// Use this config file instead of the portable or per-user one
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the default config if the config file is empty
    #[arg(long)]
    init_config: bool,

    /// Characteristic to read once services are discovered. Defaults to the player name.
    #[arg(long = "read")]
    read: Vec<Uuid>,
}

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    init_logging()?;
    info!(concat!("briscola-ble ", env!("CARGO_PKG_VERSION")));

    let args = Args::parse();
    let read = if args.read.is_empty() { vec![make_player_name_uuid()] } else { args.read };

    let options = ShellOptions {
        config_path: args.config,
        init_config: args.init_config,
        read,
    };

    match run(options).await {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("This application has already been started");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
