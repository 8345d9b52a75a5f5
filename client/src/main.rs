mod bridge;
mod config;
mod connect;
mod proxy;
mod share;
mod smart_socket;
mod transporter;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    /// specify the configuration file path.
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Share a locally attached device with a remote operator.
    Share {
        /// serial number of the device to share
        #[arg(long = "targetDevice")]
        target_device: String,

        /// accept every join request without prompting
        #[arg(long)]
        auto_accept: bool,
    },
    /// Attach to a shared device through an existing room.
    Connect {
        /// id of the room to join
        #[arg(long = "targetRoomId")]
        target_room_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    simple_logger::init_with_level(config.log.level.as_level())?;

    match cli.command {
        Command::Share {
            target_device,
            auto_accept,
        } => share::run(&config, &target_device, auto_accept).await,
        Command::Connect { target_room_id } => connect::run(&config, &target_room_id).await,
    }
}
