//! Guest role: join an existing room, then impersonate the shared device
//! toward the local ADB server.

use anyhow::Result;

use crate::{config::Config, proxy::AdbProxy, transporter::Transporter};

pub async fn run(config: &Config, room_id: &str) -> Result<()> {
    let mut transporter = Transporter::connect(&config.transporter_address).await?;
    println!("Your client id: {}", transporter.client_id());
    println!("The room owner has to approve it before the join completes.");

    transporter.join_room(room_id).await?;

    let proxy = AdbProxy::bind(config.adb_listen_address, room_id).await?;
    println!(
        "Joined. Run `adb connect {}` to attach the remote device.",
        proxy.local_addr()?
    );

    let (sink, frames) = transporter.split();
    proxy.run(sink, frames).await
}
