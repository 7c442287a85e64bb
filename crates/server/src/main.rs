//! studio-import server binary
//!
//! Receives build notifications on `POST /` and imports finished appliance
//! images into the image registry in the background.

use server::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load()?;
    server::start_server(config).await?;
    Ok(())
}
