//! 'main' for the Obelisk node process

use anyhow::Result;
use caryatid_process::Process;
use config::{Config, Environment, File};
use std::sync::Arc;
use tracing::info;

use obelisk_common::messages::Message;

// External modules
use obelisk_module_block_checker::BlockChecker;
use obelisk_module_chain_organizer::{BlockOrganizer, HeaderOrganizer};
use obelisk_module_peer_interface::PeerInterface;
use obelisk_module_preconfirmer::Preconfirmer;

/// Standard main
#[tokio::main]
pub async fn main() -> Result<()> {
    // Initialise tracing
    tracing_subscriber::fmt::init();

    info!("Obelisk node process");

    // Read the config
    let config = Arc::new(
        Config::builder()
            .add_source(File::with_name("node"))
            .add_source(Environment::with_prefix("OBELISK"))
            .build()
            .unwrap(),
    );

    // Create the process
    let mut process = Process::<Message>::create(config).await;

    // Register modules
    HeaderOrganizer::register(&mut process);
    BlockOrganizer::register(&mut process);
    BlockChecker::register(&mut process);
    Preconfirmer::register(&mut process);
    PeerInterface::register(&mut process);

    // Run it
    process.run().await?;

    // Bye!
    info!("Exiting");
    Ok(())
}
