//! Conference hub server binary
//!
//! Usage:
//!   cargo run -- server                    # Run the hub on 0.0.0.0:50051
//!   cargo run -- server 127.0.0.1:6000     # Run the hub on a custom address

use std::env;

use palaver::{HubConfig, HubServer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "server" => {
            let mut config = HubConfig::default();
            if let Some(addr) = args.get(2) {
                config.bind_addr = addr
                    .parse()
                    .map_err(|e| format!("Invalid bind address '{}': {}", addr, e))?;
            }
            run_server(config).await?;
        }
        _ => {
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!("Palaver Conference Hub");
    println!();
    println!("USAGE:");
    println!("    palaver server [bind_addr]");
    println!();
    println!("COMMANDS:");
    println!("    server [bind_addr]   Start the hub (default 0.0.0.0:50051)");
}

async fn run_server(config: HubConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting conference hub...");

    let mut server = HubServer::new(config);

    if let Err(e) = server.start().await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
