use clap::Parser;
use log::info;
use server::config::{Args, ServerConfig};
use server::network::Server;
use std::process;

/// Main-method of the application.
/// Parses command-line arguments, binds the listener, then runs the server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // usage errors go to stdout like every other startup failure
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            println!("{}", e);
            process::exit(Args::exit_code(&e));
        }
    };

    let config = match ServerConfig::from_args(&args) {
        Ok(Some(config)) => config,
        Ok(None) => {
            println!(
                "Missing arguments - atleast 2 needed, {} given",
                args.positional_count()
            );
            println!("Usage: server <ADDRESS> <PORT> [--tick-rate <N>]");
            return Ok(());
        }
        Err(e) => {
            println!("{}", e);
            process::exit(1);
        }
    };

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            println!("Failed to bind listening socket: {}", e);
            process::exit(2);
        }
    };

    // Handle shutdown gracefully
    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
