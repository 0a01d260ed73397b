//! Command line arguments, server settings and address parsing.

use crate::game::Arena;
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::num::ParseIntError;
use thiserror::Error;

/// Banner written to every accepted socket before any protocol traffic.
pub const WELCOME_BANNER: &str = "Welcome to Pong server!\n";

/// Size of the buffer used for a single socket read.
pub const READ_BUFFER_SIZE: usize = 512;

/// Chunks a client's byte pipe holds before further reads are dropped.
pub const PIPE_CAPACITY: usize = 256;

/// Frames queued for one socket before the client counts as stalled.
pub const OUTBOUND_CAPACITY: usize = 256;

pub const DEFAULT_TICK_RATE: u32 = 30;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Pong multiplayer game server")]
pub struct Args {
    /// IPv4 address to bind to
    pub address: Option<String>,

    /// TCP port to listen on
    pub port: Option<String>,

    /// Simulation ticks per second for every game
    #[arg(short, long, default_value_t = DEFAULT_TICK_RATE)]
    pub tick_rate: u32,
}

impl Args {
    /// Exit status for a command line clap could not turn into `Args`.
    ///
    /// Help and version requests are not failures.
    pub fn exit_code(error: &clap::Error) -> i32 {
        if error.use_stderr() {
            1
        } else {
            0
        }
    }

    /// Number of positional arguments that were actually given.
    pub fn positional_count(&self) -> usize {
        self.address.iter().count() + self.port.iter().count()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid IPv4 address `{0}`")]
    InvalidIp(String),
    #[error("Invalid port `{value}`: {source}")]
    InvalidPort {
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("Tick rate must be between 1 and 1000, got {0}")]
    InvalidTickRate(u32),
}

/// Parses a dotted-quad address and a decimal port into a socket address.
pub fn parse_address(ip: &str, port: &str) -> Result<SocketAddrV4, ConfigError> {
    let ip: Ipv4Addr = ip
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidIp(ip.to_string()))?;
    let port: u16 = port
        .trim()
        .parse()
        .map_err(|source| ConfigError::InvalidPort {
            value: port.to_string(),
            source,
        })?;

    Ok(SocketAddrV4::new(ip, port))
}

/// Settings shared by the transport and the session manager.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddrV4,
    pub tick_rate: u32,
    pub read_buffer_size: usize,
    pub pipe_capacity: usize,
    pub outbound_capacity: usize,
    pub welcome_banner: String,
    pub arena: Arena,
}

impl ServerConfig {
    pub fn new(bind: SocketAddrV4) -> Self {
        Self {
            bind,
            tick_rate: DEFAULT_TICK_RATE,
            read_buffer_size: READ_BUFFER_SIZE,
            pipe_capacity: PIPE_CAPACITY,
            outbound_capacity: OUTBOUND_CAPACITY,
            welcome_banner: WELCOME_BANNER.to_string(),
            arena: Arena::default(),
        }
    }

    /// Builds the configuration from parsed arguments.
    ///
    /// Returns `Ok(None)` when the address or port is missing.
    pub fn from_args(args: &Args) -> Result<Option<Self>, ConfigError> {
        let (Some(address), Some(port)) = (&args.address, &args.port) else {
            return Ok(None);
        };

        if args.tick_rate == 0 || args.tick_rate > 1000 {
            return Err(ConfigError::InvalidTickRate(args.tick_rate));
        }

        let mut config = Self::new(parse_address(address, port)?);
        config.tick_rate = args.tick_rate;
        Ok(Some(config))
    }
}
