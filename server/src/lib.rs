//! # Pong Server Library
//!
//! This library provides the authoritative server for multiplayer Pong over
//! TCP. It accepts connections, decodes the framed text protocol, matches
//! players into two-player games and runs each game at a fixed tick rate.
//!
//! ## Core Responsibilities
//!
//! ### Connection Multiplexing
//! One transport task waits on the listening socket and on every client
//! socket at the same time. Bytes read from a socket are handed to that
//! client's decode task through an in-process pipe; the transport itself
//! never looks at protocol content.
//!
//! ### Protocol Decoding
//! Every client session has its own decode task that turns the byte stream
//! into messages. Malformed frames are skipped by resynchronizing on the next
//! frame start. A session whose share of valid frames drops below two thirds
//! after at least 16 attempts is disconnected.
//!
//! ### Matchmaking
//! A single dispatch task owns all players and game sessions and handles
//! one message at a time:
//! - Registration of display names
//! - Creating, joining, listing and abandoning games
//! - Keep-alives and explicit disconnects
//! - Forwarding in-game messages to the right game loop
//!
//! ### Game Simulation
//! Each game session runs its own loop task. A tick applies at most one
//! queued input, pins the paddles to their rows, moves the ball, and sends a
//! state snapshot to both players.
//!
//! ## Module Organization
//!
//! - `config`: command line arguments and server settings
//! - `pipe`: byte pipe between the transport and a decode task
//! - `client_manager`: client session table and send primitives
//! - `network`: transport loop and server wiring
//! - `decoder`: per-session decode task and its error budget
//! - `player`: player records
//! - `manager`: the dispatch task and its player/game registry
//! - `actions`: one handler per global request type
//! - `game`: arena, paddles, scoring and snapshots of one match
//! - `physics`: ball kinematics
//! - `game_loop`: the fixed-tick task of one match
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use std::net::{Ipv4Addr, SocketAddrV4};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 4000));
//!     let server = Server::bind(config).await?;
//!
//!     // Accepts clients and runs matchmaking until the process exits
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod client_manager;
pub mod config;
pub mod decoder;
pub mod game;
pub mod game_loop;
pub mod manager;
pub mod network;
pub mod physics;
pub mod pipe;
pub mod player;
