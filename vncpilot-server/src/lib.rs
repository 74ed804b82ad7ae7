//! # vncpilot-server
//!
//! Tool server for the vncpilot engine: reads line-delimited JSON tool
//! calls on stdin and answers on stdout.
//!
//! ## Modules
//!
//! - **config**: `PilotConfig`, the TOML configuration file
//! - **protocol**: request, response and content wire types
//! - **tools**: argument handling and dispatch to the engine
//! - **server**: the stdio read/answer loop

pub mod config;
pub mod protocol;
pub mod server;
pub mod tools;

#[cfg(test)]
mod testing;
