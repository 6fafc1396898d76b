//! Configuration system for runbox.
//!
//! This module provides the configuration structures and CLI definitions for
//! the runbox application. Configuration loading and precedence merging is
//! handled by the `ortho_config` crate. Intended precedence: CLI flags
//! override environment variables, which override configuration files, which
//! override defaults.
//!
//! The configuration file is expected at `~/.config/runbox/config.toml` by
//! default.
//!
//! # Example Configuration
//!
//! ```toml
//! engine_socket = "unix:///run/user/1000/podman/podman.sock"
//! image = "ghcr.io/example/runbox-runner:latest"
//!
//! [listen]
//! addr = "0.0.0.0:8080"
//!
//! [uids]
//! lower = 20000
//! upper = 25000
//! isolation = true
//!
//! [limits]
//! memory_bytes = 67108864
//! cpu_shares = 128
//! read_only_code = true
//!
//! [run]
//! timeout_ms = 10000
//! stop_grace_secs = 3
//! ```

mod cli;
mod loader;
mod types;

#[cfg(test)]
mod tests;

pub use cli::{Cli, Commands, ServeArgs};
pub use loader::{env_var_names, load_config};
pub use types::{AppConfig, LimitsConfig, ListenConfig, RunConfig, UidsConfig};
