//! Configuration data types for runbox.

use std::sync::Arc;
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoError, OrthoResult, PostMergeContext, PostMergeHook};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::runner::SandboxLimits;

/// Image used when none is configured.
const DEFAULT_IMAGE: &str = "runbox-runner";

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct ListenConfig {
    /// Address the HTTP server binds to.
    #[default = "127.0.0.1:8080"]
    pub addr: String,
}

/// Uid pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct UidsConfig {
    /// Lowest uid handed out to sandboxed runs.
    #[default = 20_000]
    pub lower: u32,

    /// Highest uid handed out to sandboxed runs.
    #[default = 25_000]
    pub upper: u32,

    /// Whether runs drop privileges to a pooled uid.
    #[default = true]
    pub isolation: bool,
}

/// Resource limits applied to every run's container.
#[derive(Debug, Clone, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct LimitsConfig {
    /// Memory ceiling in bytes.
    #[default = 67_108_864]
    pub memory_bytes: i64,

    /// Relative CPU share weight.
    #[default = 128]
    pub cpu_shares: i64,

    /// Mount the code volume read-only.
    #[default = true]
    pub read_only_code: bool,
}

/// Run lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct RunConfig {
    /// Wall-clock budget before the stop escalation begins, in milliseconds.
    #[default = 10_000]
    pub timeout_ms: u64,

    /// Grace period passed to the engine's stop request, in seconds.
    #[default = 3]
    pub stop_grace_secs: i32,
}

/// Root application configuration.
///
/// This structure is loaded from configuration files, environment variables,
/// and command-line arguments with layered precedence. The precedence order
/// (lowest to highest) is: defaults, configuration file, environment
/// variables, command-line arguments.
///
/// Configuration files are discovered in this order:
/// 1. Path specified via `RUNBOX_CONFIG_PATH` environment variable
/// 2. `.runbox.toml` in the current working directory
/// 3. `.runbox.toml` in the home directory
/// 4. `~/.config/runbox/config.toml` (XDG default)
#[derive(Debug, Clone, Default, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(
    prefix = "RUNBOX",
    post_merge_hook,
    discovery(
        app_name = "runbox",
        env_var = "RUNBOX_CONFIG_PATH",
        config_file_name = "config.toml",
        dotfile_name = ".runbox.toml",
        config_cli_long = "config",
        config_cli_visible = true,
    )
)]
pub struct AppConfig {
    /// The container engine socket path or URL.
    pub engine_socket: Option<String>,

    /// The container image snippets run in.
    pub image: Option<String>,

    /// HTTP listener configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub listen: ListenConfig,

    /// Uid pool configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub uids: UidsConfig,

    /// Container resource limits.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub limits: LimitsConfig,

    /// Run lifecycle configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub run: RunConfig,
}

impl AppConfig {
    /// The configured container image, or the built-in default.
    #[must_use]
    pub fn resolved_image(&self) -> &str {
        self.image.as_deref().unwrap_or(DEFAULT_IMAGE)
    }

    /// Build the per-run sandbox limits from this configuration.
    #[must_use]
    pub fn sandbox_limits(&self) -> SandboxLimits {
        SandboxLimits {
            image: String::from(self.resolved_image()),
            memory_bytes: self.limits.memory_bytes,
            cpu_shares: self.limits.cpu_shares,
            read_only_code: self.limits.read_only_code,
            stop_grace_secs: self.run.stop_grace_secs,
        }
    }

    /// The configured run timeout as a [`Duration`].
    #[must_use]
    pub const fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run.timeout_ms)
    }
}

impl PostMergeHook for AppConfig {
    fn post_merge(&mut self, _ctx: &PostMergeContext) -> OrthoResult<()> {
        if self.uids.upper < self.uids.lower {
            return Err(Arc::new(OrthoError::Validation {
                key: String::from("uids.upper"),
                message: String::from("must not be below uids.lower"),
            }));
        }
        if self.run.timeout_ms == 0 {
            return Err(Arc::new(OrthoError::Validation {
                key: String::from("run.timeout_ms"),
                message: String::from("must be greater than zero"),
            }));
        }
        Ok(())
    }
}
