//! Container engine connection and the runtime capability seam.
//!
//! This module resolves container engine socket endpoints from configuration
//! and environment variables, establishes connections using the Bollard
//! library, and defines the [`ContainerRuntime`] trait the execution
//! controller drives.

pub mod runtime;

use std::time::Duration;

use bollard::Docker;

use crate::error::{ContainerError, RunboxError};

pub use runtime::{ContainerRuntime, LogStream};

/// Environment variable names checked in fallback order after configuration
/// sources.
const FALLBACK_ENV_VARS: &[&str] = &["DOCKER_HOST", "CONTAINER_HOST", "PODMAN_HOST"];

/// Connection timeout in seconds for Docker/Podman API connections.
const CONNECTION_TIMEOUT_SECS: u64 = 120;

/// Timeout in seconds for health check operations.
const HEALTH_CHECK_TIMEOUT_SECS: u64 = 10;

/// Default socket path for Unix platforms.
#[cfg(unix)]
const DEFAULT_SOCKET: &str = "unix:///var/run/docker.sock";

/// Default socket path for Windows platforms.
#[cfg(windows)]
const DEFAULT_SOCKET: &str = "npipe:////./pipe/docker_engine";

/// Resolves container engine socket endpoints from environment variables.
///
/// The resolver checks a prioritized list of environment variables to find
/// the socket endpoint when no explicit configuration is provided.
///
/// # Type Parameters
///
/// * `E` - An environment provider implementing the `mockable::Env` trait,
///   allowing for testable environment variable access.
pub struct SocketResolver<'a, E: mockable::Env> {
    env: &'a E,
}

impl<'a, E: mockable::Env> SocketResolver<'a, E> {
    /// Creates a new socket resolver with the given environment provider.
    #[must_use]
    pub const fn new(env: &'a E) -> Self {
        Self { env }
    }

    /// Resolves the socket endpoint from fallback environment variables.
    ///
    /// Checks `DOCKER_HOST`, `CONTAINER_HOST`, and `PODMAN_HOST` in order.
    /// Returns `None` if no fallback variable is set or all are empty.
    #[must_use]
    pub fn resolve_from_env(&self) -> Option<String> {
        FALLBACK_ENV_VARS
            .iter()
            .filter_map(|var_name| self.env.string(var_name))
            .find(|value| !value.is_empty())
    }

    /// Returns the platform default socket path.
    #[must_use]
    pub const fn default_socket() -> &'static str {
        DEFAULT_SOCKET
    }
}

/// Classifies socket endpoint types for connection handling.
enum SocketType {
    /// Unix socket or Windows named pipe with explicit scheme.
    Socket,
    /// HTTP, HTTPS, or TCP endpoint (TCP is rewritten to HTTP).
    Http,
    /// Bare path without scheme prefix.
    BarePath,
}

impl SocketType {
    /// Returns true if the socket string has a Unix or named pipe scheme.
    fn is_socket_scheme(socket: &str) -> bool {
        socket.starts_with("unix://") || socket.starts_with("npipe://")
    }

    /// Returns true if the socket string has an HTTP-compatible scheme.
    fn is_http_scheme(socket: &str) -> bool {
        socket.starts_with("tcp://")
            || socket.starts_with("http://")
            || socket.starts_with("https://")
    }

    /// Classify a socket string by its scheme prefix.
    fn classify(socket: &str) -> Self {
        match (Self::is_socket_scheme(socket), Self::is_http_scheme(socket)) {
            (true, _) => Self::Socket,
            (_, true) => Self::Http,
            _ => Self::BarePath,
        }
    }
}

/// Provides methods to connect to Docker or Podman container engines.
///
/// The connector supports Unix sockets, Windows named pipes, HTTP, and HTTPS
/// endpoints.
pub struct EngineConnector;

impl EngineConnector {
    /// Connect to the container engine at the specified socket path.
    ///
    /// Supports `unix://`, `npipe://`, `tcp://` (treated as HTTP), `http://`
    /// and `https://` endpoints, as well as bare paths; bare paths starting
    /// with `\\` or `//` are treated as Windows named pipes and all others
    /// as Unix sockets. Detection is syntax-based, not platform-based.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::ConnectionFailed` if the connection cannot
    /// be established.
    pub fn connect(socket: &str) -> Result<Docker, RunboxError> {
        let docker = match SocketType::classify(socket) {
            SocketType::Socket => Docker::connect_with_socket(
                socket,
                CONNECTION_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            SocketType::Http => {
                // Rewrite tcp:// to http:// for Bollard compatibility
                let http_socket = if socket.starts_with("tcp://") {
                    socket.replacen("tcp://", "http://", 1)
                } else {
                    socket.to_owned()
                };
                Docker::connect_with_http(
                    &http_socket,
                    CONNECTION_TIMEOUT_SECS,
                    bollard::API_DEFAULT_VERSION,
                )
            }
            SocketType::BarePath => {
                let socket_uri = Self::normalize_bare_path(socket);
                Docker::connect_with_socket(
                    &socket_uri,
                    CONNECTION_TIMEOUT_SECS,
                    bollard::API_DEFAULT_VERSION,
                )
            }
        }
        .map_err(|e| {
            RunboxError::from(ContainerError::ConnectionFailed {
                message: e.to_string(),
            })
        })?;

        Ok(docker)
    }

    /// Normalize a bare socket path to a URI with the appropriate scheme.
    fn normalize_bare_path(path: &str) -> String {
        // Named pipes typically start with \\ or // (e.g., \\.\pipe\docker_engine)
        if path.starts_with("\\\\") || path.starts_with("//") {
            format!("npipe://{path}")
        } else {
            format!("unix://{path}")
        }
    }

    /// Resolves the socket endpoint without establishing a connection.
    ///
    /// Resolution order:
    /// 1. `config_socket` (from CLI, config file, or `RUNBOX_ENGINE_SOCKET`)
    /// 2. `DOCKER_HOST`, `CONTAINER_HOST`, `PODMAN_HOST` (via resolver)
    /// 3. Platform default socket
    #[must_use]
    pub fn resolve_socket<E: mockable::Env>(
        config_socket: Option<&str>,
        resolver: &SocketResolver<'_, E>,
    ) -> String {
        config_socket
            .filter(|s| !s.is_empty())
            .map(String::from)
            .or_else(|| resolver.resolve_from_env())
            .unwrap_or_else(|| SocketResolver::<E>::default_socket().to_owned())
    }

    /// Connect using the resolved socket from configuration and environment.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::ConnectionFailed` if the connection cannot
    /// be established.
    pub fn connect_with_fallback<E: mockable::Env>(
        config_socket: Option<&str>,
        resolver: &SocketResolver<'_, E>,
    ) -> Result<Docker, RunboxError> {
        let socket = Self::resolve_socket(config_socket, resolver);
        Self::connect(&socket)
    }

    /// Verify the container engine is responsive.
    ///
    /// Sends a ping request to the engine and waits for a response. This
    /// confirms the engine is operational, not just that the socket is
    /// reachable.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::HealthCheckFailed` if the engine does not
    /// respond correctly.
    ///
    /// Returns `ContainerError::HealthCheckTimeout` if the check times out.
    pub async fn health_check(docker: &Docker) -> Result<(), RunboxError> {
        let timeout = Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS);

        tokio::time::timeout(timeout, docker.ping())
            .await
            .map_err(|_| {
                RunboxError::from(ContainerError::HealthCheckTimeout {
                    seconds: HEALTH_CHECK_TIMEOUT_SECS,
                })
            })?
            .map_err(|e| {
                RunboxError::from(ContainerError::HealthCheckFailed {
                    message: e.to_string(),
                })
            })?;
        Ok(())
    }

    /// Connect to the container engine and verify it responds.
    ///
    /// Combines [`Self::connect`] with [`Self::health_check`] so the caller
    /// knows the engine is fully operational before accepting runs.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::ConnectionFailed` if the connection fails,
    /// `ContainerError::HealthCheckFailed` if the health check fails, and
    /// `ContainerError::HealthCheckTimeout` if the check times out.
    pub async fn connect_and_verify(socket: &str) -> Result<Docker, RunboxError> {
        let docker = Self::connect(socket)?;
        Self::health_check(&docker).await?;
        Ok(docker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockable::MockEnv;
    use rstest::rstest;

    fn env_with(values: &'static [(&'static str, &'static str)]) -> MockEnv {
        let mut env = MockEnv::new();
        env.expect_string().returning(move |name| {
            values
                .iter()
                .find(|(var, _)| *var == name)
                .map(|(_, value)| String::from(*value))
        });
        env
    }

    #[rstest]
    fn resolver_prefers_docker_host() {
        let env = env_with(&[
            ("DOCKER_HOST", "unix:///docker.sock"),
            ("PODMAN_HOST", "unix:///podman.sock"),
        ]);
        let resolver = SocketResolver::new(&env);
        assert_eq!(
            resolver.resolve_from_env(),
            Some(String::from("unix:///docker.sock"))
        );
    }

    #[rstest]
    fn resolver_skips_empty_values() {
        let env = env_with(&[("DOCKER_HOST", ""), ("CONTAINER_HOST", "tcp://host:2375")]);
        let resolver = SocketResolver::new(&env);
        assert_eq!(
            resolver.resolve_from_env(),
            Some(String::from("tcp://host:2375"))
        );
    }

    #[rstest]
    fn resolver_returns_none_when_unset() {
        let env = env_with(&[]);
        let resolver = SocketResolver::new(&env);
        assert_eq!(resolver.resolve_from_env(), None);
    }

    #[rstest]
    fn resolve_socket_prefers_config_value() {
        let env = env_with(&[("DOCKER_HOST", "unix:///docker.sock")]);
        let resolver = SocketResolver::new(&env);
        assert_eq!(
            EngineConnector::resolve_socket(Some("unix:///configured.sock"), &resolver),
            "unix:///configured.sock"
        );
    }

    #[rstest]
    fn resolve_socket_falls_back_to_default() {
        let env = env_with(&[]);
        let resolver = SocketResolver::new(&env);
        assert_eq!(
            EngineConnector::resolve_socket(None, &resolver),
            SocketResolver::<MockEnv>::default_socket()
        );
    }

    #[rstest]
    #[case("/var/run/docker.sock", "unix:///var/run/docker.sock")]
    #[case("//./pipe/docker_engine", "npipe:////./pipe/docker_engine")]
    fn bare_paths_are_normalized(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(EngineConnector::normalize_bare_path(path), expected);
    }
}
