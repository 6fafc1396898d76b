//! Unit tests for configuration types, loading, and precedence.

use std::io::Write as _;
use std::time::Duration;

use rstest::rstest;
use serial_test::serial;

use super::*;
use crate::error::{ConfigError, RunboxError};

fn check_cli() -> Cli {
    Cli {
        command: Commands::Check,
        config: None,
        engine_socket: None,
        image: None,
    }
}

fn serve_cli(listen: Option<&str>) -> Cli {
    Cli {
        command: Commands::Serve(ServeArgs {
            listen: listen.map(String::from),
        }),
        config: None,
        engine_socket: None,
        image: None,
    }
}

/// Remove every `RUNBOX_*` variable the loader recognises.
fn clear_runbox_env() {
    for name in env_var_names() {
        // SAFETY: tests mutating the environment run under #[serial].
        unsafe { std::env::remove_var(name) };
    }
    // SAFETY: as above.
    unsafe { std::env::remove_var("RUNBOX_CONFIG_PATH") };
}

fn set_env(name: &str, value: &str) {
    // SAFETY: tests mutating the environment run under #[serial].
    unsafe { std::env::set_var(name, value) };
}

#[rstest]
fn defaults_are_sane() {
    let config = AppConfig::default();
    assert_eq!(config.engine_socket, None);
    assert_eq!(config.image, None);
    assert_eq!(config.listen.addr, "127.0.0.1:8080");
    assert_eq!(config.uids.lower, 20_000);
    assert_eq!(config.uids.upper, 25_000);
    assert!(config.uids.isolation);
    assert_eq!(config.limits.memory_bytes, 67_108_864);
    assert_eq!(config.limits.cpu_shares, 128);
    assert!(config.limits.read_only_code);
    assert_eq!(config.run.timeout_ms, 10_000);
    assert_eq!(config.run.stop_grace_secs, 3);
}

#[rstest]
fn resolved_image_falls_back_to_default() {
    let mut config = AppConfig::default();
    assert_eq!(config.resolved_image(), "runbox-runner");

    config.image = Some(String::from("ghcr.io/example/runner:latest"));
    assert_eq!(config.resolved_image(), "ghcr.io/example/runner:latest");
}

#[rstest]
fn sandbox_limits_mirror_config() {
    let mut config = AppConfig::default();
    config.limits.memory_bytes = 1024;
    config.limits.cpu_shares = 64;
    config.limits.read_only_code = false;
    config.run.stop_grace_secs = 7;

    let limits = config.sandbox_limits();
    assert_eq!(limits.memory_bytes, 1024);
    assert_eq!(limits.cpu_shares, 64);
    assert!(!limits.read_only_code);
    assert_eq!(limits.stop_grace_secs, 7);
}

#[rstest]
fn run_timeout_converts_milliseconds() {
    let mut config = AppConfig::default();
    config.run.timeout_ms = 2_500;
    assert_eq!(config.run_timeout(), Duration::from_millis(2_500));
}

#[rstest]
fn app_config_deserializes_from_toml() -> Result<(), toml::de::Error> {
    let config: AppConfig = toml::from_str(
        r#"
        engine_socket = "unix:///run/podman.sock"
        image = "runner:test"

        [uids]
        lower = 1000
        upper = 1010

        [run]
        timeout_ms = 5000
        "#,
    )?;

    assert_eq!(
        config.engine_socket.as_deref(),
        Some("unix:///run/podman.sock")
    );
    assert_eq!(config.uids.lower, 1_000);
    assert_eq!(config.uids.upper, 1_010);
    assert_eq!(config.run.timeout_ms, 5_000);
    // Untouched sections keep their defaults.
    assert_eq!(config.limits.cpu_shares, 128);
    Ok(())
}

#[rstest]
#[serial]
fn env_layer_overrides_defaults() -> std::io::Result<()> {
    clear_runbox_env();
    set_env("RUNBOX_UIDS_LOWER", "100");
    set_env("RUNBOX_UIDS_UPPER", "200");
    set_env("RUNBOX_LISTEN_ADDR", "0.0.0.0:9000");

    let loaded = load_config(&check_cli());
    clear_runbox_env();

    let config =
        loaded.map_err(|error| std::io::Error::other(format!("config should load: {error}")))?;
    assert_eq!(config.uids.lower, 100);
    assert_eq!(config.uids.upper, 200);
    assert_eq!(config.listen.addr, "0.0.0.0:9000");
    Ok(())
}

#[rstest]
#[serial]
fn invalid_typed_env_value_fails_fast() {
    clear_runbox_env();
    set_env("RUNBOX_UIDS_ISOLATION", "maybe");

    let loaded = load_config(&check_cli());
    clear_runbox_env();

    assert!(matches!(
        loaded,
        Err(RunboxError::Config(ConfigError::InvalidValue { ref field, .. }))
            if field == "RUNBOX_UIDS_ISOLATION"
    ));
}

#[rstest]
#[serial]
fn cli_overrides_beat_environment() {
    clear_runbox_env();
    set_env("RUNBOX_ENGINE_SOCKET", "unix:///from-env.sock");

    let mut cli = check_cli();
    cli.engine_socket = Some(String::from("unix:///from-cli.sock"));
    let loaded = load_config(&cli);
    clear_runbox_env();

    let socket = loaded.ok().and_then(|config| config.engine_socket);
    assert_eq!(socket.as_deref(), Some("unix:///from-cli.sock"));
}

#[rstest]
#[serial]
fn serve_listen_flag_overrides_config() {
    clear_runbox_env();

    let loaded = load_config(&serve_cli(Some("127.0.0.1:1234")));

    let addr = loaded.ok().map(|config| config.listen.addr);
    assert_eq!(addr.as_deref(), Some("127.0.0.1:1234"));
}

#[rstest]
#[serial]
fn inverted_uid_range_is_rejected() {
    clear_runbox_env();
    set_env("RUNBOX_UIDS_LOWER", "5000");
    set_env("RUNBOX_UIDS_UPPER", "4000");

    let loaded = load_config(&check_cli());
    clear_runbox_env();

    assert!(matches!(
        loaded,
        Err(RunboxError::Config(ConfigError::OrthoConfig(_)))
    ));
}

#[rstest]
#[serial]
fn config_file_layer_is_honoured() -> std::io::Result<()> {
    clear_runbox_env();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.toml");
    let mut file = std::fs::File::create(&path)?;
    writeln!(file, "image = \"runner:from-file\"")?;
    drop(file);

    let mut cli = check_cli();
    cli.config = camino::Utf8PathBuf::from_path_buf(path).ok();
    let loaded = load_config(&cli);

    let image = loaded.ok().and_then(|config| config.image);
    assert_eq!(image.as_deref(), Some("runner:from-file"));
    Ok(())
}
