//! The sandboxed execution controller.
//!
//! A [`Runner`] owns the full lifecycle of one run: workspace provisioning,
//! uid reservation, container create/start, live log streaming into the
//! broker, a timeout-bounded wait, and unconditional cleanup of every
//! resource the run acquired. A new `Runner` is created per request and
//! discarded after cleanup; the uid pool and broker are the only state it
//! shares with other runs.
//!
//! Stages run strictly in order and a stage failure aborts the run, but the
//! release of each acquired resource is scheduled the moment the resource is
//! acquired (the workspace and uid are RAII guards, container removal is
//! owed from the moment create succeeds), so no later failure can strand an
//! earlier resource.

use std::sync::Arc;
use std::time::Duration;

use bollard::container::LogOutput;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::CreateContainerOptions;
use bytes::Bytes;
use camino::Utf8PathBuf;
use futures_util::StreamExt;
use smart_default::SmartDefault;
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::broker::{Broker, Event};
use crate::engine::{ContainerRuntime, LogStream};
use crate::error::{ContainerError, Result, WorkspaceError};
use crate::languages;
use crate::uidpool::{UidLease, UidPool};

/// Fixed path the workspace is bind-mounted at inside the container.
pub const CODE_MOUNT_PATH: &str = "/code";

/// Prefix of every run's private temporary workspace directory.
const WORKSPACE_PREFIX: &str = "code-";

/// Depth of the byte-chunk channels between the demultiplexer and the
/// per-stream line scanners.
const LOG_CHANNEL_DEPTH: usize = 32;

/// Resource and image settings applied to every run's container.
#[derive(Debug, Clone, SmartDefault)]
pub struct SandboxLimits {
    /// Container image snippets run in.
    #[default = "runbox-runner"]
    pub image: String,

    /// Memory ceiling in bytes.
    #[default = 67_108_864]
    pub memory_bytes: i64,

    /// Relative CPU share weight.
    #[default = 128]
    pub cpu_shares: i64,

    /// Whether the code volume is mounted read-only.
    #[default = true]
    pub read_only_code: bool,

    /// Grace period passed to the engine's stop request, in seconds.
    #[default = 3]
    pub stop_grace_secs: i32,
}

/// How a run concluded.
///
/// The container's numeric exit status is deliberately not part of this
/// result: it is published as the run's terminal event, and callers that
/// need it read it from there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The container exited on its own within the timeout.
    Completed,
    /// The timeout fired at least once before the container exited.
    TimedOut,
}

impl RunOutcome {
    /// Stable lowercase name for logs and wire payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// The execution controller for a single run.
///
/// Owns the run's workspace, uid lease, and container handle exclusively;
/// never shared across runs.
pub struct Runner<R: ContainerRuntime + 'static> {
    run_id: String,
    language: String,
    code: String,
    limits: SandboxLimits,
    runtime: Arc<R>,
    uid_pool: Option<Arc<UidPool>>,
    broker: Arc<Broker>,
    workspace: Option<TempDir>,
    uid_lease: Option<UidLease>,
    container_id: Option<String>,
}

impl<R: ContainerRuntime + 'static> Runner<R> {
    /// Create a controller for one run.
    ///
    /// Passing `None` for `uid_pool` disables identity isolation: the
    /// container command receives uid `0` and no pool reservation is made.
    pub fn new(
        run_id: impl Into<String>,
        language: impl Into<String>,
        code: impl Into<String>,
        limits: SandboxLimits,
        runtime: Arc<R>,
        uid_pool: Option<Arc<UidPool>>,
        broker: Arc<Broker>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            language: language.into(),
            code: code.into(),
            limits,
            runtime,
            uid_pool,
            broker,
            workspace: None,
            uid_lease: None,
            container_id: None,
        }
    }

    /// Drive the run to completion and clean up every acquired resource.
    ///
    /// Blocks until the container has exited (the timeout only escalates
    /// stop requests; it never abandons the wait). Cleanup runs regardless
    /// of outcome, and cleanup failures are logged rather than escalated.
    ///
    /// # Errors
    ///
    /// Returns `LanguageError::Unsupported` for an unknown language tag,
    /// `WorkspaceError` for workspace I/O failures, `PoolError::Exhausted`
    /// when no uid is available, and `ContainerError` variants for engine
    /// failures.
    pub async fn run(mut self, timeout: Duration) -> Result<RunOutcome> {
        let result = self.execute(timeout).await;
        self.cleanup().await;
        result
    }

    async fn execute(&mut self, timeout: Duration) -> Result<RunOutcome> {
        // Local validation first: an unknown tag must fail before any
        // workspace or container resource is allocated.
        let file_name = languages::source_file_name(&self.language)?;

        tracing::debug!(run_id = %self.run_id, language = %self.language, "provisioning workspace");
        let host_dir = self.provision_workspace(&file_name).await?;

        self.reserve_uid()?;

        tracing::debug!(run_id = %self.run_id, "creating container");
        self.create_container(&host_dir, &file_name).await?;

        tracing::debug!(run_id = %self.run_id, "starting container");
        self.start_container().await?;

        let streaming = self.spawn_log_streaming().await?;

        let (status, timed_out) = self.wait_with_timeout(timeout).await?;

        // Drain the scanners before the terminal event so it is the last
        // event a subscriber sees for this topic.
        streaming.join().await;
        self.publish_terminal_event(status, timed_out, timeout).await;

        Ok(if timed_out {
            RunOutcome::TimedOut
        } else {
            RunOutcome::Completed
        })
    }

    /// Stage 1 + 2: private workspace directory holding `prog.<ext>`.
    async fn provision_workspace(&mut self, file_name: &str) -> Result<Utf8PathBuf> {
        let workspace = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir()
            .map_err(|error| WorkspaceError::CreateFailed {
                message: error.to_string(),
            })?;

        let source_path = workspace.path().join(file_name);
        tokio::fs::write(&source_path, &self.code)
            .await
            .map_err(|error| WorkspaceError::WriteFailed {
                path: Utf8PathBuf::from(source_path.to_string_lossy().into_owned()),
                message: error.to_string(),
            })?;

        let host_dir = Utf8PathBuf::from(workspace.path().to_string_lossy().into_owned());
        self.workspace = Some(workspace);
        Ok(host_dir)
    }

    /// Stage 3: reserve a uid, held as a lease that releases itself on drop.
    fn reserve_uid(&mut self) -> Result<()> {
        if let Some(pool) = &self.uid_pool {
            let lease = pool.reserve_lease()?;
            tracing::debug!(run_id = %self.run_id, uid = lease.uid(), "reserved sandbox uid");
            self.uid_lease = Some(lease);
        }
        Ok(())
    }

    /// Stage 4: create the container with the workspace bound at
    /// [`CODE_MOUNT_PATH`], resource limits applied and networking disabled.
    async fn create_container(&mut self, host_dir: &Utf8PathBuf, file_name: &str) -> Result<()> {
        let mode = if self.limits.read_only_code { "ro" } else { "rw" };
        let bind = format!("{host_dir}:{CODE_MOUNT_PATH}:{mode}");
        let uid = self.uid_lease.as_ref().map_or(0, UidLease::uid);

        let body = ContainerCreateBody {
            image: Some(self.limits.image.clone()),
            // The entrypoint drops privileges to the given uid before
            // executing the program.
            cmd: Some(vec![
                format!("{CODE_MOUNT_PATH}/{file_name}"),
                uid.to_string(),
            ]),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                binds: Some(vec![bind]),
                memory: Some(self.limits.memory_bytes),
                cpu_shares: Some(self.limits.cpu_shares),
                ..HostConfig::default()
            }),
            ..ContainerCreateBody::default()
        };

        let response = self
            .runtime
            .create_container(None::<CreateContainerOptions>, body)
            .await
            .map_err(|error| ContainerError::CreateFailed {
                message: error.to_string(),
            })?;

        tracing::debug!(run_id = %self.run_id, container_id = %response.id, "created container");
        self.container_id = Some(response.id);
        Ok(())
    }

    /// Stage 5: start the container.
    async fn start_container(&self) -> Result<()> {
        let container_id = self.container_id()?;
        self.runtime
            .start_container(container_id)
            .await
            .map_err(|error| ContainerError::StartFailed {
                container_id: String::from(container_id),
                message: error.to_string(),
            })?;
        Ok(())
    }

    /// Stage 6: attach to the container's output and fan lines out to the
    /// broker, one scanning task per stream.
    async fn spawn_log_streaming(&self) -> Result<StreamTasks> {
        let container_id = self.container_id()?;
        let output = self.runtime.attach_output(container_id).await.map_err(|error| {
            ContainerError::AttachFailed {
                container_id: String::from(container_id),
                message: error.to_string(),
            }
        })?;
        let (stdout_tx, stdout_rx) = mpsc::channel::<Bytes>(LOG_CHANNEL_DEPTH);
        let (stderr_tx, stderr_rx) = mpsc::channel::<Bytes>(LOG_CHANNEL_DEPTH);

        let demux = tokio::spawn(demux_output(output, stdout_tx, stderr_tx));
        let stdout = tokio::spawn(scan_lines(
            "stdout",
            stdout_rx,
            Arc::clone(&self.broker),
            self.run_id.clone(),
        ));
        let stderr = tokio::spawn(scan_lines(
            "stderr",
            stderr_rx,
            Arc::clone(&self.broker),
            self.run_id.clone(),
        ));

        Ok(StreamTasks {
            demux,
            stdout,
            stderr,
        })
    }

    /// Stage 7: race the container's natural exit against the timeout.
    ///
    /// Each timer firing marks the run as timed out, asks the engine to stop
    /// the container, and re-arms; the loop ends only when the real exit
    /// status arrives. A container that ignores the stop request keeps the
    /// controller alive, so the timeout is escalation pressure rather than a
    /// hard wall-clock bound.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "false positive triggered inside tokio::select! expansion"
    )]
    async fn wait_with_timeout(&self, timeout: Duration) -> Result<(i64, bool)> {
        let container_id = String::from(self.container_id()?);

        let (status_tx, mut status_rx) = oneshot::channel();
        let wait_runtime = Arc::clone(&self.runtime);
        let wait_id = container_id.clone();
        drop(tokio::spawn(async move {
            let status = wait_runtime.wait_container(&wait_id).await;
            drop(status_tx.send(status));
        }));

        let mut timed_out = false;
        let outcome = loop {
            tokio::select! {
                status = &mut status_rx => break status,
                () = tokio::time::sleep(timeout) => {
                    timed_out = true;
                    tracing::info!(
                        run_id = %self.run_id,
                        container_id = %container_id,
                        "timeout elapsed, requesting container stop"
                    );
                    if let Err(error) = self
                        .runtime
                        .stop_container(&container_id, self.limits.stop_grace_secs)
                        .await
                    {
                        tracing::warn!(container_id = %container_id, %error, "stop request failed");
                    }
                }
            }
        };

        let status = outcome
            .map_err(|_| ContainerError::RuntimeFailure {
                container_id: container_id.clone(),
                message: String::from("wait task ended without reporting an exit status"),
            })?
            .map_err(|error| ContainerError::RuntimeFailure {
                container_id,
                message: error.to_string(),
            })?;

        Ok((status, timed_out))
    }

    /// Publish the run's terminal status line.
    async fn publish_terminal_event(&self, status: i64, timed_out: bool, timeout: Duration) {
        let message = if timed_out {
            format!("=> timed out after {}s", timeout.as_secs())
        } else {
            format!("=> exited with status {status}")
        };
        tracing::info!(run_id = %self.run_id, status, timed_out, "run concluded");
        self.broker.dispatch(&self.run_id, Event::new(message)).await;
    }

    /// Stage 8: release everything the run acquired.
    ///
    /// Failures here are terminal for the leaked resource only; they are
    /// logged and never change the run's reported outcome.
    async fn cleanup(&mut self) {
        if let Some(container_id) = self.container_id.take() {
            tracing::debug!(container_id = %container_id, "removing container");
            if let Err(error) = self.runtime.remove_container(&container_id).await {
                tracing::warn!(container_id = %container_id, %error, "failed to remove container");
            }
        }

        // Dropping the lease returns the uid to the pool.
        drop(self.uid_lease.take());

        if let Some(workspace) = self.workspace.take() {
            tracing::debug!(run_id = %self.run_id, "removing workspace directory");
            if let Err(error) = workspace.close() {
                tracing::warn!(%error, "failed to remove workspace directory");
            }
        }
    }

    fn container_id(&self) -> Result<&str> {
        Ok(self
            .container_id
            .as_deref()
            .ok_or(ContainerError::NotCreated)?)
    }
}

/// Handles to the three streaming tasks of one run.
struct StreamTasks {
    demux: JoinHandle<()>,
    stdout: JoinHandle<()>,
    stderr: JoinHandle<()>,
}

impl StreamTasks {
    /// Join every streaming task, logging panics instead of propagating.
    async fn join(self) {
        for handle in [self.demux, self.stdout, self.stderr] {
            if let Err(error) = handle.await {
                tracing::warn!(%error, "log streaming task failed");
            }
        }
    }
}

/// Split the container's combined output into stdout and stderr byte pipes.
async fn demux_output(
    mut output: LogStream,
    stdout_tx: mpsc::Sender<Bytes>,
    stderr_tx: mpsc::Sender<Bytes>,
) {
    while let Some(chunk) = output.next().await {
        match chunk {
            Ok(LogOutput::StdOut { message } | LogOutput::Console { message }) => {
                if stdout_tx.send(message).await.is_err() {
                    break;
                }
            }
            Ok(LogOutput::StdErr { message }) => {
                if stderr_tx.send(message).await.is_err() {
                    break;
                }
            }
            Ok(LogOutput::StdIn { .. }) => {}
            Err(error) => {
                tracing::warn!(%error, "container output stream failed");
                break;
            }
        }
    }
}

/// Scan one byte stream into lines and publish each line immediately.
///
/// A trailing fragment without a newline is flushed as a final line once the
/// stream ends.
async fn scan_lines(
    stream_name: &'static str,
    mut chunks: mpsc::Receiver<Bytes>,
    broker: Arc<Broker>,
    topic: String,
) {
    let mut buffer: Vec<u8> = Vec::new();
    while let Some(chunk) = chunks.recv().await {
        buffer.extend_from_slice(&chunk);
        while let Some(newline) = buffer.iter().position(|&byte| byte == b'\n') {
            let mut line: Vec<u8> = buffer.drain(..=newline).collect();
            if line.last() == Some(&b'\n') {
                line.truncate(line.len() - 1);
            }
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            publish_line(stream_name, &broker, &topic, &line).await;
        }
    }

    if !buffer.is_empty() {
        publish_line(stream_name, &broker, &topic, &buffer).await;
    }
}

async fn publish_line(stream_name: &'static str, broker: &Broker, topic: &str, raw: &[u8]) {
    let text = String::from_utf8_lossy(raw).into_owned();
    tracing::debug!(topic, stream = stream_name, line = %text, "publishing output line");
    broker.dispatch(topic, Event::new(text)).await;
}
