//! The container-runtime capability driven by the execution controller.
//!
//! This module wraps the handful of Bollard container operations a run needs
//! behind a small trait seam so the controller's lifecycle logic can be
//! unit-tested without a live daemon. Error mapping into domain errors
//! happens at the call sites in the controller, not here.

use std::future::Future;
use std::pin::Pin;

use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, ContainerCreateResponse};
use bollard::query_parameters::{
    AttachContainerOptionsBuilder, CreateContainerOptions, RemoveContainerOptionsBuilder,
    StartContainerOptions, StopContainerOptionsBuilder, WaitContainerOptions,
};
use bollard::Docker;
use futures_util::StreamExt;

/// A container's demultiplexable output: a stream of stdout/stderr chunks.
pub type LogStream = Pin<Box<dyn futures_util::Stream<Item = Result<LogOutput, BollardError>> + Send>>;

/// Boxed future type returned by [`ContainerRuntime::create_container`].
pub type CreateContainerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ContainerCreateResponse, BollardError>> + Send + 'a>>;

/// Boxed future type returned by the unit-result runtime operations.
pub type UnitFuture<'a> = Pin<Box<dyn Future<Output = Result<(), BollardError>> + Send + 'a>>;

/// Boxed future type returned by [`ContainerRuntime::attach_output`].
pub type AttachFuture<'a> = Pin<Box<dyn Future<Output = Result<LogStream, BollardError>> + Send + 'a>>;

/// Boxed future type returned by [`ContainerRuntime::wait_container`].
pub type WaitFuture<'a> = Pin<Box<dyn Future<Output = Result<i64, BollardError>> + Send + 'a>>;

/// Behaviour required from a container engine to drive one run's lifecycle.
///
/// This abstraction keeps the controller testable without a running daemon.
pub trait ContainerRuntime: Send + Sync {
    /// Create a container from Bollard options and body payload.
    fn create_container(
        &self,
        options: Option<CreateContainerOptions>,
        body: ContainerCreateBody,
    ) -> CreateContainerFuture<'_>;

    /// Start a previously created container.
    fn start_container(&self, container_id: &str) -> UnitFuture<'_>;

    /// Attach to a container's combined output, including logs emitted since
    /// start plus the live tail.
    fn attach_output(&self, container_id: &str) -> AttachFuture<'_>;

    /// Block until the container exits and yield its exit status.
    fn wait_container(&self, container_id: &str) -> WaitFuture<'_>;

    /// Ask the engine to stop the container within `grace_secs`.
    fn stop_container(&self, container_id: &str, grace_secs: i32) -> UnitFuture<'_>;

    /// Remove the container from the engine.
    fn remove_container(&self, container_id: &str) -> UnitFuture<'_>;
}

impl ContainerRuntime for Docker {
    fn create_container(
        &self,
        options: Option<CreateContainerOptions>,
        body: ContainerCreateBody,
    ) -> CreateContainerFuture<'_> {
        Box::pin(async move { Self::create_container(self, options, body).await })
    }

    fn start_container(&self, container_id: &str) -> UnitFuture<'_> {
        let container_id_owned = String::from(container_id);
        Box::pin(async move {
            Self::start_container(self, &container_id_owned, None::<StartContainerOptions>).await
        })
    }

    fn attach_output(&self, container_id: &str) -> AttachFuture<'_> {
        let container_id_owned = String::from(container_id);
        Box::pin(async move {
            let options = AttachContainerOptionsBuilder::new()
                .stream(true)
                .stdout(true)
                .stderr(true)
                .logs(true)
                .build();
            let results =
                Self::attach_container(self, &container_id_owned, Some(options)).await?;
            Ok(results.output)
        })
    }

    fn wait_container(&self, container_id: &str) -> WaitFuture<'_> {
        let container_id_owned = String::from(container_id);
        Box::pin(async move {
            let mut wait_stream = Box::pin(Self::wait_container(
                self,
                &container_id_owned,
                None::<WaitContainerOptions>,
            ));
            match wait_stream.next().await {
                Some(Ok(response)) => Ok(response.status_code),
                Some(Err(error)) => Err(error),
                None => Err(BollardError::from(std::io::Error::other(
                    "wait stream ended without an exit status",
                ))),
            }
        })
    }

    fn stop_container(&self, container_id: &str, grace_secs: i32) -> UnitFuture<'_> {
        let container_id_owned = String::from(container_id);
        Box::pin(async move {
            let options = StopContainerOptionsBuilder::new().t(grace_secs).build();
            Self::stop_container(self, &container_id_owned, Some(options)).await
        })
    }

    fn remove_container(&self, container_id: &str) -> UnitFuture<'_> {
        let container_id_owned = String::from(container_id);
        Box::pin(async move {
            let options = RemoveContainerOptionsBuilder::new().force(true).build();
            Self::remove_container(self, &container_id_owned, Some(options)).await
        })
    }
}
