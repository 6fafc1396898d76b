//! Sandboxed snippet-execution service.
//!
//! `runbox` lets a caller submit a small program plus a target language,
//! executes it inside an isolated, resource-bounded container, and streams
//! its output live to any number of listeners while the run is in progress.
//!
//! # Architecture
//!
//! Three components carry the load. A fixed-capacity [`uidpool`] hands out
//! disjoint numeric identities so concurrent runs can drop privileges to
//! separate uids inside the sandbox. A per-run execution controller
//! ([`runner`]) drives the container lifecycle end to end: workspace setup,
//! create, start, log attachment, a timeout-bounded wait, and guaranteed
//! teardown. A topic-based [`broker`] fans captured output lines out to the
//! run's live listeners.
//!
//! The container engine is an external capability reached over its socket
//! ([`engine`]); the HTTP/SSE surface ([`server`]) and snippet persistence
//! ([`snippets`]) are thin translation layers around the core.
//!
//! # Modules
//!
//! - [`broker`]: topic-based pub/sub fan-out of output lines
//! - [`config`]: configuration with layered precedence (CLI > env > file > defaults)
//! - [`engine`]: container engine connection and the runtime trait seam
//! - [`error`]: semantic error types for the application
//! - [`languages`]: the fixed language/extension table
//! - [`runner`]: the per-run sandboxed execution controller
//! - [`server`]: HTTP endpoints and SSE event streaming
//! - [`service`]: the submit/subscribe seam over the shared state
//! - [`snippets`]: persistence of submitted snippets
//! - [`uidpool`]: FIFO pool of sandbox uids

pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod languages;
pub mod runner;
pub mod server;
pub mod service;
pub mod snippets;
pub mod uidpool;
