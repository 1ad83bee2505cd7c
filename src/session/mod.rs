//! Interactive shell sessions and the per-host session registry.
//!
//! This module keeps at most one live shell per host, streams commands into
//! that shell and collects its output until one of the caller's markers
//! appears or the read deadline expires.
//!
//! # Main Components
//!
//! - [`SessionRegistry`] - Host to session registry (singleton via `REGISTRY`)
//! - [`Session`] - One interactive shell bound to one host
//! - [`CommandResult`] - Output of a marker-bounded read
//! - [`Transport`] / [`ShellHandle`] - Seam to the SSH library
//! - [`SessionRecorder`] - Optional event log of a session

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use log::{debug, trace};
use once_cell::sync::Lazy;

use russh::{ChannelMsg, Preferred};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config;
use crate::error::ConnectError;

pub use recording::{SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder};
pub use security::{ConnectionSecurityOptions, SecurityLevel};
pub use transport::{
    ShellHandle, ShellReader, ShellStreams, ShellWriter, SshShellHandle, SshTransport, Transport,
    parse_host,
};

/// Global singleton session registry backed by the SSH transport.
pub static REGISTRY: Lazy<SessionRegistry> = Lazy::new(SessionRegistry::new);

/// Connects `host` through the global [`REGISTRY`].
///
/// Fails with [`ConnectError::Busy`] if the host already has a session.
pub async fn connect(
    host: &str,
    user: &str,
    password: &str,
) -> Result<Session<SshShellHandle>, ConnectError> {
    REGISTRY.connect(host, user, password).await
}

/// One interactive shell bound to one host.
///
/// All I/O operations take `&mut self`, so a session never has two
/// commands in flight.
pub struct Session<H: ShellHandle = SshShellHandle> {
    host: String,
    id: u64,
    stdin: ShellWriter,
    stdout: Arc<tokio::sync::Mutex<ShellReader>>,
    handle: H,
    link: RegistryLink,
    read_timeout: Duration,
    recorder: Option<SessionRecorder>,
    released: bool,
}

/// The output of a bounded read that ended on a marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Position of the winning marker in the caller's marker list.
    pub index: usize,
    /// Everything the shell printed since the command was written.
    pub output: String,
}

/// Registry enforcing one session per host.
///
/// Cloning yields another handle to the same registry.
pub struct SessionRegistry<T = SshTransport> {
    transport: Arc<T>,
    link: RegistryLink,
}

/// Non-owning back-link from a session to the registry map.
#[derive(Clone, Default)]
pub(crate) struct RegistryLink {
    slots: Arc<Mutex<Slots>>,
}

#[derive(Default)]
struct Slots {
    next_id: u64,
    hosts: HashMap<String, Slot>,
}

struct Slot {
    id: u64,
    live: bool,
}

mod client;
mod reader;
mod recording;
mod registry;
mod security;
mod transport;
