//! # rsshc - Interactive SSH Shell Sessions
//!
//! `rsshc` drives remote hosts through an interactive shell. It keeps at most
//! one session per host, writes commands into the shell and reads the output
//! back until one of the caller's markers (usually a prompt) shows up or a
//! deadline passes.
//!
//! ## Features
//!
//! - **One Session Per Host**: a process-wide registry rejects a second
//!   connect to a busy host with [`error::ConnectError::Busy`]
//! - **Marker-Bounded Reads**: output is accumulated across chunks and matched
//!   against an ordered marker list; the first marker in list order wins
//! - **Partial Output on Failure**: timeouts and broken streams still return
//!   everything read so far
//! - **Pluggable Transport**: the [`session::Transport`] trait lets tests and
//!   embedders supply their own shell provider
//! - **Async/Await**: built on Tokio
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rsshc::session;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut sess = session::connect("192.168.1.1:22", "admin", "password").await?;
//!
//!     let result = sess.write("show version", &["#", ">"]).await?;
//!     println!("marker {} matched:\n{}", result.index, result.output);
//!
//!     sess.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::SessionRegistry`] - Enforces one session per host
//! - [`session::Session`] - Write and marker-bounded read operations
//! - [`session::SshTransport`] - Default transport on async-ssh2-tokio/russh
//! - [`error::ConnectError`] - Error types for connection and shell operations
//! - [`config`] - Protocol constants and SSH algorithm policies

pub mod config;
pub mod error;
pub mod session;
