//! Error types for shell sessions and the session registry.
//!
//! Every failure is returned to the immediate caller. Errors raised while a
//! command's output was being collected carry the output accumulated so far,
//! see [`ConnectError::partial_output`].

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while connecting to a host or driving its shell.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The host already has a live (or connecting) session in the registry.
    ///
    /// The existing session must be closed before the host can be connected
    /// again.
    #[error("host {0} is busy")]
    Busy(String),

    /// No marker matched before the read deadline.
    ///
    /// Contains everything the shell printed before the deadline.
    #[error("exec command timeout: {0}")]
    ExecTimeout(String),

    /// The shell's output stream reached end-of-file while waiting for a marker.
    #[error("shell output closed: {0}")]
    ShellClosed(String),

    /// Reading the shell's output stream failed while waiting for a marker.
    #[error("read from shell failed: {source}")]
    ReadFailed {
        /// Output accumulated before the failure.
        output: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing to the shell's input stream failed.
    #[error("write to shell failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    /// The host key could not be split into an address and a port.
    #[error("invalid host {0}")]
    InvalidHost(String),

    /// Connecting and authenticating did not finish in time.
    #[error("connect timeout after {0:?}")]
    ConnectTimeout(Duration),

    /// The remote shell exited with a non-zero status.
    #[error("remote shell exited with status {0}")]
    RemoteExit(u32),

    /// The remote shell was terminated by a signal.
    #[error("remote shell killed by signal {0}")]
    RemoteSignal(String),

    /// The shell channel closed without reporting an exit status.
    #[error("remote shell exited without status")]
    ExitStatusMissing,

    /// The exit status of this shell has already been consumed.
    #[error("remote shell already waited")]
    AlreadyWaited,

    /// The session recorder could not store or serialize an event.
    #[error("record error: {0}")]
    RecordError(String),

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),
}

impl ConnectError {
    /// Output collected before a bounded read failed, if this error ended one.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            ConnectError::ExecTimeout(output) | ConnectError::ShellClosed(output) => Some(output),
            ConnectError::ReadFailed { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Whether this is a bounded-read deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectError::ExecTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectError;

    #[test]
    fn read_errors_keep_partial_output() {
        let timeout = ConnectError::ExecTimeout("router".to_string());
        assert_eq!(timeout.partial_output(), Some("router"));
        assert!(timeout.is_timeout());

        let failed = ConnectError::ReadFailed {
            output: "half".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionReset),
        };
        assert_eq!(failed.partial_output(), Some("half"));
        assert!(!failed.is_timeout());
    }

    #[test]
    fn lifecycle_errors_have_no_output() {
        assert_eq!(ConnectError::Busy("h:22".to_string()).partial_output(), None);
        assert_eq!(ConnectError::RemoteExit(1).partial_output(), None);
        assert_eq!(
            ConnectError::Busy("10.0.0.1:22".to_string()).to_string(),
            "host 10.0.0.1:22 is busy"
        );
    }
}
