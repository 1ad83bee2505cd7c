//! Transport seam and the default SSH implementation.
//!
//! A [`Transport`] turns `(host, user, password)` into a running remote shell:
//! an input stream, an output stream and a [`ShellHandle`] for the shell's
//! exit status and teardown. [`SshTransport`] is the implementation used by the
//! global registry.

use super::*;

/// Write half of a remote shell.
pub type ShellWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read half of a remote shell.
pub type ShellReader = Box<dyn AsyncRead + Send + Unpin>;

/// A freshly opened remote shell.
pub struct ShellStreams<H> {
    pub stdin: ShellWriter,
    pub stdout: ShellReader,
    pub handle: H,
}

/// Opens authenticated remote shells.
pub trait Transport: Send + Sync + 'static {
    type Handle: ShellHandle;

    /// Connects, authenticates and starts a shell on `host`.
    fn open_shell(
        &self,
        host: &str,
        user: &str,
        password: &str,
    ) -> impl Future<Output = Result<ShellStreams<Self::Handle>, ConnectError>> + Send;
}

/// Lifecycle of a running remote shell.
pub trait ShellHandle: Send + 'static {
    /// Resolves when the remote shell exits.
    fn wait(&mut self) -> impl Future<Output = Result<(), ConnectError>> + Send;

    /// Best-effort release of the shell and its connection.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// How the remote shell ended, as observed by the I/O pump.
#[derive(Debug)]
enum ShellExit {
    Status(u32),
    Signal(String),
    Missing,
}

/// SSH transport built on async-ssh2-tokio.
#[derive(Debug, Clone)]
pub struct SshTransport {
    security: ConnectionSecurityOptions,
    connect_timeout: Duration,
    request_pty: bool,
}

impl Default for SshTransport {
    /// Uses [`ConnectionSecurityOptions::compatible`]: the host key is not
    /// verified and balanced algorithms are offered, so devices without a
    /// `known_hosts` entry can still be reached. Pass
    /// [`ConnectionSecurityOptions::secure_default`] to
    /// [`with_security`](Self::with_security) to verify host keys.
    fn default() -> Self {
        Self {
            security: ConnectionSecurityOptions::compatible(),
            connect_timeout: config::CONNECT_TIMEOUT,
            request_pty: false,
        }
    }
}

impl SshTransport {
    pub fn with_security(mut self, security: ConnectionSecurityOptions) -> Self {
        self.security = security;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Request a PTY before starting the shell. Many network devices need one.
    pub fn with_pty(mut self, request_pty: bool) -> Self {
        self.request_pty = request_pty;
        self
    }

    pub fn security(&self) -> &ConnectionSecurityOptions {
        &self.security
    }

    async fn open(
        &self,
        host: &str,
        user: &str,
        password: &str,
    ) -> Result<ShellStreams<SshShellHandle>, ConnectError> {
        let (addr, port) = parse_host(host)?;

        let ssh_config = Config {
            preferred: self.security.preferred(),
            inactivity_timeout: Some(config::INACTIVITY_TIMEOUT),
            ..Default::default()
        };

        let client = tokio::time::timeout(
            self.connect_timeout,
            Client::connect_with_config(
                (addr, port),
                user,
                AuthMethod::with_password(password),
                self.security.server_check.clone(),
                ssh_config,
            ),
        )
        .await
        .map_err(|_| ConnectError::ConnectTimeout(self.connect_timeout))??;
        debug!("{} TCP connection successful", host);

        let channel = client.get_channel().await?;
        if self.request_pty {
            channel
                .request_pty(false, "xterm", 800, 600, 0, 0, &[])
                .await?;
        }
        channel.request_shell(false).await?;
        debug!("{} Shell request successful", host);

        let (stdin, pump_stdin) = tokio::io::duplex(config::CHUNK_SIZE);
        let (pump_stdout, stdout) = tokio::io::duplex(config::CHUNK_SIZE);
        let (exit_tx, exit_rx) = oneshot::channel();
        let pump = tokio::spawn(pump(
            host.to_string(),
            channel,
            pump_stdin,
            pump_stdout,
            exit_tx,
        ));

        Ok(ShellStreams {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            handle: SshShellHandle {
                host: host.to_string(),
                client,
                exit: Some(exit_rx),
                pump,
            },
        })
    }
}

impl Transport for SshTransport {
    type Handle = SshShellHandle;

    async fn open_shell(
        &self,
        host: &str,
        user: &str,
        password: &str,
    ) -> Result<ShellStreams<SshShellHandle>, ConnectError> {
        self.open(host, user, password).await
    }
}

/// Shuttles bytes between the russh channel and the session's in-memory pipes.
async fn pump(
    host: String,
    mut channel: russh::Channel<russh::client::Msg>,
    mut from_session: tokio::io::DuplexStream,
    mut to_session: tokio::io::DuplexStream,
    exit_tx: oneshot::Sender<ShellExit>,
) {
    let mut buf = vec![0u8; config::CHUNK_SIZE];
    let mut exit = ShellExit::Missing;
    let mut input_open = true;

    loop {
        tokio::select! {
            read = from_session.read(&mut buf), if input_open => {
                match read {
                    Ok(0) | Err(_) => {
                        debug!("{} Session input closed, sending EOF", host);
                        input_open = false;
                        let _ = channel.eof().await;
                    }
                    Ok(n) => {
                        if let Err(e) = channel.data(&buf[..n]).await {
                            debug!("{} Failed to send data to shell: {:?}", host, e);
                            break;
                        }
                    }
                }
            },
            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { ref data }) => {
                        trace!("{} {} bytes from shell", host, data.len());
                        if to_session.write_all(data).await.is_err() {
                            debug!("{} Shell output receiver dropped. Closing task.", host);
                            break;
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        debug!("{} Shell exited with status code: {}", host, exit_status);
                        exit = ShellExit::Status(exit_status);
                    }
                    Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                        debug!("{} Shell killed by signal: {:?}", host, signal_name);
                        exit = ShellExit::Signal(format!("{signal_name:?}"));
                    }
                    Some(ChannelMsg::Eof) => {
                        debug!("{} Shell sent EOF.", host);
                        let _ = to_session.shutdown().await;
                    }
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }
        }
    }

    let _ = exit_tx.send(exit);
    debug!("{} SSH I/O task ended.", host);
}

/// Handle to a shell opened by [`SshTransport`].
pub struct SshShellHandle {
    host: String,
    client: Client,
    exit: Option<oneshot::Receiver<ShellExit>>,
    pump: JoinHandle<()>,
}

impl ShellHandle for SshShellHandle {
    async fn wait(&mut self) -> Result<(), ConnectError> {
        let exit = self.exit.take().ok_or(ConnectError::AlreadyWaited)?;
        match exit.await {
            Ok(ShellExit::Status(0)) => Ok(()),
            Ok(ShellExit::Status(status)) => Err(ConnectError::RemoteExit(status)),
            Ok(ShellExit::Signal(signal)) => Err(ConnectError::RemoteSignal(signal)),
            Ok(ShellExit::Missing) | Err(_) => Err(ConnectError::ExitStatusMissing),
        }
    }

    async fn close(&mut self) {
        debug!("{} Closing SSH connection...", self.host);
        self.pump.abort();
        if let Err(e) = self.client.disconnect().await {
            debug!("{} Error disconnecting: {}", self.host, e);
        }
        debug!("{} SSH connection closed", self.host);
    }
}

impl Drop for SshShellHandle {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Splits a host key into address and port.
///
/// Accepts `addr:port`, `[v6addr]:port` and a bare address (port 22).
pub fn parse_host(host: &str) -> Result<(String, u16), ConnectError> {
    let invalid = || ConnectError::InvalidHost(host.to_string());

    if let Some(rest) = host.strip_prefix('[') {
        let (addr, tail) = rest.split_once(']').ok_or_else(invalid)?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().map_err(|_| invalid())?,
            None if tail.is_empty() => config::DEFAULT_SSH_PORT,
            None => return Err(invalid()),
        };
        if addr.is_empty() {
            return Err(invalid());
        }
        return Ok((addr.to_string(), port));
    }

    match host.rsplit_once(':') {
        // More than one colon without brackets is a bare IPv6 address.
        Some((addr, _)) if addr.contains(':') => Ok((host.to_string(), config::DEFAULT_SSH_PORT)),
        Some((addr, port)) if !addr.is_empty() => {
            Ok((addr.to_string(), port.parse().map_err(|_| invalid())?))
        }
        Some(_) => Err(invalid()),
        None if !host.is_empty() => Ok((host.to_string(), config::DEFAULT_SSH_PORT)),
        None => Err(invalid()),
    }
}
