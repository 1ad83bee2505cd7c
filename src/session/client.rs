use super::reader::{ChunkError, ChunkReader, find_marker};
use super::*;

impl<H: ShellHandle> Session<H> {
    pub(super) fn new(host: String, id: u64, streams: ShellStreams<H>, link: RegistryLink) -> Self {
        Self {
            host,
            id,
            stdin: streams.stdin,
            stdout: Arc::new(tokio::sync::Mutex::new(streams.stdout)),
            handle: streams.handle,
            link,
            read_timeout: config::DEFAULT_READ_TIMEOUT,
            recorder: None,
            released: false,
        }
    }

    /// The registry key of this session.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Deadline used by [`write`](Self::write) and [`writeln`](Self::writeln).
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Changes the deadline used by [`write`](Self::write) and [`writeln`](Self::writeln).
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    /// Attaches a recorder that logs this session's commands and output.
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn recorder(&self) -> Option<&SessionRecorder> {
        self.recorder.as_ref()
    }

    /// Writes `text` and a newline without reading any output.
    pub async fn send(&mut self, text: &str) -> Result<(), ConnectError> {
        self.write_raw(text, &format!("{text}\n")).await
    }

    /// Writes `text` and a newline, then reads until a marker appears.
    ///
    /// Returns the index of the first marker, in `markers` order, found in the
    /// accumulated output. Fails with [`ConnectError::ExecTimeout`] carrying
    /// the partial output when nothing matched within the read timeout.
    pub async fn write(
        &mut self,
        text: &str,
        markers: &[&str],
    ) -> Result<CommandResult, ConnectError> {
        self.write_with_timeout(text, markers, self.read_timeout)
            .await
    }

    /// Like [`write`](Self::write) but submits with a blank line (`text` + two newlines).
    pub async fn writeln(
        &mut self,
        text: &str,
        markers: &[&str],
    ) -> Result<CommandResult, ConnectError> {
        self.writeln_with_timeout(text, markers, self.read_timeout)
            .await
    }

    /// [`write`](Self::write) with an explicit deadline.
    pub async fn write_with_timeout(
        &mut self,
        text: &str,
        markers: &[&str],
        timeout: Duration,
    ) -> Result<CommandResult, ConnectError> {
        self.write_raw(text, &format!("{text}\n")).await?;
        self.read_until(text, markers, timeout).await
    }

    /// [`writeln`](Self::writeln) with an explicit deadline.
    pub async fn writeln_with_timeout(
        &mut self,
        text: &str,
        markers: &[&str],
        timeout: Duration,
    ) -> Result<CommandResult, ConnectError> {
        self.write_raw(text, &format!("{text}\n\n")).await?;
        self.read_until(text, markers, timeout).await
    }

    /// Waits for the remote shell to exit. There is no timeout.
    pub async fn wait(&mut self) -> Result<(), ConnectError> {
        self.handle.wait().await
    }

    /// Releases the shell and its connection and frees the registry slot.
    ///
    /// Release errors are swallowed, so closing a broken session is fine.
    pub async fn close(mut self) {
        debug!("{} Closing session {}", self.host, self.id);
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::ConnectionClosed {
                reason: "client_close_called".to_string(),
            });
        }
        if let Err(e) = self.stdin.shutdown().await {
            debug!("{} Failed to shut down shell input: {:?}", self.host, e);
        }
        self.handle.close().await;
        self.link.release(&self.host, self.id);
        self.released = true;
    }

    async fn write_raw(&mut self, command: &str, data: &str) -> Result<(), ConnectError> {
        trace!("{} Writing {:?}", self.host, data);
        self.stdin
            .write_all(data.as_bytes())
            .await
            .map_err(ConnectError::WriteFailed)?;
        self.stdin.flush().await.map_err(ConnectError::WriteFailed)?;

        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::CommandSent {
                command: command.to_string(),
            });
        }
        Ok(())
    }

    /// Collects output until a marker matches or `timeout` elapses.
    ///
    /// The deadline is armed once; chunks arriving do not extend it.
    async fn read_until(
        &mut self,
        command: &str,
        markers: &[&str],
        timeout: Duration,
    ) -> Result<CommandResult, ConnectError> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut acc: Vec<u8> = Vec::new();
        let mut reader = ChunkReader::spawn(self.stdout.clone());

        let result = loop {
            let chunk = tokio::select! {
                biased;
                chunk = reader.recv() => Some(chunk),
                _ = &mut deadline => None,
            };

            match chunk {
                Some(Ok(data)) => {
                    self.record_chunk(&data);
                    acc.extend_from_slice(&data);
                    if let Some(index) = find_marker(&acc, markers) {
                        break Ok(CommandResult {
                            index,
                            output: String::from_utf8_lossy(&acc).into_owned(),
                        });
                    }
                    reader = ChunkReader::spawn(self.stdout.clone());
                }
                Some(Err(ChunkError::Closed)) => {
                    debug!("{} Shell output closed while waiting for markers", self.host);
                    break Err(ConnectError::ShellClosed(
                        String::from_utf8_lossy(&acc).into_owned(),
                    ));
                }
                Some(Err(ChunkError::Io(source))) => {
                    debug!("{} Shell read failed: {}", self.host, source);
                    break Err(ConnectError::ReadFailed {
                        output: String::from_utf8_lossy(&acc).into_owned(),
                        source,
                    });
                }
                None => {
                    if let Some(data) = reader.cancel().await {
                        self.record_chunk(&data);
                        acc.extend_from_slice(&data);
                        if let Some(index) = find_marker(&acc, markers) {
                            break Ok(CommandResult {
                                index,
                                output: String::from_utf8_lossy(&acc).into_owned(),
                            });
                        }
                    }
                    debug!("{} No marker within {:?}", self.host, timeout);
                    break Err(ConnectError::ExecTimeout(
                        String::from_utf8_lossy(&acc).into_owned(),
                    ));
                }
            }
        };

        self.record_result(command, &result);
        result
    }

    fn record_chunk(&self, data: &[u8]) {
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_raw_chunk(String::from_utf8_lossy(data).into_owned());
        }
    }

    fn record_result(&self, command: &str, result: &Result<CommandResult, ConnectError>) {
        let Some(recorder) = self.recorder.as_ref() else {
            return;
        };
        let event = match result {
            Ok(output) => SessionEvent::CommandOutput {
                command: command.to_string(),
                matched: output.index,
                output: output.output.clone(),
            },
            Err(err) => SessionEvent::CommandFailed {
                command: command.to_string(),
                reason: err.to_string(),
                output: err.partial_output().map(str::to_string),
            },
        };
        let _ = recorder.record_event(event);
    }
}

impl<H: ShellHandle> Drop for Session<H> {
    fn drop(&mut self) {
        if !self.released {
            debug!("{} Session {} dropped without close", self.host, self.id);
            self.link.release(&self.host, self.id);
        }
    }
}
