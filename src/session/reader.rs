use super::*;

/// Why a chunk read delivered no data.
#[derive(Debug)]
pub(super) enum ChunkError {
    /// The output stream reached end-of-file.
    Closed,
    Io(std::io::Error),
}

pub(super) type Chunk = Result<Vec<u8>, ChunkError>;

/// One in-flight, single-use read against a shell's output stream.
///
/// Each reader owns a fresh delivery channel, so a chunk can only ever reach
/// the bounded read that spawned it.
pub(super) struct ChunkReader {
    rx: oneshot::Receiver<Chunk>,
    task: JoinHandle<()>,
}

impl ChunkReader {
    /// Spawns a task that performs exactly one read of at most [`config::CHUNK_SIZE`] bytes.
    pub(super) fn spawn(stdout: Arc<tokio::sync::Mutex<ShellReader>>) -> Self {
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut reader = stdout.lock_owned().await;
            let mut buf = vec![0u8; config::CHUNK_SIZE];
            let chunk = match reader.read(&mut buf).await {
                Ok(0) => Err(ChunkError::Closed),
                Ok(n) => {
                    buf.truncate(n);
                    Ok(buf)
                }
                Err(e) => Err(ChunkError::Io(e)),
            };
            if tx.send(chunk).is_err() {
                trace!("Chunk receiver dropped before delivery");
            }
        });
        Self { rx, task }
    }

    /// Waits for the chunk. A task that died without delivering counts as a closed stream.
    pub(super) async fn recv(&mut self) -> Chunk {
        match (&mut self.rx).await {
            Ok(chunk) => chunk,
            Err(_) => Err(ChunkError::Closed),
        }
    }

    /// Abandons the read.
    ///
    /// The task is aborted and joined so it no longer holds the output stream.
    /// Reads are cancel-safe, so an aborted read consumes no bytes. A chunk
    /// that was delivered before the abort took effect is returned.
    pub(super) async fn cancel(mut self) -> Option<Vec<u8>> {
        self.task.abort();
        let _ = (&mut self.task).await;
        match self.rx.try_recv() {
            Ok(Ok(data)) => Some(data),
            _ => None,
        }
    }
}

impl Drop for ChunkReader {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Index of the first marker, in list order, contained in `haystack`.
pub(super) fn find_marker(haystack: &[u8], markers: &[&str]) -> Option<usize> {
    markers
        .iter()
        .position(|marker| contains(haystack, marker.as_bytes()))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}
