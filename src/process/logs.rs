use crate::ring_buffer::LineBuffer;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Captures stdout and stderr of the supervised process into ring buffers
pub struct LogCapture {
    node: String,
    stdout: Arc<LineBuffer>,
    stderr: Arc<LineBuffer>,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

impl LogCapture {
    pub fn new(node: impl Into<String>, capacity: usize) -> Self {
        Self {
            node: node.into(),
            stdout: Arc::new(LineBuffer::new(capacity)),
            stderr: Arc::new(LineBuffer::new(capacity)),
            readers: Mutex::new(Vec::new()),
        }
    }

    /// Start one reader task per stream; buffers keep lines of earlier runs
    pub fn attach<O, E>(&self, stdout: O, stderr: E)
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let stdout_task = spawn_reader(self.node.clone(), Stream::Stdout, stdout, self.stdout.clone());
        let stderr_task = spawn_reader(self.node.clone(), Stream::Stderr, stderr, self.stderr.clone());

        let mut readers = self.readers.lock();
        readers.retain(|handle| !handle.is_finished());
        readers.push(stdout_task);
        readers.push(stderr_task);
    }

    pub fn stdout(&self) -> Vec<String> {
        self.stdout.snapshot()
    }

    pub fn stderr(&self) -> Vec<String> {
        self.stderr.snapshot()
    }

    /// Wait for the reader tasks to reach end of stream
    ///
    /// Returns false if they are still running after `timeout`; they are left running.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let readers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.readers.lock());
        if readers.is_empty() {
            return true;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut drained = true;
        for mut reader in readers {
            match tokio::time::timeout_at(deadline, &mut reader).await {
                Ok(_) => {}
                Err(_) => {
                    drained = false;
                    // keep the handle so a later drain can wait again
                    self.readers.lock().push(reader);
                }
            }
        }

        if !drained {
            warn!(node = %self.node, "Log readers did not finish within {:?}", timeout);
        }
        drained
    }
}

fn spawn_reader<R>(node: String, stream: Stream, reader: R, buffer: Arc<LineBuffer>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {
                    // invalid UTF-8 is replaced rather than ending the stream
                    let line = decode_line(&raw);
                    match stream {
                        Stream::Stdout => info!(node = %node, "{}", line),
                        Stream::Stderr => warn!(node = %node, "{}", line),
                    }
                    buffer.push(line);
                }
                Err(e) => {
                    debug!(node = %node, "{:?} reader stopped: {}", stream, e);
                    break;
                }
            }
        }
        debug!(node = %node, "{:?} closed", stream);
    })
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
