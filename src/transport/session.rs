//! Receive loop and serialized writer over a byte-stream link (TCP, RFCOMM)

use crate::transport::link::LinkState;
use crate::transport::traits::{LinkError, TransportStream};
use rc_link_shared::{Command, LineDecoder};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type BoxedStream = Box<dyn TransportStream>;

/// How long teardown waits for the writer and background tasks
pub(crate) const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// One live stream connection, bound to the generation that opened it
pub struct StreamSession {
    generation: u64,
    peer: String,
    writer: Mutex<WriteHalf<BoxedStream>>,
    cancel: CancellationToken,
    receiver: StdMutex<Option<JoinHandle<()>>>,
}

impl StreamSession {
    /// Split `stream` and spawn its receive loop
    pub fn start<S: TransportStream>(
        stream: S,
        link: Arc<LinkState>,
        generation: u64,
        read_timeout: Duration,
    ) -> Self {
        let peer = stream.peer();
        let boxed: BoxedStream = Box::new(stream);
        let (reader, writer) = tokio::io::split(boxed);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(receive_loop(reader, link, generation, read_timeout, cancel.clone()));

        Self {
            generation,
            peer,
            writer: Mutex::new(writer),
            cancel,
            receiver: StdMutex::new(Some(task)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write one framed command; writes from concurrent callers never interleave
    pub async fn write_line(&self, command: &Command, write_timeout: Duration) -> Result<(), LinkError> {
        let frame = command.encode();
        let mut writer = self.writer.lock().await;
        let result = timeout(write_timeout, async {
            writer.write_all(&frame).await?;
            writer.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(LinkError::Timeout(format!("write to {}", self.peer))),
        }
    }

    /// Stop the receive loop, close the stream and wait for the task to end
    pub async fn close(self) {
        self.cancel.cancel();

        {
            let mut writer = self.writer.lock().await;
            if timeout(CLOSE_TIMEOUT, writer.shutdown()).await.is_err() {
                debug!("Shutdown of {} timed out", self.peer);
            }
        }

        let task = self.receiver.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            join_task(task, &format!("Receive loop for {}", self.peer)).await;
        }
        info!("Closed session with {}", self.peer);
    }
}

/// Wait for a cancelled task to finish, aborting it after [`CLOSE_TIMEOUT`].
/// Returns false when the task had to be aborted.
pub(crate) async fn join_task(mut task: JoinHandle<()>, what: &str) -> bool {
    match timeout(CLOSE_TIMEOUT, &mut task).await {
        Ok(_) => true,
        Err(_) => {
            warn!("{} did not stop in time; aborting", what);
            task.abort();
            let _ = task.await;
            false
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn receive_loop(
    mut reader: ReadHalf<BoxedStream>,
    link: Arc<LinkState>,
    generation: u64,
    read_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut decoder = LineDecoder::new();
    let mut buf = [0u8; 512];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = timeout(read_timeout, reader.read(&mut buf)) => read,
        };

        match read {
            // Idle; go round and re-check the stop flag
            Err(_) => continue,
            Ok(Ok(0)) => {
                link.report_lost(generation, "connection closed by peer");
                break;
            }
            Ok(Ok(n)) => {
                decoder.extend(&buf[..n]);
                loop {
                    match decoder.decode_next() {
                        Ok(Some(line)) => link.record_telemetry(generation, &line),
                        Ok(None) => break,
                        Err(e) => warn!("[{}] dropped inbound data: {}", link.kind(), e),
                    }
                }
            }
            Ok(Err(e)) => {
                if !cancel.is_cancelled() {
                    link.report_lost(generation, format!("read error: {e}"));
                }
                break;
            }
        }
    }

    debug!("[{}] receive loop for generation {} finished", link.kind(), generation);
}
