//! Bridge from the engine's synchronous writes to a chunked response body.
//!
//! The engine runs on a blocking thread and writes through a [`ChunkWriter`];
//! each `write` becomes one `Bytes` chunk on a bounded channel that the HTTP
//! body drains. When the body is dropped (client gone) the next write fails,
//! the controller aborts the loop and the session guard is released. A client
//! that stays connected but stops reading is cut off by the write timeout.

use bytes::Bytes;
use futures::Stream;
use std::io::{self, Write};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, Span};

use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::session::SessionGuard;
use crate::stats::{render, RunStatistics};

/// Streaming behaviour for one request.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub append_stats: bool,
    pub channel_capacity: usize,
    pub write_timeout: Option<Duration>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

impl From<&StreamConfig> for StreamOptions {
    fn from(config: &StreamConfig) -> Self {
        Self {
            append_stats: config.append_stats,
            channel_capacity: config.channel_capacity.max(1),
            write_timeout: Some(config.write_timeout()),
        }
    }
}

/// `io::Write` adapter that forwards every write as a separate chunk.
pub struct ChunkWriter {
    tx: mpsc::Sender<Bytes>,
    runtime: Handle,
    write_timeout: Option<Duration>,
}

impl ChunkWriter {
    /// Must be called from within a tokio runtime; writes must happen off the
    /// async worker threads.
    pub fn new(tx: mpsc::Sender<Bytes>, write_timeout: Option<Duration>) -> Self {
        Self {
            tx,
            runtime: Handle::current(),
            write_timeout,
        }
    }

    fn send(&self, chunk: Bytes) -> io::Result<()> {
        match self.write_timeout {
            None => self
                .tx
                .blocking_send(chunk)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped")),
            Some(timeout) => {
                let send = tokio::time::timeout(timeout, self.tx.send(chunk));
                match self.runtime.block_on(send) {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "response body dropped",
                    )),
                    Err(_) => Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("client did not accept a chunk within {:?}", timeout),
                    )),
                }
            }
        }
    }
}

impl Write for ChunkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.send(Bytes::copy_from_slice(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Start generation for `prompt` and return the response body stream.
///
/// Resolves once the engine produced its first chunk or the run ended, so a
/// failure before any output is returned as an error and can still be
/// reported with a status code. After that the stream yields one item per
/// engine write and ends only after the generation task has joined. A later
/// engine failure is yielded as an error item so the transport aborts the
/// response instead of terminating it cleanly.
pub async fn stream_generation(
    guard: SessionGuard,
    prompt: String,
    options: StreamOptions,
) -> Result<impl Stream<Item = io::Result<Bytes>> + Send + 'static> {
    let (tx, mut rx) = mpsc::channel::<Bytes>(options.channel_capacity.max(1));
    let writer = ChunkWriter::new(tx, options.write_timeout);
    let span = Span::current();

    let task = tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        let mut session = guard;
        session.handle(&prompt, writer)
    });

    let (first, generation) = match rx.recv().await {
        Some(chunk) => (Some(chunk), Generation::Running(task)),
        None => (None, Generation::Finished(join_generation(task).await?)),
    };

    Ok(async_stream::stream! {
        if let Some(chunk) = first {
            yield Ok::<Bytes, io::Error>(chunk);
        }
        while let Some(chunk) = rx.recv().await {
            yield Ok(chunk);
        }

        match generation.finish().await {
            Ok(stats) => {
                if options.append_stats {
                    yield Ok(Bytes::from(render(&stats)));
                }
            }
            Err(e) if e.is_disconnect() => {
                debug!("Stream closed by client: {}", e);
            }
            Err(e) => {
                error!("Stream generation failed: {}", e);
                yield Err(io::Error::new(io::ErrorKind::Other, e.to_string()));
            }
        }
    })
}

enum Generation {
    Running(JoinHandle<Result<RunStatistics>>),
    Finished(RunStatistics),
}

impl Generation {
    async fn finish(self) -> Result<RunStatistics> {
        match self {
            Generation::Running(task) => join_generation(task).await,
            Generation::Finished(stats) => Ok(stats),
        }
    }
}

async fn join_generation(task: JoinHandle<Result<RunStatistics>>) -> Result<RunStatistics> {
    task.await
        .map_err(|e| Error::InferenceError(format!("generation task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BusyPolicy, SessionConfig};
    use crate::engine::MockEngine;
    use crate::session::{Session, SharedSession};
    use futures::StreamExt;

    fn shared(engine: MockEngine) -> SharedSession {
        SharedSession::new(
            Session::new(Box::new(engine), &SessionConfig::default()),
            BusyPolicy::Reject,
        )
    }

    async fn collect(
        stream: impl Stream<Item = io::Result<Bytes>>,
    ) -> (Vec<String>, Option<io::Error>) {
        let mut chunks = Vec::new();
        let mut failure = None;
        futures::pin_mut!(stream);
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => chunks.push(String::from_utf8(chunk.to_vec()).unwrap()),
                Err(e) => failure = Some(e),
            }
        }
        (chunks, failure)
    }

    #[tokio::test]
    async fn test_each_write_is_a_chunk() {
        let session = shared(MockEngine::new(["h", "i"]));
        let guard = session.acquire().await.unwrap();

        let stream = stream_generation(guard, "hello".into(), StreamOptions::default())
            .await
            .unwrap();
        let (chunks, failure) = collect(stream).await;

        assert_eq!(chunks, vec!["h", "i"]);
        assert!(failure.is_none());
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_append_stats_chunk() {
        let session = shared(MockEngine::new(["h", "i"]));
        let guard = session.acquire().await.unwrap();
        let options = StreamOptions {
            append_stats: true,
            ..StreamOptions::default()
        };

        let stream = stream_generation(guard, "hello".into(), options).await.unwrap();
        let (chunks, _) = collect(stream).await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[..2].concat(), "hi");
        assert!(chunks[2].contains("decode tokens num = 2\n"));
    }

    #[tokio::test]
    async fn test_engine_failure_ends_stream_with_error() {
        let session = shared(MockEngine::new(["a", "b", "c"]).failing_on_step(2));
        let guard = session.acquire().await.unwrap();

        let stream = stream_generation(guard, "go".into(), StreamOptions::default())
            .await
            .unwrap();
        let (chunks, failure) = collect(stream).await;

        assert_eq!(chunks, vec!["a", "b"]);
        assert!(failure.is_some());
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_failure_before_output_is_returned() {
        let session = shared(MockEngine::new(["a"]).failing_response());
        let guard = session.acquire().await.unwrap();
        let result = stream_generation(guard, "go".into(), StreamOptions::default()).await;
        assert!(matches!(result, Err(Error::InferenceError(_))));
        assert!(!session.is_busy());

        let session = shared(MockEngine::new(["a"]).unloaded());
        let guard = session.acquire().await.unwrap();
        let result = stream_generation(guard, "go".into(), StreamOptions::default()).await;
        assert!(matches!(result, Err(Error::ModelNotLoaded)));
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_run_without_output_still_streams_stats() {
        let session = shared(MockEngine::new(Vec::<String>::new()));
        let guard = session.acquire().await.unwrap();
        let options = StreamOptions {
            append_stats: true,
            ..StreamOptions::default()
        };

        let stream = stream_generation(guard, "go".into(), options).await.unwrap();
        let (chunks, failure) = collect(stream).await;

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("decode tokens num = 0\n"));
        assert!(failure.is_none());
    }

    #[tokio::test]
    async fn test_dropped_body_releases_session() {
        let engine = MockEngine::new(["a", "b", "c"])
            .never_stopping()
            .with_step_delay(Duration::from_millis(2));
        let probe = engine.probe();
        let session = shared(engine);
        let guard = session.acquire().await.unwrap();
        let options = StreamOptions {
            channel_capacity: 1,
            ..StreamOptions::default()
        };

        let mut stream = Box::pin(stream_generation(guard, "go".into(), options).await.unwrap());
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"a");
        drop(stream);

        let mut released = false;
        for _ in 0..200 {
            if !session.is_busy() {
                released = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(released);
        assert_eq!(probe.resets(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stalled_client_times_out() {
        let engine = MockEngine::new(["a", "b", "c"]).never_stopping();
        let session = shared(engine);
        let guard = session.acquire().await.unwrap();
        let options = StreamOptions {
            channel_capacity: 1,
            write_timeout: Some(Duration::from_millis(20)),
            ..StreamOptions::default()
        };

        // never polled after the first chunk: the channel fills and the next
        // send times out
        let stream = stream_generation(guard, "go".into(), options).await.unwrap();

        let mut released = false;
        for _ in 0..200 {
            if !session.is_busy() {
                released = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(released);
        drop(stream);
    }
}
