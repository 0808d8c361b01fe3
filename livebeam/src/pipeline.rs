//! Session lifecycle: one transcoder per publish session.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::io::AsyncRead;
use tracing::{info, warn};

use livebeam_core::config::Config;
use livebeam_transcode::{ProcessRunner, Transcoder};

/// Owns every active publish session and the transcoder driving it.
pub struct Pipeline {
    config: Arc<Config>,
    runner: Arc<dyn ProcessRunner>,
    sessions: DashMap<String, Arc<Transcoder>>,
}

impl Pipeline {
    #[must_use]
    pub fn new(config: Arc<Config>, runner: Arc<dyn ProcessRunner>) -> Arc<Self> {
        Arc::new(Self {
            config,
            runner,
            sessions: DashMap::new(),
        })
    }

    /// Run one publish session to completion.
    ///
    /// Blocks until the encoder exits (source ended, encoder failed, or the
    /// session was stopped). A second session under an already active name
    /// is refused.
    pub async fn run_session<R>(self: &Arc<Self>, publish_name: &str, source: R)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let transcoder = Arc::new(Transcoder::new(
            self.config.ffmpeg.clone(),
            self.config.hls.private_path.clone(),
            Arc::clone(&self.runner),
        ));

        match self.sessions.entry(publish_name.to_string()) {
            Entry::Occupied(_) => {
                warn!(publish_name, "refusing duplicate publish session");
                return;
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&transcoder));
            }
        }
        info!(publish_name, "publish session started");

        if let Err(e) = transcoder.start(publish_name, source).await {
            warn!(publish_name, "session ended with error: {e}");
        }

        self.sessions.remove(publish_name);
        info!(publish_name, "publish session ended");
    }

    /// Stop one session's encoder. Returns false when no such session is
    /// active.
    pub fn stop_session(&self, publish_name: &str) -> bool {
        match self.sessions.get(publish_name) {
            Some(transcoder) => {
                transcoder.stop();
                true
            }
            None => false,
        }
    }

    /// Stop every active session. Used on shutdown.
    pub fn shutdown(&self) {
        for entry in &self.sessions {
            entry.value().stop();
        }
    }

    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io;
    use tokio::sync::Notify;

    use livebeam_transcode::{FfmpegCommand, ProcessHandle, SpawnedProcess};

    struct BlockingHandle {
        killed: Arc<Notify>,
    }

    #[async_trait]
    impl ProcessHandle for BlockingHandle {
        async fn wait(&mut self) -> io::Result<Option<i32>> {
            self.killed.notified().await;
            Ok(None)
        }
        async fn kill(&mut self) -> io::Result<()> {
            // notify_one stores a permit so the wait() issued after kill()
            // still completes; notify_waiters would deadlock it.
            self.killed.notify_one();
            Ok(())
        }
    }

    /// Encoder stand-in that runs until killed.
    struct BlockingRunner;

    #[async_trait]
    impl ProcessRunner for BlockingRunner {
        async fn spawn(&self, _command: &FfmpegCommand) -> io::Result<SpawnedProcess> {
            Ok(SpawnedProcess {
                stdin: Some(Box::new(tokio::io::sink())),
                handle: Box::new(BlockingHandle {
                    killed: Arc::new(Notify::new()),
                }),
            })
        }
    }

    fn test_pipeline(root: &std::path::Path) -> Arc<Pipeline> {
        let mut config = Config::default();
        config.hls.private_path = root.to_path_buf();
        Pipeline::new(Arc::new(config), Arc::new(BlockingRunner))
    }

    #[tokio::test]
    async fn a_session_is_tracked_while_running_and_removed_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(dir.path());

        let task = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline.run_session("alice", tokio::io::empty()).await;
            })
        };

        // wait for the session to register
        while pipeline.active_sessions() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(pipeline.stop_session("alice"));
        task.await.unwrap();
        assert_eq!(pipeline.active_sessions(), 0);
        assert!(!pipeline.stop_session("alice"));
    }

    #[tokio::test]
    async fn duplicate_publish_names_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(dir.path());

        let task = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline.run_session("alice", tokio::io::empty()).await;
            })
        };
        while pipeline.active_sessions() == 0 {
            tokio::task::yield_now().await;
        }

        // returns immediately without disturbing the running session
        pipeline.run_session("alice", tokio::io::empty()).await;
        assert_eq!(pipeline.active_sessions(), 1);

        pipeline.shutdown();
        task.await.unwrap();
    }
}
