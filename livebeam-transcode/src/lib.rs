// Transcoder: owns the lifecycle of one encoding subprocess per session.
//
// `start` blocks its task until the encoder exits, so callers run one
// dedicated task per live session. `stop` forcibly terminates the encoder
// and is idempotent.

pub mod command;
pub mod runner;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use livebeam_core::config::FfmpegConfig;

pub use command::FfmpegCommand;
pub use runner::{ProcessHandle, ProcessRunner, SpawnedProcess, TokioProcessRunner};

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TranscodeError>;

pub struct Transcoder {
    config: FfmpegConfig,
    output_root: PathBuf,
    runner: Arc<dyn ProcessRunner>,
    shutdown: CancellationToken,
}

impl Transcoder {
    #[must_use]
    pub fn new(config: FfmpegConfig, output_root: PathBuf, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            config,
            output_root,
            runner,
            shutdown: CancellationToken::new(),
        }
    }

    /// Run the encoder for one session, feeding it the raw stream bytes.
    ///
    /// Blocks until the subprocess exits or [`stop`](Self::stop) is called.
    /// A launch failure is a session-scoped soft failure: it is logged and
    /// the call returns without producing output, leaving other sessions
    /// untouched.
    pub async fn start<R>(&self, publish_name: &str, source: R) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let session_dir = self.output_root.join(publish_name);
        for index in 0..self.config.qualities.len() {
            tokio::fs::create_dir_all(session_dir.join(index.to_string())).await?;
        }

        let invocation = command::build(&self.config, &self.output_root, publish_name);
        let mut spawned = match self.runner.spawn(&invocation).await {
            Ok(spawned) => spawned,
            Err(e) => {
                error!(publish_name, "failed to launch encoder: {e}");
                return Ok(());
            }
        };

        let Some(mut stdin) = spawned.stdin.take() else {
            error!(publish_name, "encoder has no stdin pipe");
            return Ok(());
        };

        // Pump the raw stream into the encoder; copy returns once the
        // source ends or the encoder closes its end.
        let pump = tokio::spawn(async move {
            let mut source = source;
            if let Err(e) = tokio::io::copy(&mut source, &mut stdin).await {
                debug!("stream input closed: {e}");
            }
            let _ = stdin.shutdown().await;
        });

        let mut handle = spawned.handle;
        let exited = {
            let wait = handle.wait();
            tokio::pin!(wait);
            tokio::select! {
                status = &mut wait => Some(status),
                () = self.shutdown.cancelled() => None,
            }
        };

        match exited {
            Some(Ok(code)) => info!(publish_name, exit_code = ?code, "encoder exited"),
            Some(Err(e)) => error!(publish_name, "encoder wait failed: {e}"),
            None => {
                if let Err(e) = handle.kill().await {
                    warn!(publish_name, "encoder termination reported: {e}");
                }
                let _ = handle.wait().await;
                info!(publish_name, "encoder terminated");
            }
        }

        pump.abort();
        Ok(())
    }

    /// Forcibly terminate the encoder. Idempotent; calling after the
    /// process already exited is harmless.
    pub fn stop(&self) {
        if self.shutdown.is_cancelled() {
            debug!("transcoder already stopped");
            return;
        }
        self.shutdown.cancel();
    }
}
