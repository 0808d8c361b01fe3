//! Process execution seam.
//!
//! The transcoder talks to a [`ProcessRunner`] rather than `tokio::process`
//! directly so tests can inject a fake encoder.

use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use tokio::io::AsyncWrite;
use tokio::process::{Child, Command};

use crate::command::FfmpegCommand;

/// A spawned encoder: its stdin pipe and a control handle.
pub struct SpawnedProcess {
    pub stdin: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    pub handle: Box<dyn ProcessHandle>,
}

/// Control over one running subprocess.
#[async_trait]
pub trait ProcessHandle: Send {
    /// Wait for the process to exit, returning its exit code when known.
    async fn wait(&mut self) -> io::Result<Option<i32>>;

    /// Forcibly terminate the process. Killing a process that already
    /// exited reports an error; callers treat that as non-fatal.
    async fn kill(&mut self) -> io::Result<()>;
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn spawn(&self, command: &FfmpegCommand) -> io::Result<SpawnedProcess>;
}

/// Production runner on `tokio::process`.
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn spawn(&self, command: &FfmpegCommand) -> io::Result<SpawnedProcess> {
        let mut child = Command::new(&command.binary)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncWrite + Send + Unpin>);

        Ok(SpawnedProcess {
            stdin,
            handle: Box::new(TokioProcessHandle { child }),
        })
    }
}

struct TokioProcessHandle {
    child: Child,
}

#[async_trait]
impl ProcessHandle for TokioProcessHandle {
    async fn wait(&mut self) -> io::Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }
}
