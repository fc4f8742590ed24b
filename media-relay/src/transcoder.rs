use std::{
    process::Stdio,
    sync::{Arc, Mutex},
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    sync::mpsc,
};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::{MediaError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Diagnostics {
    Ignore,
    /// Forward stdout and stderr, line by line.
    Capture,
}

/// Launches the external transcoder. Implemented by [`FfmpegTranscoder`] and by
/// in-process fakes in tests.
pub trait Transcoder: Send + Sync {
    fn spawn(&self, args: Vec<String>, diagnostics: Diagnostics) -> Result<TranscoderProcess>;
}

pub fn default_ffmpeg_path() -> &'static str {
    if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" }
}

/// Handle held by whoever owns the process.
pub struct TranscoderProcess {
    kill: CancellationToken,
    exited: CancellationToken,
    exit_code: Arc<Mutex<Option<i32>>>,
    diagnostics: Option<mpsc::UnboundedReceiver<String>>,
}

/// Handle held by the task driving the process.
pub struct ProcessControl {
    kill: CancellationToken,
    exited: CancellationToken,
    exit_code: Arc<Mutex<Option<i32>>>,
    diagnostics: Option<mpsc::UnboundedSender<String>>,
}

impl TranscoderProcess {
    pub fn new(diagnostics: Diagnostics) -> (Self, ProcessControl) {
        let kill = CancellationToken::new();
        let exited = CancellationToken::new();
        let exit_code = Arc::new(Mutex::new(None));
        let (tx, rx) = match diagnostics {
            Diagnostics::Capture => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Some(tx), Some(rx))
            }
            Diagnostics::Ignore => (None, None),
        };
        let process = Self {
            kill: kill.clone(),
            exited: exited.clone(),
            exit_code: Arc::clone(&exit_code),
            diagnostics: rx,
        };
        let control = ProcessControl {
            kill,
            exited,
            exit_code,
            diagnostics: tx,
        };
        (process, control)
    }

    /// Idempotent.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    pub fn kill_token(&self) -> CancellationToken {
        self.kill.clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exited.is_cancelled()
    }

    /// Waits for exit; `None` when killed or terminated by a signal.
    pub async fn wait(&self) -> Option<i32> {
        self.exited.cancelled().await;
        *self.exit_code.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn take_diagnostics(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.diagnostics.take()
    }
}

impl ProcessControl {
    pub fn killed(&self) -> WaitForCancellationFuture<'_> {
        self.kill.cancelled()
    }

    pub fn is_killed(&self) -> bool {
        self.kill.is_cancelled()
    }

    pub fn diagnostic(&self, line: impl Into<String>) {
        if let Some(tx) = &self.diagnostics {
            let _ = tx.send(line.into());
        }
    }

    pub fn diagnostics_sender(&self) -> Option<mpsc::UnboundedSender<String>> {
        self.diagnostics.clone()
    }

    pub fn exit(self, code: Option<i32>) {
        *self.exit_code.lock().unwrap_or_else(|e| e.into_inner()) = code;
        // Drop marks the process exited.
    }
}

impl Drop for ProcessControl {
    fn drop(&mut self) {
        self.exited.cancel();
    }
}

pub struct FfmpegTranscoder {
    path: String,
}

impl FfmpegTranscoder {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new(default_ffmpeg_path())
    }
}

impl Transcoder for FfmpegTranscoder {
    fn spawn(&self, args: Vec<String>, diagnostics: Diagnostics) -> Result<TranscoderProcess> {
        log::info!("transcoder: {} {}", self.path, args.join(" "));

        let mut command = tokio::process::Command::new(&self.path);
        command.args(&args).stdin(Stdio::null()).kill_on_drop(true);
        match diagnostics {
            Diagnostics::Capture => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            Diagnostics::Ignore => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let mut child = command
            .spawn()
            .map_err(|e| MediaError::Transcoder(format!("spawn {}: {}", self.path, e)))?;

        let (process, control) = TranscoderProcess::new(diagnostics);
        if let Some(tx) = control.diagnostics_sender() {
            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(forward_lines(stdout, tx.clone()));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(forward_lines(stderr, tx));
            }
        }

        let path = self.path.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => Some(status),
                _ = control.killed() => None,
            };
            let code = match status {
                Some(Ok(status)) => {
                    log::info!("transcoder {} exited: {}", path, status);
                    status.code()
                }
                Some(Err(e)) => {
                    log::error!("transcoder {} wait error: {:#}", path, e);
                    None
                }
                None => {
                    if let Err(e) = child.kill().await {
                        log::warn!("transcoder {} kill error: {:#}", path, e);
                    }
                    log::debug!("transcoder {} killed", path);
                    None
                }
            };
            control.exit(code);
        });

        Ok(process)
    }
}

/// Forwards output line by line. Bytes that are not UTF-8 (stream titles and
/// other metadata) are replaced rather than ending the stream.
async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if tx.send(line.to_string()).is_err() {
                    break;
                }
            }
            Err(e) => {
                log::debug!("transcoder output read error: {:#}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "transcoder_test.rs"]
mod transcoder_test;
