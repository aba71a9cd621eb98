//! Subprocess plumbing: spawning the engine and moving lines in and out.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// One event from the engine's output streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLine {
    Stdout(String),
    Stderr(String),
    /// The engine closed its stdout (exit or crash).
    Eof,
}

type LineSink = Box<dyn AsyncWrite + Send + Sync + Unpin>;

/// Owns the engine subprocess and its stdin. Stdout and stderr are
/// drained by background tasks that feed an [`EngineLine`] channel.
///
/// A transport can also be offline (no subprocess), in which case every
/// write is silently skipped; the driver keeps tracking intended option
/// state regardless.
pub struct Transport {
    child: Option<Child>,
    stdin: Option<LineSink>,
}

impl Transport {
    /// A transport with no subprocess behind it.
    pub fn offline() -> Self {
        Self {
            child: None,
            stdin: None,
        }
    }

    /// Spawn the engine executable with its working directory set to the
    /// executable's parent, and start the line-reader tasks.
    pub fn spawn(
        path: &Path,
        args: &[String],
        lines: mpsc::Sender<EngineLine>,
    ) -> io::Result<Self> {
        let mut command = Command::new(path);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "engine stdin unavailable"))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "engine stdout unavailable")
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "engine stderr unavailable")
        })?;

        spawn_line_reader(stdout, lines.clone(), EngineLine::Stdout, true);
        spawn_line_reader(stderr, lines, EngineLine::Stderr, false);

        Ok(Self {
            child: Some(child),
            stdin: Some(Box::new(stdin)),
        })
    }

    /// Wrap an arbitrary writer as the engine's stdin. Lets a hub embed
    /// the driver behind a mock engine or a non-process transport.
    pub fn from_writer(writer: LineSink) -> Self {
        Self {
            child: None,
            stdin: Some(writer),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stdin.is_some()
    }

    /// Write one command line, newline-terminated, and flush.
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Ok(());
        };
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }

    /// Close stdin, give the engine `grace` to exit on its own, then
    /// kill it.
    pub async fn wait_or_kill(&mut self, grace: Duration) {
        self.stdin = None;
        let Some(mut child) = self.child.take() else {
            return;
        };
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => tracing::info!("engine exited: {status}"),
            Ok(Err(e)) => tracing::warn!("failed to reap engine: {e}"),
            Err(_) => {
                tracing::warn!("engine did not exit in time, killing it");
                let _ = child.kill().await;
            }
        }
    }
}

fn spawn_line_reader<R>(
    stream: R,
    tx: mpsc::Sender<EngineLine>,
    wrap: fn(String) -> EngineLine,
    report_eof: bool,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    if report_eof {
                        let _ = tx.send(EngineLine::Eof).await;
                    }
                    break;
                }
                Ok(_) => {
                    if tx.send(wrap(line.trim().to_string())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("error reading from engine: {e}");
                    if report_eof {
                        let _ = tx.send(EngineLine::Eof).await;
                    }
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_write_line_appends_newline() {
        let (writer, mut reader) = tokio::io::duplex(1024);
        let mut transport = Transport::from_writer(Box::new(writer));
        transport.write_line("go infinite").await.unwrap();
        transport.write_line("stop").await.unwrap();
        drop(transport);

        let mut buf = String::new();
        reader.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "go infinite\nstop\n");
    }

    #[tokio::test]
    async fn test_offline_write_is_a_no_op() {
        let mut transport = Transport::offline();
        assert!(!transport.is_connected());
        transport.write_line("quit").await.unwrap();
    }

    #[tokio::test]
    async fn test_line_reader_reports_eof() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::channel(8);
        spawn_line_reader(reader, tx, EngineLine::Stdout, true);

        writer.write_all(b"uciok\r\nreadyok\n").await.unwrap();
        drop(writer);

        assert_eq!(rx.recv().await, Some(EngineLine::Stdout("uciok".into())));
        assert_eq!(rx.recv().await, Some(EngineLine::Stdout("readyok".into())));
        assert_eq!(rx.recv().await, Some(EngineLine::Eof));
    }
}
