//! Supervision of the GDB child process: spawning, line delivery, writes,
//! the out-of-band SIGINT channel and termination.

use std::ffi::OsString;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::GdbConfig;
use crate::error::{AppError, AppResult};
use crate::mi::output::{Output, StreamKind};

/// Owns the debugger child and its stdin. Parsed MI records arrive on the
/// receiver returned at spawn time; the channel closing signals that GDB
/// exited (its stdout reached EOF).
pub struct ProcessChannel {
    child: Option<Child>,
    stdin: Box<dyn AsyncWrite + Send + Unpin>,
}

impl ProcessChannel {
    /// Spawn GDB in MI mode with the given extra arguments (e.g. `--nx` in
    /// test mode).
    pub fn spawn(
        config: &GdbConfig,
        extra_args: &[OsString],
    ) -> AppResult<(Self, mpsc::Receiver<Output>)> {
        let mut command = Command::new(&config.gdb_path);
        command.arg("--interpreter=mi").args(extra_args);

        debug!("starting GDB process: {:?}", command);

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(AppError::Spawn)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Gdb("no stdout pipe on GDB child".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Gdb("no stderr pipe on GDB child".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Gdb("no stdin pipe on GDB child".to_string()))?;

        info!("GDB started, pid {:?}", child.id());

        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(read_records(BufReader::new(stdout), tx.clone()));
        tokio::spawn(read_stderr(BufReader::new(stderr), tx));

        Ok((ProcessChannel { child: Some(child), stdin: Box::new(stdin) }, rx))
    }

    /// Build a channel over arbitrary streams. Used by tests to script a
    /// debugger over in-memory pipes; `interrupt` and `kill` become no-ops.
    pub fn from_streams(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> (Self, mpsc::Receiver<Output>) {
        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(read_records(BufReader::new(reader), tx));
        (ProcessChannel { child: None, stdin: Box::new(writer) }, rx)
    }

    pub async fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        self.stdin.write_all(bytes).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Send SIGINT to the child. This is the only way to get GDB's attention
    /// while it is not listening for MI input.
    #[cfg(unix)]
    pub fn interrupt(&self) -> AppResult<()> {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.as_ref().and_then(Child::id) else {
            debug!("interrupt requested but no child process is attached");
            return Ok(());
        };
        signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT)
            .map_err(|e| AppError::Gdb(format!("failed to interrupt GDB: {e}")))
    }

    #[cfg(not(unix))]
    pub fn interrupt(&self) -> AppResult<()> {
        Ok(())
    }

    /// Forcibly terminate and reap the child.
    pub async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            info!("killing GDB, pid {:?}", child.id());
            let _ = child.kill().await;
        }
    }

    /// Collect the exit status after GDB has quit on its own.
    pub async fn reap(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.wait().await {
                Ok(status) => info!("GDB exited: {status}"),
                Err(e) => error!("failed to reap GDB: {e}"),
            }
        }
    }
}

/// Read MI lines and forward each as a parsed record. Parse failures are
/// logged and the line is dropped; the reader stays alive.
async fn read_records<T: AsyncRead + Unpin>(mut reader: BufReader<T>, records: mpsc::Sender<Output>) {
    loop {
        let mut buffer = String::new();
        match reader.read_line(&mut buffer).await {
            Ok(0) => return,
            Ok(_) => {
                debug!("GDB: {}", buffer.trim_end());
                let record = match Output::parse(&buffer) {
                    Ok(record) => record,
                    Err(e) => {
                        error!("dropping unparseable MI line: {e}");
                        continue;
                    }
                };
                if records.send(record).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                error!("error reading GDB output: {e}");
                return;
            }
        }
    }
}

/// GDB's own stderr surfaces as log-stream records.
async fn read_stderr<T: AsyncRead + Unpin>(mut reader: BufReader<T>, records: mpsc::Sender<Output>) {
    loop {
        let mut buffer = String::new();
        match reader.read_line(&mut buffer).await {
            Ok(0) => return,
            Ok(_) => {
                let data = buffer.trim_end().to_string();
                debug!("GDB stderr: {data}");
                if records.send(Output::Stream { kind: StreamKind::Log, data }).await.is_err() {
                    return;
                }
            }
            Err(_) => return,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mi::output::ResultClass;

    #[tokio::test]
    async fn delivers_parsed_records_and_accepts_writes() {
        let (gdb_side, session_read) = tokio::io::duplex(1024);
        let (session_write, mut gdb_read) = tokio::io::duplex(1024);
        let (mut channel, mut records) = ProcessChannel::from_streams(session_read, session_write);

        let (_gdb_in, mut gdb_out) = tokio::io::split(gdb_side);
        gdb_out.write_all(b"1^done\n(gdb) \n").await.unwrap();

        let record = records.recv().await.expect("first record");
        match record {
            Output::Result(r) => {
                assert_eq!(r.token, Some(1));
                assert_eq!(r.class, ResultClass::Done);
            }
            other => panic!("unexpected record: {other:?}"),
        }
        assert!(matches!(records.recv().await, Some(Output::Prompt)));

        channel.write(b"2-exec-run\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = tokio::io::AsyncReadExt::read(&mut gdb_read, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"2-exec-run\n");
    }

    #[tokio::test]
    async fn channel_closes_on_eof() {
        let (gdb_side, session_read) = tokio::io::duplex(64);
        let (session_write, _gdb_read) = tokio::io::duplex(64);
        let (_channel, mut records) = ProcessChannel::from_streams(session_read, session_write);
        drop(gdb_side);
        assert!(records.recv().await.is_none());
    }
}
