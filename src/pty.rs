//! Pseudo-terminal plumbing for the inferior's I/O.
//!
//! Two pty pairs are allocated: the stdout slave is handed to GDB via
//! `-inferior-tty-set`, the stderr slave is attached by a `2>` shell
//! redirection in the run arguments (GDB starts the inferior through a
//! shell). Both masters are read here and surfaced to the session as
//! separate stdout/stderr line batches.

use std::path::{Path, PathBuf};

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

/// Output captured from the inferior's terminals.
#[derive(Debug, Clone)]
pub enum InferiorOutput {
    StdoutLines(Vec<String>),
    StderrLines(Vec<String>),
}

pub struct PtyChannel {
    slave_path: PathBuf,
    stderr_slave_path: Option<PathBuf>,
    lines: Option<mpsc::Receiver<InferiorOutput>>,
    #[cfg(unix)]
    _slaves: Vec<std::os::fd::OwnedFd>,
    terminal: Option<Child>,
}

impl PtyChannel {
    /// Allocate the terminals for the inferior. With `use_external_terminal`
    /// the configured terminal program is spawned and its tty is borrowed
    /// instead; no output tee and no stderr split happen in that case.
    pub async fn open(
        use_external_terminal: bool,
        external_terminal_command: Option<&str>,
    ) -> AppResult<PtyChannel> {
        if use_external_terminal {
            let command = external_terminal_command.unwrap_or("xterm");
            // the configured command may carry arguments of its own
            let binary = command.split_whitespace().next().unwrap_or("xterm");
            Self::open_external(binary).await
        } else {
            Self::open_internal()
        }
    }

    #[cfg(unix)]
    fn open_internal() -> AppResult<PtyChannel> {
        let (out_master, out_slave, slave_path) = open_pair()?;
        let (err_master, err_slave, stderr_slave_path) = open_pair()?;

        debug!(
            "allocated inferior ttys {} (stdout) and {} (stderr)",
            slave_path.display(),
            stderr_slave_path.display()
        );

        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(read_master(out_master, tx.clone(), InferiorOutput::StdoutLines));
        tokio::spawn(read_master(err_master, tx, InferiorOutput::StderrLines));

        Ok(PtyChannel {
            slave_path,
            stderr_slave_path: Some(stderr_slave_path),
            lines: Some(rx),
            _slaves: vec![out_slave, err_slave],
            terminal: None,
        })
    }

    #[cfg(not(unix))]
    fn open_internal() -> AppResult<PtyChannel> {
        Err(AppError::Pty("pseudo terminals are only supported on unix".to_string()))
    }

    /// Spawn the external terminal running a shell that reports its tty,
    /// then parks. The inferior reuses that tty; the terminal owns display.
    async fn open_external(binary: &str) -> AppResult<PtyChannel> {
        let tty_file =
            std::env::temp_dir().join(format!("gdb-session-tty-{}", std::process::id()));
        let _ = tokio::fs::remove_file(&tty_file).await;

        let script = format!(
            "tty > {}; trap '' INT QUIT TSTP; exec < /dev/null; while :; do sleep 3600; done",
            tty_file.display()
        );
        let child = Command::new(binary)
            .arg("-e")
            .arg("sh")
            .arg("-c")
            .arg(script)
            .spawn()
            .map_err(|e| AppError::Pty(format!("cannot start terminal '{binary}': {e}")))?;

        // wait for the shell inside the terminal to report its tty
        let mut slave_path = None;
        for _ in 0..100 {
            if let Ok(contents) = tokio::fs::read_to_string(&tty_file).await {
                let path = contents.trim();
                if !path.is_empty() {
                    slave_path = Some(PathBuf::from(path));
                    break;
                }
            }
            sleep(Duration::from_millis(50)).await;
        }
        let _ = tokio::fs::remove_file(&tty_file).await;

        let slave_path = slave_path
            .ok_or_else(|| AppError::Pty(format!("terminal '{binary}' did not report a tty")))?;
        debug!("external terminal tty {}", slave_path.display());

        Ok(PtyChannel {
            slave_path,
            stderr_slave_path: None,
            lines: None,
            #[cfg(unix)]
            _slaves: Vec::new(),
            terminal: Some(child),
        })
    }

    pub fn slave_path(&self) -> &Path {
        &self.slave_path
    }

    /// The stderr slave, to be wired up with a `2>` redirection in the run
    /// arguments. `None` when an external terminal owns the inferior's I/O.
    pub fn stderr_slave_path(&self) -> Option<&Path> {
        self.stderr_slave_path.as_deref()
    }

    /// Take the output stream. `None` when an external terminal displays the
    /// inferior's output directly.
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<InferiorOutput>> {
        self.lines.take()
    }

    /// Drain whatever output is still buffered. The inferior exit message
    /// from GDB can overtake the last lines of program output, which travel
    /// on this separate channel.
    pub fn read_remaining(rx: &mut mpsc::Receiver<InferiorOutput>) -> Vec<InferiorOutput> {
        let mut batches = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            batches.push(batch);
        }
        batches
    }
}

impl Drop for PtyChannel {
    fn drop(&mut self) {
        if let Some(terminal) = &mut self.terminal {
            if let Err(e) = terminal.start_kill() {
                warn!("failed to stop external terminal: {e}");
            }
        }
    }
}

#[cfg(unix)]
fn open_pair() -> AppResult<(tokio::fs::File, std::os::fd::OwnedFd, PathBuf)> {
    let pty = nix::pty::openpty(None::<&nix::pty::Winsize>, None::<&nix::sys::termios::Termios>)
        .map_err(|e| AppError::Pty(format!("openpty failed: {e}")))?;
    let slave_path = nix::unistd::ttyname(&pty.slave)
        .map_err(|e| AppError::Pty(format!("cannot name slave terminal: {e}")))?;
    let master = tokio::fs::File::from_std(std::fs::File::from(pty.master));
    Ok((master, pty.slave, slave_path))
}

/// Read one master side, split into lines and batch whatever arrived
/// together, wrapped by `wrap` as the stdout or stderr stream. Partial
/// lines are held back until their newline shows up.
async fn read_master(
    mut master: tokio::fs::File,
    lines: mpsc::Sender<InferiorOutput>,
    wrap: fn(Vec<String>) -> InferiorOutput,
) {
    use tokio::io::AsyncReadExt;

    let mut pending = String::new();
    let mut buf = [0u8; 4096];
    loop {
        match master.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                pending.push_str(&String::from_utf8_lossy(&buf[..n]));
                let mut batch = Vec::new();
                while let Some(pos) = pending.find('\n') {
                    let line = pending[..pos].trim_end_matches('\r').to_string();
                    pending.drain(..=pos);
                    batch.push(line);
                }
                if !batch.is_empty() && lines.send(wrap(batch)).await.is_err() {
                    return;
                }
            }
            // EIO is how a pty master reports that the last slave closed
            Err(_) => break,
        }
    }
    if !pending.is_empty() {
        let _ = lines.send(wrap(vec![pending])).await;
    }
}

#[cfg(all(test, unix))]
mod test {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn inferior_output_arrives_as_lines() {
        let mut channel = PtyChannel::open(false, None).await.expect("open pty");
        let mut output = channel.take_output().expect("internal pty tees output");

        let slave = std::fs::OpenOptions::new()
            .write(true)
            .open(channel.slave_path())
            .expect("open slave");
        (&slave).write_all(b"hello\nworld\n").expect("write");

        let InferiorOutput::StdoutLines(batch) =
            output.recv().await.expect("lines from inferior")
        else {
            panic!("expected stdout lines");
        };
        assert_eq!(batch[0], "hello");
    }

    #[tokio::test]
    async fn stderr_slave_feeds_the_stderr_stream() {
        let mut channel = PtyChannel::open(false, None).await.expect("open pty");
        let mut output = channel.take_output().expect("internal pty tees output");

        let err_path = channel.stderr_slave_path().expect("stderr slave").to_path_buf();
        assert_ne!(err_path, channel.slave_path());

        let slave = std::fs::OpenOptions::new().write(true).open(&err_path).expect("open slave");
        (&slave).write_all(b"oops\n").expect("write");

        let InferiorOutput::StderrLines(batch) =
            output.recv().await.expect("lines from inferior")
        else {
            panic!("expected stderr lines");
        };
        assert_eq!(batch, vec!["oops".to_string()]);
    }

    #[tokio::test]
    async fn read_remaining_drains_buffered_output() {
        let (tx, mut rx) = mpsc::channel(10);
        tx.send(InferiorOutput::StdoutLines(vec!["tail".to_string()])).await.unwrap();
        drop(tx);
        let batches = PtyChannel::read_remaining(&mut rx);
        assert_eq!(batches.len(), 1);
    }
}
