//! In-flight command bookkeeping and record demultiplexing.
//!
//! The driver owns the process channel and at most one command at a time.
//! Parsed records either resolve that command (token match) or are routed
//! onward as asynchronous events for the session to act on.

use tracing::{debug, warn};

use crate::error::AppResult;
use crate::events::{EventSink, SessionEvent};
use crate::mi::output::{AsyncClass, AsyncKind, AsyncRecord, Output, ResultRecord, StreamKind};
use crate::mi::commands::GdbCommand;
use crate::process::ProcessChannel;

/// What a parsed record means to the session.
pub enum DriverEvent {
    /// The in-flight command completed with this result
    Resolved(GdbCommand, ResultRecord),
    /// `*stopped`
    Stopped(AsyncRecord),
    /// `*running`
    Running,
    /// `=...` notification
    Notification(AsyncRecord),
    /// `~` console output not captured by the in-flight command
    ConsoleStream(String),
    /// `@` target output
    TargetStream(String),
    /// `&` log output
    LogStream(String),
    /// A line that was not MI at all
    ConsoleText(String),
    /// `(gdb) ` with no command pending
    Prompt,
    Ignored,
}

pub struct GdbDriver {
    channel: ProcessChannel,
    current: Option<GdbCommand>,
    ready: bool,
}

impl GdbDriver {
    pub fn new(channel: ProcessChannel) -> Self {
        GdbDriver { channel, current: None, ready: true }
    }

    /// Ready means the last command has completed and the next one may be
    /// written.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn current_command(&self) -> Option<&GdbCommand> {
        self.current.as_ref()
    }

    /// Transmit a rendered command and take ownership of it until its result
    /// arrives. The text must be newline terminated (the session checks).
    pub async fn execute(
        &mut self,
        command: GdbCommand,
        text: String,
        events: &EventSink,
    ) -> AppResult<()> {
        debug!("SEND: {}", text.trim_end());
        let echo = format!("(gdb) {}", text);
        if command.is_user_command() {
            events.send(SessionEvent::GdbUserCommandStdout(echo));
        } else {
            events.send(SessionEvent::GdbInternalCommandStdout(echo));
        }

        self.channel.write(text.as_bytes()).await?;
        self.current = Some(command);
        self.ready = false;
        Ok(())
    }

    pub fn handle_output(&mut self, output: Output) -> DriverEvent {
        match output {
            Output::Result(record) => {
                let matches = match &self.current {
                    Some(cmd) => record.token == Some(cmd.token()) || record.token.is_none(),
                    None => false,
                };
                if matches {
                    let cmd = self.current.take().expect("checked above");
                    self.ready = true;
                    DriverEvent::Resolved(cmd, record)
                } else if let Some(cmd) = &self.current {
                    warn!(
                        "result token {:?} does not match in-flight command {}",
                        record.token,
                        cmd.token()
                    );
                    DriverEvent::Ignored
                } else {
                    debug!("result record with no command in flight: {:?}", record.class);
                    DriverEvent::Ignored
                }
            }
            Output::Async(record) => match record.kind {
                AsyncKind::Exec => match record.class {
                    AsyncClass::Stopped => DriverEvent::Stopped(record),
                    AsyncClass::Running => DriverEvent::Running,
                    ref other => {
                        debug!("unhandled exec async record: {:?}", other);
                        DriverEvent::Ignored
                    }
                },
                AsyncKind::Notify => DriverEvent::Notification(record),
                AsyncKind::Status => {
                    debug!("status async record: {:?}", record.class);
                    DriverEvent::Ignored
                }
            },
            Output::Stream { kind, data } => match kind {
                StreamKind::Console => {
                    if let Some(cmd) = &mut self.current {
                        if cmd.captures_console() {
                            cmd.push_console_line(data);
                            return DriverEvent::Ignored;
                        }
                    }
                    DriverEvent::ConsoleStream(data)
                }
                StreamKind::Target => DriverEvent::TargetStream(data),
                StreamKind::Log => DriverEvent::LogStream(data),
            },
            Output::Prompt => {
                if self.current.is_none() {
                    self.ready = true;
                    DriverEvent::Prompt
                } else {
                    debug!("prompt while a command is still pending");
                    DriverEvent::Ignored
                }
            }
            Output::ConsoleText(text) => DriverEvent::ConsoleText(text),
        }
    }

    pub fn interrupt(&self) -> AppResult<()> {
        self.channel.interrupt()
    }

    pub async fn kill(&mut self) {
        self.channel.kill().await;
    }

    pub async fn reap(&mut self) {
        self.channel.reap().await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mi::commands::CommandKind;
    use crate::mi::output::ResultClass;

    // the returned duplex ends keep the fake pipes open for the driver
    fn scripted_driver() -> (GdbDriver, tokio::io::DuplexStream, tokio::io::DuplexStream) {
        let (gdb_side, session_read) = tokio::io::duplex(1024);
        let (session_write, gdb_read) = tokio::io::duplex(1024);
        let (channel, _records) = ProcessChannel::from_streams(session_read, session_write);
        (GdbDriver::new(channel), gdb_side, gdb_read)
    }

    #[tokio::test]
    async fn resolves_in_flight_command_by_token() {
        let (mut driver, _gdb_in, _gdb_out) = scripted_driver();
        let (events, _rx) = EventSink::channel();

        let mut cmd = GdbCommand::new(CommandKind::ExecRun, "");
        cmd.assign_token(7);
        let text = cmd.render();
        driver.execute(cmd, text, &events).await.unwrap();
        assert!(!driver.is_ready());

        let Output::Result(record) = Output::parse("7^running\n").unwrap() else {
            panic!("not a result");
        };
        match driver.handle_output(Output::Result(record)) {
            DriverEvent::Resolved(cmd, record) => {
                assert_eq!(cmd.token(), 7);
                assert_eq!(record.class, ResultClass::Running);
            }
            _ => panic!("expected resolution"),
        }
        assert!(driver.is_ready());
    }

    #[tokio::test]
    async fn mismatched_token_leaves_command_in_flight() {
        let (mut driver, _gdb_in, _gdb_out) = scripted_driver();
        let (events, _rx) = EventSink::channel();

        let mut cmd = GdbCommand::new(CommandKind::BreakList, "");
        cmd.assign_token(3);
        let text = cmd.render();
        driver.execute(cmd, text, &events).await.unwrap();

        let Output::Result(record) = Output::parse("9^done\n").unwrap() else {
            panic!("not a result");
        };
        assert!(matches!(driver.handle_output(Output::Result(record)), DriverEvent::Ignored));
        assert!(!driver.is_ready());
        assert!(driver.current_command().is_some());
    }

    #[tokio::test]
    async fn console_lines_are_captured_for_cli_commands() {
        let (mut driver, _gdb_in, _gdb_out) = scripted_driver();
        let (events, _rx) = EventSink::channel();

        let mut cmd = GdbCommand::cli("show version").with_console_handler(|_, _| {});
        cmd.assign_token(1);
        let text = cmd.render();
        driver.execute(cmd, text, &events).await.unwrap();

        let stream = Output::Stream {
            kind: StreamKind::Console,
            data: "GNU gdb 9.2\n".to_string(),
        };
        assert!(matches!(driver.handle_output(stream), DriverEvent::Ignored));

        let Output::Result(record) = Output::parse("^done\n").unwrap() else {
            panic!("not a result");
        };
        let DriverEvent::Resolved(mut cmd, _) = driver.handle_output(Output::Result(record)) else {
            panic!("expected resolution");
        };
        assert_eq!(cmd.take_console_lines(), vec!["GNU gdb 9.2\n".to_string()]);
    }

    #[tokio::test]
    async fn prompt_only_signals_ready_when_idle() {
        let (mut driver, _gdb_in, _gdb_out) = scripted_driver();
        assert!(matches!(driver.handle_output(Output::Prompt), DriverEvent::Prompt));

        let (events, _rx) = EventSink::channel();
        let mut cmd = GdbCommand::new(CommandKind::BreakList, "");
        cmd.assign_token(2);
        let text = cmd.render();
        driver.execute(cmd, text, &events).await.unwrap();
        assert!(matches!(driver.handle_output(Output::Prompt), DriverEvent::Ignored));
    }
}
