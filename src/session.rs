//! The debug session: owns the driver, the command queue, the PTY and the
//! feature controllers; derives the user-facing session state from the
//! debugger state bitfield; exposes the operations a front-end binds to.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use bitflags::bitflags;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::config::{GdbConfig, LaunchConfig, SessionContext, StartWith};
use crate::controllers::breakpoints::BreakpointController;
use crate::controllers::disasm::{self, DisassemblyController, DisassemblyFlavor};
use crate::controllers::frames::{self, FrameStackModel};
use crate::controllers::variables::{self, VariableController};
use crate::driver::{DriverEvent, GdbDriver};
use crate::error::AppResult;
use crate::events::{DebuggerEvent, EventSink, SessionEvent};
use crate::mi::MiValueExt;
use crate::mi::commands::{CommandFlags, CommandKind, CompletionHandler, GdbCommand};
use crate::mi::output::{AsyncClass, AsyncRecord, BreakpointEvent, Output, ResultClass, ResultRecord, ThreadEvent};
use crate::process::ProcessChannel;
use crate::pty::{InferiorOutput, PtyChannel};
use crate::queue::CommandQueue;

bitflags! {
    /// Independent debugger conditions. The session state shown to the user
    /// is derived from this set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DbgFlags: u32 {
        const DBG_NOT_STARTED = 1 << 0;
        const APP_NOT_STARTED = 1 << 1;
        const PROGRAM_EXITED = 1 << 2;
        const ATTACHED = 1 << 3;
        const CORE = 1 << 4;
        const SHUTTING_DOWN = 1 << 5;
        const DBG_BUSY = 1 << 6;
        const APP_RUNNING = 1 << 7;
        /// GDB is not reading MI input; a SIGINT is needed to reach it
        const DBG_NOT_LISTENING = 1 << 8;
        /// Re-queue a continue once the interrupt-induced stop has drained
        const AUTOMATIC_CONTINUE = 1 << 9;
        const INTERRUPT_SENT = 1 << 10;
    }
}

/// Coarse user-facing state, a pure function of the flags and the previous
/// session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Starting,
    Active,
    Paused,
    Stopped,
    Ended,
}

/// Operations a front-end can request. Each is fire-and-forget; outcomes
/// arrive on the event bus.
#[derive(Debug)]
pub enum SessionOp {
    StartDebugger,
    StartProgram(Box<LaunchConfig>),
    ExamineCoreFile { binary: PathBuf, core: PathBuf },
    AttachToProcess(u32),
    Run,
    StepOver,
    StepOverInstruction,
    StepInto,
    StepIntoInstruction,
    StepOut,
    RunUntil { file: PathBuf, line: u32 },
    RunUntilAddress(String),
    JumpTo { file: PathBuf, line: u32 },
    JumpToAddress(String),
    Interrupt,
    Restart,
    Kill,
    StopDebugger,
    UserCommand(String),
    Evaluate(String),
    AddWatch(String),
    SetDisassemblyFlavor(DisassemblyFlavor),
    Disassemble { start: String, end: String },
    DescribeStatus,
}

/// Cheap cloneable handle for submitting operations to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    ops: mpsc::UnboundedSender<SessionOp>,
}

impl SessionHandle {
    pub fn submit(&self, op: SessionOp) {
        let _ = self.ops.send(op);
    }
}

enum IoItem {
    Record(Output),
    RecordsClosed,
    Inferior(InferiorOutput),
    InferiorClosed,
    ShutdownTimer,
}

pub struct Session {
    config: GdbConfig,
    testing: bool,

    state: DbgFlags,
    session_state: SessionState,
    state_reload_needed: bool,
    state_reload_in_progress: bool,

    queue: CommandQueue,
    driver: Option<GdbDriver>,
    records_rx: Option<mpsc::Receiver<Output>>,

    tty: Option<PtyChannel>,
    inferior_rx: Option<mpsc::Receiver<InferiorOutput>>,

    pub(crate) breakpoints: BreakpointController,
    pub(crate) variables: VariableController,
    pub(crate) frames: FrameStackModel,
    pub(crate) disassembly: DisassemblyController,

    pub(crate) events: EventSink,
    ops_rx: mpsc::UnboundedReceiver<SessionOp>,
    shutdown_deadline: Option<Instant>,

    context: Option<SessionContext>,
    current_position: Option<(PathBuf, usize, String)>,
}

impl Session {
    pub fn new(
        config: GdbConfig,
    ) -> (Session, SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = EventSink::channel();
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let session = Session {
            config,
            testing: false,
            state: DbgFlags::DBG_NOT_STARTED | DbgFlags::APP_NOT_STARTED,
            session_state: SessionState::NotStarted,
            state_reload_needed: false,
            state_reload_in_progress: false,
            queue: CommandQueue::new(),
            driver: None,
            records_rx: None,
            tty: None,
            inferior_rx: None,
            breakpoints: BreakpointController::default(),
            variables: VariableController::default(),
            frames: FrameStackModel::default(),
            disassembly: DisassemblyController::default(),
            events,
            ops_rx,
            shutdown_deadline: None,
            context: None,
            current_position: None,
        };
        (session, SessionHandle { ops: ops_tx }, events_rx)
    }

    pub fn set_testing(&mut self, testing: bool) {
        self.testing = testing;
    }

    pub fn debugger_state(&self) -> DbgFlags {
        self.state
    }

    pub fn state(&self) -> SessionState {
        self.session_state
    }

    pub fn state_is_on(&self, flags: DbgFlags) -> bool {
        self.state.intersects(flags)
    }

    pub fn queued_commands(&self) -> usize {
        self.queue.count()
    }

    pub fn current_position(&self) -> Option<(&Path, usize, &str)> {
        self.current_position.as_ref().map(|(f, l, a)| (f.as_path(), *l, a.as_str()))
    }

    /// The configuration snapshot of the running inferior, if any.
    pub fn context(&self) -> Option<&SessionContext> {
        self.context.as_ref()
    }

    pub fn inferior_tty_path(&self) -> Option<&Path> {
        self.tty.as_ref().map(PtyChannel::slave_path)
    }

    pub fn breakpoint_controller(&self) -> &BreakpointController {
        &self.breakpoints
    }

    pub fn variable_controller(&self) -> &VariableController {
        &self.variables
    }

    pub fn frame_stack_model(&self) -> &FrameStackModel {
        &self.frames
    }

    pub fn disassembly_controller(&self) -> &DisassemblyController {
        &self.disassembly
    }

    // ------------------------------------------------------------------
    // Event loop

    /// Drive the session until the last handle is dropped.
    pub async fn run(&mut self) {
        loop {
            enum Item {
                Op(SessionOp),
                Io(IoItem),
            }
            let item = tokio::select! {
                op = self.ops_rx.recv() => match op {
                    Some(op) => Item::Op(op),
                    None => break,
                },
                record = recv_opt(&mut self.records_rx) => Item::Io(match record {
                    Some(record) => IoItem::Record(record),
                    None => IoItem::RecordsClosed,
                }),
                batch = recv_opt(&mut self.inferior_rx) => Item::Io(match batch {
                    Some(batch) => IoItem::Inferior(batch),
                    None => IoItem::InferiorClosed,
                }),
                _ = sleep_opt(self.shutdown_deadline) => Item::Io(IoItem::ShutdownTimer),
            };
            match item {
                Item::Op(op) => self.handle_op(op).await,
                Item::Io(io) => self.handle_io(io).await,
            }
            self.execute_cmds().await;
        }
    }

    /// Wait for and process one I/O item (record, inferior output or the
    /// shutdown timer). Returns false once there is nothing left to wait on.
    /// Lets embedders and tests drive the session without [`Session::run`].
    pub async fn process_one(&mut self) -> bool {
        if self.records_rx.is_none() && self.inferior_rx.is_none() && self.shutdown_deadline.is_none()
        {
            return false;
        }
        let item = tokio::select! {
            record = recv_opt(&mut self.records_rx) => match record {
                Some(record) => IoItem::Record(record),
                None => IoItem::RecordsClosed,
            },
            batch = recv_opt(&mut self.inferior_rx) => match batch {
                Some(batch) => IoItem::Inferior(batch),
                None => IoItem::InferiorClosed,
            },
            _ = sleep_opt(self.shutdown_deadline) => IoItem::ShutdownTimer,
        };
        self.handle_io(item).await;
        self.execute_cmds().await;
        true
    }

    async fn handle_io(&mut self, item: IoItem) {
        match item {
            IoItem::Record(output) => self.handle_record(output).await,
            IoItem::RecordsClosed => {
                self.records_rx = None;
                self.gdb_exited().await;
            }
            IoItem::Inferior(batch) => self.emit_inferior(batch),
            IoItem::InferiorClosed => self.inferior_rx = None,
            IoItem::ShutdownTimer => {
                self.shutdown_deadline = None;
                self.kill_gdb_now().await;
            }
        }
    }

    async fn handle_op(&mut self, op: SessionOp) {
        match op {
            SessionOp::StartDebugger => {
                let _ = self.start_debugger();
            }
            SessionOp::StartProgram(cfg) => {
                let _ = self.start_program(&cfg).await;
            }
            SessionOp::ExamineCoreFile { binary, core } => {
                let _ = self.examine_core_file(&binary, &core);
            }
            SessionOp::AttachToProcess(pid) => {
                let _ = self.attach_to_process(pid);
            }
            SessionOp::Run => self.run_program(),
            SessionOp::StepOver => self.step_over(),
            SessionOp::StepOverInstruction => self.step_over_instruction(),
            SessionOp::StepInto => self.step_into(),
            SessionOp::StepIntoInstruction => self.step_into_instruction(),
            SessionOp::StepOut => self.step_out(),
            SessionOp::RunUntil { file, line } => self.run_until(&file, line),
            SessionOp::RunUntilAddress(addr) => self.run_until_address(&addr),
            SessionOp::JumpTo { file, line } => self.jump_to(&file, line),
            SessionOp::JumpToAddress(addr) => self.jump_to_address(&addr),
            SessionOp::Interrupt => self.interrupt(),
            SessionOp::Restart => self.restart(),
            SessionOp::Kill => self.kill_inferior(),
            SessionOp::StopDebugger => self.stop_debugger(),
            SessionOp::UserCommand(text) => self.add_user_command(text),
            SessionOp::Evaluate(expr) => self.evaluate(expr),
            SessionOp::AddWatch(expr) => self.add_watch(expr),
            SessionOp::SetDisassemblyFlavor(flavor) => self.set_disassembly_flavor(flavor),
            SessionOp::Disassemble { start, end } => self.disassemble(start, end),
            SessionOp::DescribeStatus => {
                let status = self.describe_status();
                self.events.show_message(status, 0);
            }
        }
    }

    // ------------------------------------------------------------------
    // Startup

    /// Spawn GDB and queue the initialization sequence.
    pub fn start_debugger(&mut self) -> AppResult<()> {
        debug!("starting debugger");
        if self.driver.is_some() {
            warn!("debugger object still existed, discarding");
            self.driver = None;
            self.records_rx = None;
        }

        let mut extra_args: Vec<OsString> = Vec::new();
        if self.testing {
            // do not load any .gdbinit files
            extra_args.push("--nx".into());
        }

        match ProcessChannel::spawn(&self.config, &extra_args) {
            Ok((channel, records)) => {
                self.driver = Some(GdbDriver::new(channel));
                self.records_rx = Some(records);
            }
            Err(e) => {
                self.events.show_message(format!("Could not start debugger: {e}"), 0);
                self.session_state = SessionState::Ended;
                self.events.send(SessionEvent::StateChanged(SessionState::Ended));
                return Err(e);
            }
        }

        self.set_state_off(DbgFlags::DBG_NOT_STARTED);
        self.queue_init_commands();
        Ok(())
    }

    /// Same initialization, but over caller-supplied streams instead of a
    /// real child process. `interrupt` and `kill` become no-ops.
    pub fn start_debugger_over(
        &mut self,
        reader: impl tokio::io::AsyncRead + Send + Unpin + 'static,
        writer: impl tokio::io::AsyncWrite + Send + Unpin + 'static,
    ) {
        let (channel, records) = ProcessChannel::from_streams(reader, writer);
        self.driver = Some(GdbDriver::new(channel));
        self.records_rx = Some(records);
        self.set_state_off(DbgFlags::DBG_NOT_STARTED);
        self.queue_init_commands();
    }

    fn queue_init_commands(&mut self) {
        self.queue_cmd(
            GdbCommand::cli("show version")
                .with_console_handler(|session, lines| session.handle_version(lines)),
        );

        // one variable per line
        self.queue_cmd(GdbCommand::new(CommandKind::GdbSet, "width 0"));
        self.queue_cmd(GdbCommand::new(CommandKind::GdbSet, "height 0"));

        for signal in ["SIG32", "SIG41", "SIG42", "SIG43"] {
            self.queue_cmd(GdbCommand::new(
                CommandKind::SignalHandle,
                format!("{signal} pass nostop noprint"),
            ));
        }

        self.queue_cmd(GdbCommand::new(CommandKind::EnablePrettyPrinting, ""));
        self.queue_cmd(GdbCommand::new(CommandKind::GdbSet, "charset UTF-8"));
        self.queue_cmd(GdbCommand::new(CommandKind::GdbSet, "print sevenbit-strings off"));

        if let Some(init_file) = self.config.printers_init_file() {
            if let Some(dir) = init_file.parent() {
                let quoted =
                    dir.display().to_string().replace('\\', "\\\\").replace('"', "\\\"");
                self.queue_cmd(GdbCommand::new(
                    CommandKind::NonMi,
                    format!("python sys.path.insert(0, \"{quoted}\")"),
                ));
            }
            self.queue_cmd(GdbCommand::new(
                CommandKind::NonMi,
                format!("source {}", init_file.display()),
            ));
        }
    }

    fn handle_version(&mut self, lines: &[String]) {
        static VERSION: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"([7-9])\.([0-9]+)(\.([0-9]+))?").unwrap());

        let first = lines.first().map(String::as_str).unwrap_or("");
        debug!("gdb version: {}", first.trim_end());
        if !VERSION.is_match(first) {
            self.events.show_message(
                format!("You need gdb 7.0.0 or higher. You are using: {}", first.trim_end()),
                0,
            );
            self.stop_debugger();
        }
    }

    /// Resolve the launch configuration, open the inferior terminal and
    /// queue everything up to and including `exec-run`.
    pub async fn start_program(&mut self, cfg: &LaunchConfig) -> AppResult<()> {
        if cfg.testing {
            self.testing = true;
        }
        if self.state.contains(DbgFlags::APP_NOT_STARTED) {
            self.events.show_message("Running program", 1000);
        }
        if self.state.contains(DbgFlags::DBG_NOT_STARTED) {
            self.start_debugger()?;
        }
        if self.state.contains(DbgFlags::SHUTTING_DOWN) {
            warn!("tried to run while debugger is shutting down");
            return Ok(());
        }

        if cfg.break_on_start {
            self.breakpoints.ensure_pending("main");
        }

        let context = SessionContext::from_launch(cfg);

        let mut tty = match PtyChannel::open(
            cfg.use_external_terminal,
            cfg.external_terminal_command.as_deref(),
        )
        .await
        {
            Ok(tty) => tty,
            Err(e) => {
                self.events.show_message(e.to_string(), 0);
                return Err(e);
            }
        };
        self.inferior_rx = tty.take_output();

        self.queue_cmd(GdbCommand::new(
            CommandKind::InferiorTtySet,
            tty.slave_path().display().to_string(),
        ));

        self.queue_cmd(GdbCommand::new(
            CommandKind::EnvironmentCd,
            quote_path(&context.working_directory),
        ));

        let mut run_arguments = join_args(&context.arguments);
        if let Some(err_tty) = tty.stderr_slave_path() {
            // GDB starts the inferior through a shell, so a redirection in
            // the arguments attaches stderr to its own tty
            if !run_arguments.is_empty() {
                run_arguments.push(' ');
            }
            run_arguments.push_str(&format!("2>{}", err_tty.display()));
        }
        if !run_arguments.is_empty() {
            self.queue_cmd(GdbCommand::new(CommandKind::ExecArguments, run_arguments));
        }

        for envvar in &context.environment {
            self.queue_cmd(GdbCommand::new(CommandKind::GdbSet, format!("environment {envvar}")));
        }

        // Give the breakpoint side a chance to insert breakpoints before
        // anything can run.
        self.set_state_on(DbgFlags::DBG_BUSY);
        self.raise_event(DebuggerEvent::DebuggerReady);

        self.queue_cmd(GdbCommand::new(
            CommandKind::GdbSet,
            if cfg.display_static_members {
                "print static-members on"
            } else {
                "print static-members off"
            },
        ));
        self.queue_cmd(GdbCommand::new(
            CommandKind::GdbSet,
            if cfg.asm_demangle { "print asm-demangle on" } else { "print asm-demangle off" },
        ));

        if let Some(script) = &cfg.remote_gdb_config_script {
            self.queue_cmd(GdbCommand::new(
                CommandKind::NonMi,
                format!("source {}", quote_path(script)),
            ));
        }

        if let Some(shell_script) = &cfg.remote_gdb_shell_script {
            // remote setup runs fire-and-forget, wired to the inferior tty
            let tty_path = tty.slave_path().display().to_string();
            let line = format!(
                "{} {} >{tty_path} 2>&1 <{tty_path}",
                quote_path(shell_script),
                quote_path(&context.executable),
            );
            debug!("starting remote shell script: sh -c {line}");
            match tokio::process::Command::new("sh").arg("-c").arg(line).spawn() {
                Ok(_child) => {}
                Err(e) => self.events.show_message(format!("Could not run shell script: {e}"), 0),
            }
        }

        if let Some(run_script) = cfg.remote_gdb_run_script.clone() {
            // The script may itself contain "run" or "continue"; breakpoints
            // must be in place first, and ones the script re-creates are
            // collapsed as duplicates.
            self.queue_cmd(
                GdbCommand::sentinel(move |session| {
                    session.send_pending_breakpoints();
                    session.breakpoints.set_delete_duplicate_breakpoints(true);
                    debug!("running gdb script {}", run_script.display());
                    session.queue_cmd(
                        GdbCommand::new(
                            CommandKind::NonMi,
                            format!("source {}", quote_path(&run_script)),
                        )
                        .with_flags(CommandFlags::MAYBE_STARTS_RUNNING)
                        .with_result_handler(|session, _| {
                            session.breakpoints.set_delete_duplicate_breakpoints(false);
                        }),
                    );
                    session.raise_event(DebuggerEvent::ConnectedToProgram);
                })
                .with_flags(CommandFlags::MAYBE_STARTS_RUNNING),
            );
        } else {
            self.queue_cmd(
                GdbCommand::new(CommandKind::FileExecAndSymbols, quote_path(&context.executable))
                    .with_flags(CommandFlags::HANDLES_ERROR)
                    .with_result_handler(|session, record| {
                        session.handle_file_exec_and_symbols(record)
                    }),
            );
            self.raise_event(DebuggerEvent::ConnectedToProgram);

            self.queue_cmd(
                GdbCommand::sentinel(|session| {
                    session.send_pending_breakpoints();
                    session.queue_cmd(
                        GdbCommand::new(CommandKind::ExecRun, "")
                            .with_flags(CommandFlags::MAYBE_STARTS_RUNNING),
                    );
                })
                .with_flags(CommandFlags::MAYBE_STARTS_RUNNING),
            );
        }

        match cfg.start_with {
            StartWith::GdbConsole => self.events.send(SessionEvent::RaiseGdbConsoleViews),
            StartWith::FrameStack => self.events.send(SessionEvent::RaiseFramestackViews),
            StartWith::ApplicationOutput => {}
        }

        self.tty = Some(tty);
        self.context = Some(context);
        self.execute_cmds().await;
        Ok(())
    }

    /// Load a core dump for post-mortem examination.
    pub fn examine_core_file(&mut self, binary: &Path, core: &Path) -> AppResult<()> {
        if !self.state.intersects(DbgFlags::DBG_NOT_STARTED | DbgFlags::APP_NOT_STARTED) {
            warn!("cannot examine core file while a program is being debugged");
            return Ok(());
        }
        if self.state.contains(DbgFlags::DBG_NOT_STARTED) {
            self.start_debugger()?;
        }

        self.queue_cmd(GdbCommand::new(CommandKind::FileExecAndSymbols, quote_path(binary)));
        self.queue_cmd(
            GdbCommand::new(CommandKind::NonMi, format!("core {}", quote_path(core)))
                .with_flags(CommandFlags::HANDLES_ERROR)
                .with_result_handler(|session, record| session.handle_core_file(record)),
        );

        self.raise_event(DebuggerEvent::ConnectedToProgram);
        self.raise_event(DebuggerEvent::ProgramStateChanged);
        Ok(())
    }

    fn handle_core_file(&mut self, record: &ResultRecord) {
        if record.class != ResultClass::Error {
            self.set_state_on(DbgFlags::PROGRAM_EXITED | DbgFlags::CORE);
        } else {
            self.events.show_message(
                format!("Failed to load core file: {}", record.results.literal_field("msg")),
                0,
            );
        }
    }

    /// Attach to a running process. The symbol tables GDB guessed from its
    /// command line are discarded first; we may be attaching to anything.
    pub fn attach_to_process(&mut self, pid: u32) -> AppResult<()> {
        debug!("attaching to process {pid}");
        if !self.state.intersects(DbgFlags::DBG_NOT_STARTED | DbgFlags::APP_NOT_STARTED) {
            warn!("cannot attach while a program is being debugged");
            return Ok(());
        }
        if self.state.contains(DbgFlags::DBG_NOT_STARTED) {
            self.start_debugger()?;
        }

        self.set_state_on(DbgFlags::ATTACHED);
        // the process is running until the attach-induced stop arrives
        self.set_state_on(DbgFlags::APP_RUNNING);

        self.queue_cmd(GdbCommand::new(CommandKind::FileExecAndSymbols, ""));
        self.queue_cmd(
            GdbCommand::new(CommandKind::TargetAttach, pid.to_string())
                .with_flags(CommandFlags::HANDLES_ERROR)
                .with_result_handler(|session, record| session.handle_target_attach(record)),
        );
        self.queue_cmd(GdbCommand::sentinel(|session| session.send_pending_breakpoints()));

        self.raise_event(DebuggerEvent::ConnectedToProgram);
        self.events.send(SessionEvent::RaiseFramestackViews);
        Ok(())
    }

    fn handle_file_exec_and_symbols(&mut self, record: &ResultRecord) {
        if record.class == ResultClass::Error {
            self.events.show_message(
                format!("Could not start debugger: {}", record.results.literal_field("msg")),
                0,
            );
            self.stop_debugger();
        }
    }

    fn handle_target_attach(&mut self, record: &ResultRecord) {
        if record.class == ResultClass::Error {
            self.events.show_message(
                format!("Could not attach debugger: {}", record.results.literal_field("msg")),
                0,
            );
            self.stop_debugger();
        }
    }

    fn send_pending_breakpoints(&mut self) {
        let commands = self.breakpoints.init_send_breakpoints();
        for command in commands {
            self.queue_cmd(command);
        }
    }

    // ------------------------------------------------------------------
    // Execution control

    pub fn run_program(&mut self) {
        if self.state.intersects(
            DbgFlags::APP_NOT_STARTED | DbgFlags::DBG_NOT_STARTED | DbgFlags::SHUTTING_DOWN,
        ) {
            return;
        }
        self.queue_cmd(
            GdbCommand::new(CommandKind::ExecContinue, "")
                .with_flags(CommandFlags::MAYBE_STARTS_RUNNING),
        );
    }

    fn step_guard(&self) -> bool {
        !self.state.intersects(DbgFlags::APP_NOT_STARTED | DbgFlags::SHUTTING_DOWN)
    }

    pub fn step_over(&mut self) {
        if self.step_guard() {
            self.queue_step(CommandKind::ExecNext);
        }
    }

    pub fn step_over_instruction(&mut self) {
        if self.step_guard() {
            self.queue_step(CommandKind::ExecNextInstruction);
        }
    }

    pub fn step_into(&mut self) {
        if self.step_guard() {
            self.queue_step(CommandKind::ExecStep);
        }
    }

    pub fn step_into_instruction(&mut self) {
        if self.step_guard() {
            self.queue_step(CommandKind::ExecStepInstruction);
        }
    }

    pub fn step_out(&mut self) {
        if self.step_guard() {
            self.queue_step(CommandKind::ExecFinish);
        }
    }

    fn queue_step(&mut self, kind: CommandKind) {
        self.queue_cmd(GdbCommand::new(kind, "").with_flags(
            CommandFlags::MAYBE_STARTS_RUNNING | CommandFlags::TEMPORARY_RUN,
        ));
    }

    pub fn run_until(&mut self, file: &Path, line: u32) {
        if self.state.intersects(DbgFlags::DBG_NOT_STARTED | DbgFlags::SHUTTING_DOWN) {
            return;
        }
        self.queue_cmd(
            GdbCommand::new(CommandKind::ExecUntil, format!("{}:{}", file.display(), line))
                .with_flags(CommandFlags::MAYBE_STARTS_RUNNING | CommandFlags::TEMPORARY_RUN),
        );
    }

    pub fn run_until_address(&mut self, address: &str) {
        if self.state.intersects(DbgFlags::DBG_NOT_STARTED | DbgFlags::SHUTTING_DOWN)
            || address.is_empty()
        {
            return;
        }
        self.queue_cmd(
            GdbCommand::new(CommandKind::ExecUntil, format!("*{address}"))
                .with_flags(CommandFlags::MAYBE_STARTS_RUNNING | CommandFlags::TEMPORARY_RUN),
        );
    }

    pub fn jump_to(&mut self, file: &Path, line: u32) {
        if self.state.intersects(DbgFlags::DBG_NOT_STARTED | DbgFlags::SHUTTING_DOWN) {
            return;
        }
        self.queue_cmd(GdbCommand::new(
            CommandKind::NonMi,
            format!("tbreak {}:{}", file.display(), line),
        ));
        self.queue_cmd(GdbCommand::new(
            CommandKind::NonMi,
            format!("jump {}:{}", file.display(), line),
        ));
    }

    pub fn jump_to_address(&mut self, address: &str) {
        if self.state.intersects(DbgFlags::DBG_NOT_STARTED | DbgFlags::SHUTTING_DOWN)
            || address.is_empty()
        {
            return;
        }
        self.queue_cmd(GdbCommand::new(CommandKind::NonMi, format!("tbreak *{address}")));
        self.queue_cmd(GdbCommand::new(CommandKind::NonMi, format!("jump *{address}")));
    }

    /// Pause the inferior. The SIGINT goes out of band; the queued
    /// `exec-interrupt` keeps GDB's own bookkeeping in step.
    pub fn interrupt(&mut self) {
        if self.driver.is_none() {
            return;
        }
        self.ensure_listening();
        self.queue_cmd(
            GdbCommand::new(CommandKind::ExecInterrupt, "").with_flags(CommandFlags::INTERRUPT),
        );
    }

    pub fn restart_available(&self) -> bool {
        !self.state.intersects(DbgFlags::ATTACHED | DbgFlags::CORE)
    }

    /// Kill + run rather than `exec-run`, so that the run path's special
    /// setup (remote scripts, breakpoint init) applies on restart too.
    pub fn restart(&mut self) {
        if !self.restart_available() {
            return;
        }
        self.kill_inferior();
        self.run_program();
    }

    pub fn kill_inferior(&mut self) {
        if self.state.intersects(DbgFlags::DBG_NOT_STARTED | DbgFlags::SHUTTING_DOWN) {
            return;
        }
        if self.state.contains(DbgFlags::DBG_BUSY) {
            self.interrupt();
        }
        // -exec-abort is not implemented in gdb
        self.queue_cmd(GdbCommand::new(CommandKind::NonMi, "kill"));
    }

    /// Queue a verbatim console command from the user. It can modify
    /// absolutely anything, so a state reload follows its completion.
    pub fn add_user_command(&mut self, text: String) {
        self.queue_cmd(GdbCommand::user(text).with_result_handler(|session, _| {
            if !session.state.intersects(DbgFlags::APP_NOT_STARTED | DbgFlags::PROGRAM_EXITED) {
                session.raise_event(DebuggerEvent::ProgramStateChanged);
            }
        }));
    }

    pub fn evaluate(&mut self, expression: String) {
        self.queue_cmd(variables::evaluate_command(expression));
    }

    pub fn add_watch(&mut self, expression: String) {
        self.queue_cmd(variables::create_watch_command(expression));
    }

    pub fn set_disassembly_flavor(&mut self, flavor: DisassemblyFlavor) {
        for command in disasm::set_flavor_commands(flavor) {
            self.queue_cmd(command);
        }
    }

    pub fn disassemble(&mut self, start: String, end: String) {
        for command in disasm::disassemble_commands(start, end) {
            self.queue_cmd(command);
        }
    }

    // ------------------------------------------------------------------
    // Shutdown

    /// Wind the debugger down: purge the queue, detach if attached, ask GDB
    /// to exit, and arm the timer that kills it should it not comply.
    pub fn stop_debugger(&mut self) {
        self.queue.clear();

        debug!("stopping debugger");
        if self.state.contains(DbgFlags::SHUTTING_DOWN) || self.driver.is_none() {
            return;
        }
        self.set_state_on(DbgFlags::SHUTTING_DOWN);

        // Get gdb's attention if it's busy so it reaches the command line.
        let driver = self.driver.as_ref().expect("checked above");
        if !driver.is_ready() {
            debug!("gdb busy on shutdown - interrupting");
            if let Err(e) = driver.interrupt() {
                warn!("{e}");
            }
        }

        // Release an attached process; detaching does not stop it.
        if self.state.contains(DbgFlags::ATTACHED) {
            self.queue_cmd(GdbCommand::new(CommandKind::TargetDetach, ""));
            self.events.send(SessionEvent::GdbUserCommandStdout("(gdb) detach\n".to_string()));
        }

        self.queue_cmd(GdbCommand::new(CommandKind::GdbExit, ""));
        self.events.send(SessionEvent::GdbUserCommandStdout("(gdb) quit".to_string()));

        self.shutdown_deadline =
            Some(Instant::now() + Duration::from_secs(self.config.shutdown_grace));

        self.events.send(SessionEvent::Reset);
    }

    /// The shutdown grace period expired without GDB quitting. Fires for
    /// every shutdown still pending, whether or not the inferior had
    /// already exited.
    async fn kill_gdb_now(&mut self) {
        if !self.state.contains(DbgFlags::SHUTTING_DOWN) {
            return;
        }
        debug!("gdb not shutdown - killing");
        if let Some(mut driver) = self.driver.take() {
            driver.kill().await;
        }
        self.records_rx = None;
        self.set_state(DbgFlags::DBG_NOT_STARTED | DbgFlags::APP_NOT_STARTED);
        self.raise_event(DebuggerEvent::DebuggerExited);
    }

    /// GDB's stdout reached EOF: the child is gone, expectedly or not. Even
    /// if the inferior outlives it we cannot control it any more.
    async fn gdb_exited(&mut self) {
        let abnormal = !self.state.contains(DbgFlags::SHUTTING_DOWN);
        if let Some(mut driver) = self.driver.take() {
            driver.reap().await;
        }
        self.shutdown_deadline = None;
        self.queue.clear();

        self.set_state_on(DbgFlags::APP_NOT_STARTED);
        self.set_state_on(DbgFlags::DBG_NOT_STARTED);
        self.set_state_off(DbgFlags::SHUTTING_DOWN);

        if abnormal {
            self.events.show_message(
                "GDB exited abnormally. This is likely a bug in GDB. \
                 Examine the gdb output window and then stop the debugger",
                0,
            );
        }
    }

    /// The inferior is gone (exit, fatal signal, invalid core). GDB itself
    /// keeps running, but only a fresh run makes sense.
    fn program_no_app(&mut self, msg: String) {
        debug!("{msg}");

        self.set_state(
            DbgFlags::APP_NOT_STARTED
                | DbgFlags::PROGRAM_EXITED
                | (self.state & DbgFlags::SHUTTING_DOWN),
        );
        self.queue.clear();

        // The exited message from gdb can overtake the last of the program's
        // output, which travels on the tty channel. Drain it before the tty
        // goes away.
        let batches = match &mut self.inferior_rx {
            Some(rx) => PtyChannel::read_remaining(rx),
            None => Vec::new(),
        };
        for batch in batches {
            self.emit_inferior(batch);
        }
        self.inferior_rx = None;
        self.tty = None;

        self.stop_debugger();

        self.raise_event(DebuggerEvent::ProgramExited);
        self.raise_event(DebuggerEvent::DebuggerExited);

        self.events.show_message(msg.clone(), 0);
        self.program_finished(&msg);
    }

    fn program_finished(&mut self, msg: &str) {
        let banner = format!("*** {} ***", msg.trim());
        self.events.send(SessionEvent::ApplicationStandardErrorLines(vec![banner.clone()]));
        // also to the gdb window, for users who watch that instead
        self.events.send(SessionEvent::GdbUserCommandStdout(banner));
    }

    // ------------------------------------------------------------------
    // Command queue handling

    pub(crate) fn queue_cmd(&mut self, mut cmd: GdbCommand) {
        if self.state.contains(DbgFlags::DBG_NOT_STARTED) {
            warn!("command sent while debugger is not running: {}", cmd.initial_string());
            self.events.show_message(
                format!(
                    "Gdb command sent when debugger is not running; command was: {}",
                    cmd.initial_string()
                ),
                0,
            );
            return;
        }

        if self.state_reload_in_progress {
            cmd.set_state_reloading();
        }

        debug!(
            "QUEUE: {} {}({} pending)",
            cmd.initial_string(),
            if self.state_reload_in_progress { "(state reloading) " } else { "" },
            self.queue.count() + 1
        );
        self.queue.enqueue(cmd);

        self.set_state_on(DbgFlags::DBG_BUSY);
        self.raise_event(DebuggerEvent::DebuggerBusy);
    }

    /// Start transmitting queued commands. [`Session::run`] does this after
    /// every operation; callers driving the session manually use this after
    /// queueing through the synchronous operations.
    pub async fn flush(&mut self) {
        self.execute_cmds().await;
    }

    /// Push queued commands at the driver for as long as it is ready.
    async fn execute_cmds(&mut self) {
        loop {
            if self.driver.is_none() {
                return;
            }
            // GDB can stop listening even mid-command; an immediate command
            // in the queue is the cue to wake it with a SIGINT.
            if self.state.contains(DbgFlags::DBG_NOT_LISTENING)
                && self.queue.has_immediate_command()
            {
                self.ensure_listening();
            }

            let Some(driver) = self.driver.as_ref() else { return };
            if !driver.is_ready() {
                return;
            }
            let Some(mut cmd) = self.queue.next_command() else { return };

            if cmd.flags().intersects(CommandFlags::MAYBE_STARTS_RUNNING | CommandFlags::INTERRUPT)
            {
                self.set_state_off(DbgFlags::AUTOMATIC_CONTINUE);
            }
            if cmd.flags().contains(CommandFlags::MAYBE_STARTS_RUNNING) {
                // GDB may return to the non-listening state without ever
                // acknowledging this command; assume the worst now.
                self.set_state_on(DbgFlags::DBG_NOT_LISTENING);
            }

            let kind = cmd.kind();
            if kind.is_var_command_with_context() || kind.is_stack_command_with_context() {
                if cmd.thread() == -1 {
                    cmd.set_thread(self.frames.current_thread());
                }
                if cmd.frame() == -1 {
                    cmd.set_frame(self.frames.current_frame());
                }
            }

            let text = cmd.render();
            if text.is_empty() {
                match cmd.take_handler() {
                    CompletionHandler::Sentinel(handler) => {
                        debug!("SEND: sentinel command, not sending");
                        handler(self);
                    }
                    _ => {
                        debug!(
                            "SEND: command {} changed its mind, not sending",
                            cmd.initial_string()
                        );
                    }
                }
                continue;
            }
            if !text.ends_with('\n') {
                self.events
                    .show_message("Invalid debugger command: does not end with newline", 0);
                continue;
            }

            let events = self.events.clone();
            let driver = self.driver.as_mut().expect("checked above");
            if let Err(e) = driver.execute(cmd, text, &events).await {
                error!("failed to write command to GDB: {e}");
                return;
            }
        }
    }

    // ------------------------------------------------------------------
    // Record handling

    async fn handle_record(&mut self, output: Output) {
        let Some(driver) = self.driver.as_mut() else {
            return;
        };
        match driver.handle_output(output) {
            DriverEvent::Resolved(cmd, record) => self.command_done(cmd, record).await,
            DriverEvent::Stopped(record) => self.program_stopped(&record),
            DriverEvent::Running => self.program_running(),
            DriverEvent::Notification(record) => self.process_notification(&record),
            DriverEvent::ConsoleStream(data) => {
                let user_in_flight = self
                    .driver
                    .as_ref()
                    .and_then(GdbDriver::current_command)
                    .is_some_and(GdbCommand::is_user_command);
                if user_in_flight {
                    self.events.send(SessionEvent::GdbUserCommandStdout(data));
                } else {
                    self.events.send(SessionEvent::GdbInternalCommandStdout(data));
                }
            }
            DriverEvent::TargetStream(data) => {
                let lines = data.lines().map(str::to_string).collect();
                self.events.send(SessionEvent::ApplicationStandardOutputLines(lines));
            }
            DriverEvent::LogStream(data) => {
                debug!("gdb log: {}", data.trim_end());
                self.events.send(SessionEvent::GdbInternalCommandStdout(data));
            }
            DriverEvent::ConsoleText(text) => {
                self.events.send(SessionEvent::GdbInternalCommandStdout(text));
            }
            DriverEvent::Prompt => self.gdb_ready().await,
            DriverEvent::Ignored => {}
        }
    }

    async fn command_done(&mut self, mut cmd: GdbCommand, record: ResultRecord) {
        debug!("command done: {} -> {:?}", cmd.initial_string(), record.class);

        let flags = cmd.flags();
        let console_lines = cmd.take_console_lines();
        let handler = cmd.take_handler();

        if record.class == ResultClass::Error && !flags.contains(CommandFlags::HANDLES_ERROR) {
            self.default_error_handler(&record, flags.contains(CommandFlags::STATE_RELOADING));
        } else {
            match handler {
                CompletionHandler::Result(handler) => handler(self, &record),
                CompletionHandler::ConsoleLines(handler) => handler(self, &console_lines),
                CompletionHandler::Sentinel(handler) => handler(self),
                CompletionHandler::None => {}
            }
        }

        if record.class == ResultClass::Running {
            self.program_running();
        }

        self.gdb_ready().await;
    }

    /// An error most likely means the GUI and gdb disagree about something;
    /// resync the state views unless the failing command was itself part of
    /// a state reload.
    fn default_error_handler(&mut self, record: &ResultRecord, state_reloading: bool) {
        let msg = record.results.literal_field("msg").to_string();

        if msg.contains("No such process") {
            self.set_state(DbgFlags::APP_NOT_STARTED | DbgFlags::PROGRAM_EXITED);
            self.raise_event(DebuggerEvent::ProgramExited);
            return;
        }

        self.events.show_message(format!("Debugger error: {msg}"), 0);

        if !state_reloading {
            self.raise_event(DebuggerEvent::ProgramStateChanged);
        }
    }

    /// Nothing in flight. Drain the queue, then settle: automatic continue
    /// first, then any pending state reload, and finally report idle.
    async fn gdb_ready(&mut self) {
        self.state_reload_in_progress = false;

        self.execute_cmds().await;

        let idle = self.driver.as_ref().map(GdbDriver::is_ready).unwrap_or(false)
            && self.queue.is_empty();
        if !idle {
            return;
        }

        if self.state.contains(DbgFlags::AUTOMATIC_CONTINUE) {
            if !self.state.contains(DbgFlags::APP_RUNNING) {
                debug!("posting automatic continue");
                self.queue_cmd(
                    GdbCommand::new(CommandKind::ExecContinue, "")
                        .with_flags(CommandFlags::MAYBE_STARTS_RUNNING),
                );
            }
            self.set_state_off(DbgFlags::AUTOMATIC_CONTINUE);
            self.execute_cmds().await;
            return;
        }

        if self.state_reload_needed && !self.state.contains(DbgFlags::APP_RUNNING) {
            debug!("finishing program stop");
            // cleared first so commands sent by the reload don't retrigger it
            self.state_reload_needed = false;
            self.reload_program_state();
        }

        self.set_state_off(DbgFlags::DBG_BUSY);
        self.raise_event(DebuggerEvent::DebuggerReady);
        self.execute_cmds().await;
    }

    fn reload_program_state(&mut self) {
        self.raise_event(DebuggerEvent::ProgramStateChanged);
        self.state_reload_needed = false;
    }

    fn program_running(&mut self) {
        self.set_state_on(DbgFlags::APP_RUNNING);
        self.raise_event(DebuggerEvent::ProgramRunning);

        let immediate_in_flight = self
            .driver
            .as_ref()
            .and_then(GdbDriver::current_command)
            .is_some_and(|cmd| {
                cmd.flags().intersects(CommandFlags::IMMEDIATELY | CommandFlags::INTERRUPT)
            });
        if self.queue.has_immediate_command() || immediate_in_flight {
            self.ensure_listening();
        } else {
            self.set_state_on(DbgFlags::DBG_NOT_LISTENING);
        }
    }

    fn program_stopped(&mut self, record: &AsyncRecord) {
        // By default, reload all state on program stop.
        self.state_reload_needed = true;
        self.set_state_off(DbgFlags::APP_RUNNING);
        self.set_state_off(DbgFlags::DBG_NOT_LISTENING);

        let r = &record.results;
        let reason = r.literal_field("reason").to_string();

        if reason == "exited-normally" || reason == "exited" {
            let msg = if r.has_field("exit-code") {
                format!("Exited with return code: {}", r.literal_field("exit-code"))
            } else {
                "Exited normally".to_string()
            };
            self.program_no_app(msg);
            self.state_reload_needed = false;
            return;
        }

        if reason == "exited-signalled" {
            self.program_no_app(format!("Exited on signal {}", r.literal_field("signal-name")));
            self.state_reload_needed = false;
            return;
        }

        if reason == "watchpoint-scope" {
            // the watchpoint went out of scope; just keep going
            self.queue_cmd(
                GdbCommand::new(CommandKind::ExecContinue, "")
                    .with_flags(CommandFlags::MAYBE_STARTS_RUNNING),
            );
            self.state_reload_needed = false;
            return;
        }

        let mut was_interrupt = false;
        if reason == "signal-received" {
            let name = r.literal_field("signal-name");
            let meaning = r.literal_field("signal-meaning");

            // SIGINT after our own interrupt is us breaking into the program,
            // not something the user needs to hear about.
            if name == "SIGINT" && self.state.contains(DbgFlags::INTERRUPT_SENT) {
                was_interrupt = true;
            } else {
                self.program_finished(&format!("Program received signal {name} ({meaning})"));
            }
        }

        if !reason.contains("exited") {
            self.frames.notify_stopped(r);

            if let Some(frame) = r.field("frame") {
                let file = frame.literal_field("fullname");
                let line =
                    frame.literal_field("line").parse::<usize>().unwrap_or(0).saturating_sub(1);
                let addr = frame.literal_field("addr").to_string();

                // gdb counts lines from 1 and we don't
                self.set_current_position(file, line, &addr);
                self.reload_program_state();
            }
        }

        self.set_state_off(DbgFlags::INTERRUPT_SENT);
        if !was_interrupt {
            self.set_state_off(DbgFlags::AUTOMATIC_CONTINUE);
        }
    }

    fn set_current_position(&mut self, file: &str, line: usize, address: &str) {
        if file.is_empty() {
            self.events
                .send(SessionEvent::ShowStepInDisassemble { address: address.to_string() });
        } else {
            let path = PathBuf::from(file);
            self.current_position = Some((path.clone(), line, address.to_string()));
            self.events.send(SessionEvent::ShowStepInSource {
                file: path,
                line,
                address: address.to_string(),
            });
        }
    }

    fn process_notification(&mut self, record: &AsyncRecord) {
        match &record.class {
            AsyncClass::Thread(ThreadEvent::GroupStarted) => {
                self.set_state_off(DbgFlags::APP_NOT_STARTED | DbgFlags::PROGRAM_EXITED);
            }
            AsyncClass::Thread(ThreadEvent::GroupExited) => {
                self.set_state_on(DbgFlags::PROGRAM_EXITED);
            }
            AsyncClass::LibraryLoaded => {}
            AsyncClass::Breakpoint(BreakpointEvent::Created) => {
                let followups = self.breakpoints.notify_created(&record.results);
                for command in followups {
                    self.queue_cmd(command);
                }
            }
            AsyncClass::Breakpoint(BreakpointEvent::Modified) => {
                self.breakpoints.notify_modified(&record.results);
            }
            AsyncClass::Breakpoint(BreakpointEvent::Deleted) => {
                self.breakpoints.notify_deleted(&record.results);
            }
            other => debug!("unhandled notification: {:?}", other),
        }
    }

    /// Interrupt GDB out of band and remember to resume if the program was
    /// running: once the interrupt-induced stop drains, a continue goes out.
    fn ensure_listening(&mut self) {
        let Some(driver) = &self.driver else { return };
        if let Err(e) = driver.interrupt() {
            warn!("{e}");
        }
        self.set_state_on(DbgFlags::INTERRUPT_SENT);
        if self.state.contains(DbgFlags::APP_RUNNING) {
            self.set_state_on(DbgFlags::AUTOMATIC_CONTINUE);
        }
        self.set_state_off(DbgFlags::DBG_NOT_LISTENING);
    }

    // ------------------------------------------------------------------
    // Events and state derivation

    /// Dispatch a debugger lifecycle event to the controllers and the host.
    /// Commands enqueued while `ProgramStateChanged` is being dispatched are
    /// tagged as state-reloading.
    pub(crate) fn raise_event(&mut self, event: DebuggerEvent) {
        if matches!(event, DebuggerEvent::ProgramExited | DebuggerEvent::DebuggerExited) {
            self.state_reload_in_progress = false;
        }
        if event == DebuggerEvent::ProgramStateChanged {
            self.state_reload_in_progress = true;
        }

        if event == DebuggerEvent::ProgramStateChanged {
            let mut commands = frames::refresh_commands();
            commands.extend(variables::update_commands());
            for command in commands {
                self.queue_cmd(command);
            }
        }

        self.events.send(SessionEvent::Debugger(event));

        if event == DebuggerEvent::ProgramStateChanged {
            self.state_reload_in_progress = false;
        }
    }

    fn set_state_on(&mut self, flags: DbgFlags) {
        self.change_state(self.state | flags);
    }

    fn set_state_off(&mut self, flags: DbgFlags) {
        self.change_state(self.state & !flags);
    }

    fn set_state(&mut self, new_state: DbgFlags) {
        self.change_state(new_state);
    }

    fn change_state(&mut self, new_state: DbgFlags) {
        let old_state = self.state;
        if old_state != new_state {
            debug!("STATE:{}", state_delta(old_state, new_state));
        }
        self.state = new_state;
        if old_state != new_state {
            self.gdb_state_changed(old_state, new_state);
        }
    }

    fn gdb_state_changed(&mut self, old_state: DbgFlags, new_state: DbgFlags) {
        let changed = old_state ^ new_state;
        let old_session = self.session_state;
        let mut new_session = old_session;
        let mut message = None;

        if new_state.contains(DbgFlags::DBG_NOT_STARTED) {
            if changed.contains(DbgFlags::DBG_NOT_STARTED) {
                message = Some("Debugger stopped");
                self.events.send(SessionEvent::Finished);
            }
            if old_session != SessionState::NotStarted {
                new_session = SessionState::Ended;
            }
        } else if new_state.contains(DbgFlags::APP_NOT_STARTED) {
            new_session = if old_session == SessionState::NotStarted
                || old_session == SessionState::Starting
            {
                SessionState::Starting
            } else {
                SessionState::Stopped
            };
        } else if new_state.contains(DbgFlags::PROGRAM_EXITED) {
            if changed.contains(DbgFlags::PROGRAM_EXITED) {
                message = Some("Process exited");
            }
            new_session = SessionState::Stopped;
        } else if new_state.contains(DbgFlags::APP_RUNNING) {
            if changed.contains(DbgFlags::APP_RUNNING) {
                message = Some("Application is running");
            }
            new_session = SessionState::Active;
        } else {
            if changed.contains(DbgFlags::APP_RUNNING) {
                message = Some("Application is paused");
            }
            new_session = SessionState::Paused;
        }

        if let Some(message) = message {
            self.events.show_message(message, 3000);
        }

        self.events.send(SessionEvent::GdbStateChanged { old: old_state, new: new_state });

        if new_session != old_session {
            debug!("session state changed: {:?} -> {:?}", old_session, new_session);
            self.session_state = new_session;
            self.events.send(SessionEvent::StateChanged(new_session));
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics

    fn emit_inferior(&mut self, batch: InferiorOutput) {
        match batch {
            InferiorOutput::StdoutLines(lines) => {
                self.events.send(SessionEvent::ApplicationStandardOutputLines(lines));
            }
            InferiorOutput::StderrLines(lines) => {
                self.events.send(SessionEvent::ApplicationStandardErrorLines(lines));
            }
        }
    }

    /// Human-readable status of the queue and the in-flight command.
    pub fn describe_status(&self) -> String {
        let mut status = format!("{} commands in queue\n", self.queue.count());
        match self.driver.as_ref().and_then(GdbDriver::current_command) {
            Some(cmd) => {
                status.push_str("1 command being processed by gdb\n");
                status.push_str(&format!("Current command class: '{}'\n", cmd.kind().display_name()));
                status.push_str(&format!("Current command text: '{}'\n", cmd.render().trim_end()));
                status.push_str(&format!(
                    "Current command original text: '{}'\n",
                    cmd.initial_string()
                ));
            }
            None => status.push_str("0 commands being processed by gdb\n"),
        }
        status.push_str(&format!("Debugger state: {:?}\n", self.state));
        status
    }
}

fn state_delta(old_state: DbgFlags, new_state: DbgFlags) -> String {
    let changed = old_state ^ new_state;
    let mut out = String::new();
    for (name, flag) in changed.iter_names() {
        out.push_str(if new_state.contains(flag) { " +" } else { " -" });
        out.push_str(name);
    }
    out
}

fn quote_path(path: &Path) -> String {
    let escaped = path.display().to_string().replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Join inferior arguments, quoting the ones that need it.
fn join_args(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '"') {
                format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

async fn recv_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => futures::future::pending().await,
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn initial_state_is_not_started() {
        let (session, _handle, _events) = Session::new(GdbConfig::default());
        assert_eq!(session.state(), SessionState::NotStarted);
        assert_eq!(
            session.debugger_state(),
            DbgFlags::DBG_NOT_STARTED | DbgFlags::APP_NOT_STARTED
        );
    }

    #[test]
    fn state_delta_names_flags() {
        let old = DbgFlags::DBG_NOT_STARTED | DbgFlags::APP_NOT_STARTED;
        let new = DbgFlags::APP_NOT_STARTED | DbgFlags::DBG_BUSY;
        let delta = state_delta(old, new);
        assert!(delta.contains("-DBG_NOT_STARTED"));
        assert!(delta.contains("+DBG_BUSY"));
        assert!(!delta.contains("APP_NOT_STARTED"));
    }

    #[test]
    fn derived_state_follows_flag_changes() {
        let (mut session, _handle, _events) = Session::new(GdbConfig::default());

        // leaving DbgNotStarted while the app has not started -> Starting
        session.set_state_off(DbgFlags::DBG_NOT_STARTED);
        assert_eq!(session.state(), SessionState::Starting);

        // program spins up
        session.set_state_off(DbgFlags::APP_NOT_STARTED);
        session.set_state_on(DbgFlags::APP_RUNNING);
        assert_eq!(session.state(), SessionState::Active);

        // stop
        session.set_state_off(DbgFlags::APP_RUNNING);
        assert_eq!(session.state(), SessionState::Paused);

        // inferior exits
        session.set_state_on(DbgFlags::PROGRAM_EXITED);
        assert_eq!(session.state(), SessionState::Stopped);

        // debugger gone after having run -> Ended
        session.set_state_on(DbgFlags::DBG_NOT_STARTED);
        assert_eq!(session.state(), SessionState::Ended);
    }

    #[test]
    fn quoting_helpers() {
        assert_eq!(quote_path(Path::new("/bin/prog")), "\"/bin/prog\"");
        assert_eq!(quote_path(Path::new("/tmp/has space")), "\"/tmp/has space\"");
        assert_eq!(
            join_args(&["--fast".to_string(), "two words".to_string()]),
            "--fast \"two words\""
        );
    }

    #[test]
    fn restart_not_available_when_attached_or_core() {
        let (mut session, _handle, _events) = Session::new(GdbConfig::default());
        assert!(session.restart_available());
        session.set_state_on(DbgFlags::ATTACHED);
        assert!(!session.restart_available());
        session.set_state_off(DbgFlags::ATTACHED);
        session.set_state_on(DbgFlags::CORE);
        assert!(!session.restart_available());
    }
}
