//! Command object model: everything the session knows about one MI command
//! between enqueue and completion.

use std::fmt;
use std::time::Instant;

use bitflags::bitflags;

use super::output::ResultRecord;
use crate::session::Session;

/// Command classification, ordered so that related operations form
/// contiguous ranges (see the range predicates below).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CommandKind {
    BreakDelete,
    BreakInsert,
    BreakList,
    BreakWatch,
    DataDisassemble,
    DataEvaluateExpression,
    EnablePrettyPrinting,
    EnvironmentCd,
    ExecAbort,
    ExecArguments,
    ExecContinue,
    ExecFinish,
    ExecInterrupt,
    ExecNext,
    ExecNextInstruction,
    ExecRun,
    ExecShowArguments,
    ExecStep,
    ExecStepInstruction,
    ExecUntil,
    FileExecAndSymbols,
    FileSymbolFile,
    GdbExit,
    GdbSet,
    GdbShow,
    InferiorTtySet,
    SignalHandle,
    StackInfoDepth,
    StackInfoFrame,
    StackListArguments,
    StackListFrames,
    StackListLocals,
    TargetAttach,
    TargetDetach,
    ThreadInfo,
    VarAssign,
    VarCreate,
    VarDelete,
    VarEvaluateExpression,
    VarInfoType,
    VarListChildren,
    VarSetFormat,
    VarUpdate,
    /// Console command sent through the `-interpreter-exec console` bridge
    NonMi,
    /// Console command whose `~` stream output is captured for a handler
    CliWithOutput,
    /// Zero-transmission command scheduling a callback at a queue position
    Sentinel,
    /// Verbatim user console input
    User,
}

impl CommandKind {
    /// MI operation name, or `""` for the non-MI kinds.
    pub fn mi_operation(self) -> &'static str {
        use CommandKind::*;
        match self {
            BreakDelete => "break-delete",
            BreakInsert => "break-insert",
            BreakList => "break-list",
            BreakWatch => "break-watch",
            DataDisassemble => "data-disassemble",
            DataEvaluateExpression => "data-evaluate-expression",
            EnablePrettyPrinting => "enable-pretty-printing",
            EnvironmentCd => "environment-cd",
            ExecAbort => "exec-abort",
            ExecArguments => "exec-arguments",
            ExecContinue => "exec-continue",
            ExecFinish => "exec-finish",
            ExecInterrupt => "exec-interrupt",
            ExecNext => "exec-next",
            ExecNextInstruction => "exec-next-instruction",
            ExecRun => "exec-run",
            ExecShowArguments => "exec-show-arguments",
            ExecStep => "exec-step",
            ExecStepInstruction => "exec-step-instruction",
            ExecUntil => "exec-until",
            FileExecAndSymbols => "file-exec-and-symbols",
            FileSymbolFile => "file-symbol-file",
            GdbExit => "gdb-exit",
            GdbSet => "gdb-set",
            GdbShow => "gdb-show",
            InferiorTtySet => "inferior-tty-set",
            SignalHandle => "handle",
            StackInfoDepth => "stack-info-depth",
            StackInfoFrame => "stack-info-frame",
            StackListArguments => "stack-list-arguments",
            StackListFrames => "stack-list-frames",
            StackListLocals => "stack-list-locals",
            TargetAttach => "target-attach",
            TargetDetach => "target-detach",
            ThreadInfo => "thread-info",
            VarAssign => "var-assign",
            VarCreate => "var-create",
            VarDelete => "var-delete",
            VarEvaluateExpression => "var-evaluate-expression",
            VarInfoType => "var-info-type",
            VarListChildren => "var-list-children",
            VarSetFormat => "var-set-format",
            VarUpdate => "var-update",
            NonMi | CliWithOutput | Sentinel | User => "",
        }
    }

    /// Name used when logging or describing a command of this kind.
    pub fn display_name(self) -> &'static str {
        match self {
            CommandKind::NonMi => "non-mi",
            CommandKind::CliWithOutput => "cli",
            CommandKind::Sentinel => "sentinel",
            CommandKind::User => "user",
            other => other.mi_operation(),
        }
    }

    /// True for commands that move the execution location. `exec-arguments`
    /// and `exec-show-arguments` sit inside the exec range but do not run
    /// anything.
    pub fn moves_execution(self) -> bool {
        use CommandKind::*;
        self >= ExecAbort
            && self <= ExecUntil
            && self != ExecArguments
            && self != ExecShowArguments
    }

    /// Variable commands that should execute in the context of the selected
    /// thread and frame.
    pub fn is_var_command_with_context(self) -> bool {
        use CommandKind::*;
        self >= VarAssign && self <= VarUpdate && self != VarDelete
    }

    /// Stack commands that should execute in the context of the selected
    /// thread and frame.
    pub fn is_stack_command_with_context(self) -> bool {
        use CommandKind::*;
        self >= StackInfoDepth && self <= StackListLocals
    }

    /// Variable and stack queries whose results describe the current
    /// execution location; they are dropped from the queue when execution
    /// moves.
    pub fn stale_when_execution_moves(self) -> bool {
        use CommandKind::*;
        (self >= VarEvaluateExpression && self <= VarListChildren)
            || self == VarUpdate
            || (self >= StackInfoDepth && self <= StackListLocals)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CommandFlags: u32 {
        /// Run regardless of whether the inferior is currently running
        /// (implies an interrupt)
        const IMMEDIATELY = 1 << 0;
        const INTERRUPT = 1 << 1;
        const MAYBE_STARTS_RUNNING = 1 << 2;
        const TEMPORARY_RUN = 1 << 3;
        /// The completion handler consumes `^error` records itself
        const HANDLES_ERROR = 1 << 4;
        /// Enqueued while a state reload was being dispatched
        const STATE_RELOADING = 1 << 5;
    }
}

pub type ResultHandlerFn = Box<dyn FnOnce(&mut Session, &ResultRecord) + Send>;
pub type ConsoleHandlerFn = Box<dyn FnOnce(&mut Session, &[String]) + Send>;
pub type SentinelFn = Box<dyn FnOnce(&mut Session) + Send>;

/// Completion callback attached to a command.
pub enum CompletionHandler {
    None,
    /// Receives the result record
    Result(ResultHandlerFn),
    /// Receives the console stream lines captured while the command ran
    ConsoleLines(ConsoleHandlerFn),
    /// Runs when the (empty) command reaches the queue head
    Sentinel(SentinelFn),
}

impl CompletionHandler {
    pub fn is_none(&self) -> bool {
        matches!(self, CompletionHandler::None)
    }
}

/// One queued or in-flight debugger command.
pub struct GdbCommand {
    kind: CommandKind,
    text: String,
    flags: CommandFlags,
    token: u32,
    thread: i32,
    frame: i32,
    handler: CompletionHandler,
    console_lines: Vec<String>,
    enqueued_at: Option<Instant>,
}

impl GdbCommand {
    pub fn new(kind: CommandKind, text: impl Into<String>) -> Self {
        GdbCommand {
            kind,
            text: text.into(),
            flags: CommandFlags::empty(),
            token: 0,
            thread: -1,
            frame: -1,
            handler: CompletionHandler::None,
            console_lines: Vec::new(),
            enqueued_at: None,
        }
    }

    pub fn with_flags(mut self, flags: CommandFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_result_handler(
        mut self,
        handler: impl FnOnce(&mut Session, &ResultRecord) + Send + 'static,
    ) -> Self {
        self.handler = CompletionHandler::Result(Box::new(handler));
        self
    }

    pub fn cli(text: impl Into<String>) -> Self {
        GdbCommand::new(CommandKind::CliWithOutput, text)
    }

    pub fn with_console_handler(
        mut self,
        handler: impl FnOnce(&mut Session, &[String]) + Send + 'static,
    ) -> Self {
        self.handler = CompletionHandler::ConsoleLines(Box::new(handler));
        self
    }

    pub fn sentinel(handler: impl FnOnce(&mut Session) + Send + 'static) -> Self {
        let mut cmd = GdbCommand::new(CommandKind::Sentinel, "");
        cmd.handler = CompletionHandler::Sentinel(Box::new(handler));
        cmd
    }

    pub fn user(text: impl Into<String>) -> Self {
        GdbCommand::new(CommandKind::User, text)
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn flags(&self) -> CommandFlags {
        self.flags
    }

    pub fn set_state_reloading(&mut self) {
        self.flags |= CommandFlags::STATE_RELOADING;
    }

    pub fn token(&self) -> u32 {
        self.token
    }

    pub(crate) fn assign_token(&mut self, token: u32) {
        self.token = token;
        self.enqueued_at = Some(Instant::now());
    }

    pub fn enqueued_at(&self) -> Option<Instant> {
        self.enqueued_at
    }

    pub fn thread(&self) -> i32 {
        self.thread
    }

    pub fn frame(&self) -> i32 {
        self.frame
    }

    pub fn set_thread(&mut self, thread: i32) {
        self.thread = thread;
    }

    pub fn set_frame(&mut self, frame: i32) {
        self.frame = frame;
    }

    pub fn is_user_command(&self) -> bool {
        matches!(self.kind, CommandKind::User)
    }

    /// Whether `~` console stream lines should be captured while this
    /// command is in flight.
    pub fn captures_console(&self) -> bool {
        matches!(self.handler, CompletionHandler::ConsoleLines(_))
    }

    pub(crate) fn push_console_line(&mut self, line: String) {
        self.console_lines.push(line);
    }

    pub(crate) fn take_handler(&mut self) -> CompletionHandler {
        std::mem::replace(&mut self.handler, CompletionHandler::None)
    }

    pub(crate) fn take_console_lines(&mut self) -> Vec<String> {
        std::mem::take(&mut self.console_lines)
    }

    /// The command the way the user or controller phrased it, before token
    /// and context decoration. Used for logging and status reporting.
    pub fn initial_string(&self) -> String {
        match self.kind {
            CommandKind::Sentinel => String::new(),
            CommandKind::NonMi | CommandKind::CliWithOutput | CommandKind::User => self.text.clone(),
            kind if self.text.is_empty() => format!("-{}", kind.mi_operation()),
            kind => format!("-{} {}", kind.mi_operation(), self.text),
        }
    }

    /// Render the full wire form, newline terminated. An empty string means
    /// the command is not to be transmitted.
    pub fn render(&self) -> String {
        match self.kind {
            CommandKind::Sentinel => String::new(),
            CommandKind::CliWithOutput | CommandKind::User => format!("{}\n", self.text),
            CommandKind::NonMi => {
                format!("{}-interpreter-exec console {}\n", self.token, escape_command(&self.text))
            }
            // no MI equivalent exists; MI accepts token-prefixed CLI lines
            CommandKind::SignalHandle => format!("{}handle {}\n", self.token, self.text),
            kind => {
                let mut line = format!("{}-{}", self.token, kind.mi_operation());
                if kind.is_var_command_with_context() || kind.is_stack_command_with_context() {
                    if self.thread >= 0 {
                        line.push_str(&format!(" --thread {}", self.thread));
                    }
                    if self.frame >= 0 {
                        line.push_str(&format!(" --frame {}", self.frame));
                    }
                }
                if !self.text.is_empty() {
                    line.push(' ');
                    line.push_str(&self.text);
                }
                line.push('\n');
                line
            }
        }
    }
}

impl fmt::Debug for GdbCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GdbCommand")
            .field("kind", &self.kind.display_name())
            .field("text", &self.text)
            .field("flags", &self.flags)
            .field("token", &self.token)
            .field("thread", &self.thread)
            .field("frame", &self.frame)
            .finish()
    }
}

/// Quote a console command for the `-interpreter-exec console` bridge.
fn escape_command(input: &str) -> String {
    let mut output = '\"'.to_string();
    for c in input.chars() {
        match c {
            '\\' => output.push_str("\\\\"),
            '\"' => output.push_str("\\\""),
            '\r' => output.push_str("\\\r"),
            '\n' => output.push_str("\\\n"),
            other => output.push(other),
        }
    }
    output.push('\"');
    output
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kind_ranges() {
        assert!(CommandKind::ExecContinue.moves_execution());
        assert!(CommandKind::ExecUntil.moves_execution());
        assert!(CommandKind::ExecAbort.moves_execution());
        assert!(!CommandKind::ExecArguments.moves_execution());
        assert!(!CommandKind::ExecShowArguments.moves_execution());
        assert!(!CommandKind::StackListLocals.moves_execution());

        assert!(CommandKind::VarAssign.is_var_command_with_context());
        assert!(CommandKind::VarUpdate.is_var_command_with_context());
        assert!(!CommandKind::VarDelete.is_var_command_with_context());

        assert!(CommandKind::StackInfoDepth.is_stack_command_with_context());
        assert!(CommandKind::StackListLocals.is_stack_command_with_context());
        assert!(!CommandKind::ThreadInfo.is_stack_command_with_context());

        assert!(CommandKind::VarUpdate.stale_when_execution_moves());
        assert!(CommandKind::VarEvaluateExpression.stale_when_execution_moves());
        assert!(CommandKind::VarListChildren.stale_when_execution_moves());
        assert!(CommandKind::StackListFrames.stale_when_execution_moves());
        assert!(!CommandKind::VarAssign.stale_when_execution_moves());
        assert!(!CommandKind::BreakInsert.stale_when_execution_moves());
    }

    #[test]
    fn renders_mi_command_with_token() {
        let mut cmd = GdbCommand::new(CommandKind::FileExecAndSymbols, "\"/bin/p\"");
        cmd.assign_token(12);
        assert_eq!(cmd.render(), "12-file-exec-and-symbols \"/bin/p\"\n");
        assert_eq!(cmd.initial_string(), "-file-exec-and-symbols \"/bin/p\"");
    }

    #[test]
    fn renders_context_options_when_set() {
        let mut cmd = GdbCommand::new(CommandKind::StackListFrames, "");
        cmd.assign_token(3);
        cmd.set_thread(2);
        cmd.set_frame(1);
        assert_eq!(cmd.render(), "3-stack-list-frames --thread 2 --frame 1\n");
    }

    #[test]
    fn context_options_omitted_when_unset() {
        let mut cmd = GdbCommand::new(CommandKind::VarUpdate, "*");
        cmd.assign_token(9);
        assert_eq!(cmd.render(), "9-var-update *\n");
    }

    #[test]
    fn signal_handle_renders_as_tokenized_cli_line() {
        let mut cmd = GdbCommand::new(CommandKind::SignalHandle, "SIG32 pass nostop noprint");
        cmd.assign_token(4);
        assert_eq!(cmd.render(), "4handle SIG32 pass nostop noprint\n");
    }

    #[test]
    fn renders_non_mi_through_console_bridge() {
        let mut cmd = GdbCommand::new(CommandKind::NonMi, "core \"/tmp/core\"");
        cmd.assign_token(5);
        assert_eq!(cmd.render(), "5-interpreter-exec console \"core \\\"/tmp/core\\\"\"\n");
    }

    #[test]
    fn cli_and_user_commands_render_verbatim() {
        let mut cmd = GdbCommand::cli("show version");
        cmd.assign_token(2);
        assert_eq!(cmd.render(), "show version\n");

        let cmd = GdbCommand::user("info registers");
        assert_eq!(cmd.render(), "info registers\n");
    }

    #[test]
    fn sentinel_renders_empty() {
        let cmd = GdbCommand::sentinel(|_| {});
        assert_eq!(cmd.render(), "");
        assert!(matches!(cmd.handler, CompletionHandler::Sentinel(_)));
    }
}
