//! Minimal console front-end: binds the session's event bus to the
//! terminal and maps `:`-prefixed meta commands to session operations.
//! Anything else typed is passed to GDB verbatim.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use gdb_session::controllers::DisassemblyFlavor;
use gdb_session::{GdbConfig, LaunchConfig, Session, SessionEvent, SessionHandle, SessionOp};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{Duration, timeout};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory for log files (GDB owns the terminal, so logs go to a file)
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Launch configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Executable to debug (shortcut for a minimal launch configuration)
    executable: Option<PathBuf>,

    /// Insert a breakpoint at main before running
    #[arg(long)]
    break_on_start: bool,

    /// Pass --nx to GDB so user .gdbinit files are skipped
    #[arg(long)]
    testing: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &args.log_dir, "gdb-console.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
        .init();

    let launch = match (&args.config, &args.executable) {
        (Some(path), _) => {
            let contents = std::fs::read_to_string(path)?;
            Some(serde_json::from_str::<LaunchConfig>(&contents)?)
        }
        (None, Some(executable)) => {
            let mut cfg = LaunchConfig::for_executable(executable);
            cfg.break_on_start = args.break_on_start;
            cfg.testing = args.testing;
            Some(cfg)
        }
        (None, None) => None,
    };

    let (mut session, handle, mut events) = Session::new(GdbConfig::default());
    if args.testing {
        session.set_testing(true);
    }

    let session_task = tokio::spawn(async move { session.run().await });
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let finished = matches!(event, SessionEvent::Finished);
            print_event(&event);
            if finished {
                break;
            }
        }
    });

    match launch {
        Some(cfg) => handle.submit(SessionOp::StartProgram(Box::new(cfg))),
        None => handle.submit(SessionOp::StartDebugger),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !dispatch(&handle, line) {
            break;
        }
    }

    handle.submit(SessionOp::StopDebugger);
    let _ = timeout(Duration::from_secs(10), printer).await;
    drop(handle);
    let _ = timeout(Duration::from_secs(2), session_task).await;
    Ok(())
}

/// Map one console line to a session operation. Returns false on `:quit`.
fn dispatch(handle: &SessionHandle, line: &str) -> bool {
    if !line.starts_with(':') {
        handle.submit(SessionOp::UserCommand(line.to_string()));
        return true;
    }

    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or(":");
    let rest = line[verb.len()..].trim().to_string();

    match verb {
        ":quit" | ":q" => return false,
        ":run" | ":continue" | ":c" => handle.submit(SessionOp::Run),
        ":next" | ":n" => handle.submit(SessionOp::StepOver),
        ":nexti" => handle.submit(SessionOp::StepOverInstruction),
        ":step" | ":s" => handle.submit(SessionOp::StepInto),
        ":stepi" => handle.submit(SessionOp::StepIntoInstruction),
        ":finish" => handle.submit(SessionOp::StepOut),
        ":interrupt" | ":pause" => handle.submit(SessionOp::Interrupt),
        ":kill" => handle.submit(SessionOp::Kill),
        ":restart" => handle.submit(SessionOp::Restart),
        ":status" => handle.submit(SessionOp::DescribeStatus),
        ":until" => match parse_location(&rest) {
            Some((file, line)) => handle.submit(SessionOp::RunUntil { file, line }),
            None if !rest.is_empty() => handle.submit(SessionOp::RunUntilAddress(rest)),
            None => eprintln!("usage: :until FILE:LINE | :until ADDRESS"),
        },
        ":jump" => match parse_location(&rest) {
            Some((file, line)) => handle.submit(SessionOp::JumpTo { file, line }),
            None if !rest.is_empty() => handle.submit(SessionOp::JumpToAddress(rest)),
            None => eprintln!("usage: :jump FILE:LINE | :jump ADDRESS"),
        },
        ":attach" => match rest.parse::<u32>() {
            Ok(pid) => handle.submit(SessionOp::AttachToProcess(pid)),
            Err(_) => eprintln!("usage: :attach PID"),
        },
        ":core" => {
            let mut parts = rest.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(binary), Some(core)) => handle.submit(SessionOp::ExamineCoreFile {
                    binary: PathBuf::from(binary),
                    core: PathBuf::from(core),
                }),
                _ => eprintln!("usage: :core BINARY COREFILE"),
            }
        }
        ":print" | ":p" if !rest.is_empty() => handle.submit(SessionOp::Evaluate(rest)),
        ":watch" if !rest.is_empty() => handle.submit(SessionOp::AddWatch(rest)),
        ":flavor" => match rest.as_str() {
            "att" => handle.submit(SessionOp::SetDisassemblyFlavor(DisassemblyFlavor::Att)),
            "intel" => handle.submit(SessionOp::SetDisassemblyFlavor(DisassemblyFlavor::Intel)),
            _ => eprintln!("usage: :flavor att|intel"),
        },
        ":disas" => {
            let mut parts = rest.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(start), Some(end)) => handle.submit(SessionOp::Disassemble {
                    start: start.to_string(),
                    end: end.to_string(),
                }),
                _ => eprintln!("usage: :disas START END"),
            }
        }
        other => eprintln!("unknown command {other}; raw GDB commands need no ':' prefix"),
    }
    true
}

fn parse_location(input: &str) -> Option<(PathBuf, u32)> {
    let (file, line) = input.rsplit_once(':')?;
    let line = line.parse::<u32>().ok()?;
    Some((PathBuf::from(file), line))
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::ShowMessage { text, .. } => println!("[{text}]"),
        SessionEvent::GdbUserCommandStdout(text) => print!("{text}"),
        SessionEvent::GdbInternalCommandStdout(_) => {}
        SessionEvent::ApplicationStandardOutputLines(lines) => {
            for line in lines {
                println!("{line}");
            }
        }
        SessionEvent::ApplicationStandardErrorLines(lines) => {
            for line in lines {
                eprintln!("{line}");
            }
        }
        SessionEvent::StateChanged(state) => println!("[session: {state:?}]"),
        SessionEvent::GdbStateChanged { .. } => {}
        SessionEvent::ShowStepInSource { file, line, address } => {
            // line is 0-based internally; editors count from 1
            println!("[at {}:{} {address}]", file.display(), line + 1);
        }
        SessionEvent::ShowStepInDisassemble { address } => println!("[at {address}]"),
        SessionEvent::RaiseFramestackViews | SessionEvent::RaiseGdbConsoleViews => {}
        SessionEvent::Debugger(_) => {}
        SessionEvent::Finished => println!("[debugger finished]"),
        SessionEvent::Reset => {}
    }
}
