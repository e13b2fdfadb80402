use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Debugger-side configuration, resolved from the environment.
#[derive(Debug, Clone)]
pub struct GdbConfig {
    /// Path to the GDB executable
    pub gdb_path: PathBuf,
    /// Grace period before an unresponsive GDB is killed on shutdown, in seconds
    pub shutdown_grace: u64,
    /// Override for the pretty-printer init file lookup
    pub printers_dir: Option<PathBuf>,
}

impl Default for GdbConfig {
    fn default() -> Self {
        Self {
            gdb_path: std::env::var_os("GDB_PATH").map(PathBuf::from).unwrap_or_else(|| "gdb".into()),
            shutdown_grace: std::env::var("GDB_SHUTDOWN_GRACE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            printers_dir: std::env::var_os("GDB_PRINTERS_DIR").map(PathBuf::from),
        }
    }
}

impl GdbConfig {
    /// Locate the optional Python pretty-printer init file
    /// (`<data>/gdb-session/printers/gdbinit`). Returns `None` when absent.
    pub fn printers_init_file(&self) -> Option<PathBuf> {
        let dir = match &self.printers_dir {
            Some(dir) => dir.clone(),
            None => {
                let data = std::env::var_os("XDG_DATA_HOME").map(PathBuf::from).or_else(|| {
                    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share"))
                })?;
                data.join("gdb-session/printers")
            }
        };
        let file = dir.join("gdbinit");
        file.is_file().then_some(file)
    }
}

/// Which tool view the host should raise once the program is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StartWith {
    #[default]
    ApplicationOutput,
    GdbConsole,
    FrameStack,
}

/// Launch configuration as provided by the host, typically read from a
/// run-configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchConfig {
    pub executable: PathBuf,
    pub arguments: Vec<String>,
    pub working_directory: Option<PathBuf>,
    /// `VAR=value` pairs applied to the inferior's environment
    pub environment: Vec<String>,
    pub use_external_terminal: bool,
    /// The first word is used as the terminal binary
    pub external_terminal_command: Option<String>,
    /// Insert a code breakpoint at `main` if none exists yet
    pub break_on_start: bool,
    pub display_static_members: bool,
    pub asm_demangle: bool,
    pub remote_gdb_config_script: Option<PathBuf>,
    pub remote_gdb_shell_script: Option<PathBuf>,
    pub remote_gdb_run_script: Option<PathBuf>,
    pub start_with: StartWith,
    /// Pass `--nx` to GDB so user .gdbinit files cannot disturb test runs
    pub testing: bool,
}

impl LaunchConfig {
    pub fn for_executable(executable: impl Into<PathBuf>) -> Self {
        LaunchConfig { executable: executable.into(), asm_demangle: true, ..Default::default() }
    }
}

/// Immutable snapshot of the launch configuration taken at program start.
/// Lives for as long as the inferior it describes.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub executable: PathBuf,
    pub arguments: Vec<String>,
    pub working_directory: PathBuf,
    pub environment: Vec<String>,
}

impl SessionContext {
    pub fn from_launch(cfg: &LaunchConfig) -> Self {
        let working_directory = cfg
            .working_directory
            .clone()
            .or_else(|| cfg.executable.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        SessionContext {
            executable: cfg.executable.clone(),
            arguments: cfg.arguments.clone(),
            working_directory,
            environment: cfg.environment.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn context_falls_back_to_executable_directory() {
        let cfg = LaunchConfig::for_executable("/opt/app/bin/server");
        let ctx = SessionContext::from_launch(&cfg);
        assert_eq!(ctx.working_directory, PathBuf::from("/opt/app/bin"));
    }

    #[test]
    fn launch_config_deserializes_with_defaults() {
        let cfg: LaunchConfig = serde_json::from_str(
            r#"{"executable": "/bin/p", "breakOnStart": true, "startWith": "FrameStack"}"#,
        )
        .unwrap();
        assert_eq!(cfg.executable, PathBuf::from("/bin/p"));
        assert!(cfg.break_on_start);
        assert_eq!(cfg.start_with, StartWith::FrameStack);
        assert!(!cfg.use_external_terminal);
    }
}
