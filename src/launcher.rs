//! Editor process launcher.
//!
//! Spawns the configured editor with a "reuse window" flag and a
//! "go to" flag followed by the received command. The child is detached:
//! null stdio, its own process group on Unix, and nobody waits on it.

use serde::Deserialize;
use std::io;
use std::process::Stdio;
use tokio::process::Command;

/// Launcher configuration (`[launcher]` table)
#[derive(Debug, Clone, Deserialize)]
pub struct LauncherConfig {
    /// Editor binary, resolved through `PATH` when not absolute
    #[serde(default = "default_executable")]
    pub executable: String,
    /// Ask the editor to reuse an already open window
    #[serde(default = "default_reuse_window")]
    pub reuse_window: bool,
    #[serde(default = "default_reuse_flag")]
    pub reuse_flag: String,
    #[serde(default = "default_goto_flag")]
    pub goto_flag: String,
    /// Passed after the reuse flag, before the goto flag
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            reuse_window: default_reuse_window(),
            reuse_flag: default_reuse_flag(),
            goto_flag: default_goto_flag(),
            extra_args: Vec::new(),
        }
    }
}

fn default_executable() -> String {
    "code".to_string()
}

fn default_reuse_window() -> bool {
    true
}

fn default_reuse_flag() -> String {
    "-r".to_string()
}

fn default_goto_flag() -> String {
    "-g".to_string()
}

/// A successfully started editor process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Launched {
    pub pid: Option<u32>,
}

/// Something that can open a command string in an editor.
pub trait Launch: Send + Sync {
    fn launch(&self, command: &str) -> Result<Launched, LaunchError>;
}

/// Launches a real editor process.
#[derive(Debug, Clone)]
pub struct EditorLauncher {
    config: LauncherConfig,
}

impl EditorLauncher {
    pub fn new(config: LauncherConfig) -> Self {
        Self { config }
    }

    /// Arguments passed to the editor for `command`.
    pub fn args(&self, command: &str) -> Vec<String> {
        let mut args = Vec::with_capacity(self.config.extra_args.len() + 3);
        if self.config.reuse_window {
            args.push(self.config.reuse_flag.clone());
        }
        args.extend(self.config.extra_args.iter().cloned());
        args.push(self.config.goto_flag.clone());
        args.push(command.to_string());
        args
    }
}

impl Launch for EditorLauncher {
    /// Start the editor without waiting for it.
    ///
    /// Must be called from within a tokio runtime, which reaps the child
    /// once it exits.
    fn launch(&self, command: &str) -> Result<Launched, LaunchError> {
        let mut cmd = Command::new(&self.config.executable);
        cmd.args(self.args(command))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| LaunchError::from_spawn(&self.config.executable, e))?;

        Ok(Launched { pid: child.id() })
    }
}

/// Editor launch errors
#[derive(Debug)]
pub enum LaunchError {
    NotFound { executable: String },
    PermissionDenied { executable: String },
    Spawn { executable: String, source: io::Error },
}

impl LaunchError {
    fn from_spawn(executable: &str, source: io::Error) -> Self {
        let executable = executable.to_string();
        match source.kind() {
            io::ErrorKind::NotFound => LaunchError::NotFound { executable },
            io::ErrorKind::PermissionDenied => LaunchError::PermissionDenied { executable },
            _ => LaunchError::Spawn { executable, source },
        }
    }
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchError::NotFound { executable } => {
                write!(f, "editor executable '{executable}' not found")
            }
            LaunchError::PermissionDenied { executable } => {
                write!(f, "permission denied launching '{executable}'")
            }
            LaunchError::Spawn { executable, source } => {
                write!(f, "failed to launch '{executable}': {source}")
            }
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LaunchError::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let launcher = EditorLauncher::new(LauncherConfig::default());
        assert_eq!(
            launcher.args(r"C:\path\to\file.go:42"),
            vec!["-r", "-g", r"C:\path\to\file.go:42"]
        );
    }

    #[test]
    fn test_args_without_reuse_and_with_extras() {
        let launcher = EditorLauncher::new(LauncherConfig {
            reuse_window: false,
            extra_args: vec!["--wait".to_string(), "--verbose".to_string()],
            ..LauncherConfig::default()
        });
        assert_eq!(
            launcher.args("main.c:7"),
            vec!["--wait", "--verbose", "-g", "main.c:7"]
        );
    }

    #[test]
    fn test_empty_command_still_passed() {
        let launcher = EditorLauncher::new(LauncherConfig::default());
        assert_eq!(launcher.args(""), vec!["-r", "-g", ""]);
    }

    #[tokio::test]
    async fn test_missing_executable_reported() {
        let launcher = EditorLauncher::new(LauncherConfig {
            executable: "/nonexistent/editor-relay-test-editor".to_string(),
            ..LauncherConfig::default()
        });

        let err = launcher.launch("file.rs:1").unwrap_err();
        assert!(matches!(err, LaunchError::NotFound { .. }));
        assert!(err.to_string().contains("not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_detached_process() {
        let launcher = EditorLauncher::new(LauncherConfig {
            executable: "true".to_string(),
            ..LauncherConfig::default()
        });

        let launched = launcher.launch("file.rs:1").unwrap();
        assert!(launched.pid.is_some());
    }
}
