//! Package executor: runs installers/uninstallers as subprocesses with a
//! hard timeout. Grounded on `Client/softmgr.cpp`'s `installSoftware` /
//! `uninstallSoftware`, which dispatch on file extension (msi/exe/bat/cmd),
//! fill in common silent-install flags, and always hand the program and its
//! argument list to `QProcess::start` directly rather than through a shell.

use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::config::{INSTALL_TIMEOUT, UNINSTALL_TIMEOUT};
use crate::error::InstallerError;

/// External collaborator that runs an install/uninstall command to
/// completion. A seam so tests can substitute a fake executor.
#[async_trait::async_trait]
pub trait PackageExecutor: Send + Sync {
    /// Installs `file_path`, a package already on disk, passing `args`
    /// (whitespace-separated) through as additional installer arguments.
    async fn install(&self, file_path: &str, args: &str) -> Result<(), InstallerError>;

    /// Runs an uninstall command, e.g. a registry `UninstallString` which may
    /// quote its executable path, plus any extra `args`.
    async fn uninstall(&self, uninstall_cmd: &str, args: &str) -> Result<(), InstallerError>;
}

/// Default `PackageExecutor` backed by `tokio::process::Command`. Every
/// invocation passes the program and its arguments directly to the OS, never
/// through `sh -c`/`cmd /C`, so a file name or argument containing a space
/// can't be tokenized into extra commands.
#[derive(Debug, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    async fn run(
        &self,
        program: &str,
        arguments: Vec<String>,
        timeout_dur: Duration,
    ) -> Result<(), InstallerError> {
        let mut cmd = Command::new(program);
        cmd.args(&arguments);
        let child = cmd.output();
        let output = timeout(timeout_dur, child)
            .await
            .map_err(|_| InstallerError::TimedOut)?
            .map_err(InstallerError::SpawnFailed)?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("exit status {}", output.status)
            } else {
                stderr
            };
            Err(InstallerError::NonZeroExit(message))
        }
    }
}

#[async_trait::async_trait]
impl PackageExecutor for ProcessExecutor {
    async fn install(&self, file_path: &str, args: &str) -> Result<(), InstallerError> {
        let (program, arguments) = install_invocation(file_path, args);
        self.run(&program, arguments, INSTALL_TIMEOUT).await
    }

    async fn uninstall(&self, uninstall_cmd: &str, args: &str) -> Result<(), InstallerError> {
        let (program, arguments) = uninstall_invocation(uninstall_cmd, args);
        self.run(&program, arguments, UNINSTALL_TIMEOUT).await
    }
}

/// Splits a whitespace-separated argument string into argv components.
/// Deliberately never builds a shell string out of these: each component
/// reaches `Command::args` untouched.
fn split_args(args: &str) -> Vec<String> {
    args.split_whitespace().map(str::to_string).collect()
}

/// Picks the program and argv for an install, dispatching on `file_path`'s
/// extension the way the original does: MSI packages go through `msiexec`,
/// batch scripts through `cmd.exe /c`, everything else runs directly.
fn install_invocation(file_path: &str, args: &str) -> (String, Vec<String>) {
    let extension = Path::new(file_path)
        .extension()
        .and_then(OsStr::to_str)
        .unwrap_or_default()
        .to_lowercase();

    match extension.as_str() {
        "msi" => {
            let mut arguments = vec![
                "/i".to_string(),
                file_path.to_string(),
                "/quiet".to_string(),
                "/norestart".to_string(),
            ];
            arguments.extend(split_args(args));
            ("msiexec".to_string(), arguments)
        }
        "bat" | "cmd" => {
            let mut arguments = vec!["/c".to_string(), file_path.to_string()];
            let extra = split_args(args);
            if extra.is_empty() {
                arguments.push("/S".to_string());
            } else {
                arguments.extend(extra);
            }
            ("cmd.exe".to_string(), arguments)
        }
        _ => (file_path.to_string(), split_args(args)),
    }
}

/// Parses a registry-style uninstall command. The executable path may be
/// quoted to protect embedded spaces (`"C:\Program Files\foo\uninst.exe" /S`);
/// an unquoted command is split at its first space.
fn parse_uninstall_command(uninstall_cmd: &str) -> (String, Vec<String>) {
    let trimmed = uninstall_cmd.trim();
    if let Some(rest) = trimmed.strip_prefix('"') {
        if let Some(end) = rest.find('"') {
            let program = rest[..end].to_string();
            let remainder = rest[end + 1..].trim();
            return (program, split_args(remainder));
        }
    }
    match trimmed.split_once(char::is_whitespace) {
        Some((program, rest)) => (program.to_string(), split_args(rest)),
        None => (trimmed.to_string(), Vec::new()),
    }
}

/// Builds the full uninstall invocation, adding a silent-uninstall flag when
/// `uninstall_cmd`/`args` don't already carry one, matching the original's
/// best-effort silent uninstall.
fn uninstall_invocation(uninstall_cmd: &str, args: &str) -> (String, Vec<String>) {
    let (program, mut arguments) = parse_uninstall_command(uninstall_cmd);
    arguments.extend(split_args(args));

    if program.to_lowercase().contains("msiexec") {
        let has_quiet = arguments
            .iter()
            .any(|a| a.eq_ignore_ascii_case("/quiet") || a.eq_ignore_ascii_case("/q"));
        if !has_quiet {
            arguments.push("/quiet".to_string());
            arguments.push("/norestart".to_string());
        }
    } else {
        let has_silent = arguments.iter().any(|a| {
            matches!(
                a.to_lowercase().as_str(),
                "/s" | "/silent" | "/q" | "/quiet" | "-s" | "-silent"
            )
        });
        if !has_silent {
            arguments.push("/S".to_string());
        }
    }

    (program, arguments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_args_ignores_repeated_whitespace() {
        assert_eq!(split_args("  /quiet   /norestart "), vec!["/quiet", "/norestart"]);
        assert_eq!(split_args(""), Vec::<String>::new());
    }

    #[test]
    fn install_invocation_msi_goes_through_msiexec() {
        let (program, arguments) = install_invocation("C:/pkg/widget.MSI", "");
        assert_eq!(program, "msiexec");
        assert_eq!(arguments, vec!["/i", "C:/pkg/widget.MSI", "/quiet", "/norestart"]);
    }

    #[test]
    fn install_invocation_bat_defaults_to_silent_flag() {
        let (program, arguments) = install_invocation("setup.bat", "");
        assert_eq!(program, "cmd.exe");
        assert_eq!(arguments, vec!["/c", "setup.bat", "/S"]);
    }

    #[test]
    fn install_invocation_bat_with_explicit_args_skips_default_silent_flag() {
        let (_, arguments) = install_invocation("setup.cmd", "--unattended");
        assert_eq!(arguments, vec!["/c", "setup.cmd", "--unattended"]);
    }

    #[test]
    fn install_invocation_exe_runs_file_path_directly_with_space_in_path() {
        let (program, arguments) = install_invocation("C:/Program Files/widget.exe", "/quiet");
        assert_eq!(program, "C:/Program Files/widget.exe");
        assert_eq!(arguments, vec!["/quiet"]);
    }

    #[test]
    fn parse_uninstall_command_handles_quoted_path_with_spaces() {
        let (program, arguments) =
            parse_uninstall_command("\"C:/Program Files/widget/uninst.exe\" /S /nobackup");
        assert_eq!(program, "C:/Program Files/widget/uninst.exe");
        assert_eq!(arguments, vec!["/S", "/nobackup"]);
    }

    #[test]
    fn parse_uninstall_command_handles_unquoted_path() {
        let (program, arguments) = parse_uninstall_command("uninst.exe /S");
        assert_eq!(program, "uninst.exe");
        assert_eq!(arguments, vec!["/S"]);
    }

    #[test]
    fn uninstall_invocation_adds_silent_flag_when_missing() {
        let (_, arguments) = uninstall_invocation("uninst.exe", "");
        assert_eq!(arguments, vec!["/S"]);
    }

    #[test]
    fn uninstall_invocation_leaves_existing_silent_flag_alone() {
        let (_, arguments) = uninstall_invocation("uninst.exe /silent", "");
        assert_eq!(arguments, vec!["/silent"]);
    }

    #[test]
    fn uninstall_invocation_msi_adds_quiet_and_norestart() {
        let (program, arguments) = uninstall_invocation("msiexec /x{GUID}", "");
        assert_eq!(program, "msiexec");
        assert!(arguments.contains(&"/quiet".to_string()));
        assert!(arguments.contains(&"/norestart".to_string()));
    }

    #[tokio::test]
    async fn successful_command_returns_ok() {
        let executor = ProcessExecutor;
        executor.install("/bin/true", "").await.unwrap();
    }

    #[tokio::test]
    async fn failing_command_surfaces_nonzero_exit() {
        let executor = ProcessExecutor;
        let err = executor.install("/bin/false", "").await.unwrap_err();
        match err {
            InstallerError::NonZeroExit(_) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn uninstall_uses_the_shorter_timeout() {
        let executor = ProcessExecutor;
        executor.uninstall("/bin/true", "").await.unwrap();
    }
}
