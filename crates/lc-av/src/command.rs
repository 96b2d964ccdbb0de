//! Builder for spawning supervised external tool processes.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

/// Replacement shown wherever a secret appears in a rendered command line.
pub const MASK: &str = "****";

/// A builder for constructing and spawning external tool invocations.
///
/// # Example
///
/// ```no_run
/// use lc_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # fn example() -> lc_core::Result<()> {
/// let mut cmd = ToolCommand::new(PathBuf::from("ffmpeg"));
/// cmd.args(["-re", "-i", "clip.mp4", "-f", "flv"]).arg("rtmp://host/app/key");
/// println!("{}", cmd.render_masked("key"));
/// let child = cmd.spawn()?;
/// # drop(child);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// File name of the program, used in error messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Render the full command line with every occurrence of `secret`
    /// replaced by [`MASK`]. An empty secret masks nothing.
    pub fn render_masked(&self, secret: &str) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.to_string_lossy().to_string());
        for arg in &self.args {
            if secret.is_empty() {
                parts.push(arg.clone());
            } else {
                parts.push(arg.replace(secret, MASK));
            }
        }
        parts.join(" ")
    }

    /// Spawn the process with stdin, stdout and stderr piped.
    ///
    /// Stdin stays open so the supervisor can ask the tool to quit; the child
    /// is killed if its handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`lc_core::Error::Tool`] if spawning the process fails.
    pub fn spawn(&self) -> lc_core::Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.spawn()
            .map_err(|e| lc_core::Error::tool(self.program_name(), format!("failed to spawn: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn render_masks_secret() {
        let mut cmd = ToolCommand::new(PathBuf::from("ffmpeg"));
        cmd.args(["-f", "flv", "rtmp://host/live2/SECRET"]);
        let rendered = cmd.render_masked("SECRET");
        assert_eq!(rendered, "ffmpeg -f flv rtmp://host/live2/****");
    }

    #[test]
    fn render_with_empty_secret_is_verbatim() {
        let mut cmd = ToolCommand::new(PathBuf::from("/usr/bin/ffmpeg"));
        cmd.arg("-version");
        assert_eq!(cmd.render_masked(""), "/usr/bin/ffmpeg -version");
    }

    #[test]
    fn program_name_is_file_name() {
        let cmd = ToolCommand::new(PathBuf::from("/usr/local/bin/ffmpeg"));
        assert_eq!(cmd.program_name(), "ffmpeg");
    }

    #[tokio::test]
    async fn spawn_echo_pipes_stdout() {
        let mut cmd = ToolCommand::new(PathBuf::from("echo"));
        cmd.arg("hello");
        // On some minimal environments echo may not exist; skip.
        let Ok(mut child) = cmd.spawn() else {
            return;
        };
        let mut out = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout.read_to_string(&mut out).await.unwrap();
        }
        let status = child.wait().await.unwrap();
        assert!(status.success());
        assert!(out.contains("hello"));
    }

    #[tokio::test]
    async fn spawn_nonexistent_tool() {
        let cmd = ToolCommand::new(PathBuf::from("nonexistent_tool_xyz_12345"));
        let err = cmd.spawn().unwrap_err();
        assert!(err.to_string().contains("failed to spawn"), "unexpected error: {err}");
    }
}
