//! The spawned encoder child.
//!
//! stdin is handed to the pipe's transmit stage. stdout and stderr are
//! drained by two small background threads from the moment the child
//! starts, so a chatty encoder can never stall on a full OS pipe; the
//! stderr text is only looked at once the pipe closes.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::encoder::EncoderCommand;
use crate::error::PipeError;

/// A running encoder process.
pub struct EncoderProcess {
    child: Child,
    stderr: Option<JoinHandle<String>>,
    stdout: Option<JoinHandle<u64>>,
}

impl EncoderProcess {
    /// Resolve and launch the encoder described by `cmd`.
    ///
    /// Returns the process together with its stdin, which the caller
    /// passes to the transmit stage.
    pub fn spawn(cmd: &EncoderCommand) -> Result<(Self, ChildStdin), PipeError> {
        let program = cmd.resolve()?;
        info!(
            "starting encoder {} ({} @ {} fps, {}) → {}",
            program.display(),
            cmd.size,
            cmd.frame_rate,
            cmd.preset.display_name(),
            cmd.output_path().display()
        );
        Self::spawn_command(cmd.to_command(&program))
    }

    /// Launch an arbitrary command with all three standard streams piped.
    pub fn spawn_command(mut command: Command) -> Result<(Self, ChildStdin), PipeError> {
        let program: PathBuf = command.get_program().into();
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| PipeError::Spawn {
                path: program,
                source,
            })?;

        debug!("encoder started with PID {}", child.id());

        let stdin = child.stdin.take().ok_or(PipeError::MissingStdio("stdin"))?;
        let mut stdout = child.stdout.take().ok_or(PipeError::MissingStdio("stdout"))?;
        let mut stderr = child.stderr.take().ok_or(PipeError::MissingStdio("stderr"))?;

        let stderr = std::thread::Builder::new()
            .name("framepipe-stderr".into())
            .spawn(move || {
                let mut raw = Vec::new();
                if let Err(e) = stderr.read_to_end(&mut raw) {
                    warn!("reading encoder stderr failed: {e}");
                }
                String::from_utf8_lossy(&raw).into_owned()
            })
            .map_err(|source| PipeError::ThreadSpawn {
                name: "stderr",
                source,
            })?;

        let stdout = std::thread::Builder::new()
            .name("framepipe-stdout".into())
            .spawn(move || std::io::copy(&mut stdout, &mut std::io::sink()).unwrap_or(0))
            .map_err(|source| PipeError::ThreadSpawn {
                name: "stdout",
                source,
            })?;

        Ok((
            Self {
                child,
                stderr: Some(stderr),
                stdout: Some(stdout),
            },
            stdin,
        ))
    }

    /// OS process id.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Wait for the encoder to exit and collect its stderr.
    ///
    /// stdin must already be closed, otherwise an encoder reading until
    /// EOF will never exit. There is no timeout.
    pub fn wait(mut self) -> Result<(ExitStatus, String), PipeError> {
        let status = self.child.wait().map_err(PipeError::Wait)?;

        if let Some(handle) = self.stdout.take() {
            match handle.join() {
                Ok(bytes) if bytes > 0 => debug!("encoder wrote {bytes} bytes to stdout"),
                Ok(_) => {}
                Err(_) => warn!("encoder stdout drain thread panicked"),
            }
        }

        let stderr = match self.stderr.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| PipeError::ThreadPanicked("stderr"))?,
            None => String::new(),
        };

        debug!("encoder exited with {status}");
        Ok((status, stderr))
    }

    /// Terminate the encoder without waiting for a graceful exit.
    pub fn kill(mut self) -> Result<(ExitStatus, String), PipeError> {
        if let Err(e) = self.child.kill() {
            warn!("failed to kill encoder: {e}");
        }
        self.wait()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;

    fn sh(script: &str) -> Command {
        let mut c = Command::new("sh");
        c.arg("-c").arg(script);
        c
    }

    #[test]
    fn collects_stderr_verbatim() {
        let (proc, stdin) =
            EncoderProcess::spawn_command(sh("cat >/dev/null; printf 'bad frame\\nsecond line\\n' >&2"))
                .unwrap();
        drop(stdin);
        let (status, stderr) = proc.wait().unwrap();
        assert!(status.success());
        assert_eq!(stderr, "bad frame\nsecond line\n");
    }

    #[test]
    fn stdin_reaches_child_and_stdout_is_drained() {
        let (proc, mut stdin) = EncoderProcess::spawn_command(sh("wc -c >&2; echo done")).unwrap();
        stdin.write_all(&[7u8; 1000]).unwrap();
        drop(stdin);
        let (status, stderr) = proc.wait().unwrap();
        assert!(status.success());
        assert_eq!(stderr.trim(), "1000");
    }

    #[test]
    fn exit_code_is_reported() {
        let (proc, stdin) = EncoderProcess::spawn_command(sh("exit 3")).unwrap();
        drop(stdin);
        let (status, _) = proc.wait().unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[test]
    fn spawn_failure_names_program() {
        let err = EncoderProcess::spawn_command(Command::new("/nonexistent/framepipe-enc"))
            .err()
            .unwrap();
        assert!(matches!(err, PipeError::Spawn { .. }));
        assert!(err.to_string().contains("framepipe-enc"));
    }
}
