use std::{
    process::{ExitStatus, Stdio},
    time::Duration,
};

use bitflags::bitflags;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    process::Command,
};
use tracing::{debug, enabled, trace, Level};

use crate::result::ToolError;

pub const YT_DL: &str = "youtube-dl";
pub const YT_DLP: &str = "yt-dlp";
pub const FFMPEG: &str = "ffmpeg";
pub const FFXXX_DEFAULT_ARGS: [&str; 3] = ["-hide_banner", "-loglevel", "error"];

/// Timeout used when probing a program version
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capture: u8 {
        const STDOUT = 0b0000010;
        const STDERR = 0b0000100;
    }
}

/// What a finished program left behind
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Run a command, returning its captured output.
///
/// Every stdout line is handed to `on_line` while the program runs, whether it
/// is captured or not. Outputs are kept only if the caller required it or if
/// the log level is Debug, in which case they are logged.
///
/// The child is killed if it outlives `timeout` or if the returned future is
/// dropped before completion.
///
/// The function returns an error only if the command failed to execute.
/// If the program runs but returns a non-0 status code, it will not trigger an error.
pub async fn run_command<F, L>(
    program: &str,
    f: F,
    capture: Capture,
    timeout: Duration,
    mut on_line: L,
) -> Result<CommandOutput, ToolError>
where
    F: FnOnce(&mut Command) -> &mut Command,
    L: FnMut(&str) + Send,
{
    let is_debug = enabled!(Level::DEBUG);
    let keep_stdout = is_debug || capture.contains(Capture::STDOUT);
    let keep_stderr = is_debug || capture.contains(Capture::STDERR);

    let mut cmd = Command::new(program);
    let cmd = f(&mut cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Executing command: {cmd:?}");
    let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
        program: program.to_owned(),
        source,
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let io_err = |source| ToolError::Io {
        program: program.to_owned(),
        source,
    };

    let work = async {
        let read_stdout = async {
            let mut kept = String::new();
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Some(line) = lines.next_line().await? {
                    on_line(&line);
                    if keep_stdout {
                        kept.push_str(&line);
                        kept.push('\n');
                    }
                }
            }
            Ok::<_, std::io::Error>(kept)
        };
        let read_stderr = read_to_string(stderr, keep_stderr);

        let (stdout, stderr) = tokio::try_join!(read_stdout, read_stderr)?;
        let status = child.wait().await?;
        Ok::<_, std::io::Error>(CommandOutput {
            status,
            stdout,
            stderr,
        })
    };

    let res = match tokio::time::timeout(timeout, work).await {
        Ok(res) => res.map_err(io_err)?,
        Err(_) => {
            debug!("{program} timed out after {timeout:?}, killing it");
            return Err(ToolError::Timeout {
                program: program.to_owned(),
                timeout,
            });
        }
    };

    if is_debug {
        debug!("status: {}", res.status);
        debug!("stdout: {} bytes long", res.stdout.len());
        trace!("stdout: {:?}", res.stdout);
        debug!("stderr: {} bytes long", res.stderr.len());
        trace!("stderr: {:?}", res.stderr);
    }

    Ok(res)
}

/// Drain a pipe, keeping its content only when asked to.
/// The pipe must always be drained or the child could block on a full buffer.
async fn read_to_string<R: AsyncRead + Unpin>(
    pipe: Option<R>,
    keep: bool,
) -> std::io::Result<String> {
    let Some(mut pipe) = pipe else {
        return Ok(String::new());
    };

    let mut buf = Vec::new();
    if keep {
        pipe.read_to_end(&mut buf).await?;
    } else {
        tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Run the command and verify that it has returned a success status code.
pub async fn assert_success_command<F>(
    program: &str,
    f: F,
    timeout: Duration,
) -> Result<CommandOutput, ToolError>
where
    F: FnOnce(&mut Command) -> &mut Command,
{
    let res = run_command(
        program,
        f,
        Capture::STDOUT | Capture::STDERR,
        timeout,
        |_| {},
    )
    .await?;
    into_success(program, res)
}

/// Turn a non-0 status code into a [`ToolError::Failed`]
pub fn into_success(program: &str, res: CommandOutput) -> Result<CommandOutput, ToolError> {
    if res.success() {
        Ok(res)
    } else {
        Err(ToolError::Failed {
            program: program.to_owned(),
            status: res.status.to_string(),
            stderr: res.stderr,
        })
    }
}
