use anyhow::{Context, anyhow};
use assert_cmd::cargo::{CargoError, CommandCargoExt};
use std::{
    io::{BufRead, BufReader, Read, Write},
    ops::{Deref, DerefMut},
    path::Path,
    process::{Child, Command, Output, Stdio},
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

pub const AGENT_BIN: &str = "weft-agent";

/// Constructs a `Command` that executes the agent binary.
///
/// This does NOT call `cargo run`, see [`assert_cmd::Command::cargo_bin`].
pub fn command_run_agent(bin_args: &[&str], workdir: &Path) -> Result<Command, CargoError> {
    let mut cmd = Command::cargo_bin(AGENT_BIN)?;
    cmd.args(bin_args).current_dir(workdir).env("RUST_LOG", "info");
    Ok(cmd)
}

/// Executes the agent with the given arguments, waits for it to exit and
/// duplicates its output to the current stdout/stderr and two buffers.
pub fn run_agent_tee(bin_args: &[&str], workdir: &Path) -> anyhow::Result<Output> {
    let mut cmd = command_run_agent(bin_args, workdir)?;
    let child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("could not spawn process: {cmd:?}"))?;
    let mut child = ChildGuard::new(child);

    let child_stdout = child.stdout.take().context("could not attach to child stdout")?;
    let child_stderr = child.stderr.take().context("could not attach to child stderr")?;

    fn tee(mut stream: impl Read, a: &mut impl Write, b: &mut impl Write) -> std::io::Result<()> {
        let mut buf = [0u8; 256];
        loop {
            let n_read = stream.read(&mut buf)?;
            if n_read == 0 {
                break;
            }
            let buf = &buf[..n_read];
            a.write_all(buf)?;
            b.write_all(buf)?;
        }
        Ok(())
    }

    let stdout_thread = thread::spawn(move || {
        let mut buf = Vec::with_capacity(512);
        tee(child_stdout, &mut buf, &mut std::io::stdout().lock())?;
        anyhow::Ok(buf)
    });
    let stderr_thread = thread::spawn(move || {
        let mut buf = Vec::with_capacity(512);
        tee(child_stderr, &mut buf, &mut std::io::stderr().lock())?;
        anyhow::Ok(buf)
    });

    let stdout = stdout_thread.join().map_err(|_| anyhow!("stdout thread panicked"))??;
    let stderr = stderr_thread.join().map_err(|_| anyhow!("stderr thread panicked"))??;
    let status = child.wait()?;
    Ok(Output { status, stdout, stderr })
}

/// An agent that runs in the background.
pub struct BackgroundAgent {
    pub child: ChildGuard,
    /// Lines written by the agent on its stderr, where the logs go.
    lines: mpsc::Receiver<String>,
}

impl BackgroundAgent {
    pub fn spawn(bin_args: &[&str], workdir: &Path) -> anyhow::Result<Self> {
        let mut cmd = command_run_agent(bin_args, workdir)?;
        let child = cmd
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("could not spawn process: {cmd:?}"))?;
        let mut child = ChildGuard::new(child);
        let stderr = child.stderr.take().context("could not attach to child stderr")?;

        let (tx, lines) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                eprintln!("{line}");
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Ok(Self { child, lines })
    }

    /// Waits for a log line that contains `pattern`.
    pub fn wait_for_log(&self, pattern: &str, timeout: Duration) -> anyhow::Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = self
                .lines
                .recv_timeout(remaining)
                .with_context(|| format!("no log line containing {pattern:?}"))?;
            if line.contains(pattern) {
                return Ok(line);
            }
        }
    }

    #[cfg(unix)]
    pub fn signal(&self, signal: libc::c_int) -> anyhow::Result<()> {
        let pid = libc::pid_t::try_from(self.child.id())?;
        // SAFETY: kill has no memory safety requirement
        let res = unsafe { libc::kill(pid, signal) };
        if res != 0 {
            return Err(std::io::Error::last_os_error()).context("kill failed");
        }
        Ok(())
    }
}

/// A wrapper around a child process that kills the child on drop.
pub struct ChildGuard(Option<Child>);

impl ChildGuard {
    pub fn new(process: Child) -> Self {
        Self(Some(process))
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.0.take() {
            if let Err(e) = child.kill() {
                println!("ERROR: failed to kill child {} on drop: {e}", child.id());
            }
        }
    }
}

impl Deref for ChildGuard {
    type Target = Child;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref().unwrap()
    }
}

impl DerefMut for ChildGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut().unwrap()
    }
}
