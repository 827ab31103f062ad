//! Helpers for spawning `bdvd` (or any workspace binary) as a subprocess and
//! asserting on its stdout/stderr, used by `bdvd`'s integration tests.

use std::{
    io::{BufRead, BufReader},
    path::Path,
    process::{Child, Command, Stdio},
};

use color_eyre::eyre::{eyre, Result};
use regex::Regex;

/// A running child process, with buffered readers over its stdout/stderr.
pub struct TestChild {
    child: Child,
    stdout: BufReader<std::process::ChildStdout>,
    stderr: BufReader<std::process::ChildStderr>,
}

/// Spawns `binary` with `args`, with its working directory set to `dir` if given.
pub fn spawn(binary: &Path, args: &[&str], dir: Option<&Path>) -> Result<TestChild> {
    let mut command = Command::new(binary);
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = dir {
        command.current_dir(dir);
    }

    let mut child = command.spawn()?;
    let stdout = BufReader::new(
        child
            .stdout
            .take()
            .ok_or_else(|| eyre!("child has no stdout"))?,
    );
    let stderr = BufReader::new(
        child
            .stderr
            .take()
            .ok_or_else(|| eyre!("child has no stderr"))?,
    );

    Ok(TestChild {
        child,
        stdout,
        stderr,
    })
}

impl TestChild {
    /// Reads lines from stdout until one matches `pattern`, or EOF.
    pub fn expect_stdout_line_matches(&mut self, pattern: &str) -> Result<()> {
        let re = Regex::new(pattern)?;
        let mut line = String::new();
        loop {
            line.clear();
            if self.stdout.read_line(&mut line)? == 0 {
                return Err(eyre!("stdout closed before matching {:?}", pattern));
            }
            if re.is_match(&line) {
                return Ok(());
            }
        }
    }

    /// Reads all remaining stderr into a string.
    pub fn collect_stderr(&mut self) -> Result<String> {
        let mut buf = String::new();
        use std::io::Read;
        self.stderr.read_to_string(&mut buf)?;
        Ok(buf)
    }

    pub fn kill(&mut self) -> Result<()> {
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }
}

impl Drop for TestChild {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}
