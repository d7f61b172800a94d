use super::{CaptureEngine, RawRecord};
use config::CaptureConfig;
use errors::CaptureError;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Prefix under which connector properties are handed to the child process.
pub const PROPERTY_ENV_PREFIX: &str = "DEBEZIUM_SOURCE_";

/// Runs an external connector process that writes one JSON change record
/// per stdout line.
///
/// The rendered connector properties are passed as environment variables,
/// `database.hostname` becoming `DEBEZIUM_SOURCE_DATABASE_HOSTNAME`.
///
/// On Unix the connector leads its own process group and `close` signals the
/// whole group, so helpers forked by a wrapper script die with it.
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    child: Mutex<Option<Child>>,
    close_requested: AtomicBool
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>, properties: &BTreeMap<String, String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: properties
                .iter()
                .map(|(key, value)| (property_env_key(key), value.clone()))
                .collect(),
            child: Mutex::new(None),
            close_requested: AtomicBool::new(false)
        }
    }

    /// Builds the engine from `capture.command`, or `None` when no connector
    /// command is configured.
    pub fn from_config(capture: &CaptureConfig) -> Option<Self> {
        let command = capture.command.as_ref()?;
        Some(Self::new(
            command.program.clone(),
            command.args.clone(),
            &capture.to_properties()
        ))
    }

    fn spawn(&self) -> Result<Option<std::process::ChildStdout>, CaptureError> {
        let mut slot = self.child.lock();
        if self.close_requested.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|e| CaptureError::Spawn {
                program: self.program.clone(),
                reason: e.to_string()
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::engine_failed("connector stdout not captured"))?;
        info!(program = %self.program, pid = child.id(), "Connector process started");
        *slot = Some(child);
        Ok(Some(stdout))
    }
}

impl CaptureEngine for CommandEngine {
    fn run(&self, emit: &dyn Fn(RawRecord)) -> Result<(), CaptureError> {
        let Some(stdout) = self.spawn()? else {
            debug!(program = %self.program, "Close requested before connector start");
            return Ok(());
        };

        for line in BufReader::new(stdout).lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            emit(RawRecord::new(None, Some(trimmed.to_string())));
        }

        let child = self.child.lock().take();
        let status = match child {
            Some(mut child) => Some(child.wait()?),
            None => None
        };

        if self.close_requested.swap(false, Ordering::SeqCst) {
            debug!(program = %self.program, "Connector process closed");
            return Ok(());
        }

        match status {
            Some(status) if !status.success() => Err(CaptureError::engine_failed(format!(
                "connector {} exited with {status}",
                self.program
            ))),
            _ => Ok(())
        }
    }

    fn close(&self) -> Result<(), CaptureError> {
        let mut slot = self.child.lock();
        self.close_requested.store(true, Ordering::SeqCst);
        if let Some(child) = slot.as_mut() {
            terminate(child)?;
        } else {
            warn!(program = %self.program, "Close requested with no connector process");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "command"
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> Result<(), CaptureError> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let group = i32::try_from(child.id()).map_err(|e| CaptureError::CloseFailed {
        reason: e.to_string()
    })?;
    match killpg(Pid::from_raw(group), Signal::SIGKILL) {
        // The whole group already exited and only awaits reaping.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(CaptureError::CloseFailed {
            reason: format!("failed to signal process group {group}: {e}")
        })
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> Result<(), CaptureError> {
    child.kill().map_err(|e| CaptureError::CloseFailed {
        reason: e.to_string()
    })
}

fn property_env_key(key: &str) -> String {
    let normalized: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{PROPERTY_ENV_PREFIX}{normalized}")
}
