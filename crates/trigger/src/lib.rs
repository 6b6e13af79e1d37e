//! Operator trigger dispatch.
//!
//! When a threshold crosses, the accountant hands a [`Notice`] to the
//! [`Dispatcher`], which logs the message, builds the environment the
//! operator hook sees, and runs the hook through a [`TriggerRunner`]. The
//! runner is a seam: production uses [`CommandRunner`] (plain
//! `std::process::Command`), tests substitute a recorder.
//!
//! Hook paths are validated once at startup with [`check_hook`]; a
//! misconfigured path there is fatal. Failures while dispatching are only
//! logged — a broken hook must not stop error accounting.

#[cfg(test)]
mod tests;

use bucket::{BucketConfig, LeakyBucket};
use common::{CeError, CeResult};
use hashbrown::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{info, warn};
use types::DimmLocation;

/// How the hook process is waited on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    /// Block until the hook exits. Used for the pre/post soft-offline
    /// hooks, which coordinate with the offline action.
    Sync,
    /// Spawn and keep going; children are reaped opportunistically.
    Async,
}

/// Environment handed to the operator hook.
pub type EnvMap = HashMap<String, String>;

/// One threshold notice: the message, the bucket behind it, and how to run
/// the hook.
#[derive(Debug)]
pub struct Notice<'a> {
    pub message: String,
    pub cfg: &'a BucketConfig,
    pub bucket: &'a LeakyBucket,
    /// Lifetime event count behind the bucket (page errors or
    /// replacements).
    pub total_count: u64,
    /// Timestamp of the event that crossed; 0 suppresses `LASTEVENT`.
    pub last_event: u64,
    pub dimm: Option<DimmLocation>,
    /// Hook to execute; `None` means log only.
    pub hook: Option<&'a Path>,
    /// Positional arguments for the hook.
    pub args: Vec<String>,
    pub mode: ExecMode,
}

/// Executes operator hooks.
pub trait TriggerRunner {
    fn run(&mut self, hook: &Path, args: &[String], env: &EnvMap, mode: ExecMode) -> CeResult<()>;
}

/// Spawns operator hooks as child processes.
#[derive(Debug, Default)]
pub struct CommandRunner {
    children: Vec<Child>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop children that have exited since the last run.
    fn reap(&mut self) {
        self.children.retain_mut(|child| matches!(child.try_wait(), Ok(None)));
    }
}

impl TriggerRunner for CommandRunner {
    fn run(&mut self, hook: &Path, args: &[String], env: &EnvMap, mode: ExecMode) -> CeResult<()> {
        self.reap();
        let mut cmd = Command::new(hook);
        cmd.args(args).stdin(Stdio::null());
        for (key, value) in env {
            cmd.env(key, value);
        }
        match mode {
            ExecMode::Sync => {
                let status = cmd.status().map_err(|err| {
                    CeError::Trigger(format!("cannot run `{}`: {}", hook.display(), err))
                })?;
                if !status.success() {
                    return Err(CeError::Trigger(format!(
                        "`{}` exited with {}",
                        hook.display(),
                        status
                    )));
                }
                Ok(())
            }
            ExecMode::Async => {
                let child = cmd.spawn().map_err(|err| {
                    CeError::Trigger(format!("cannot run `{}`: {}", hook.display(), err))
                })?;
                self.children.push(child);
                Ok(())
            }
        }
    }
}

/// Startup validation of a configured hook path: it must exist and carry an
/// executable bit.
pub fn check_hook(path: &Path) -> CeResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::metadata(path).map_err(|err| {
        CeError::Trigger(format!("cannot access trigger `{}`: {}", path.display(), err))
    })?;
    if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
        return Err(CeError::Trigger(format!(
            "trigger `{}` is not executable",
            path.display()
        )));
    }
    Ok(())
}

/// Builds hook environments and runs hooks for threshold notices.
#[derive(Debug)]
pub struct Dispatcher<R> {
    runner: R,
}

impl<R: TriggerRunner> Dispatcher<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Log the notice and run its hook, if any. Runner failures are logged
    /// and swallowed.
    pub fn dispatch(&mut self, notice: &Notice<'_>) {
        if notice.cfg.log {
            info!("{}", notice.message);
        }
        let Some(hook) = notice.hook else {
            return;
        };
        let env = build_env(notice);
        if let Err(err) = self.runner.run(hook, &notice.args, &env, notice.mode) {
            warn!("page error trigger failed: {}", err);
        }
    }
}

fn build_env(notice: &Notice<'_>) -> EnvMap {
    let mut env = EnvMap::new();
    env.insert("THRESHOLD".into(), notice.bucket.summary(notice.cfg));
    env.insert("TOTALCOUNT".into(), notice.total_count.to_string());
    if notice.last_event != 0 {
        env.insert("LASTEVENT".into(), notice.last_event.to_string());
    }
    env.insert("AGETIME".into(), notice.cfg.window.as_secs().to_string());
    env.insert("MESSAGE".into(), notice.message.clone());
    env.insert("THRESHOLD_COUNT".into(), notice.bucket.level().to_string());
    if let Some(dimm) = &notice.dimm {
        env.insert("SOCKETID".into(), dimm.socket_id.to_string());
        env.insert("CHANNEL".into(), fmt_slot(dimm.channel));
        env.insert("DIMM".into(), fmt_slot(dimm.dimm));
    }
    env
}

fn fmt_slot(slot: Option<u32>) -> String {
    slot.map_or_else(|| "?".to_string(), |s| s.to_string())
}
