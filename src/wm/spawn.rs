//! Spawn Module
//!
//! Fire-and-forget process launching and the SIGCHLD reaper that keeps
//! exited children from piling up as zombies.

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{Pid, setsid};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Held across `Command::spawn` and `reap_exited`.
///
/// When exec fails, std waits on the failed child itself; a concurrent
/// `waitpid(-1)` must not collect that child first.
static CHILD_LOCK: Mutex<()> = Mutex::new(());

fn child_lock() -> MutexGuard<'static, ()> {
    CHILD_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Starts external programs on behalf of key bindings
pub trait Launcher {
    /// Launch `argv` without waiting for it. Failures are not reported back.
    fn launch(&mut self, argv: &[String]);
}

/// Launches each program in its own session so it outlives the window manager
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedLauncher;

impl Launcher for DetachedLauncher {
    fn launch(&mut self, argv: &[String]) {
        match spawn_detached(argv) {
            Ok(pid) => info!("Launched {:?} (pid {})", argv, pid),
            Err(e) => warn!("Failed to launch {:?}: {:#}", argv, e),
        }
    }
}

/// Spawn `argv` as a new session leader and return its pid.
pub fn spawn_detached(argv: &[String]) -> Result<u32> {
    let (program, args) = argv.split_first().context("Empty command")?;

    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null());

    // Safety: setsid is async-signal-safe and touches no parent state
    unsafe {
        command.pre_exec(|| {
            setsid()?;
            Ok(())
        });
    }

    let child = {
        let _guard = child_lock();
        command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", program))?
    };

    // Dropping the handle does not wait; the reaper collects the exit status
    Ok(child.id())
}

/// Collect the exit status of every child that has already terminated.
pub fn reap_exited() -> Vec<Pid> {
    let _guard = child_lock();
    let mut reaped = Vec::new();
    loop {
        match waitpid(None::<Pid>, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => {
                if let Some(pid) = status.pid() {
                    debug!("Reaped child {}: {:?}", pid, status);
                    reaped.push(pid);
                }
            }
            Err(Errno::EINTR) => continue,
            // ECHILD: no children left
            Err(_) => break,
        }
    }
    reaped
}

/// Reap children whenever SIGCHLD arrives, off the event thread.
pub fn spawn_reaper() -> Result<JoinHandle<()>> {
    let mut sigchld = signal(SignalKind::child()).context("Failed to install SIGCHLD handler")?;

    Ok(tokio::spawn(async move {
        // Children that exited before the handler existed
        reap_exited();
        while sigchld.recv().await.is_some() {
            reap_exited();
        }
    }))
}
