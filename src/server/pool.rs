use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitStatus;

use anyhow::{Context, Result, bail};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// How to start one worker process.
///
/// The pool appends `--worker-id <n>` to the arguments of each worker.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Re-runs this executable with the arguments it was started with.
    pub fn current_process() -> Result<Self> {
        let program = env::current_exe().context("locating current executable")?;
        Ok(Self {
            program,
            args: env::args_os().skip(1).collect(),
        })
    }

    fn command(&self, id: usize) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--worker-id")
            .arg(id.to_string())
            .kill_on_drop(false);
        cmd
    }
}

/// Starts N independent worker processes and waits for all of them.
///
/// Workers share nothing but the listening port. A worker that dies is not
/// restarted.
pub struct WorkerPool {
    command: WorkerCommand,
    workers: usize,
}

impl WorkerPool {
    pub fn new(command: WorkerCommand, workers: usize) -> Self {
        Self { command, workers }
    }

    /// Blocks until every worker has exited.
    ///
    /// SIGINT or SIGTERM on the pool is forwarded to live workers as SIGTERM.
    /// Fails if any worker exits unsuccessfully before shutdown was requested
    /// or cannot be started.
    pub async fn run(self) -> Result<()> {
        let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

        let mut waits: JoinSet<(usize, std::io::Result<ExitStatus>)> = JoinSet::new();
        let mut live: HashMap<usize, Pid> = HashMap::new();
        let mut failed = 0usize;
        let mut stopping = false;

        for id in 0..self.workers {
            let mut child = match self.command.command(id).spawn() {
                Ok(child) => child,
                Err(e) => {
                    warn!(worker = id, error = %e, "could not start worker");
                    failed += 1;
                    stopping = true;
                    terminate(&live);
                    break;
                }
            };

            let pid = child.id();
            if let Some(pid) = pid {
                live.insert(id, Pid::from_raw(pid as i32));
            }
            info!(worker = id, pid, "worker started");

            waits.spawn(async move { (id, child.wait().await) });
        }

        loop {
            tokio::select! {
                joined = waits.join_next() => {
                    let Some(joined) = joined else { break };
                    let (id, status) = joined.context("worker supervision task failed")?;
                    live.remove(&id);

                    match status {
                        Ok(status) if status.success() => info!(worker = id, "worker exited"),
                        Ok(status) if stopping => {
                            info!(worker = id, %status, "worker stopped");
                        }
                        Ok(status) => {
                            warn!(worker = id, %status, "worker exited abnormally");
                            failed += 1;
                        }
                        Err(e) => {
                            warn!(worker = id, error = %e, "lost track of worker");
                            failed += 1;
                        }
                    }
                }
                _ = sigint.recv(), if !stopping => {
                    info!("interrupt received, stopping workers");
                    stopping = true;
                    terminate(&live);
                }
                _ = sigterm.recv(), if !stopping => {
                    info!("termination requested, stopping workers");
                    stopping = true;
                    terminate(&live);
                }
            }
        }

        info!("all workers have exited");
        if failed > 0 {
            bail!("{failed} of {} workers failed", self.workers);
        }
        Ok(())
    }
}

fn terminate(live: &HashMap<usize, Pid>) {
    for (id, pid) in live {
        if let Err(e) = kill(*pid, Signal::SIGTERM) {
            debug!(worker = id, error = %e, "could not signal worker");
        }
    }
}
