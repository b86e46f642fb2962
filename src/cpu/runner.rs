//! Free-running execution.
//!
//! Continuous execution is the driver calling [`Cpu::step`] in a loop. The
//! helpers here do that loop cooperatively: the cancellation token is checked
//! before every step and never inside one, so a stopped engine is always
//! between two whole instructions.

use crate::cpu::{Cpu, CpuError, CpuState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next step boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl Cpu {
    /// Step until `token` is cancelled, a step fails, or `max_steps`
    /// instructions have run.
    ///
    /// Returns the number of instructions executed.
    pub fn run_until_cancelled(
        &mut self,
        token: &CancelToken,
        max_steps: Option<u64>,
    ) -> Result<u64, CpuError> {
        let mut done = 0u64;
        drive(self, token, max_steps, &mut done)?;
        Ok(done)
    }
}

fn drive(
    cpu: &mut Cpu,
    token: &CancelToken,
    max_steps: Option<u64>,
    done: &mut u64,
) -> Result<(), CpuError> {
    while !token.is_cancelled() {
        if max_steps.is_some_and(|max| *done >= max) {
            break;
        }
        cpu.step()?;
        *done += 1;
    }
    Ok(())
}

/// Result of a finished free run.
#[derive(Debug)]
pub struct Stopped {
    /// The engine, handed back to the caller.
    pub cpu: Cpu,
    /// Instructions executed by the worker.
    pub steps: u64,
    /// Set when the worker stopped on a failed step.
    pub error: Option<CpuError>,
}

/// A CPU stepping on its own worker thread.
///
/// The worker owns the engine while it runs; [`FreeRun::stop`] returns it.
#[derive(Debug)]
pub struct FreeRun {
    token: CancelToken,
    handle: JoinHandle<Stopped>,
}

impl FreeRun {
    /// Move `cpu` onto a worker thread and start stepping.
    ///
    /// Fails with [`CpuError::NotReady`] if no program is loaded.
    pub fn spawn(cpu: Cpu, max_steps: Option<u64>) -> Result<Self, CpuError> {
        if cpu.state() != CpuState::Ready {
            return Err(CpuError::NotReady(cpu.state()));
        }

        let token = CancelToken::new();
        let worker_token = token.clone();
        info!(pc = cpu.pc(), ?max_steps, "free run started");

        let handle = thread::spawn(move || {
            let mut cpu = cpu;
            let mut steps = 0;
            let error = drive(&mut cpu, &worker_token, max_steps, &mut steps).err();
            Stopped { cpu, steps, error }
        });

        Ok(Self { token, handle })
    }

    /// A handle that can cancel this run from elsewhere.
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Whether the worker has already returned (step limit or error).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel, wait for the in-flight step to finish and take the engine back.
    pub fn stop(self) -> Result<Stopped, CpuError> {
        self.token.cancel();
        self.join()
    }

    /// Wait for the worker without cancelling it.
    pub fn join(self) -> Result<Stopped, CpuError> {
        let stopped = self.handle.join().map_err(|_| CpuError::WorkerPanicked)?;
        info!(pc = stopped.cpu.pc(), steps = stopped.steps, "free run stopped");
        if let Some(e) = &stopped.error {
            debug!(error = %e, "free run ended on error");
        }
        Ok(stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // JMP 0x00 while CF is clear: spins forever on address 0
    const SPIN: [u8; 2] = [0x50, 0x00];

    #[test]
    fn test_cancelled_token_runs_nothing() {
        let mut cpu = Cpu::from_image(&SPIN).unwrap();
        let token = CancelToken::new();
        token.cancel();

        assert_eq!(cpu.run_until_cancelled(&token, None).unwrap(), 0);
        assert_eq!(cpu.steps(), 0);
    }

    #[test]
    fn test_step_limit() {
        let mut cpu = Cpu::from_image(&SPIN).unwrap();
        let token = CancelToken::new();

        assert_eq!(cpu.run_until_cancelled(&token, Some(10)).unwrap(), 10);
        assert_eq!(cpu.pc(), 0);
    }

    #[test]
    fn test_spawn_requires_program() {
        let err = FreeRun::spawn(Cpu::idle(), None).unwrap_err();
        assert_eq!(err, CpuError::NotReady(CpuState::Idle));
    }

    #[test]
    fn test_worker_stops_between_instructions() {
        let cpu = Cpu::from_image(&SPIN).unwrap();
        let run = FreeRun::spawn(cpu, None).unwrap();
        thread::sleep(Duration::from_millis(10));

        let stopped = run.stop().unwrap();
        assert!(stopped.error.is_none());
        assert_eq!(stopped.steps, stopped.cpu.steps());
        // Every whole JMP lands back on 0; a torn step would leave PC at 1 or 2
        assert_eq!(stopped.cpu.pc(), 0);
    }

    #[test]
    fn test_worker_finishes_at_limit() {
        let cpu = Cpu::from_image(&SPIN).unwrap();
        let run = FreeRun::spawn(cpu, Some(100)).unwrap();

        let stopped = run.join().unwrap();
        assert_eq!(stopped.steps, 100);
        assert_eq!(stopped.cpu.steps(), 100);
    }

    #[test]
    fn test_is_finished_after_limit() {
        let cpu = Cpu::from_image(&SPIN).unwrap();
        let run = FreeRun::spawn(cpu, Some(5)).unwrap();

        while !run.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(run.join().unwrap().steps, 5);
    }

    #[test]
    fn test_token_cancels_from_another_thread() {
        let cpu = Cpu::from_image(&SPIN).unwrap();
        let run = FreeRun::spawn(cpu, None).unwrap();
        assert!(!run.is_finished());

        let token = run.token();
        thread::spawn(move || token.cancel()).join().unwrap();

        let stopped = run.join().unwrap();
        assert!(stopped.error.is_none());
        assert_eq!(stopped.cpu.pc(), 0);
    }
}
