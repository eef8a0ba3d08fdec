//! Resource ceilings for one sandbox run.

use atlas_common::SandboxConfig;
use std::time::{Duration, Instant};

use super::ExecutionError;

/// Deadline is checked every this many steps.
const DEADLINE_CHECK_INTERVAL: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub timeout: Duration,
    pub max_steps: u64,
    pub max_allocated_cells: u64,
    pub max_loop_iterations: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::from(&SandboxConfig::default())
    }
}

impl From<&SandboxConfig> for SandboxLimits {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_steps: config.max_steps,
            max_allocated_cells: config.max_allocated_cells,
            max_loop_iterations: config.max_loop_iterations,
        }
    }
}

/// Running consumption against [`SandboxLimits`].
#[derive(Debug)]
pub(crate) struct Budget {
    limits: SandboxLimits,
    deadline: Instant,
    steps: u64,
    cells: u64,
}

impl Budget {
    pub(crate) fn start(limits: SandboxLimits) -> Self {
        Self {
            limits,
            deadline: Instant::now() + limits.timeout,
            steps: 0,
            cells: 0,
        }
    }

    /// Charge one evaluation step.
    pub(crate) fn step(&mut self) -> Result<(), ExecutionError> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(ExecutionError::StepLimit(self.limits.max_steps));
        }
        if self.steps % DEADLINE_CHECK_INTERVAL == 0 {
            self.check_deadline()?;
        }
        Ok(())
    }

    /// Charge a series allocation of `n` cells.
    pub(crate) fn allocate(&mut self, n: usize) -> Result<(), ExecutionError> {
        self.cells = self.cells.saturating_add(n as u64);
        if self.cells > self.limits.max_allocated_cells {
            return Err(ExecutionError::MemoryLimit(self.limits.max_allocated_cells));
        }
        self.check_deadline()
    }

    /// Fail once a single loop has run too many iterations.
    pub(crate) fn loop_iteration(&mut self, iteration: u64) -> Result<(), ExecutionError> {
        if iteration > self.limits.max_loop_iterations {
            return Err(ExecutionError::LoopLimit(self.limits.max_loop_iterations));
        }
        Ok(())
    }

    /// Deadline check for work that loops inside a single builtin; `done`
    /// counts the elements processed so far.
    pub(crate) fn progress(&self, done: usize) -> Result<(), ExecutionError> {
        if done as u64 % DEADLINE_CHECK_INTERVAL == 0 {
            self.check_deadline()?;
        }
        Ok(())
    }

    pub(crate) fn check_deadline(&self) -> Result<(), ExecutionError> {
        if Instant::now() >= self.deadline {
            return Err(ExecutionError::Timeout(self.limits.timeout));
        }
        Ok(())
    }

    pub(crate) fn steps(&self) -> u64 {
        self.steps
    }

    pub(crate) fn cells(&self) -> u64 {
        self.cells
    }
}
