//! Run-wide safety limits and the budget that enforces them.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Global limits carried through every recursive `work` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// A node entered at this depth or deeper fails without attempts.
    pub max_depth: u32,
    pub max_cycles_per_intention: u32,
    /// Wall-clock budget for the whole run.
    pub wall_clock: Duration,
    /// Maximum number of cycles across the whole run.
    pub max_iterations: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_cycles_per_intention: 5,
            wall_clock: Duration::from_secs(30 * 60),
            max_iterations: 200,
        }
    }
}

/// Which run-wide limit was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BudgetBreach {
    Deadline,
    Iterations { used: u32, max: u32 },
}

impl fmt::Display for BudgetBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetBreach::Deadline => f.write_str("wall-clock deadline passed"),
            BudgetBreach::Iterations { used, max } => {
                write!(f, "{used} of {max} iterations used")
            }
        }
    }
}

/// Deadline plus iteration counter for one run.
#[derive(Debug, Clone)]
pub struct Budget {
    /// `None` when the wall-clock limit lies beyond what `Instant` can represent.
    deadline: Option<Instant>,
    iterations_used: u32,
    max_iterations: u32,
}

impl Budget {
    pub fn start(limits: &Limits) -> Self {
        Self {
            deadline: Instant::now().checked_add(limits.wall_clock),
            iterations_used: 0,
            max_iterations: limits.max_iterations,
        }
    }

    /// Check both limits before starting a new cycle or child.
    pub fn check(&self) -> Result<(), BudgetBreach> {
        if self.iterations_used >= self.max_iterations {
            return Err(BudgetBreach::Iterations {
                used: self.iterations_used,
                max: self.max_iterations,
            });
        }
        match self.deadline {
            Some(deadline) => remaining_budget(deadline).map(|_| ()),
            None => Ok(()),
        }
    }

    pub fn charge_iteration(&mut self) {
        self.iterations_used = self.iterations_used.saturating_add(1);
    }

    pub fn iterations_used(&self) -> u32 {
        self.iterations_used
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        match self.deadline {
            Some(deadline) => deadline
                .checked_duration_since(Instant::now())
                .unwrap_or(Duration::ZERO),
            None => Duration::MAX,
        }
    }

    /// Timeout for one blocking call: the smaller of `cap` and the remaining budget.
    pub fn call_timeout(&self, cap: Duration) -> Duration {
        cap.min(self.remaining())
    }
}

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration, BudgetBreach> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::ZERO);
    if remaining.is_zero() {
        return Err(BudgetBreach::Deadline);
    }
    Ok(remaining)
}
