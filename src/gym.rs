use serde::{Deserialize, Serialize};

use crate::{
    agent::strategy::Strategy,
    error::TraderResult,
    gym::{action::Action, state::State},
    impl_additive_primitive, impl_from_primitive, impl_neg_primitive,
};

pub mod action;
pub mod env;
pub mod portfolio;
pub mod spring;
pub mod state;

/// Scalar reward returned by the environment for one step.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Reward(pub f64);
impl_from_primitive!(Reward, f64);
impl_additive_primitive!(Reward, f64);
impl_neg_primitive!(Reward, f64);

/// The stepping contract consumed by the agent.
///
/// Action execution and reward computation are delegated to the
/// [`Portfolio`](portfolio::Portfolio); the environment owns the price series, the
/// cursor over it and the spring guard.
pub trait Env {
    /// Starts a new episode at the first row of the series.
    fn reset(&mut self) -> TraderResult<State>;

    /// Executes `action` at the current price and advances one row.
    fn step(&mut self, action: Action) -> TraderResult<(State, Reward, StepOutcome, StepInfo)>;

    /// Looks the state up in `strategy` and lets the guard correct the result.
    fn decide_next_action(&mut self, state: State, strategy: &Strategy) -> TraderResult<Action>;

    /// Continues from a previously persisted portfolio log (live mode).
    fn resume(&mut self) -> TraderResult<Resume>;
}

/// Represents the lifecycle status of the environment.
///
/// ```md
/// Current State            | Action    | Next State | Notes
/// -------------------------|-----------|------------|----------------------------------
/// `Ready` / `Done`         | reset()   | Running    | Start at the first row
/// `Ready` / `Done`         | resume()  | Running    | Start at the first unlogged row
/// `Running` (rows left)    | step()    | Running    |
/// `Running` (last row)     | step()    | Done       | Episode terminates
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvStatus {
    /// Initial state. The environment is waiting for `reset()` or `resume()`.
    Ready,

    /// An episode is active and the environment accepts `step()` calls.
    Running,

    /// The series has been consumed.
    Done,
}

impl EnvStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    InProgress,
    /// end of the price series
    Done,
}

impl StepOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Auxiliary information about an executed step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInfo {
    /// The action as executed by the portfolio. A decided `Buy` or `Sell` that could not
    /// be carried out shows up here as `FailedBuy` or `FailedSell`.
    pub executed: Action,

    /// Price at which the action was executed.
    pub price: f64,
}

/// Result of [`Env::resume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// The environment continues from the given state.
    Resumed(State),

    /// The persisted log already covers every row of the series; nothing to decide.
    Synchronized,
}
