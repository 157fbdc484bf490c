use std::{fmt, path::Path};

use itertools::Itertools;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{
    agent::policy::{Policy, argmax},
    error::{EnvError, TraderResult},
    gym::{action::Action, state::State},
    io::SerdeFormat,
};

/// Best action per state, extracted from a trained policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    actions: Vec<Action>,
}

impl Strategy {
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    /// Argmax of the policy's action values for every state, in one batched prediction.
    pub fn from_policy<P: Policy>(policy: &P) -> TraderResult<Self> {
        let inputs = Array2::eye(policy.num_states());
        let values = policy.predict(inputs.view())?;
        let actions = values
            .rows()
            .into_iter()
            .map(|row| Action::from_index(argmax(row)))
            .collect::<TraderResult<Vec<_>>>()?;
        Ok(Self { actions })
    }

    pub fn action_for(&self, state: State) -> TraderResult<Action> {
        self.actions.get(state.0).copied().ok_or_else(|| {
            EnvError::StateOutOfRange {
                state: state.0,
                num_states: self.actions.len(),
            }
            .into()
        })
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn save_json(&self, path: &Path) -> TraderResult<()> {
        SerdeFormat::Json.write(self, path)
    }

    pub fn load_json(path: &Path) -> TraderResult<Self> {
        SerdeFormat::Json.read(path)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines = self
            .actions
            .iter()
            .enumerate()
            .map(|(state, action)| format!("{state:>4} {state:0>8b} -> {action}"))
            .join("\n");
        write!(f, "{lines}")
    }
}
