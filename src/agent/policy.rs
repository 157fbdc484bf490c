use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ordered_float::OrderedFloat;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AgentError, EnvError, TraderResult},
    gym::state::State,
    io::SerdeFormat,
};

/// Loss and mean absolute error of one `fit` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FitMetrics {
    pub loss: f64,
    pub mae: f64,
}

/// Function approximator mapping one-hot encoded states to action values.
///
/// Inputs are `(batch, num_states)` matrices, outputs and targets `(batch, num_actions)`.
pub trait Policy {
    fn num_states(&self) -> usize;

    fn num_actions(&self) -> usize;

    fn predict(&self, inputs: ArrayView2<f64>) -> TraderResult<Array2<f64>>;

    /// Runs `epochs` passes of supervised updates towards `targets`.
    fn fit(
        &mut self,
        inputs: ArrayView2<f64>,
        targets: ArrayView2<f64>,
        epochs: usize,
    ) -> TraderResult<FitMetrics>;

    /// Discards everything learned.
    fn reinitialize<R: Rng + ?Sized>(&mut self, rng: &mut R);

    fn save(&self, path: &Path, format: SerdeFormat) -> TraderResult<()>;

    fn load(path: &Path, format: SerdeFormat) -> TraderResult<Self>
    where
        Self: Sized;

    /// Action values of a single state.
    fn predict_state(&self, state: State) -> TraderResult<Array1<f64>> {
        let input = one_hot(state, self.num_states())?;
        let output = self.predict(input.view())?;
        Ok(output.row(0).to_owned())
    }

    /// Highest action value of a single state.
    fn predict_value(&self, state: State) -> TraderResult<f64> {
        let values = self.predict_state(state)?;
        Ok(values
            .iter()
            .copied()
            .map(OrderedFloat)
            .max()
            .map(|v| v.0)
            .unwrap_or(0.0))
    }
}

/// `(1, num_states)` row with a single one at `state`.
pub fn one_hot(state: State, num_states: usize) -> TraderResult<Array2<f64>> {
    one_hot_batch(&[state], num_states)
}

pub fn one_hot_batch(states: &[State], num_states: usize) -> TraderResult<Array2<f64>> {
    let mut out = Array2::zeros((states.len(), num_states));
    for (row, state) in states.iter().enumerate() {
        if state.0 >= num_states {
            return Err(EnvError::StateOutOfRange {
                state: state.0,
                num_states,
            }
            .into());
        }
        out[[row, state.0]] = 1.0;
    }
    Ok(out)
}

/// Index of the largest value; ties go to the lowest index.
pub fn argmax(values: ArrayView1<f64>) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| {
            OrderedFloat(*a.1)
                .cmp(&OrderedFloat(*b.1))
                .then(b.0.cmp(&a.0))
        })
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

// ================================================================================================
// Linear Policy
// ================================================================================================

/// Single dense layer `y = x W + b`, trained by gradient descent on the mean squared error.
///
/// With one-hot inputs each row of `W` is the action-value vector of one state, so this
/// is a tabular Q-function with a shared bias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearPolicy {
    weights: Array2<f64>,
    bias: Array1<f64>,
    learning_rate: f64,
}

const INIT_SCALE: f64 = 0.01;

impl LinearPolicy {
    pub fn new<R: Rng + ?Sized>(
        num_states: usize,
        num_actions: usize,
        learning_rate: f64,
        rng: &mut R,
    ) -> Self {
        let weights = Array2::from_shape_simple_fn((num_states, num_actions), || {
            rng.random_range(-INIT_SCALE..INIT_SCALE)
        });
        Self {
            weights,
            bias: Array1::zeros(num_actions),
            learning_rate,
        }
    }

    pub fn zeros(num_states: usize, num_actions: usize, learning_rate: f64) -> Self {
        Self {
            weights: Array2::zeros((num_states, num_actions)),
            bias: Array1::zeros(num_actions),
            learning_rate,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn weights(&self) -> ArrayView2<'_, f64> {
        self.weights.view()
    }

    fn check_inputs(&self, inputs: &ArrayView2<f64>) -> TraderResult<()> {
        if inputs.ncols() != self.num_states() {
            return Err(AgentError::ShapeMismatch(format!(
                "expected {} input columns, got {}",
                self.num_states(),
                inputs.ncols()
            ))
            .into());
        }
        Ok(())
    }

    fn forward(&self, inputs: &ArrayView2<f64>) -> Array2<f64> {
        inputs.dot(&self.weights) + &self.bias
    }
}

impl Policy for LinearPolicy {
    fn num_states(&self) -> usize {
        self.weights.nrows()
    }

    fn num_actions(&self) -> usize {
        self.weights.ncols()
    }

    fn predict(&self, inputs: ArrayView2<f64>) -> TraderResult<Array2<f64>> {
        self.check_inputs(&inputs)?;
        Ok(self.forward(&inputs))
    }

    fn fit(
        &mut self,
        inputs: ArrayView2<f64>,
        targets: ArrayView2<f64>,
        epochs: usize,
    ) -> TraderResult<FitMetrics> {
        self.check_inputs(&inputs)?;
        let expected = (inputs.nrows(), self.num_actions());
        if targets.dim() != expected {
            return Err(AgentError::ShapeMismatch(format!(
                "expected targets of shape {expected:?}, got {:?}",
                targets.dim()
            ))
            .into());
        }
        if inputs.nrows() == 0 {
            return Err(AgentError::InvalidInput("empty training batch".to_string()).into());
        }

        let scale = 2.0 / targets.len() as f64;
        let mut metrics = FitMetrics::default();
        for _ in 0..epochs.max(1) {
            let error = self.forward(&inputs) - &targets;
            metrics = FitMetrics {
                loss: error.mapv(|e| e * e).mean().unwrap_or(0.0),
                mae: error.mapv(f64::abs).mean().unwrap_or(0.0),
            };

            let grad_w = inputs.t().dot(&error) * scale;
            let grad_b = error.sum_axis(Axis(0)) * scale;
            self.weights.scaled_add(-self.learning_rate, &grad_w);
            self.bias.scaled_add(-self.learning_rate, &grad_b);
        }
        Ok(metrics)
    }

    fn reinitialize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        *self = Self::new(
            self.num_states(),
            self.num_actions(),
            self.learning_rate,
            rng,
        );
    }

    fn save(&self, path: &Path, format: SerdeFormat) -> TraderResult<()> {
        format.write(self, path)?;
        tracing::info!(path = %path.display(), %format, "Policy saved");
        Ok(())
    }

    fn load(path: &Path, format: SerdeFormat) -> TraderResult<Self> {
        let policy: Self = format.read(path)?;
        tracing::info!(
            path = %path.display(),
            num_states = policy.num_states(),
            num_actions = policy.num_actions(),
            "Policy loaded"
        );
        Ok(policy)
    }
}

#[cfg(test)]
mod test {
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn test_one_hot_rejects_out_of_range_states() {
        let x = one_hot(State(2), 4).unwrap();
        assert_eq!(x, array![[0.0, 0.0, 1.0, 0.0]]);
        assert!(one_hot(State(4), 4).is_err());
    }

    #[test]
    fn test_argmax_prefers_first_on_ties() {
        assert_eq!(argmax(array![0.1, 0.5, 0.5].view()), 1);
        assert_eq!(argmax(array![0.0, 0.0, 0.0].view()), 0);
        assert_eq!(argmax(array![-3.0, -1.0, -2.0].view()), 1);
    }

    #[test]
    fn test_fit_reduces_loss_towards_targets() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut policy = LinearPolicy::new(4, 3, 0.5, &mut rng);
        let inputs = one_hot_batch(&[State(0), State(3)], 4).unwrap();
        let targets = array![[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];

        let first = policy.fit(inputs.view(), targets.view(), 1).unwrap();
        let mut last = first;
        for _ in 0..200 {
            last = policy.fit(inputs.view(), targets.view(), 1).unwrap();
        }
        assert!(last.loss < first.loss);
        assert!(last.mae < 0.05);
        assert_eq!(argmax(policy.predict_state(State(0)).unwrap().view()), 0);
        assert_eq!(argmax(policy.predict_state(State(3)).unwrap().view()), 2);
    }

    #[test]
    fn test_shape_checks() {
        let mut policy = LinearPolicy::zeros(4, 3, 0.1);
        let bad_inputs = Array2::zeros((1, 5));
        assert!(policy.predict(bad_inputs.view()).is_err());

        let inputs = one_hot(State(1), 4).unwrap();
        let bad_targets = Array2::zeros((2, 3));
        assert!(policy.fit(inputs.view(), bad_targets.view(), 1).is_err());
    }

    #[test]
    fn test_save_and_load_both_formats() {
        let dir = std::env::temp_dir().join(format!("qtrader-policy-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let policy = LinearPolicy::new(8, 3, 0.1, &mut rng);

        for format in [SerdeFormat::Postcard, SerdeFormat::Json] {
            let path = dir.join(format!("policy.{format}"));
            policy.save(&path, format).unwrap();
            let back = LinearPolicy::load(&path, format).unwrap();
            assert_eq!(back.num_states(), 8);
            assert_eq!(back.num_actions(), 3);
            let x = one_hot(State(5), 8).unwrap();
            let a = policy.predict(x.view()).unwrap();
            let b = back.predict(x.view()).unwrap();
            assert!((&a - &b).iter().all(|d| d.abs() < 1e-12));
        }
    }
}
