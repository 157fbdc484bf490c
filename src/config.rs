use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, IoError, TraderResult},
    gym::{
        action::Action,
        portfolio::{PresetRewards, RewardRegime},
        spring::MarketMode,
        state::StateFeature,
    },
    io::SerdeFormat,
};

/// Complete configuration of a training, simulation or live run.
///
/// Every recognized option is declared here with its type and default. Unknown keys are
/// rejected when loading, and [`TraderConfig::validate`] is run by every loading path as
/// well as by the constructors of [`Agent`](crate::agent::Agent) and
/// [`Environment`](crate::gym::env::Environment).
///
/// # Example
///
/// ```
/// # use qtrader::prelude::*;
/// let cfg = TraderConfig::default()
///     .with_guard(GuardConfig {
///         stop_drop: true,
///         stop_drop_rate: 0.1,
///         ..GuardConfig::default()
///     });
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TraderConfig {
    pub agent: AgentConfig,
    pub environment: EnvConfig,
    pub guard: GuardConfig,
    pub policy: PolicyConfig,
}

/// Q-learning hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Number of training episodes.
    pub num_episodes: usize,
    /// Warm-up episodes during which experience accumulates without learning.
    pub start_episodes: usize,
    /// Learn every `train_steps` steps (once warm).
    pub train_steps: usize,
    /// Size of the sliding window used by minibatch learning.
    pub batch_size: usize,
    /// Number of transitions sampled by experience replay.
    pub exp_batch_size: usize,
    /// Selects experience replay (per episode) instead of minibatch learning (per step).
    pub experience_replay: bool,
    /// Discount factor.
    pub gamma: f64,
    /// Initial exploration rate.
    pub epsilon: f64,
    /// Floor of the exploration rate.
    pub epsilon_min: f64,
    /// Geometric decay applied to epsilon after each episode.
    pub decay_factor: f64,
    pub num_states: usize,
    pub num_actions: usize,
    /// Capacity of the experience buffer.
    pub memory_capacity: usize,
    /// Seed for exploration and replay sampling. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            num_episodes: 100,
            start_episodes: 0,
            train_steps: 1,
            batch_size: 32,
            exp_batch_size: 32,
            experience_replay: false,
            gamma: 0.95,
            epsilon: 1.0,
            epsilon_min: 0.01,
            decay_factor: 0.995,
            num_states: 1 << StateFeature::default_set().len(),
            num_actions: Action::NUM_DECIDABLE,
            memory_capacity: 20_000,
            seed: None,
        }
    }
}

/// Portfolio, reward and state-encoding options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvConfig {
    pub initial_budget: f64,
    /// Shares bought or sold by a single `buy` / `sell`.
    pub shares_per_trade: f64,
    /// Number of (price, forecast) pairs kept for lag features.
    pub stack_size: usize,
    /// Selects the direct-reward regime instead of the preset constants.
    pub direct_reward: bool,
    /// Scales the preset sell reward by `|net_value| + 1`.
    pub proportional_reward: bool,
    pub rewards: PresetRewards,
    /// Binary features composing the state, least significant bit first.
    pub state_features: Vec<StateFeature>,
    /// Persisted portfolio table used by live mode.
    pub portfolio_file: Option<PathBuf>,
    /// Side file mirroring the last live action.
    pub action_file: Option<PathBuf>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            initial_budget: 10_000.0,
            shares_per_trade: 1.0,
            stack_size: 5,
            direct_reward: false,
            proportional_reward: false,
            rewards: PresetRewards::default(),
            state_features: StateFeature::default_set(),
            portfolio_file: None,
            action_file: None,
        }
    }
}

impl EnvConfig {
    pub fn reward_regime(&self) -> RewardRegime {
        if self.direct_reward {
            RewardRegime::Direct
        } else {
            RewardRegime::Preset {
                rewards: self.rewards,
                proportional: self.proportional_reward,
            }
        }
    }
}

/// Spring guard options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardConfig {
    pub mode: MarketMode,
    /// Enables the guard.
    pub stop_drop: bool,
    /// Retracement fraction from the tracked extreme that forces a sell.
    pub stop_drop_rate: f64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            mode: MarketMode::Bull,
            stop_drop: false,
            stop_drop_rate: 0.05,
        }
    }
}

/// Function approximator options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub learning_rate: f64,
    pub format: SerdeFormat,
    /// Where the trained policy is stored. Defaults to a name derived from the
    /// configuration hash.
    pub policy_file: Option<PathBuf>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            format: SerdeFormat::Postcard,
            policy_file: None,
        }
    }
}

// ================================================================================================
// Builder Methods
// ================================================================================================

impl TraderConfig {
    pub fn with_agent(self, agent: AgentConfig) -> Self {
        Self { agent, ..self }
    }

    pub fn with_environment(self, environment: EnvConfig) -> Self {
        Self {
            environment,
            ..self
        }
    }

    pub fn with_guard(self, guard: GuardConfig) -> Self {
        Self { guard, ..self }
    }

    pub fn with_policy(self, policy: PolicyConfig) -> Self {
        Self { policy, ..self }
    }

    /// Sets the state features and keeps `num_states` consistent with them.
    pub fn with_state_features(mut self, features: Vec<StateFeature>) -> Self {
        self.agent.num_states = 1 << features.len();
        self.environment.state_features = features;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.agent.seed = Some(seed);
        self
    }
}

// ================================================================================================
// Loading & Validation
// ================================================================================================

impl TraderConfig {
    /// Reads and validates a JSON configuration file.
    #[tracing::instrument]
    pub fn from_json_file(path: &Path) -> TraderResult<Self> {
        if !path.exists() {
            return Err(IoError::NotFound(path.display().to_string()).into());
        }
        let raw = std::fs::read_to_string(path).map_err(IoError::from)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> TraderResult<Self> {
        let cfg: Self = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        cfg.validate()?;
        tracing::debug!(?cfg, "Configuration loaded");
        Ok(cfg)
    }

    /// Checks every cross-field and range constraint.
    pub fn validate(&self) -> TraderResult<()> {
        let a = &self.agent;
        let e = &self.environment;
        let g = &self.guard;

        ensure(
            (0.0..=1.0).contains(&a.gamma),
            "gamma",
            format!("must lie in [0, 1], got {}", a.gamma),
        )?;
        ensure(
            (0.0..=1.0).contains(&a.epsilon),
            "epsilon",
            format!("must lie in [0, 1], got {}", a.epsilon),
        )?;
        ensure(
            a.epsilon_min >= 0.0 && a.epsilon_min <= a.epsilon,
            "epsilon_min",
            format!("must lie in [0, epsilon], got {}", a.epsilon_min),
        )?;
        ensure(
            a.decay_factor > 0.0 && a.decay_factor <= 1.0,
            "decay_factor",
            format!("must lie in (0, 1], got {}", a.decay_factor),
        )?;
        ensure(a.batch_size > 0, "batch_size", "must be positive")?;
        ensure(a.exp_batch_size > 0, "exp_batch_size", "must be positive")?;
        ensure(a.train_steps > 0, "train_steps", "must be positive")?;
        ensure(a.memory_capacity > 0, "memory_capacity", "must be positive")?;
        ensure(
            a.num_actions == Action::NUM_DECIDABLE,
            "num_actions",
            format!(
                "must equal the number of decidable actions ({}), got {}",
                Action::NUM_DECIDABLE,
                a.num_actions
            ),
        )?;

        let unique = e.state_features.iter().collect::<HashSet<_>>();
        ensure(
            unique.len() == e.state_features.len(),
            "state_features",
            "features must not repeat",
        )?;
        ensure(
            !e.state_features.is_empty() && e.state_features.len() < usize::BITS as usize,
            "state_features",
            format!("invalid number of features: {}", e.state_features.len()),
        )?;
        ensure(
            a.num_states == 1 << e.state_features.len(),
            "num_states",
            format!(
                "must equal 2^{} for the configured state features, got {}",
                e.state_features.len(),
                a.num_states
            ),
        )?;

        ensure(
            e.initial_budget > 0.0,
            "initial_budget",
            format!("must be positive, got {}", e.initial_budget),
        )?;
        ensure(
            e.shares_per_trade > 0.0,
            "shares_per_trade",
            format!("must be positive, got {}", e.shares_per_trade),
        )?;
        ensure(
            e.stack_size >= 2,
            "stack_size",
            format!("must hold at least two entries, got {}", e.stack_size),
        )?;

        ensure(
            g.stop_drop_rate > 0.0 && g.stop_drop_rate < 1.0,
            "stop_drop_rate",
            format!("must lie in (0, 1), got {}", g.stop_drop_rate),
        )?;
        ensure(
            self.policy.learning_rate > 0.0,
            "learning_rate",
            format!("must be positive, got {}", self.policy.learning_rate),
        )?;

        Ok(())
    }

    /// Computes a deterministic hash of this configuration.
    pub fn hash(&self) -> TraderResult<String> {
        let mut hasher = blake3::Hasher::new();
        let bytes = postcard::to_stdvec(self).map_err(ConfigError::Encoding)?;
        hasher.update(&bytes);
        Ok(format!("{}", hasher.finalize()))
    }

    /// Location of the persisted policy: the configured file, or
    /// `policy-<hash prefix>.<format>` in the working directory.
    pub fn policy_path(&self) -> TraderResult<PathBuf> {
        if let Some(path) = &self.policy.policy_file {
            return Ok(path.clone());
        }
        let hash = self.hash()?;
        Ok(PathBuf::from(format!(
            "policy-{}.{}",
            &hash[..16],
            self.policy.format
        )))
    }
}

fn ensure(cond: bool, field: &'static str, msg: impl Into<String>) -> TraderResult<()> {
    if cond {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, msg).into())
    }
}

#[cfg(test)]
mod test {
    use crate::error::TraderError;

    use super::*;

    fn invalid_field(cfg: &TraderConfig) -> Option<&'static str> {
        match cfg.validate() {
            Err(TraderError::Config(ConfigError::InvalidValue { field, .. })) => Some(field),
            _ => None,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let cfg = TraderConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.agent.num_states, 64);
        assert_eq!(cfg.agent.num_actions, 3);
        assert_eq!(cfg.agent.memory_capacity, 20_000);
    }

    #[test]
    fn test_validation_rejects_out_of_range_values() {
        let mut cfg = TraderConfig::default();
        cfg.agent.gamma = 1.5;
        assert_eq!(invalid_field(&cfg), Some("gamma"));

        let mut cfg = TraderConfig::default();
        cfg.agent.epsilon_min = 0.5;
        cfg.agent.epsilon = 0.1;
        assert_eq!(invalid_field(&cfg), Some("epsilon_min"));

        let mut cfg = TraderConfig::default();
        cfg.agent.num_actions = 5;
        assert_eq!(invalid_field(&cfg), Some("num_actions"));

        let mut cfg = TraderConfig::default();
        cfg.agent.num_states = 10;
        assert_eq!(invalid_field(&cfg), Some("num_states"));

        let mut cfg = TraderConfig::default();
        cfg.guard.stop_drop_rate = 1.0;
        assert_eq!(invalid_field(&cfg), Some("stop_drop_rate"));

        let mut cfg = TraderConfig::default();
        cfg.environment.stack_size = 1;
        assert_eq!(invalid_field(&cfg), Some("stack_size"));
    }

    #[test]
    fn test_state_features_keep_num_states_in_sync() {
        let cfg = TraderConfig::default()
            .with_state_features(vec![StateFeature::CanBuy, StateFeature::CanSell]);
        assert_eq!(cfg.agent.num_states, 4);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_json_loading_rejects_unknown_keys() {
        let ok = r#"{ "agent": { "num_episodes": 3 }, "guard": { "mode": "bear", "stop_drop": true } }"#;
        let cfg = TraderConfig::from_json_str(ok).unwrap();
        assert_eq!(cfg.agent.num_episodes, 3);
        assert_eq!(cfg.guard.mode, MarketMode::Bear);
        assert!(cfg.guard.stop_drop);
        assert_eq!(cfg.agent.batch_size, AgentConfig::default().batch_size);

        let unknown = r#"{ "agent": { "num_episodez": 3 } }"#;
        assert!(matches!(
            TraderConfig::from_json_str(unknown),
            Err(TraderError::Config(ConfigError::Parse(_)))
        ));
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let res = TraderConfig::from_json_file(Path::new("/definitely/not/here.json"));
        assert!(matches!(res, Err(TraderError::Io(IoError::NotFound(_)))));
    }

    #[test]
    fn test_hash_is_deterministic_and_sensitive() {
        let a = TraderConfig::default();
        let b = TraderConfig::default();
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());

        let c = TraderConfig::default().with_seed(7);
        assert_ne!(a.hash().unwrap(), c.hash().unwrap());

        let path = a.policy_path().unwrap();
        let name = path.to_string_lossy();
        assert!(name.starts_with("policy-"));
        assert!(name.ends_with(".postcard"));
    }
}
