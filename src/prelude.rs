// 1. Traits
pub use crate::agent::policy::Policy;
pub use crate::gym::Env;

// 2. The Core "Loop" Types
pub use crate::agent::{
    Agent, LiveStep,
    memory::{ExperienceBuffer, Transition},
    policy::{FitMetrics, LinearPolicy},
    strategy::Strategy,
};
pub use crate::gym::{
    EnvStatus, Resume, Reward, StepInfo, StepOutcome,
    action::Action,
    env::Environment,
    portfolio::{Movement, Portfolio, PresetRewards, RewardRegime},
    spring::{MarketMode, Spring},
    state::{State, StateEncoder, StateFeature},
};

// 3. Market Data
pub use crate::data::series::{MarketRow, MarketSeries, SeriesColumns};

// 4. Reports
pub use crate::report::{
    EpisodeStats, SimulationSummary, TrainingReport,
    portfolio_log::{PortfolioLog, PortfolioRecord},
};

// 5. Errors
pub use crate::error::{
    AgentError, ConfigError, DataError, EnvError, IoError, TraderError, TraderResult,
};

// 6. Configs
pub use crate::config::{AgentConfig, EnvConfig, GuardConfig, PolicyConfig, TraderConfig};
pub use crate::io::{SerdeFormat, valid_output_name};
pub use crate::updater::{Updater, UpdaterConfig};
