pub mod memory;
pub mod policy;
pub mod strategy;

use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array2;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    agent::{
        memory::{ExperienceBuffer, Transition},
        policy::{FitMetrics, LinearPolicy, Policy, argmax, one_hot, one_hot_batch},
        strategy::Strategy,
    },
    config::{AgentConfig, PolicyConfig, TraderConfig},
    error::{AgentError, ConfigError, EnvError, TraderResult},
    gym::{Env, Resume, Reward, action::Action, env::Environment, state::State},
    report::{
        EpisodeStats, SimulationSummary, TrainingReport,
        portfolio_log::{PortfolioLog, write_action_file},
    },
};

/// Outcome of [`Agent::single_step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LiveStep {
    /// One action was decided, executed and persisted.
    Executed { action: Action, reward: Reward },

    /// The persisted portfolio already covers the latest market row.
    Synchronized,
}

impl LiveStep {
    pub fn is_synchronized(&self) -> bool {
        matches!(self, Self::Synchronized)
    }
}

/// Q-learning agent.
///
/// Owns the policy, its exploration rate, the experience buffer and the random source.
/// Nothing is shared between agents; a run's full learning state lives here.
#[derive(Debug, Clone)]
pub struct Agent<P: Policy = LinearPolicy> {
    cfg: AgentConfig,
    policy_cfg: PolicyConfig,
    policy_path: PathBuf,
    policy: P,
    memory: ExperienceBuffer,
    rng: StdRng,
    epsilon: f64,
}

impl Agent<LinearPolicy> {
    /// Agent with a freshly initialized [`LinearPolicy`].
    pub fn new(cfg: &TraderConfig) -> TraderResult<Self> {
        cfg.validate()?;
        let mut rng = seeded_rng(cfg.agent.seed);
        let policy = LinearPolicy::new(
            cfg.agent.num_states,
            cfg.agent.num_actions,
            cfg.policy.learning_rate,
            &mut rng,
        );
        Self::build(cfg, policy, rng)
    }
}

impl<P: Policy> Agent<P> {
    pub fn with_policy(cfg: &TraderConfig, policy: P) -> TraderResult<Self> {
        cfg.validate()?;
        Self::build(cfg, policy, seeded_rng(cfg.agent.seed))
    }

    /// Loads the policy persisted at the configuration's [`TraderConfig::policy_path`].
    pub fn q_load(cfg: &TraderConfig) -> TraderResult<Self> {
        Self::q_load_from(cfg, &cfg.policy_path()?)
    }

    pub fn q_load_from(cfg: &TraderConfig, path: &Path) -> TraderResult<Self> {
        let policy = P::load(path, cfg.policy.format)?;
        Self::with_policy(cfg, policy)
    }

    fn build(cfg: &TraderConfig, policy: P, rng: StdRng) -> TraderResult<Self> {
        let a = &cfg.agent;
        if policy.num_states() != a.num_states || policy.num_actions() != a.num_actions {
            return Err(AgentError::ShapeMismatch(format!(
                "policy is {}x{}, configuration expects {}x{}",
                policy.num_states(),
                policy.num_actions(),
                a.num_states,
                a.num_actions
            ))
            .into());
        }

        Ok(Self {
            policy_path: cfg.policy_path()?,
            memory: ExperienceBuffer::new(a.memory_capacity),
            epsilon: a.epsilon,
            cfg: a.clone(),
            policy_cfg: cfg.policy.clone(),
            policy,
            rng,
        })
    }

    // ============================================================================================
    // Accessors
    // ============================================================================================

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn memory(&self) -> &ExperienceBuffer {
        &self.memory
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Current best action per state.
    pub fn strategy(&self) -> TraderResult<Strategy> {
        Strategy::from_policy(&self.policy)
    }

    /// Persists the policy at the configured location and returns it.
    pub fn save_policy(&self) -> TraderResult<PathBuf> {
        self.save_policy_to(&self.policy_path)?;
        Ok(self.policy_path.clone())
    }

    pub fn save_policy_to(&self, path: &Path) -> TraderResult<()> {
        self.policy.save(path, self.policy_cfg.format)
    }

    // ============================================================================================
    // Decision
    // ============================================================================================

    /// With probability `epsilon` a uniformly random decidable action, otherwise the
    /// policy's best action for `state`.
    pub fn epsilon_greedy(&mut self, epsilon: f64, state: State) -> TraderResult<Action> {
        if self.rng.random::<f64>() < epsilon {
            let idx = self.rng.random_range(0..self.cfg.num_actions);
            return Action::from_index(idx);
        }
        self.predict(state)
    }

    pub fn predict(&self, state: State) -> TraderResult<Action> {
        let values = self.policy.predict_state(state)?;
        Action::from_index(argmax(values.view()))
    }

    /// Learning runs every `train_steps` steps once the warm-up episodes are over.
    pub fn time_to_learn(&self, episode: usize, step: usize) -> bool {
        step % self.cfg.train_steps == 0 && episode >= self.cfg.start_episodes
    }

    /// Applies one geometric decay step to `epsilon`, never below `epsilon_min`.
    pub fn decay_epsilon(&mut self) {
        if self.epsilon >= self.cfg.epsilon_min {
            self.epsilon = (self.epsilon * self.cfg.decay_factor).max(self.cfg.epsilon_min);
        }
    }

    // ============================================================================================
    // Learning
    // ============================================================================================

    pub fn remember(&mut self, transition: Transition) {
        self.memory.push(transition);
    }

    /// `reward` for terminal transitions, `reward + gamma * max_a Q(next_state, a)` otherwise.
    fn target(&self, t: &Transition) -> TraderResult<f64> {
        if t.done {
            return Ok(t.reward.0);
        }
        Ok(t.reward.0 + self.cfg.gamma * self.policy.predict_value(t.next_state)?)
    }

    /// Current prediction for `t.state` with the taken action's entry replaced by the target.
    fn labeled_output(&self, t: &Transition) -> TraderResult<Array2<f64>> {
        let input = one_hot(t.state, self.policy.num_states())?;
        let mut output = self.policy.predict(input.view())?;
        let idx = t.action.index();
        if idx >= output.ncols() {
            return Err(EnvError::ActionOutOfRange {
                index: idx,
                num_actions: output.ncols(),
            }
            .into());
        }
        output[[0, idx]] = self.target(t)?;
        Ok(output)
    }

    /// Single online update from one transition.
    pub fn step_learn(
        &mut self,
        state: State,
        action: Action,
        reward: Reward,
        next_state: State,
    ) -> TraderResult<FitMetrics> {
        let t = Transition {
            state,
            action,
            reward,
            next_state,
            done: false,
        };
        let input = one_hot(state, self.policy.num_states())?;
        let output = self.labeled_output(&t)?;
        self.policy.fit(input.view(), output.view(), 1)
    }

    /// One batched update over the `batch_size` most recent transitions. Returns zero
    /// metrics while the buffer holds fewer transitions.
    pub fn minibatch_learn(&mut self) -> TraderResult<FitMetrics> {
        let Some(window) = self.memory.recent(self.cfg.batch_size) else {
            return Ok(FitMetrics::default());
        };
        let batch: Vec<Transition> = window.copied().collect();

        let states: Vec<State> = batch.iter().map(|t| t.state).collect();
        let inputs = one_hot_batch(&states, self.policy.num_states())?;
        let mut targets = Array2::zeros((batch.len(), self.policy.num_actions()));
        for (row, t) in batch.iter().enumerate() {
            targets.row_mut(row).assign(&self.labeled_output(t)?.row(0));
        }
        self.policy.fit(inputs.view(), targets.view(), 1)
    }

    /// `exp_batch_size` transitions drawn uniformly without replacement, one update each.
    /// Returns the metrics averaged over the updates.
    pub fn experience_replay(&mut self) -> TraderResult<FitMetrics> {
        let batch = self.memory.sample(&mut self.rng, self.cfg.exp_batch_size);
        if batch.is_empty() {
            return Ok(FitMetrics::default());
        }

        let mut sum = FitMetrics::default();
        for t in &batch {
            let input = one_hot(t.state, self.policy.num_states())?;
            let output = self.labeled_output(t)?;
            let m = self.policy.fit(input.view(), output.view(), 1)?;
            sum.loss += m.loss;
            sum.mae += m.mae;
        }
        let n = batch.len() as f64;
        Ok(FitMetrics {
            loss: sum.loss / n,
            mae: sum.mae / n,
        })
    }

    /// Runs `num_episodes` episodes of epsilon-greedy exploration over `env`, storing
    /// every transition and learning as configured.
    #[tracing::instrument(skip_all, fields(episodes = self.cfg.num_episodes))]
    pub fn reinforce_learn(&mut self, env: &mut Environment) -> TraderResult<TrainingReport> {
        let started = Instant::now();
        let mut report = TrainingReport::default();
        let pb = progress_bar(self.cfg.num_episodes as u64)?;
        pb.set_message("Training...");

        for episode in 0..self.cfg.num_episodes {
            let stats = self.run_episode(env, episode)?;
            tracing::debug!(
                episode,
                avg_reward = stats.avg_reward,
                avg_loss = stats.avg_loss,
                profit = stats.profit,
                epsilon = stats.epsilon,
                "Episode finished"
            );
            report.push(stats);
            self.decay_epsilon();
            pb.inc(1);
        }

        pb.finish_with_message("Training complete.");
        if let Some(last) = report.last() {
            tracing::info!(
                episodes = report.len(),
                last_avg_reward = last.avg_reward,
                last_profit = last.profit,
                epsilon = self.epsilon,
                elapsed = %humantime::format_duration(round_secs(started)),
                "Training finished"
            );
        }
        Ok(report)
    }

    fn run_episode(&mut self, env: &mut Environment, episode: usize) -> TraderResult<EpisodeStats> {
        let epsilon = self.epsilon;
        let mut state = env.reset()?;
        let mut step = 0;
        let mut sum_reward = 0.0;
        let mut sum_fit = FitMetrics::default();
        let mut fits = 0usize;

        loop {
            let action = self.epsilon_greedy(epsilon, state)?;
            let action = env.correct(action);
            let (next_state, reward, outcome, _) = env.step(action)?;
            self.remember(Transition {
                state,
                action,
                reward,
                next_state,
                done: outcome.is_done(),
            });

            if !self.cfg.experience_replay && self.time_to_learn(episode, step) {
                let m = self.minibatch_learn()?;
                sum_fit.loss += m.loss;
                sum_fit.mae += m.mae;
                fits += 1;
            }

            sum_reward += reward.0;
            state = next_state;
            step += 1;
            if outcome.is_done() {
                break;
            }
        }

        if self.cfg.experience_replay && self.memory.len() > self.cfg.exp_batch_size {
            let m = self.experience_replay()?;
            sum_fit.loss += m.loss;
            sum_fit.mae += m.mae;
            fits += 1;
        }

        let fits = fits.max(1) as f64;
        Ok(EpisodeStats {
            episode,
            steps: step,
            avg_reward: sum_reward / step as f64,
            avg_loss: sum_fit.loss / fits,
            avg_mae: sum_fit.mae / fits,
            profit: env.portfolio().net_value(),
            epsilon,
        })
    }

    /// Trains over `env` and returns the resulting strategy. With `fresh` the policy,
    /// the experience buffer and the exploration rate start over; otherwise training
    /// continues from the current (e.g. loaded) policy.
    pub fn q_learn(
        &mut self,
        env: &mut Environment,
        fresh: bool,
    ) -> TraderResult<(Strategy, TrainingReport)> {
        if fresh {
            self.policy.reinitialize(&mut self.rng);
            self.memory.clear();
            self.epsilon = self.cfg.epsilon;
        }
        let report = self.reinforce_learn(env)?;
        Ok((self.strategy()?, report))
    }

    // ============================================================================================
    // Replay
    // ============================================================================================

    /// Replays `strategy` over a whole episode of `env` with no exploration and no learning.
    /// The spring guard corrects every decision.
    #[tracing::instrument(skip_all, fields(rows = env.series().len()))]
    pub fn simulate(
        &self,
        env: &mut Environment,
        strategy: &Strategy,
    ) -> TraderResult<(SimulationSummary, PortfolioLog)> {
        let mut state = env.reset()?;
        let mut total_reward = Reward::default();
        let mut guard_overrides = 0;
        let mut failed_actions = 0;

        loop {
            let decided = strategy.action_for(state)?;
            let action = env.decide_next_action(state, strategy)?;
            if action != decided {
                guard_overrides += 1;
            }
            let (next_state, reward, outcome, info) = env.step(action)?;
            if info.executed.is_failed() {
                failed_actions += 1;
            }
            total_reward += reward;
            state = next_state;
            if outcome.is_done() {
                break;
            }
        }

        let log = env.log().clone();
        let last = log.last().copied().ok_or_else(|| {
            EnvError::InvalidState("simulation produced no portfolio rows".to_string())
        })?;
        let summary = SimulationSummary {
            steps: log.len(),
            total_reward,
            initial_budget: env.portfolio().initial_budget(),
            last,
            movements: env.portfolio().movements().to_vec(),
            guard_overrides,
            failed_actions,
        };
        tracing::info!(
            steps = summary.steps,
            total_reward = summary.total_reward.0,
            net_value = summary.profit(),
            trades = summary.movements.len(),
            "Simulation finished"
        );
        Ok((summary, log))
    }

    /// Live mode: resumes `env` from the configured portfolio file (if it exists yet),
    /// decides and executes one action, then appends the new row to the portfolio file
    /// and mirrors the action into the configured action file.
    #[tracing::instrument(skip_all)]
    pub fn single_step(
        &self,
        env: &mut Environment,
        strategy: &Strategy,
    ) -> TraderResult<LiveStep> {
        let portfolio_file = env.config().portfolio_file.clone().ok_or_else(|| {
            ConfigError::invalid("portfolio_file", "live mode needs a portfolio file")
        })?;
        let action_file = env.config().action_file.clone();

        let log = PortfolioLog::read_or_empty(&portfolio_file)?;
        let persisted = log.len();
        env.load_log(log);

        let state = match env.resume()? {
            Resume::Resumed(state) => state,
            Resume::Synchronized => {
                tracing::warn!(
                    rows = persisted,
                    "Portfolio and forecast are already synchronized, nothing to decide"
                );
                return Ok(LiveStep::Synchronized);
            }
        };

        let action = env.decide_next_action(state, strategy)?;
        let (_, reward, _, info) = env.step(action)?;
        env.log().append_to_csv(&portfolio_file, persisted)?;
        if let Some(path) = &action_file {
            write_action_file(path, info.executed)?;
        }

        tracing::info!(
            action = %info.executed,
            price = info.price,
            reward = reward.0,
            budget = env.portfolio().budget(),
            shares = env.portfolio().shares(),
            "Live step executed"
        );
        Ok(LiveStep::Executed {
            action: info.executed,
            reward,
        })
    }
}

// ================================================================================================
// Helper Functions
// ================================================================================================

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

fn round_secs(started: Instant) -> std::time::Duration {
    std::time::Duration::from_secs(started.elapsed().as_secs())
}

fn progress_bar(capacity: u64) -> TraderResult<ProgressBar> {
    let bar = ProgressBar::new(capacity);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta_precise}) {msg}")
            .map_err(EnvError::ProgressBar)?
            .progress_chars("#>-"));
    Ok(bar)
}
