use crate::{
    agent::strategy::Strategy,
    config::{EnvConfig, GuardConfig, TraderConfig},
    data::series::{MarketRow, MarketSeries},
    error::{EnvError, TraderResult},
    gym::{
        Env, EnvStatus, Resume, Reward, StepInfo, StepOutcome,
        action::Action,
        portfolio::Portfolio,
        spring::Spring,
        state::{State, StateEncoder},
    },
    report::portfolio_log::PortfolioLog,
};

/// Trading environment over a historical (or live, growing) market series.
///
/// The cursor points at the row whose price the next action executes at. Every step
/// appends one [`PortfolioRecord`](crate::report::portfolio_log::PortfolioRecord) to the
/// in-memory log; the episode is done once the last row has been consumed.
#[derive(Debug, Clone)]
pub struct Environment {
    env_cfg: EnvConfig,
    guard_cfg: GuardConfig,
    series: MarketSeries,
    cursor: usize,
    portfolio: Portfolio,
    spring: Spring,
    encoder: StateEncoder,
    log: PortfolioLog,
    status: EnvStatus,
}

impl Environment {
    pub fn new(cfg: &TraderConfig, series: MarketSeries) -> TraderResult<Self> {
        cfg.validate()?;
        let first = *series.first();
        Ok(Self {
            portfolio: fresh_portfolio(&cfg.environment, &first),
            spring: Spring::new(&cfg.guard, first.price),
            encoder: StateEncoder::new(cfg.environment.state_features.clone()),
            env_cfg: cfg.environment.clone(),
            guard_cfg: cfg.guard,
            series,
            cursor: 0,
            log: PortfolioLog::new(),
            status: EnvStatus::Ready,
        })
    }

    /// Lets the spring guard override `action` at the current price.
    pub fn correct(&mut self, action: Action) -> Action {
        self.spring.correction(action, &self.portfolio)
    }

    /// Replaces the in-memory log, typically with a persisted one before [`Env::resume`].
    pub fn load_log(&mut self, log: PortfolioLog) {
        self.log = log;
    }

    /// Current state without stepping.
    pub fn state(&self) -> State {
        self.encoder.encode(&self.portfolio)
    }

    pub fn num_states(&self) -> usize {
        self.encoder.num_states()
    }

    pub fn config(&self) -> &EnvConfig {
        &self.env_cfg
    }

    pub fn log(&self) -> &PortfolioLog {
        &self.log
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn spring(&self) -> &Spring {
        &self.spring
    }

    pub fn series(&self) -> &MarketSeries {
        &self.series
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn status(&self) -> EnvStatus {
        self.status
    }

    fn current_row(&self) -> TraderResult<MarketRow> {
        self.series.get(self.cursor).copied().ok_or_else(|| {
            EnvError::InvalidState(format!(
                "cursor {} beyond series of {} rows",
                self.cursor,
                self.series.len()
            ))
            .into()
        })
    }

    fn seed_history(&mut self, upto: usize) {
        self.portfolio.reset_history();
        let start = (upto + 1).saturating_sub(self.env_cfg.stack_size);
        for row in &self.series.rows()[start..=upto] {
            self.portfolio.append_to_history(row.price, row.forecast);
        }
    }
}

impl Env for Environment {
    #[tracing::instrument(skip(self), fields(rows = self.series.len()))]
    fn reset(&mut self) -> TraderResult<State> {
        let first = *self.series.first();
        self.cursor = 0;
        self.portfolio = fresh_portfolio(&self.env_cfg, &first);
        self.spring = Spring::new(&self.guard_cfg, first.price);
        self.seed_history(0);
        self.log.clear();
        self.status = EnvStatus::Running;

        tracing::debug!("Environment reset");
        Ok(self.state())
    }

    fn step(&mut self, action: Action) -> TraderResult<(State, Reward, StepOutcome, StepInfo)> {
        if !self.status.is_running() {
            return Err(EnvError::InvalidState(format!(
                "step() called while environment is {:?}; call reset() or resume() first",
                self.status
            ))
            .into());
        }

        let row = self.current_row()?;
        let (executed, reward) = self.portfolio.execute(action);
        self.log.push(self.portfolio.to_record().with_guard(&self.spring));
        self.cursor += 1;

        let outcome = match self.series.get(self.cursor) {
            Some(next) => {
                self.portfolio
                    .update_after_step(next.price, next.forecast, next.konkorde);
                self.portfolio.append_to_history(next.price, next.forecast);
                StepOutcome::InProgress
            }
            None => {
                self.status = EnvStatus::Done;
                StepOutcome::Done
            }
        };

        let info = StepInfo {
            executed,
            price: row.price,
        };
        Ok((self.state(), reward, outcome, info))
    }

    fn decide_next_action(&mut self, state: State, strategy: &Strategy) -> TraderResult<Action> {
        let action = strategy.action_for(state)?;
        Ok(self.correct(action))
    }

    #[tracing::instrument(skip(self), fields(logged = self.log.len(), rows = self.series.len()))]
    fn resume(&mut self) -> TraderResult<Resume> {
        let Some(last) = self.log.last().copied() else {
            tracing::info!("Empty portfolio log, starting from the first row");
            let log = std::mem::take(&mut self.log);
            let state = self.reset()?;
            self.log = log;
            return Ok(Resume::Resumed(state));
        };

        let logged = self.log.len();
        if logged >= self.series.len() {
            return Ok(Resume::Synchronized);
        }

        let first = *self.series.first();
        let row = self.series.rows()[logged];

        self.portfolio = fresh_portfolio(&self.env_cfg, &first);
        self.portfolio.restore(&last);
        self.portfolio
            .update_after_step(row.price, row.forecast, row.konkorde);
        self.seed_history(logged);

        self.spring = Spring::new(&self.guard_cfg, first.price);
        self.spring.restore(&last);

        self.cursor = logged;
        self.status = EnvStatus::Running;

        tracing::info!(
            cursor = self.cursor,
            budget = self.portfolio.budget(),
            shares = self.portfolio.shares(),
            guard_anchored = self.spring.has_position(),
            "Environment resumed"
        );
        Ok(Resume::Resumed(self.state()))
    }
}

fn fresh_portfolio(cfg: &EnvConfig, row: &MarketRow) -> Portfolio {
    Portfolio::new(cfg, row.price, row.forecast, row.konkorde)
}

#[cfg(test)]
mod test {
    use crate::{config::GuardConfig, gym::spring::MarketMode};

    use super::*;

    fn series(prices: &[f64]) -> MarketSeries {
        let forecasts: Vec<f64> = prices.iter().map(|p| p + 1.0).collect();
        MarketSeries::from_prices(prices, &forecasts).unwrap()
    }

    fn config() -> TraderConfig {
        TraderConfig::default().with_environment(EnvConfig {
            initial_budget: 1000.0,
            shares_per_trade: 50.0,
            ..EnvConfig::default()
        })
    }

    #[test]
    fn test_step_requires_reset() {
        let mut env = Environment::new(&config(), series(&[10.0, 11.0])).unwrap();
        assert!(env.step(Action::Wait).is_err());
        env.reset().unwrap();
        assert!(env.step(Action::Wait).is_ok());
    }

    #[test]
    fn test_episode_runs_once_per_row_then_done() {
        let mut env = Environment::new(&config(), series(&[10.0, 11.0, 12.0])).unwrap();
        env.reset().unwrap();

        let outcomes: Vec<bool> = (0..3)
            .map(|_| env.step(Action::Wait).unwrap().2.is_done())
            .collect();
        assert_eq!(outcomes, vec![false, false, true]);
        assert!(env.status().is_done());
        assert_eq!(env.log().len(), 3);
        assert!(env.step(Action::Wait).is_err());

        env.reset().unwrap();
        assert!(env.log().is_empty());
        assert!(env.status().is_running());
    }

    #[test]
    fn test_buy_mark_to_market_sell() {
        let mut env = Environment::new(&config(), series(&[10.0, 12.0, 12.0])).unwrap();
        env.reset().unwrap();

        let (_, _, _, info) = env.step(Action::Buy).unwrap();
        assert_eq!(info.executed, Action::Buy);
        assert_eq!(info.price, 10.0);
        assert_eq!(env.portfolio().portfolio_value(), 600.0);

        let (_, reward, _, info) = env.step(Action::Sell).unwrap();
        assert_eq!(info.executed, Action::Sell);
        assert_eq!(reward, Reward(1.0));
        assert_eq!(env.portfolio().budget(), 1100.0);
        assert_eq!(env.portfolio().shares(), 0.0);

        let (_, _, _, info) = env.step(Action::Sell).unwrap();
        assert_eq!(info.executed, Action::FailedSell);
        assert_eq!(env.log().records()[2].action, Action::FailedSell);
    }

    #[test]
    fn test_guard_forces_sell_on_retracement() {
        let cfg = config()
            .with_environment(EnvConfig {
                initial_budget: 1000.0,
                ..EnvConfig::default()
            })
            .with_guard(GuardConfig {
                mode: MarketMode::Bull,
                stop_drop: true,
                stop_drop_rate: 0.1,
            });
        let mut env = Environment::new(&cfg, series(&[100.0, 110.0, 120.0, 105.0])).unwrap();
        env.reset().unwrap();
        let hold = Strategy::new(vec![Action::Wait; env.num_states()]);

        assert_eq!(env.correct(Action::Buy), Action::Buy);
        assert!(env.spring().has_position());
        env.step(Action::Buy).unwrap();

        let mut decided = Vec::new();
        for _ in 0..3 {
            let action = env.decide_next_action(env.state(), &hold).unwrap();
            decided.push(action);
            env.step(action).unwrap();
        }
        assert_eq!(decided, vec![Action::Wait, Action::Wait, Action::Sell]);
        assert!(!env.spring().has_position());
    }

    #[test]
    fn test_resume_continues_after_logged_rows() {
        let prices = [10.0, 11.0, 12.0, 13.0];
        let cfg = config().with_environment(EnvConfig {
            initial_budget: 1000.0,
            shares_per_trade: 10.0,
            ..EnvConfig::default()
        });

        let mut env = Environment::new(&cfg, series(&prices)).unwrap();
        env.reset().unwrap();
        env.step(Action::Buy).unwrap();
        env.step(Action::Wait).unwrap();
        let expected = env.portfolio().clone();

        let mut live = Environment::new(&cfg, series(&prices)).unwrap();
        live.load_log(env.log().clone());
        let resumed = live.resume().unwrap();

        assert_eq!(resumed, Resume::Resumed(env.state()));
        assert_eq!(live.cursor(), 2);
        assert_eq!(live.portfolio().budget(), expected.budget());
        assert_eq!(live.portfolio().shares(), expected.shares());
        assert_eq!(live.portfolio().portfolio_value(), expected.portfolio_value());
        assert_eq!(live.portfolio().initial_budget(), 1000.0);

        live.step(Action::Wait).unwrap();
        live.step(Action::Wait).unwrap();
        assert!(live.status().is_done());
        assert_eq!(live.log().len(), 4);
        assert_eq!(live.resume().unwrap(), Resume::Synchronized);
    }

    #[test]
    fn test_resume_restores_guard_kept_by_failed_decision() {
        let cfg = config()
            .with_environment(EnvConfig {
                initial_budget: 1000.0,
                shares_per_trade: 10.0,
                ..EnvConfig::default()
            })
            .with_guard(GuardConfig {
                mode: MarketMode::Bull,
                stop_drop: true,
                stop_drop_rate: 0.1,
            });
        let prices = [100.0, 120.0, 105.0, 90.0];
        let mut env = Environment::new(&cfg, series(&prices)).unwrap();
        env.reset().unwrap();
        let always_buy = Strategy::new(vec![Action::Buy; env.num_states()]);
        for _ in 0..3 {
            let action = env.decide_next_action(env.state(), &always_buy).unwrap();
            env.step(action).unwrap();
        }
        // The forced sell at 105 overrode an unaffordable buy, so the spring stays anchored.
        assert!(env.spring().has_position());
        let last = env.log().last().copied().unwrap();
        assert_eq!(last.action, Action::Sell);
        assert_eq!(last.guard_extreme, Some(105.0));

        let mut live = Environment::new(&cfg, series(&prices)).unwrap();
        live.load_log(env.log().clone());
        live.resume().unwrap();
        assert_eq!(live.spring(), env.spring());
    }

    #[test]
    fn test_resume_without_log_starts_from_first_row() {
        let mut env = Environment::new(&config(), series(&[10.0, 11.0])).unwrap();
        assert!(matches!(env.resume().unwrap(), Resume::Resumed(_)));
        assert_eq!(env.cursor(), 0);
        assert!(env.status().is_running());
    }
}
