use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    config::EnvConfig,
    gym::{Reward, action::Action},
    report::portfolio_log::PortfolioRecord,
};

/// Reward returned by the direct regime for waiting while out of the market.
pub const IDLE_PENALTY: f64 = -0.05;

/// Fixed rewards used by the preset regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PresetRewards {
    pub reward_do_nothing: f64,
    pub reward_success_buy: f64,
    pub reward_failed_buy: f64,
    pub reward_failed_sell: f64,
    pub reward_positive_sell: f64,
    pub reward_negative_sell: f64,
}

impl Default for PresetRewards {
    fn default() -> Self {
        Self {
            reward_do_nothing: 0.0,
            reward_success_buy: 0.0,
            reward_failed_buy: -1.0,
            reward_failed_sell: -1.0,
            reward_positive_sell: 1.0,
            reward_negative_sell: -1.0,
        }
    }
}

/// The two mutually exclusive ways of turning an action into a reward.
///
/// The regimes penalize failed actions differently: the direct regime proportionally to
/// the position (`sigmoid(-|net_value|)`), the preset regime with a fixed constant. Both
/// are kept as distinct options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RewardRegime {
    /// Reward derived from the net value of the position.
    Direct,
    /// Reward taken from configured constants.
    Preset {
        rewards: PresetRewards,
        /// Scales the sell reward by `|net_value| + 1`.
        proportional: bool,
    },
}

/// Bounds `x` to (-1, 1): `x / sqrt(1 + x^2)`.
pub fn sigmoid(x: f64) -> f64 {
    x / (1.0 + x.powi(2)).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
        }
    }
}

/// One executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub direction: Direction,
    pub quantity: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct HistoryEntry {
    price: f64,
    forecast: f64,
}

/// Cash, shares and derived values of the simulated account.
///
/// `budget` and `shares` never go negative: a buy or sell that would violate this is
/// recorded as a failed action and leaves the account untouched. `portfolio_value` and
/// `net_value` are only written by the trade and mark-to-market updates.
#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    initial_budget: f64,
    budget: f64,
    investment: f64,
    portfolio_value: f64,
    net_value: f64,
    shares: f64,
    latest_price: f64,
    forecast: f64,
    konkorde: Option<f64>,
    reward: Reward,
    last_action: Option<Action>,
    movements: Vec<Movement>,
    history: VecDeque<HistoryEntry>,
    stack_size: usize,
    shares_per_trade: f64,
    regime: RewardRegime,
}

impl Portfolio {
    pub fn new(cfg: &EnvConfig, initial_price: f64, forecast: f64, konkorde: Option<f64>) -> Self {
        Self {
            initial_budget: cfg.initial_budget,
            budget: cfg.initial_budget,
            investment: 0.0,
            portfolio_value: 0.0,
            net_value: 0.0,
            shares: 0.0,
            latest_price: initial_price,
            forecast,
            konkorde,
            reward: Reward::default(),
            last_action: None,
            movements: Vec::new(),
            history: VecDeque::with_capacity(cfg.stack_size + 1),
            stack_size: cfg.stack_size,
            shares_per_trade: cfg.shares_per_trade,
            regime: cfg.reward_regime(),
        }
    }

    /// Marks the position to market after the environment moved to a new row.
    pub fn update_after_step(
        &mut self,
        price: f64,
        forecast: f64,
        konkorde: Option<f64>,
    ) -> &mut Self {
        self.portfolio_value = self.shares * price;
        self.net_value = self.portfolio_value - self.investment;
        self.latest_price = price;
        self.forecast = forecast;
        if konkorde.is_some() {
            self.konkorde = konkorde;
        }
        self
    }

    /// Executes a decided action with the configured trade size. Returns the action as
    /// recorded (possibly failed) and its reward.
    pub fn execute(&mut self, action: Action) -> (Action, Reward) {
        let reward = match action.intended() {
            Action::Buy => self.buy(self.shares_per_trade),
            Action::Sell => self.sell(self.shares_per_trade),
            _ => self.wait(),
        };
        (self.last_action.unwrap_or(Action::Wait), reward)
    }

    pub fn wait(&mut self) -> Reward {
        self.record(Action::Wait)
    }

    pub fn buy(&mut self, num_shares: f64) -> Reward {
        let cost = num_shares * self.latest_price;
        if cost > self.budget {
            return self.record(Action::FailedBuy);
        }

        self.budget -= cost;
        self.investment += cost;
        self.shares += num_shares;
        self.portfolio_value += cost;
        self.net_value = self.portfolio_value - self.investment;
        self.movements.push(Movement {
            direction: Direction::Buy,
            quantity: num_shares,
            price: self.latest_price,
        });
        self.record(Action::Buy)
    }

    pub fn sell(&mut self, num_shares: f64) -> Reward {
        if num_shares > self.shares {
            return self.record(Action::FailedSell);
        }

        let proceeds = num_shares * self.latest_price;
        self.budget += proceeds;
        self.investment -= proceeds;
        self.shares -= num_shares;
        self.portfolio_value -= proceeds;
        self.net_value = self.portfolio_value - self.investment;
        self.movements.push(Movement {
            direction: Direction::Sell,
            quantity: num_shares,
            price: self.latest_price,
        });
        self.record(Action::Sell)
    }

    fn record(&mut self, action: Action) -> Reward {
        self.reward = self.decide_reward(action);
        self.last_action = Some(action);
        tracing::debug!(action = %action, reward = self.reward.0, "Action recorded");
        self.reward
    }

    pub fn decide_reward(&self, action: Action) -> Reward {
        match self.regime {
            RewardRegime::Direct => self.direct_reward(action),
            RewardRegime::Preset {
                rewards,
                proportional,
            } => self.preset_reward(action, &rewards, proportional),
        }
    }

    fn direct_reward(&self, action: Action) -> Reward {
        if action == Action::Buy {
            return Reward(0.0);
        }
        if action == Action::Wait && self.shares == 0.0 {
            return Reward(IDLE_PENALTY);
        }

        let mut net_value = self.portfolio_value - self.investment;
        if action.is_failed() {
            net_value = -net_value.abs();
        }
        Reward(sigmoid(net_value))
    }

    fn preset_reward(&self, action: Action, rewards: &PresetRewards, proportional: bool) -> Reward {
        let reward = match action {
            Action::Wait => rewards.reward_do_nothing,
            Action::Buy => rewards.reward_success_buy,
            Action::Sell => {
                let gain_loss = if proportional {
                    self.net_value.abs() + 1.0
                } else {
                    1.0
                };
                if self.net_value >= 0.0 {
                    rewards.reward_positive_sell * gain_loss
                } else {
                    rewards.reward_negative_sell * gain_loss
                }
            }
            Action::FailedBuy => rewards.reward_failed_buy,
            Action::FailedSell => rewards.reward_failed_sell,
        };
        Reward(reward)
    }

    /// Whether `action` would fail if executed at `price` with the configured trade size.
    pub fn failed_action(&self, action: Action, price: f64) -> bool {
        match action {
            Action::Buy => self.shares_per_trade * price > self.budget,
            Action::Sell => self.shares_per_trade > self.shares,
            Action::Wait => false,
            Action::FailedBuy | Action::FailedSell => true,
        }
    }

    // ============================================================================================
    // History
    // ============================================================================================

    pub fn reset_history(&mut self) {
        self.history.clear();
    }

    /// Pushes the (price, forecast) pair, dropping the oldest beyond `stack_size`.
    pub fn append_to_history(&mut self, price: f64, forecast: f64) {
        self.history.push_back(HistoryEntry { price, forecast });
        while self.history.len() > self.stack_size {
            self.history.pop_front();
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Latest forecast in the history, `0.0` when empty.
    pub fn last_forecast(&self) -> f64 {
        self.history.back().map(|h| h.forecast).unwrap_or(0.0)
    }

    pub fn prevlast_forecast(&self) -> Option<f64> {
        self.lagged(2).map(|h| h.forecast)
    }

    pub fn last_price(&self) -> Option<f64> {
        self.history.back().map(|h| h.price)
    }

    pub fn prevlast_price(&self) -> Option<f64> {
        self.lagged(2).map(|h| h.price)
    }

    fn lagged(&self, lag: usize) -> Option<&HistoryEntry> {
        self.history
            .len()
            .checked_sub(lag)
            .and_then(|idx| self.history.get(idx))
    }

    // ============================================================================================
    // Predicates
    // ============================================================================================

    pub fn gain(&self) -> bool {
        self.portfolio_value - self.investment >= 0.0
    }

    pub fn have_shares(&self) -> bool {
        self.shares > 0.0
    }

    pub fn can_buy(&self) -> bool {
        self.budget >= self.latest_price
    }

    pub fn can_sell(&self) -> bool {
        self.shares > 0.0
    }

    pub fn prediction_upward(&self) -> bool {
        self.latest_price <= self.last_forecast()
    }

    // ============================================================================================
    // Persistence
    // ============================================================================================

    /// Snapshot of the account for the portfolio log.
    pub fn to_record(&self) -> PortfolioRecord {
        PortfolioRecord {
            price: self.latest_price,
            forecast: self.forecast,
            budget: self.budget,
            investment: self.investment,
            portfolio_value: self.portfolio_value,
            net_value: self.portfolio_value - self.investment,
            shares: self.shares,
            konkorde: self.konkorde,
            action: self.last_action.unwrap_or(Action::Wait),
            reward: self.reward.0,
            guard_anchor: None,
            guard_extreme: None,
        }
    }

    /// Restores the account from the last persisted row. The initial budget is recovered
    /// as `budget + investment`.
    pub fn restore(&mut self, record: &PortfolioRecord) {
        self.budget = record.budget;
        self.investment = record.investment;
        self.initial_budget = record.budget + record.investment;
        self.shares = record.shares;
        self.latest_price = record.price;
        self.forecast = record.forecast;
        self.portfolio_value = record.portfolio_value;
        self.net_value = record.net_value;
        self.konkorde = record.konkorde;
        self.reward = Reward(record.reward);
        self.last_action = Some(record.action);
    }

    // ============================================================================================
    // Accessors
    // ============================================================================================

    pub fn initial_budget(&self) -> f64 {
        self.initial_budget
    }

    pub fn budget(&self) -> f64 {
        self.budget
    }

    pub fn investment(&self) -> f64 {
        self.investment
    }

    pub fn portfolio_value(&self) -> f64 {
        self.portfolio_value
    }

    pub fn net_value(&self) -> f64 {
        self.net_value
    }

    pub fn shares(&self) -> f64 {
        self.shares
    }

    pub fn latest_price(&self) -> f64 {
        self.latest_price
    }

    pub fn forecast(&self) -> f64 {
        self.forecast
    }

    pub fn konkorde(&self) -> Option<f64> {
        self.konkorde
    }

    pub fn reward(&self) -> Reward {
        self.reward
    }

    pub fn last_action(&self) -> Option<Action> {
        self.last_action
    }

    pub fn movements(&self) -> &[Movement] {
        &self.movements
    }

    pub fn shares_per_trade(&self) -> f64 {
        self.shares_per_trade
    }
}
