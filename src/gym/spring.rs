use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    config::GuardConfig,
    gym::{action::Action, portfolio::Portfolio},
    report::portfolio_log::PortfolioRecord,
};

/// Direction in which the spring considers prices to improve.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EnumString, Display,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MarketMode {
    /// Higher prices are better; the guard breaks on drops.
    #[default]
    Bull,
    /// Lower prices are better; the guard breaks on rises.
    Bear,
}

/// Trailing-stop guard.
///
/// Once anchored (on a successful buy) the spring stretches with every price that is
/// better than its tracked extreme, and breaks when the price retraces more than
/// `max_shrink` of that extreme. A break overrides the decided action with `Sell`.
///
/// ```md
/// State       | Event                 | Next State
/// ------------|-----------------------|-----------
/// Unanchored  | anchor(price)         | Anchored
/// Anchored    | anchor(price)         | Anchored   (starting point moves)
/// Anchored    | release()             | Unanchored
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Spring {
    mode: MarketMode,
    enabled: bool,
    has_position: bool,
    starting_point: f64,
    max_value: f64,
    max_shrink: f64,
}

impl Spring {
    pub fn new(cfg: &GuardConfig, starting_point: f64) -> Self {
        Self {
            mode: cfg.mode,
            enabled: cfg.stop_drop,
            has_position: false,
            starting_point,
            max_value: starting_point,
            max_shrink: cfg.stop_drop_rate,
        }
    }

    pub fn anchor(&mut self, price: f64) {
        self.has_position = true;
        self.starting_point = price;
        self.max_value = price;
        tracing::debug!(price, "Spring anchored");
    }

    pub fn release(&mut self) {
        self.has_position = false;
        tracing::debug!("Spring released");
    }

    /// In bear mode `x` is better than `y` iff `x < y`, otherwise iff `x >= y`.
    pub fn better(&self, x: f64, y: f64) -> bool {
        match self.mode {
            MarketMode::Bear => x < y,
            MarketMode::Bull => x >= y,
        }
    }

    /// Feeds a new price. Returns `true` when the retracement from the tracked extreme
    /// exceeds `max_shrink`; the extreme then resets to the new price.
    pub fn breaks(&mut self, new_value: f64) -> bool {
        if !self.has_position {
            return false;
        }

        if self.better(new_value, self.max_value) {
            self.max_value = new_value;
            tracing::trace!(max_value = self.max_value, "Spring stretched");
            return false;
        }

        let ratio = (self.max_value - new_value).abs() / self.max_value;
        if ratio > self.max_shrink {
            tracing::debug!(
                max_value = self.max_value,
                current = new_value,
                ratio,
                "Spring breaks"
            );
            self.max_value = new_value;
            true
        } else {
            false
        }
    }

    /// Forces `Sell` when the spring breaks at `price`, then anchors on a successful
    /// buy and releases on a successful sell.
    pub fn check(&mut self, action: Action, price: f64, is_failed_action: bool) -> Action {
        let mut action = action;
        if self.breaks(price) {
            tracing::debug!(overridden = %action, "Stop drop forces sell");
            action = Action::Sell;
        }

        if !is_failed_action {
            match action {
                Action::Buy => self.anchor(price),
                Action::Sell => self.release(),
                _ => {}
            }
        }

        action
    }

    /// Applies [`Spring::check`] when the guard is enabled; otherwise passes `action`
    /// through unchanged.
    pub fn correction(&mut self, action: Action, portfolio: &Portfolio) -> Action {
        if !self.enabled {
            return action;
        }
        let price = portfolio.latest_price();
        let is_failed_action = portfolio.failed_action(action, price);
        self.check(action, price, is_failed_action)
    }

    /// Puts the spring back where it stood when `record` was taken.
    pub fn restore(&mut self, record: &PortfolioRecord) {
        match (record.guard_anchor, record.guard_extreme) {
            (Some(anchor), Some(extreme)) => {
                self.has_position = true;
                self.starting_point = anchor;
                self.max_value = extreme;
            }
            _ => self.has_position = false,
        }
    }

    pub fn has_position(&self) -> bool {
        self.has_position
    }

    pub fn starting_point(&self) -> f64 {
        self.starting_point
    }

    pub fn max_value(&self) -> f64 {
        self.max_value
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn spring(mode: MarketMode, max_shrink: f64) -> Spring {
        let cfg = GuardConfig {
            mode,
            stop_drop: true,
            stop_drop_rate: max_shrink,
        };
        Spring::new(&cfg, 0.0)
    }

    #[test]
    fn test_unanchored_spring_never_breaks() {
        let mut s = spring(MarketMode::Bull, 0.1);
        for price in [100.0, 10.0, 1.0, 1000.0] {
            assert!(!s.breaks(price));
        }
        assert!(!s.has_position());
    }

    #[test]
    fn test_bull_monotonic_increase_never_breaks() {
        let mut s = spring(MarketMode::Bull, 0.01);
        s.anchor(50.0);
        for price in (50..200).map(f64::from) {
            assert!(!s.breaks(price));
        }
        assert_eq!(s.max_value(), 199.0);
    }

    #[test]
    fn test_bull_breaks_once_when_threshold_is_crossed() {
        let mut s = spring(MarketMode::Bull, 0.1);
        s.anchor(100.0);
        let breaks: Vec<bool> = [100.0, 110.0, 120.0, 105.0]
            .into_iter()
            .map(|p| s.breaks(p))
            .collect();
        assert_eq!(breaks, vec![false, false, false, true]);
        // The extreme resets to the breaking price.
        assert_eq!(s.max_value(), 105.0);
        assert!(!s.breaks(104.0));
    }

    #[test]
    fn test_small_retracement_does_not_break() {
        let mut s = spring(MarketMode::Bull, 0.1);
        s.anchor(100.0);
        assert!(!s.breaks(120.0));
        // 10/120 = 0.083 < 0.1
        assert!(!s.breaks(110.0));
        assert_eq!(s.max_value(), 120.0);
    }

    #[test]
    fn test_bear_mode_tracks_downward_extreme() {
        let mut s = spring(MarketMode::Bear, 0.1);
        s.anchor(100.0);
        assert!(!s.breaks(90.0));
        assert!(!s.breaks(80.0));
        assert_eq!(s.max_value(), 80.0);
        // 10/80 = 0.125 > 0.1
        assert!(s.breaks(90.0));
    }

    #[test]
    fn test_check_forces_sell_and_manages_anchor() {
        let mut s = spring(MarketMode::Bull, 0.1);
        assert_eq!(s.check(Action::Buy, 100.0, false), Action::Buy);
        assert!(s.has_position());
        assert_eq!(s.starting_point(), 100.0);

        assert_eq!(s.check(Action::Wait, 120.0, false), Action::Wait);
        assert_eq!(s.check(Action::Buy, 105.0, false), Action::Sell);
        assert!(!s.has_position());
    }

    #[test]
    fn test_failed_actions_do_not_move_the_anchor() {
        let mut s = spring(MarketMode::Bull, 0.1);
        assert_eq!(s.check(Action::Buy, 100.0, true), Action::Buy);
        assert!(!s.has_position());

        s.anchor(100.0);
        assert_eq!(s.check(Action::Sell, 101.0, true), Action::Sell);
        assert!(s.has_position());
    }

    #[test]
    fn test_restore_from_stamped_record() {
        let mut s = spring(MarketMode::Bull, 0.1);
        s.anchor(100.0);
        assert!(!s.breaks(120.0));
        let portfolio = Portfolio::new(&crate::config::EnvConfig::default(), 120.0, 121.0, None);
        let record = portfolio.to_record().with_guard(&s);
        assert_eq!(record.guard_anchor, Some(100.0));
        assert_eq!(record.guard_extreme, Some(120.0));

        let mut back = spring(MarketMode::Bull, 0.1);
        back.restore(&record);
        assert_eq!(back, s);

        s.release();
        back.restore(&portfolio.to_record().with_guard(&s));
        assert!(!back.has_position());
        assert!(!back.breaks(1.0));
    }

    #[test]
    fn test_disabled_guard_passes_actions_through() {
        let cfg = GuardConfig {
            stop_drop: false,
            ..GuardConfig::default()
        };
        let mut s = Spring::new(&cfg, 100.0);
        let portfolio = Portfolio::new(
            &crate::config::EnvConfig::default(),
            100.0,
            101.0,
            None,
        );
        s.anchor(1000.0);
        assert_eq!(s.correction(Action::Buy, &portfolio), Action::Buy);
        assert!(s.has_position());
        assert_eq!(s.max_value(), 1000.0);
    }
}
