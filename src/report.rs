use std::fmt;

use polars::frame::DataFrame;
use serde::{Deserialize, Serialize};

use crate::{
    error::{DataError, TraderResult},
    gym::{Reward, portfolio::Movement},
    report::portfolio_log::PortfolioRecord,
};

pub mod portfolio_log;

/// Per-episode statistics gathered by the training loop.
///
/// Averages are taken over the steps of the episode; loss and MAE are averaged over the
/// learning updates that actually ran (zero when none did).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpisodeStats {
    pub episode: usize,
    pub steps: usize,
    pub avg_reward: f64,
    pub avg_loss: f64,
    pub avg_mae: f64,
    /// Net value of the portfolio at the end of the episode.
    pub profit: f64,
    /// Exploration rate used during the episode.
    pub epsilon: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    episodes: Vec<EpisodeStats>,
}

impl TrainingReport {
    pub fn push(&mut self, stats: EpisodeStats) {
        self.episodes.push(stats);
    }

    pub fn episodes(&self) -> &[EpisodeStats] {
        &self.episodes
    }

    pub fn last(&self) -> Option<&EpisodeStats> {
        self.episodes.last()
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn to_df(&self) -> TraderResult<DataFrame> {
        let e = &self.episodes;
        let df = polars::df!(
            "episode" => e.iter().map(|s| s.episode as u64).collect::<Vec<_>>(),
            "steps" => e.iter().map(|s| s.steps as u64).collect::<Vec<_>>(),
            "avg_reward" => e.iter().map(|s| s.avg_reward).collect::<Vec<_>>(),
            "avg_loss" => e.iter().map(|s| s.avg_loss).collect::<Vec<_>>(),
            "avg_mae" => e.iter().map(|s| s.avg_mae).collect::<Vec<_>>(),
            "profit" => e.iter().map(|s| s.profit).collect::<Vec<_>>(),
            "epsilon" => e.iter().map(|s| s.epsilon).collect::<Vec<_>>(),
        )
        .map_err(|e| DataError::DataFrame(e.to_string()))?;
        Ok(df)
    }
}

/// Outcome of replaying a frozen strategy over a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub steps: usize,
    pub total_reward: Reward,
    pub initial_budget: f64,
    /// Account after the last step.
    pub last: PortfolioRecord,
    pub movements: Vec<Movement>,
    /// Actions overridden by the spring guard.
    pub guard_overrides: usize,
    /// Actions recorded as failed.
    pub failed_actions: usize,
}

impl SimulationSummary {
    pub fn profit(&self) -> f64 {
        self.last.net_value
    }

    /// Cash plus the market value of the held shares.
    pub fn final_value(&self) -> f64 {
        self.last.budget + self.last.portfolio_value
    }

    pub fn return_pct(&self) -> f64 {
        (self.final_value() - self.initial_budget) / self.initial_budget * 100.0
    }
}

impl fmt::Display for SimulationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "steps          {}", self.steps)?;
        writeln!(f, "trades         {}", self.movements.len())?;
        writeln!(f, "failed         {}", self.failed_actions)?;
        writeln!(f, "guard forced   {}", self.guard_overrides)?;
        writeln!(f, "total reward   {:.4}", self.total_reward.0)?;
        writeln!(f, "budget         {:.2}", self.last.budget)?;
        writeln!(f, "shares         {:.2}", self.last.shares)?;
        writeln!(f, "net value      {:.2}", self.profit())?;
        write!(f, "return         {:.2}%", self.return_pct())
    }
}

#[cfg(test)]
mod test {
    use crate::gym::action::Action;

    use super::*;

    #[test]
    fn test_training_report_frame() {
        let mut report = TrainingReport::default();
        for episode in 0..3 {
            report.push(EpisodeStats {
                episode,
                steps: 10,
                avg_reward: 0.1,
                avg_loss: 0.2,
                avg_mae: 0.3,
                profit: episode as f64,
                epsilon: 0.9,
            });
        }
        let df = report.to_df().unwrap();
        assert_eq!(df.shape(), (3, 7));
        assert_eq!(report.last().unwrap().profit, 2.0);
    }

    #[test]
    fn test_summary_figures() {
        let summary = SimulationSummary {
            steps: 4,
            total_reward: Reward(1.0),
            initial_budget: 1000.0,
            last: PortfolioRecord {
                price: 12.0,
                forecast: 12.0,
                budget: 900.0,
                investment: 100.0,
                portfolio_value: 120.0,
                net_value: 20.0,
                shares: 10.0,
                konkorde: None,
                action: Action::Wait,
                reward: 0.0,
                guard_anchor: None,
                guard_extreme: None,
            },
            movements: Vec::new(),
            guard_overrides: 0,
            failed_actions: 0,
        };
        assert_eq!(summary.profit(), 20.0);
        assert_eq!(summary.final_value(), 1020.0);
        assert!((summary.return_pct() - 2.0).abs() < 1e-9);
        assert!(summary.to_string().contains("return         2.00%"));
    }
}
