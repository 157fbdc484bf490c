use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::gym::portfolio::Portfolio;

/// Index into the enumeration of discretized market conditions.
///
/// Always lies in `[0, num_states)` where `num_states = 2^features`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct State(pub usize);

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A binary observation contributing one bit to the [`State`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    Display,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StateFeature {
    /// Budget covers at least one share at the latest price.
    CanBuy,
    /// At least one share is held.
    CanSell,
    /// Net position is non-negative.
    Gain,
    /// Latest price is at or below the latest forecast.
    PredictionUpward,
    /// Last price is at or above the one before it.
    PriceRising,
    /// Last forecast is at or above the one before it.
    ForecastRising,
    /// The konkorde signal is positive.
    KonkordePositive,
}

impl StateFeature {
    pub fn default_set() -> Vec<StateFeature> {
        vec![
            StateFeature::CanBuy,
            StateFeature::CanSell,
            StateFeature::Gain,
            StateFeature::PredictionUpward,
            StateFeature::PriceRising,
            StateFeature::ForecastRising,
        ]
    }

    pub fn observe(&self, portfolio: &Portfolio) -> bool {
        match self {
            StateFeature::CanBuy => portfolio.can_buy(),
            StateFeature::CanSell => portfolio.can_sell(),
            StateFeature::Gain => portfolio.gain(),
            StateFeature::PredictionUpward => portfolio.prediction_upward(),
            StateFeature::PriceRising => portfolio
                .last_price()
                .zip(portfolio.prevlast_price())
                .is_some_and(|(last, prev)| last >= prev),
            StateFeature::ForecastRising => portfolio
                .prevlast_forecast()
                .is_some_and(|prev| portfolio.last_forecast() >= prev),
            StateFeature::KonkordePositive => portfolio.konkorde().is_some_and(|k| k > 0.0),
        }
    }
}

/// Maps a portfolio snapshot onto a [`State`], first feature in the least significant bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEncoder {
    features: Vec<StateFeature>,
}

impl StateEncoder {
    pub fn new(features: Vec<StateFeature>) -> Self {
        Self { features }
    }

    pub fn num_states(&self) -> usize {
        1 << self.features.len()
    }

    pub fn features(&self) -> &[StateFeature] {
        &self.features
    }

    pub fn encode(&self, portfolio: &Portfolio) -> State {
        let idx = self
            .features
            .iter()
            .enumerate()
            .filter(|(_, feature)| feature.observe(portfolio))
            .fold(0usize, |acc, (bit, _)| acc | (1 << bit));
        State(idx)
    }
}

impl Default for StateEncoder {
    fn default() -> Self {
        Self::new(StateFeature::default_set())
    }
}
