use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

use crate::error::{EnvError, TraderResult};

/// The closed action vocabulary.
///
/// `Buy`, `Sell` and `Wait` are the decidable actions; the policy only ever outputs
/// values for these three, in this order. `FailedBuy` and `FailedSell` are assigned by the
/// portfolio after the fact, when a decided buy or sell cannot be executed because of
/// insufficient budget or shares.
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
    EnumCount,
    Display,
    IntoStaticStr,
)]
pub enum Action {
    #[strum(serialize = "buy")]
    #[serde(rename = "buy")]
    Buy = 0,

    #[strum(serialize = "sell")]
    #[serde(rename = "sell")]
    Sell = 1,

    #[strum(serialize = "wait")]
    #[serde(rename = "wait")]
    Wait = 2,

    #[strum(serialize = "f.buy")]
    #[serde(rename = "f.buy")]
    FailedBuy = 3,

    #[strum(serialize = "f.sell")]
    #[serde(rename = "f.sell")]
    FailedSell = 4,
}

impl Action {
    /// Actions the policy can choose, indexed by their position in the policy output.
    pub const DECIDABLE: [Action; 3] = [Action::Buy, Action::Sell, Action::Wait];

    /// Number of decidable actions.
    pub const NUM_DECIDABLE: usize = Self::DECIDABLE.len();

    /// Index of the action in the action vocabulary.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Maps a policy output index back to a decidable action.
    pub fn from_index(index: usize) -> TraderResult<Self> {
        Self::DECIDABLE.get(index).copied().ok_or_else(|| {
            EnvError::ActionOutOfRange {
                index,
                num_actions: Self::NUM_DECIDABLE,
            }
            .into()
        })
    }

    pub fn is_failed(self) -> bool {
        matches!(self, Action::FailedBuy | Action::FailedSell)
    }

    /// The action that was intended when this one was recorded.
    pub fn intended(self) -> Self {
        match self {
            Action::FailedBuy => Action::Buy,
            Action::FailedSell => Action::Sell,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_names_round_trip_through_strum() {
        for action in Action::iter() {
            assert_eq!(Action::from_str(action.as_str()).unwrap(), action);
        }
        assert_eq!(Action::FailedBuy.to_string(), "f.buy");
        assert_eq!(Action::FailedSell.as_str(), "f.sell");
    }

    #[test]
    fn test_from_index_only_accepts_decidable_actions() {
        assert_eq!(Action::from_index(0).unwrap(), Action::Buy);
        assert_eq!(Action::from_index(1).unwrap(), Action::Sell);
        assert_eq!(Action::from_index(2).unwrap(), Action::Wait);
        assert!(Action::from_index(3).is_err());
    }

    #[test]
    fn test_failed_markers_map_back_to_intended_trades() {
        assert_eq!(Action::FailedBuy.intended(), Action::Buy);
        assert_eq!(Action::FailedSell.intended(), Action::Sell);
        assert_eq!(Action::Wait.intended(), Action::Wait);
        assert!(Action::FailedSell.is_failed());
        assert!(!Action::Sell.is_failed());
        assert_eq!(Action::COUNT, 5);
    }
}
