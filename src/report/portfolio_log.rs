use std::{
    fs::{self, OpenOptions},
    path::Path,
    str::FromStr,
    sync::Arc,
};

use polars::{
    frame::DataFrame,
    prelude::{
        CsvReadOptions, CsvWriter, DataType, PlSmallStr, Schema, SchemaRef, SerReader, SerWriter,
    },
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{
    error::{DataError, IoError, TraderError, TraderResult},
    gym::{action::Action, spring::Spring},
};

/// Columns of the persisted portfolio table, in file order.
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
    Display,
    PartialOrd,
    Ord,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum PortfolioLogCol {
    Price,
    Forecast,
    Budget,
    Investment,
    PortfolioValue,
    NetValue,
    Shares,
    /// Empty when the series carries no konkorde signal.
    Konkorde,
    Action,
    Reward,
    /// Spring anchor price, empty while the guard holds no position.
    GuardAnchor,
    /// Tracked extreme of the spring, empty while the guard holds no position.
    GuardExtreme,
}

impl PortfolioLogCol {
    pub fn name(&self) -> PlSmallStr {
        PlSmallStr::from_static(self.into())
    }

    fn dtype(&self) -> DataType {
        match self {
            Self::Action => DataType::String,
            _ => DataType::Float64,
        }
    }

    pub fn to_schema() -> SchemaRef {
        let mut schema = Schema::with_capacity(Self::iter().len());
        for col in Self::iter() {
            schema.with_column(col.name(), col.dtype());
        }
        Arc::new(schema)
    }
}

/// One persisted step: the account after the action, the action as executed, its reward
/// and the spring guard as it stood when the action was taken.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRecord {
    pub price: f64,
    pub forecast: f64,
    pub budget: f64,
    pub investment: f64,
    pub portfolio_value: f64,
    pub net_value: f64,
    pub shares: f64,
    pub konkorde: Option<f64>,
    pub action: Action,
    pub reward: f64,
    pub guard_anchor: Option<f64>,
    pub guard_extreme: Option<f64>,
}

impl PortfolioRecord {
    /// Stamps the spring's position onto the record.
    pub fn with_guard(self, spring: &Spring) -> Self {
        let anchored = spring.has_position();
        Self {
            guard_anchor: anchored.then(|| spring.starting_point()),
            guard_extreme: anchored.then(|| spring.max_value()),
            ..self
        }
    }
}

/// Append-only, row-oriented log of the portfolio, one record per environment step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioLog {
    records: Vec<PortfolioRecord>,
}

impl PortfolioLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: PortfolioRecord) {
        self.records.push(record);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn records(&self) -> &[PortfolioRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&PortfolioRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_df(&self) -> TraderResult<DataFrame> {
        self.tail_df(0)
    }

    fn tail_df(&self, from: usize) -> TraderResult<DataFrame> {
        let rows = self.records.get(from..).unwrap_or_default();
        PortfolioLogSoA::from(rows).try_into()
    }

    // ============================================================================================
    // CSV
    // ============================================================================================

    /// Appends the records starting at `from` to `path`. The header is written only when
    /// the file is created.
    #[tracing::instrument(skip(self), fields(path = %path.display()))]
    pub fn append_to_csv(&self, path: &Path, from: usize) -> TraderResult<usize> {
        let mut df = self.tail_df(from)?;
        if df.height() == 0 {
            return Ok(0);
        }

        let include_header = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(IoError::from)?;
        CsvWriter::new(&mut file)
            .include_header(include_header)
            .finish(&mut df)?;

        tracing::debug!(rows = df.height(), include_header, "Portfolio rows appended");
        Ok(df.height())
    }

    /// Overwrites `path` with the full log.
    pub fn write_csv(&self, path: &Path) -> TraderResult<()> {
        if path.exists() {
            fs::remove_file(path).map_err(IoError::from)?;
        }
        self.append_to_csv(path, 0).map(|_| ())
    }

    pub fn read_csv(path: &Path) -> TraderResult<Self> {
        if !path.is_file() {
            return Err(IoError::NotFound(path.display().to_string()).into());
        }

        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_schema(Some(PortfolioLogCol::to_schema()))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?;
        Self::try_from(&df)
    }

    /// Reads `path`, or starts an empty log if the file does not exist yet.
    pub fn read_or_empty(path: &Path) -> TraderResult<Self> {
        if path.exists() {
            Self::read_csv(path)
        } else {
            tracing::info!(path = %path.display(), "No portfolio file yet, starting empty");
            Ok(Self::new())
        }
    }
}

/// Mirrors the last executed action into a small side file.
pub fn write_action_file(path: &Path, action: Action) -> TraderResult<()> {
    fs::write(path, format!("{action}\n")).map_err(IoError::from)?;
    Ok(())
}

pub fn read_action_file(path: &Path) -> TraderResult<Action> {
    let raw = fs::read_to_string(path).map_err(IoError::from)?;
    Ok(Action::from_str(raw.trim()).map_err(DataError::from)?)
}

// ================================================================================================
// DataFrame Conversion
// ================================================================================================

struct PortfolioLogSoA {
    price: Vec<f64>,
    forecast: Vec<f64>,
    budget: Vec<f64>,
    investment: Vec<f64>,
    portfolio_value: Vec<f64>,
    net_value: Vec<f64>,
    shares: Vec<f64>,
    konkorde: Vec<Option<f64>>,
    action: Vec<&'static str>,
    reward: Vec<f64>,
    guard_anchor: Vec<Option<f64>>,
    guard_extreme: Vec<Option<f64>>,
}

impl From<&[PortfolioRecord]> for PortfolioLogSoA {
    fn from(rows: &[PortfolioRecord]) -> Self {
        Self {
            price: rows.iter().map(|r| r.price).collect(),
            forecast: rows.iter().map(|r| r.forecast).collect(),
            budget: rows.iter().map(|r| r.budget).collect(),
            investment: rows.iter().map(|r| r.investment).collect(),
            portfolio_value: rows.iter().map(|r| r.portfolio_value).collect(),
            net_value: rows.iter().map(|r| r.net_value).collect(),
            shares: rows.iter().map(|r| r.shares).collect(),
            konkorde: rows.iter().map(|r| r.konkorde).collect(),
            action: rows.iter().map(|r| r.action.as_str()).collect(),
            reward: rows.iter().map(|r| r.reward).collect(),
            guard_anchor: rows.iter().map(|r| r.guard_anchor).collect(),
            guard_extreme: rows.iter().map(|r| r.guard_extreme).collect(),
        }
    }
}

impl TryFrom<PortfolioLogSoA> for DataFrame {
    type Error = TraderError;

    fn try_from(value: PortfolioLogSoA) -> Result<Self, Self::Error> {
        use PortfolioLogCol as C;

        polars::df!(
            C::Price.name() => value.price,
            C::Forecast.name() => value.forecast,
            C::Budget.name() => value.budget,
            C::Investment.name() => value.investment,
            C::PortfolioValue.name() => value.portfolio_value,
            C::NetValue.name() => value.net_value,
            C::Shares.name() => value.shares,
            C::Konkorde.name() => value.konkorde,
            C::Action.name() => value.action,
            C::Reward.name() => value.reward,
            C::GuardAnchor.name() => value.guard_anchor,
            C::GuardExtreme.name() => value.guard_extreme,
        )
        .map_err(|e| DataError::DataFrame(e.to_string()).into())
    }
}

impl TryFrom<&DataFrame> for PortfolioLog {
    type Error = TraderError;

    fn try_from(df: &DataFrame) -> Result<Self, Self::Error> {
        use PortfolioLogCol as C;

        let price = floats(df, C::Price)?;
        let forecast = floats(df, C::Forecast)?;
        let budget = floats(df, C::Budget)?;
        let investment = floats(df, C::Investment)?;
        let portfolio_value = floats(df, C::PortfolioValue)?;
        let net_value = floats(df, C::NetValue)?;
        let shares = floats(df, C::Shares)?;
        let reward = floats(df, C::Reward)?;

        let konkorde = nullable_floats(df, C::Konkorde)?;
        let guard_anchor = nullable_floats(df, C::GuardAnchor)?;
        let guard_extreme = nullable_floats(df, C::GuardExtreme)?;

        let actions = df
            .column(C::Action.into())
            .map_err(|_| DataError::MissingColumn(C::Action.to_string()))?
            .str()?
            .into_iter()
            .enumerate()
            .map(|(row, name)| {
                let name = name.ok_or_else(|| DataError::NullValue {
                    column: C::Action.to_string(),
                    row,
                })?;
                Action::from_str(name).map_err(DataError::from)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let records = (0..df.height())
            .map(|i| PortfolioRecord {
                price: price[i],
                forecast: forecast[i],
                budget: budget[i],
                investment: investment[i],
                portfolio_value: portfolio_value[i],
                net_value: net_value[i],
                shares: shares[i],
                konkorde: konkorde[i],
                action: actions[i],
                reward: reward[i],
                guard_anchor: guard_anchor[i],
                guard_extreme: guard_extreme[i],
            })
            .collect();
        Ok(Self { records })
    }
}

fn nullable_floats(df: &DataFrame, col: PortfolioLogCol) -> TraderResult<Vec<Option<f64>>> {
    let column = df
        .column(col.into())
        .map_err(|_| DataError::MissingColumn(col.to_string()))?
        .cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().collect())
}

fn floats(df: &DataFrame, col: PortfolioLogCol) -> TraderResult<Vec<f64>> {
    let column = df
        .column(col.into())
        .map_err(|_| DataError::MissingColumn(col.to_string()))?
        .cast(&DataType::Float64)?;
    column
        .f64()?
        .into_iter()
        .enumerate()
        .map(|(row, value)| {
            value.ok_or_else(|| {
                DataError::NullValue {
                    column: col.to_string(),
                    row,
                }
                .into()
            })
        })
        .collect()
}
