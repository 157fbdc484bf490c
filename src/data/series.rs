use std::{path::Path, sync::Arc};

use polars::prelude::{
    CsvReadOptions, DataFrame, DataType, PlSmallStr, Schema, SchemaRef, SerReader,
};
use serde::{Deserialize, Serialize};

use crate::error::{DataError, IoError, TraderResult};

/// One observation of the market: closing price, its forecast and an optional
/// konkorde reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketRow {
    pub price: f64,
    pub forecast: f64,
    pub konkorde: Option<f64>,
}

impl MarketRow {
    pub fn new(price: f64, forecast: f64) -> Self {
        Self {
            price,
            forecast,
            konkorde: None,
        }
    }

    pub fn with_konkorde(self, konkorde: f64) -> Self {
        Self {
            konkorde: Some(konkorde),
            ..self
        }
    }
}

/// Column names used to read a [`MarketSeries`] from CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeriesColumns {
    pub price: String,
    pub forecast: String,
    pub konkorde: Option<String>,
}

impl Default for SeriesColumns {
    fn default() -> Self {
        Self {
            price: "price".to_string(),
            forecast: "forecast".to_string(),
            konkorde: None,
        }
    }
}

impl SeriesColumns {
    pub fn with_konkorde(self, column: impl Into<String>) -> Self {
        Self {
            konkorde: Some(column.into()),
            ..self
        }
    }
}

/// Non-empty, ordered price/forecast series the environment steps through.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSeries {
    rows: Vec<MarketRow>,
}

impl MarketSeries {
    pub fn from_rows(rows: Vec<MarketRow>) -> TraderResult<Self> {
        if rows.is_empty() {
            return Err(DataError::EmptySeries("market series has no rows".to_string()).into());
        }
        Ok(Self { rows })
    }

    /// Builds a series without a konkorde signal from parallel price and forecast slices.
    pub fn from_prices(prices: &[f64], forecasts: &[f64]) -> TraderResult<Self> {
        if prices.len() != forecasts.len() {
            return Err(DataError::UnexpectedValue(format!(
                "{} prices but {} forecasts",
                prices.len(),
                forecasts.len()
            ))
            .into());
        }
        let rows = prices
            .iter()
            .zip(forecasts)
            .map(|(&price, &forecast)| MarketRow::new(price, forecast))
            .collect();
        Self::from_rows(rows)
    }

    /// Reads the configured columns of a headered CSV file. Other columns are ignored.
    #[tracing::instrument(skip(columns), fields(path = %path.display()))]
    pub fn from_csv(path: &Path, columns: &SeriesColumns) -> TraderResult<Self> {
        if !path.is_file() {
            return Err(IoError::NotFound(path.display().to_string()).into());
        }

        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_schema_overwrite(Some(series_schema(columns)))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?;

        let series = Self::from_df(&df, columns)?;
        tracing::info!(rows = series.len(), "Market series loaded");
        Ok(series)
    }

    pub fn from_df(df: &DataFrame, columns: &SeriesColumns) -> TraderResult<Self> {
        let prices = float_column(df, &columns.price)?;
        let forecasts = float_column(df, &columns.forecast)?;
        let konkorde = columns
            .konkorde
            .as_deref()
            .map(|name| float_column(df, name))
            .transpose()?;

        let rows = prices
            .into_iter()
            .zip(forecasts)
            .enumerate()
            .map(|(idx, (price, forecast))| MarketRow {
                price,
                forecast,
                konkorde: konkorde.as_ref().map(|k| k[idx]),
            })
            .collect();
        Self::from_rows(rows)
    }

    pub fn get(&self, idx: usize) -> Option<&MarketRow> {
        self.rows.get(idx)
    }

    pub fn first(&self) -> &MarketRow {
        // Construction guarantees at least one row.
        &self.rows[0]
    }

    pub fn rows(&self) -> &[MarketRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Schema of the columns read from a series file, everything as `Float64`.
pub fn series_schema(columns: &SeriesColumns) -> SchemaRef {
    let names = [Some(&columns.price), Some(&columns.forecast), columns.konkorde.as_ref()];
    let mut schema = Schema::with_capacity(names.len());
    for name in names.into_iter().flatten() {
        schema.with_column(PlSmallStr::from(name.as_str()), DataType::Float64);
    }
    Arc::new(schema)
}

fn float_column(df: &DataFrame, name: &str) -> TraderResult<Vec<f64>> {
    let column = df
        .column(name)
        .map_err(|_| DataError::MissingColumn(name.to_string()))?
        .cast(&DataType::Float64)?;
    let values = column.f64()?;
    values
        .into_iter()
        .enumerate()
        .map(|(row, value)| {
            value.ok_or_else(|| {
                DataError::NullValue {
                    column: name.to_string(),
                    row,
                }
                .into()
            })
        })
        .collect()
}
