use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DataError, IoError, TraderResult};

/// Key names inside the temporary JSON drops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TmpKeys {
    pub date: String,
    pub close: String,
    pub ensemble: String,
    pub green: String,
    pub blue: String,
}

impl Default for TmpKeys {
    fn default() -> Self {
        Self {
            date: "Date".to_string(),
            close: "Close".to_string(),
            ensemble: "ensemble".to_string(),
            green: "green".to_string(),
            blue: "blue".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpdaterConfig {
    /// CSV file receiving the new row.
    pub file: PathBuf,
    pub tmp_ohlc: PathBuf,
    pub tmp_forecast: PathBuf,
    pub tmp_indicator: PathBuf,
    pub tmp_predictions: PathBuf,
    pub delimiter: char,
    pub keys: TmpKeys,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("forecast.csv"),
            tmp_ohlc: PathBuf::from("tmp_ohlc.json"),
            tmp_forecast: PathBuf::from("tmp_forecast.json"),
            tmp_indicator: PathBuf::from("tmp_indicator.json"),
            tmp_predictions: PathBuf::from("tmp_predictions.json"),
            delimiter: ',',
            keys: TmpKeys::default(),
        }
    }
}

type JsonObject = Map<String, Value>;

/// Appends one row per market day to the forecast or predictions file, using the
/// temporary JSON files dropped by the upstream predictor.
#[derive(Debug, Clone)]
pub struct Updater {
    cfg: UpdaterConfig,
}

impl Updater {
    pub fn new(cfg: UpdaterConfig) -> Self {
        Self { cfg }
    }

    /// Appends `date,close,ensemble,green,blue`. Returns `Ok(false)` when a temporary file is
    /// missing or the file already holds the date.
    #[tracing::instrument(skip(self), fields(file = %self.cfg.file.display()))]
    pub fn forecast(&self) -> TraderResult<bool> {
        let (Some(ohlc), Some(ensemble), Some(indicator)) = (
            read_json(&self.cfg.tmp_ohlc)?,
            read_json(&self.cfg.tmp_forecast)?,
            read_json(&self.cfg.tmp_indicator)?,
        ) else {
            tracing::info!("Not updating forecast, missing temporary files");
            return Ok(false);
        };

        let k = &self.cfg.keys;
        let date = text(&ohlc, &k.date)?;
        if self.already_has(&date)? {
            tracing::warn!(%date, "Forecast file already contains entry");
            return Ok(false);
        }

        let close = number(&ohlc, &k.close)?;
        let row = [
            date.clone(),
            format!("{close:.2}"),
            round_two(field(&ensemble, &k.ensemble)?),
            round_two(field(&indicator, &k.green)?),
            round_two(field(&indicator, &k.blue)?),
        ]
        .iter()
        .join(&self.cfg.delimiter.to_string());

        self.append_line(&row)?;
        tracing::info!(%date, "Forecast file updated");
        Ok(true)
    }

    /// Appends `date,<predictions>,mean,mad_mean,median,mad_median,<nearest>` where
    /// `<nearest>` names the prediction closest to the actual close. Prediction columns
    /// follow the key order of the JSON file.
    #[tracing::instrument(skip(self), fields(file = %self.cfg.file.display()))]
    pub fn predictions(&self) -> TraderResult<bool> {
        let (Some(preds), Some(ohlc)) = (
            read_json(&self.cfg.tmp_predictions)?,
            read_json(&self.cfg.tmp_ohlc)?,
        ) else {
            tracing::info!("No temporary files to update predictions");
            return Ok(false);
        };

        let k = &self.cfg.keys;
        let date = text(&ohlc, &k.date)?;
        if self.already_has(&date)? {
            tracing::warn!(%date, "Predictions file already contains entry");
            return Ok(false);
        }

        let names: Vec<&String> = preds.keys().collect();
        let values = preds
            .keys()
            .map(|name| number(&preds, name).map(round2))
            .collect::<TraderResult<Vec<f64>>>()?;
        if values.is_empty() {
            return Err(DataError::UnexpectedValue("no predictions".to_string()).into());
        }

        let stats = PredictionStats::new(&values);
        let close = number(&ohlc, &k.close)?;
        let winner = names[nearest(&values, close)];

        let sep = self.cfg.delimiter.to_string();
        let row = std::iter::once(date.clone())
            .chain(values.iter().map(|v| format!("{v:.2}")))
            .chain([
                format!("{:.2}", stats.mean),
                format!("{:.2}", stats.mad_mean),
                format!("{:.2}", stats.median),
                format!("{:.2}", stats.mad_median),
                winner.clone(),
            ])
            .join(&sep);

        self.append_line(&row)?;
        tracing::info!(%date, %winner, "Predictions file updated");
        Ok(true)
    }

    /// Whether the first field of the file's last non-empty line equals `date`.
    fn already_has(&self, date: &str) -> TraderResult<bool> {
        if !self.cfg.file.exists() {
            return Ok(false);
        }
        let raw = fs::read_to_string(&self.cfg.file).map_err(IoError::from)?;
        Ok(raw
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .and_then(|line| line.split(self.cfg.delimiter).next())
            .is_some_and(|first| first.trim() == date))
    }

    fn append_line(&self, row: &str) -> TraderResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.cfg.file)
            .map_err(IoError::from)?;
        writeln!(file, "{row}").map_err(IoError::from)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PredictionStats {
    mean: f64,
    mad_mean: f64,
    median: f64,
    mad_median: f64,
}

impl PredictionStats {
    fn new(values: &[f64]) -> Self {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let median = median(values);
        let mad = |center: f64| values.iter().map(|v| (v - center).abs()).sum::<f64>() / n;
        Self {
            mean,
            mad_mean: mad(mean),
            median,
            mad_median: mad(median),
        }
    }
}

fn median(values: &[f64]) -> f64 {
    let sorted: Vec<f64> = values
        .iter()
        .copied()
        .sorted_by_key(|v| OrderedFloat(*v))
        .collect();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Index of the value closest to `target`; ties go to the first.
fn nearest(values: &[f64], target: f64) -> usize {
    values
        .iter()
        .enumerate()
        .min_by_key(|(_, v)| OrderedFloat((*v - target).abs()))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Numbers to two decimals, strings unchanged.
fn round_two(value: &Value) -> String {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(|x| format!("{x:.2}"))
            .unwrap_or_else(|| n.to_string()),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `None` when the file does not exist.
fn read_json(path: &Path) -> TraderResult<Option<JsonObject>> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "Temporary file missing");
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(IoError::from)?;
    let obj = serde_json::from_str(&raw).map_err(IoError::from)?;
    Ok(Some(obj))
}

fn field<'a>(obj: &'a JsonObject, key: &str) -> TraderResult<&'a Value> {
    obj.get(key)
        .ok_or_else(|| DataError::UnexpectedValue(format!("missing key '{key}'")).into())
}

fn text(obj: &JsonObject, key: &str) -> TraderResult<String> {
    match field(obj, key)? {
        Value::String(s) => Ok(s.clone()),
        other => Ok(other.to_string()),
    }
}

/// Accepts JSON numbers and numeric strings.
fn number(obj: &JsonObject, key: &str) -> TraderResult<f64> {
    let value = field(obj, key)?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        DataError::UnexpectedValue(format!("'{key}' is not numeric: {value}")).into()
    })
}
