#![allow(dead_code)]

use std::{path::PathBuf, sync::Once};

use qtrader::prelude::*;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Fresh, empty directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("qtrader-it-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

pub fn setup_config() -> TraderConfig {
    TraderConfig::default()
        .with_environment(EnvConfig {
            initial_budget: 1000.0,
            shares_per_trade: 10.0,
            ..EnvConfig::default()
        })
        .with_seed(2024)
}

/// Oscillating prices with a forecast that leads them by one step.
pub fn setup_series(len: usize) -> MarketSeries {
    let prices: Vec<f64> = (0..len)
        .map(|i| 20.0 + 3.0 * (i as f64 * 0.4).sin())
        .collect();
    let forecasts: Vec<f64> = (0..len)
        .map(|i| 20.0 + 3.0 * ((i + 1) as f64 * 0.4).sin())
        .collect();
    MarketSeries::from_prices(&prices, &forecasts).expect("non-empty series")
}
