use std::collections::HashMap;

use rand_distr::{Distribution, StandardNormal};
use sqlx::postgres::PgPoolOptions;
use sqlx::Row;
use tracing::{error, info, warn};

use crate::features::IndicatorSnapshot;

/// One historical candle joined with its indicator row.
///
/// Indicator columns are nullable in the database; gaps are forward- then
/// backward-filled before training, and anything still missing falls back to
/// the feature deriver's defaults.
#[derive(Debug, Clone)]
pub struct HistoricalRow {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub ema9: Option<f64>,
    pub ema21: Option<f64>,
    pub ema50: Option<f64>,
    pub vwap: Option<f64>,
    pub atr: Option<f64>,
}

impl HistoricalRow {
    /// Indicator snapshot in the shape the feature deriver expects.
    pub fn to_snapshot(&self) -> IndicatorSnapshot {
        let mut values = HashMap::new();
        let mut put = |key: &str, value: Option<f64>| {
            if let Some(v) = value {
                values.insert(key.to_string(), v);
            }
        };
        put("rsi", self.rsi);
        put("macd", self.macd);
        put("macdSignal", self.macd_signal);
        put("ema9", self.ema9);
        put("ema21", self.ema21);
        put("ema50", self.ema50);
        put("vwap", self.vwap);
        put("atr", self.atr);
        IndicatorSnapshot::new(values)
    }
}

const FETCH_QUERY: &str = r#"
    SELECT
        o.timestamp,
        o.open::double precision AS open,
        o.high::double precision AS high,
        o.low::double precision AS low,
        o.close::double precision AS close,
        o.volume::double precision AS volume,
        i.rsi::double precision AS rsi,
        i.macd::double precision AS macd,
        i."macdSignal"::double precision AS macd_signal,
        i.ema9::double precision AS ema9,
        i.ema21::double precision AS ema21,
        i.ema50::double precision AS ema50,
        i.vwap::double precision AS vwap,
        i.atr::double precision AS atr
    FROM ohlcv_data o
    LEFT JOIN indicators i
        ON o.symbol = i.symbol
        AND o.timeframe = i.timeframe
        AND o.timestamp = i.timestamp
    WHERE o.symbol = $1
        AND o.timeframe = $2
        AND i.rsi IS NOT NULL
    ORDER BY o.timestamp DESC
    LIMIT $3
"#;

/// Supplies historical OHLCV + indicator rows for training.
///
/// Reads from PostgreSQL when a connection string is configured; any fetch
/// problem (no configuration, unreachable database, empty result) degrades
/// to synthetic mock rows so training always has material to work with.
#[derive(Debug, Clone)]
pub struct TrainingDataSource {
    database_url: Option<String>,
}

impl TrainingDataSource {
    pub fn new(database_url: Option<String>) -> Self {
        Self { database_url }
    }

    /// Fetch up to `limit` rows, oldest first. Infallible by design: every
    /// failure path is logged and replaced with mock data.
    pub async fn fetch(&self, symbol: &str, timeframe: &str, limit: usize) -> Vec<HistoricalRow> {
        let url = match &self.database_url {
            Some(url) => url.clone(),
            None => {
                warn!("DATABASE_URL not set, using mock training data");
                return mock_rows(limit);
            }
        };

        match self.fetch_from_db(&url, symbol, timeframe, limit).await {
            Ok(rows) if rows.is_empty() => {
                warn!("no rows for {} {} in database, using mock data", symbol, timeframe);
                mock_rows(limit)
            }
            Ok(mut rows) => {
                rows.sort_by_key(|r| r.timestamp);
                fill_indicator_gaps(&mut rows);
                info!("fetched {} training rows for {} {}", rows.len(), symbol, timeframe);
                rows
            }
            Err(e) => {
                error!("database fetch failed: {}, using mock data", e);
                mock_rows(limit)
            }
        }
    }

    async fn fetch_from_db(
        &self,
        url: &str,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<HistoricalRow>> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(url)
            .await?;

        let rows = sqlx::query(FETCH_QUERY)
            .bind(symbol)
            .bind(timeframe)
            .bind(limit as i64)
            .fetch_all(&pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(HistoricalRow {
                timestamp: row.try_get("timestamp")?,
                open: row.try_get("open")?,
                high: row.try_get("high")?,
                low: row.try_get("low")?,
                close: row.try_get("close")?,
                volume: row.try_get("volume")?,
                rsi: row.try_get("rsi")?,
                macd: row.try_get("macd")?,
                macd_signal: row.try_get("macd_signal")?,
                ema9: row.try_get("ema9")?,
                ema21: row.try_get("ema21")?,
                ema50: row.try_get("ema50")?,
                vwap: row.try_get("vwap")?,
                atr: row.try_get("atr")?,
            });
        }
        Ok(out)
    }
}

/// Forward-fill then backward-fill nullable indicator columns.
fn fill_indicator_gaps(rows: &mut [HistoricalRow]) {
    fn fill(rows: &mut [HistoricalRow], get: fn(&HistoricalRow) -> Option<f64>, set: fn(&mut HistoricalRow, Option<f64>)) {
        let mut last = None;
        for row in rows.iter_mut() {
            match get(row) {
                Some(v) => last = Some(v),
                None => set(row, last),
            }
        }
        let mut next = None;
        for row in rows.iter_mut().rev() {
            match get(row) {
                Some(v) => next = Some(v),
                None => set(row, next),
            }
        }
    }

    fill(rows, |r| r.rsi, |r, v| r.rsi = v);
    fill(rows, |r| r.macd, |r, v| r.macd = v);
    fill(rows, |r| r.macd_signal, |r, v| r.macd_signal = v);
    fill(rows, |r| r.ema9, |r, v| r.ema9 = v);
    fill(rows, |r| r.ema21, |r, v| r.ema21 = v);
    fill(rows, |r| r.ema50, |r, v| r.ema50 = v);
    fill(rows, |r| r.vwap, |r, v| r.vwap = v);
    fill(rows, |r| r.atr, |r, v| r.atr = v);
}

/// Synthetic rows shaped like the real query result, around a 2000 base
/// price. Keeps training and the fallback path alive without a database.
pub fn mock_rows(limit: usize) -> Vec<HistoricalRow> {
    warn!("generating {} rows of mock training data", limit);

    let mut rng = rand::thread_rng();
    let base_price = 2000.0;

    (0..limit)
        .map(|i| {
            let noise = |scale: f64, rng: &mut rand::rngs::ThreadRng| {
                let draw: f64 = StandardNormal.sample(rng);
                draw * scale
            };
            HistoricalRow {
                timestamp: i as i64,
                open: base_price + noise(50.0, &mut rng),
                high: base_price + noise(60.0, &mut rng).abs(),
                low: base_price - noise(60.0, &mut rng).abs(),
                close: base_price + noise(50.0, &mut rng),
                volume: 1000.0 + noise(500.0, &mut rng).abs(),
                rsi: Some(50.0 + noise(20.0, &mut rng)),
                macd: Some(noise(5.0, &mut rng)),
                macd_signal: Some(noise(5.0, &mut rng)),
                ema9: Some(base_price + noise(30.0, &mut rng)),
                ema21: Some(base_price + noise(40.0, &mut rng)),
                ema50: Some(base_price + noise(50.0, &mut rng)),
                vwap: Some(base_price + noise(30.0, &mut rng)),
                atr: Some(30.0 + noise(10.0, &mut rng).abs()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_rows_match_requested_length_and_shape() {
        let rows = mock_rows(120);
        assert_eq!(rows.len(), 120);
        for row in &rows {
            assert!(row.close > 0.0);
            assert!(row.rsi.is_some());
            assert!(row.atr.unwrap() >= 30.0);
        }
        // timestamps ascend so labeling sees time order
        assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn unconfigured_source_falls_back_to_mock_data() {
        let source = TrainingDataSource::new(None);
        let rows = tokio_test::block_on(source.fetch("ETHUSDT", "1h", 150));
        assert_eq!(rows.len(), 150);
    }

    #[test]
    fn indicator_gaps_are_filled_both_directions() {
        let mut rows = mock_rows(5);
        rows[0].rsi = None;
        rows[1].rsi = Some(40.0);
        rows[2].rsi = None;
        rows[3].rsi = None;
        rows[4].rsi = Some(60.0);
        fill_indicator_gaps(&mut rows);

        // leading gap backward-fills, interior gaps forward-fill
        assert_eq!(rows[0].rsi, Some(40.0));
        assert_eq!(rows[2].rsi, Some(40.0));
        assert_eq!(rows[3].rsi, Some(40.0));
    }

    #[test]
    fn snapshot_skips_missing_indicators() {
        let mut row = mock_rows(1).remove(0);
        row.rsi = None;
        row.vwap = None;
        let snapshot = row.to_snapshot();
        // defaults come from the feature deriver, not the row
        assert_eq!(snapshot.get_or("rsi", 50.0), 50.0);
        assert_eq!(snapshot.get_or("vwap", 0.0), 0.0);
        assert_eq!(snapshot.get_or("ema9", 0.0), row.ema9.unwrap());
    }
}
