use std::path::PathBuf;

/// Service configuration, resolved once at startup from the environment.
///
/// `.env` files are honored via dotenvy before this is built.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Bind address for the HTTP server
    pub host: String,
    pub port: u16,
    /// Directory holding persisted model artifacts
    pub model_dir: PathBuf,
    /// PostgreSQL connection string; when absent, training falls back to
    /// synthetic mock data
    pub database_url: Option<String>,
    /// Symbol/timeframe the predictor loads at startup
    pub default_symbol: String,
    pub default_timeframe: String,
    /// Forward window and threshold for direction labeling during training
    pub label_look_ahead: usize,
    pub label_threshold: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            model_dir: PathBuf::from("./models"),
            database_url: None,
            default_symbol: "ETHUSDT".to_string(),
            default_timeframe: "1h".to_string(),
            label_look_ahead: 5,
            label_threshold: 0.005,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = std::env::var("ML_SERVICE_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);

        let model_dir = std::env::var("MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.model_dir);

        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());

        Self {
            port,
            model_dir,
            database_url,
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_conventions() {
        let config = ServiceConfig::default();
        assert_eq!(config.port, 8001);
        assert_eq!(config.model_dir, PathBuf::from("./models"));
        assert_eq!(config.default_symbol, "ETHUSDT");
        assert_eq!(config.default_timeframe, "1h");
        assert!(config.database_url.is_none());
    }
}
