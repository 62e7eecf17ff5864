use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: String,
    pub storage_backend: String,
    pub database_url: Option<String>,
    pub data_dir: String,
    pub llm_provider: String,
    pub llm_model: String,
    pub fallback_provider: String,
    pub fallback_model: String,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub otel_service_name: String,
    pub otel_exporter_endpoint: String,
    pub max_concurrent_workflows: usize,
    pub max_concurrent_activities: usize,
    pub activity_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_grace: Duration,
    pub cost_rate_input_per_1k: f64,
    pub cost_rate_output_per_1k: f64,
    pub cost_rate_per_image: f64,
    pub generate_cover_image: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let string = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let number = |key: &str, default: &str| -> u64 {
            string(key, default)
                .parse()
                .unwrap_or_else(|_| panic!("{key} must be a number"))
        };
        let secs = |key: &str, default: &str| Duration::from_secs(number(key, default));
        let rate = |key: &str, default: &str| -> f64 {
            string(key, default)
                .parse()
                .unwrap_or_else(|_| panic!("{key} must be a number"))
        };

        Self {
            port: string("APP_PORT", "8080")
                .parse()
                .expect("APP_PORT must be a number"),
            environment: string("APP_ENVIRONMENT", "development"),
            storage_backend: string("STORAGE_BACKEND", "local"),
            database_url: get("DATABASE_URL"),
            data_dir: string("DATA_DIR", "./data"),
            llm_provider: string("LLM_PROVIDER", "openai"),
            llm_model: string("LLM_MODEL", "gpt-4.1"),
            fallback_provider: string("FALLBACK_PROVIDER", "anthropic"),
            fallback_model: string("FALLBACK_MODEL", "claude-haiku-4-5-20251001"),
            openai_api_key: get("OPENAI_API_KEY"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            otel_service_name: string("OTEL_SERVICE_NAME", "report-pipeline"),
            otel_exporter_endpoint: string("OTEL_EXPORTER_OTLP_ENDPOINT", "http://localhost:4317"),
            max_concurrent_workflows: number("MAX_CONCURRENT_WORKFLOWS", "10") as usize,
            max_concurrent_activities: number("MAX_CONCURRENT_ACTIVITIES", "20") as usize,
            activity_timeout: secs("ACTIVITY_TIMEOUT_SECS", "600"),
            heartbeat_interval: secs("HEARTBEAT_INTERVAL_SECS", "5"),
            heartbeat_grace: secs("HEARTBEAT_GRACE_SECS", "15"),
            cost_rate_input_per_1k: rate("COST_RATE_INPUT_PER_1K", "0.005"),
            cost_rate_output_per_1k: rate("COST_RATE_OUTPUT_PER_1K", "0.015"),
            cost_rate_per_image: rate("COST_RATE_PER_IMAGE", "0.04"),
            generate_cover_image: get("GENERATE_COVER_IMAGE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.port, 8080);
        assert_eq!(config.environment, "development");
        assert_eq!(config.storage_backend, "local");
        assert_eq!(config.data_dir, "./data");
        assert_eq!(config.llm_provider, "openai");
        assert_eq!(config.fallback_provider, "anthropic");
        assert_eq!(config.max_concurrent_workflows, 10);
        assert_eq!(config.max_concurrent_activities, 20);
        assert_eq!(config.activity_timeout, Duration::from_secs(600));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.heartbeat_grace, Duration::from_secs(15));
        assert_eq!(config.cost_rate_input_per_1k, 0.005);
        assert_eq!(config.cost_rate_output_per_1k, 0.015);
        assert_eq!(config.cost_rate_per_image, 0.04);
        assert!(config.database_url.is_none());
        assert!(!config.generate_cover_image);
        assert!(!config.is_production());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let config = config_with(&[
            ("APP_PORT", "9000"),
            ("APP_ENVIRONMENT", "production"),
            ("STORAGE_BACKEND", "postgres"),
            ("DATABASE_URL", "postgres://localhost/reports"),
            ("MAX_CONCURRENT_WORKFLOWS", "3"),
            ("ACTIVITY_TIMEOUT_SECS", "120"),
            ("COST_RATE_PER_IMAGE", "0.08"),
        ]);
        assert_eq!(config.port, 9000);
        assert!(config.is_production());
        assert_eq!(config.storage_backend, "postgres");
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/reports")
        );
        assert_eq!(config.max_concurrent_workflows, 3);
        assert_eq!(config.activity_timeout, Duration::from_secs(120));
        assert_eq!(config.cost_rate_per_image, 0.08);
    }

    #[test]
    fn test_cover_image_flag_accepts_true_and_one() {
        assert!(config_with(&[("GENERATE_COVER_IMAGE", "true")]).generate_cover_image);
        assert!(config_with(&[("GENERATE_COVER_IMAGE", "1")]).generate_cover_image);
        assert!(!config_with(&[("GENERATE_COVER_IMAGE", "yes")]).generate_cover_image);
        assert!(!config_with(&[("GENERATE_COVER_IMAGE", "0")]).generate_cover_image);
    }

    #[test]
    #[should_panic(expected = "MAX_CONCURRENT_WORKFLOWS must be a number")]
    fn test_non_numeric_cap_panics_at_startup() {
        config_with(&[("MAX_CONCURRENT_WORKFLOWS", "lots")]);
    }
}
