use std::env;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Seconds between sweeper passes over active loans.
    pub sweep_interval_secs: u64,
    pub wa_gateway_url: Option<String>,
    pub wa_gateway_token: Option<String>,
    pub cors_allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://bibliodesk.db?mode=rwc".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            wa_gateway_url: env::var("WA_GATEWAY_URL").ok(),
            wa_gateway_token: env::var("WA_GATEWAY_TOKEN").ok(),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .ok()
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(Vec::new),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // The environment is process-global, hence unsafe to mutate since Rust
    // 2024; #[serial] keeps these tests from racing each other.
    fn set(key: &str, value: &str) {
        unsafe { env::set_var(key, value) };
    }

    fn clear(key: &str) {
        unsafe { env::remove_var(key) };
    }

    #[test]
    #[serial]
    fn defaults_apply_when_env_is_empty() {
        clear("DATABASE_URL");
        clear("PORT");
        clear("SWEEP_INTERVAL_SECS");
        clear("WA_GATEWAY_URL");
        clear("WA_GATEWAY_TOKEN");
        clear("CORS_ALLOWED_ORIGINS");

        let config = Config::from_env();
        assert_eq!(config.database_url, "sqlite://bibliodesk.db?mode=rwc");
        assert_eq!(config.port, 8000);
        assert_eq!(config.sweep_interval_secs, 60);
        assert!(config.wa_gateway_url.is_none());
        assert!(config.cors_allowed_origins.is_empty());
    }

    #[test]
    #[serial]
    fn env_values_override_defaults() {
        set("DATABASE_URL", "sqlite::memory:");
        set("PORT", "9090");
        set("SWEEP_INTERVAL_SECS", "5");
        set(
            "CORS_ALLOWED_ORIGINS",
            "http://localhost:3000, https://library.example.org",
        );

        let config = Config::from_env();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.port, 9090);
        assert_eq!(config.sweep_interval_secs, 5);
        assert_eq!(
            config.cors_allowed_origins,
            vec![
                "http://localhost:3000".to_string(),
                "https://library.example.org".to_string()
            ]
        );

        clear("DATABASE_URL");
        clear("PORT");
        clear("SWEEP_INTERVAL_SECS");
        clear("CORS_ALLOWED_ORIGINS");
    }

    #[test]
    #[serial]
    fn unparseable_numbers_fall_back() {
        set("PORT", "not-a-port");
        set("SWEEP_INTERVAL_SECS", "soon");

        let config = Config::from_env();
        assert_eq!(config.port, 8000);
        assert_eq!(config.sweep_interval_secs, 60);

        clear("PORT");
        clear("SWEEP_INTERVAL_SECS");
    }
}
