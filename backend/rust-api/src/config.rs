use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: Option<String>,
    pub mongo_database: String,
    pub jwt_secret: String,
    pub bind_addr: String,
    pub idempotency_ttl_seconds: u64,
    pub rewards: RewardRules,
}

/// Gamification thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct RewardRules {
    pub xp_per_level: i64,
    pub case_master_threshold: u32,
}

impl Default for RewardRules {
    fn default() -> Self {
        Self {
            xp_per_level: 1000,
            case_master_threshold: 20,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first (two levels up), then the crate-local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/{env}.toml, overridden by APP__SECTION__KEY variables
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Self::from_settings(&settings, &app_env)
    }

    fn from_settings(settings: &config::Config, app_env: &str) -> Result<Self, config::ConfigError> {
        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017/?replicaSet=rs0".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "mediscope".to_string());

        // Redis is optional; without it idempotency keys are ignored
        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .ok()
            .filter(|uri| !uri.trim().is_empty());

        let jwt_secret = match settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
        {
            Ok(secret) => secret,
            Err(_) if app_env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ));
            }
            Err(_) => {
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            }
        };

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let idempotency_ttl_seconds = settings
            .get_int("cache.idempotency_ttl_seconds")
            .ok()
            .and_then(|value| u64::try_from(value).ok())
            .filter(|value| *value > 0)
            .unwrap_or(86400);

        let defaults = RewardRules::default();
        let rewards = RewardRules {
            xp_per_level: settings
                .get_int("rewards.xp_per_level")
                .ok()
                .filter(|value| *value > 0)
                .unwrap_or(defaults.xp_per_level),
            case_master_threshold: settings
                .get_int("rewards.case_master_threshold")
                .ok()
                .and_then(|value| u32::try_from(value).ok())
                .filter(|value| *value > 0)
                .unwrap_or(defaults.case_master_threshold),
        };

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            jwt_secret,
            bind_addr,
            idempotency_ttl_seconds,
            rewards,
        })
    }

    /// Configuration for tests and local runs against the in-memory store.
    pub fn for_tests(jwt_secret: &str) -> Self {
        Config {
            mongo_uri: String::new(),
            redis_uri: None,
            mongo_database: "mediscope_test".to_string(),
            jwt_secret: jwt_secret.to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            idempotency_ttl_seconds: 60,
            rewards: RewardRules::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn settings(pairs: &[(&str, &str)]) -> config::Config {
        let mut builder = config::Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(*key, *value).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    #[serial]
    fn defaults_apply_when_nothing_is_set() {
        env::remove_var("MONGO_URI");
        env::remove_var("REDIS_URI");
        env::remove_var("JWT_SECRET");

        let config = Config::from_settings(&settings(&[]), "dev").unwrap();
        assert_eq!(config.mongo_database, "mediscope");
        assert!(config.redis_uri.is_none());
        assert_eq!(config.idempotency_ttl_seconds, 86400);
        assert_eq!(config.rewards.xp_per_level, 1000);
        assert_eq!(config.rewards.case_master_threshold, 20);
    }

    #[test]
    #[serial]
    fn prod_requires_jwt_secret() {
        env::remove_var("JWT_SECRET");
        let result = Config::from_settings(&settings(&[]), "prod");
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn settings_override_reward_rules() {
        let config = Config::from_settings(
            &settings(&[
                ("rewards.xp_per_level", "500"),
                ("rewards.case_master_threshold", "5"),
                ("auth.jwt_secret", "s3cret"),
            ]),
            "prod",
        )
        .unwrap();
        assert_eq!(config.rewards.xp_per_level, 500);
        assert_eq!(config.rewards.case_master_threshold, 5);
        assert_eq!(config.jwt_secret, "s3cret");
    }
}
