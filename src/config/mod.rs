//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::game::combat::InvincibleHitPolicy;
use crate::game::MatchSettings;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// HS256 secret for player session tokens
    pub session_jwt_secret: String,

    /// Public base URL handed to clients for the websocket endpoint
    pub public_base_url: String,
    /// Allowed client origin for CORS (comma-separated)
    pub client_origin: String,

    pub match_min_players: usize,
    pub match_max_players: usize,
    pub round_length_secs: f32,
    /// What a sweep does when it touches an invincible combatant
    pub invincible_hit_policy: InvincibleHitPolicy,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            session_jwt_secret: env::var("SESSION_JWT_SECRET")
                .map_err(|_| ConfigError::Missing("SESSION_JWT_SECRET"))?,

            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),

            match_min_players: parse_or("MATCH_MIN_PLAYERS", env::var("MATCH_MIN_PLAYERS").ok(), 2)?,
            match_max_players: parse_or("MATCH_MAX_PLAYERS", env::var("MATCH_MAX_PLAYERS").ok(), 8)?,
            round_length_secs: parse_or("ROUND_LENGTH_SECS", env::var("ROUND_LENGTH_SECS").ok(), 180.0)?,
            invincible_hit_policy: parse_or(
                "INVINCIBLE_HIT_POLICY",
                env::var("INVINCIBLE_HIT_POLICY").ok(),
                InvincibleHitPolicy::default(),
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.match_min_players == 0 || self.match_min_players > self.match_max_players {
            return Err(ConfigError::Invalid {
                name: "MATCH_MIN_PLAYERS",
                reason: format!(
                    "must be between 1 and MATCH_MAX_PLAYERS ({})",
                    self.match_max_players
                ),
            });
        }
        if self.round_length_secs.is_nan() || self.round_length_secs <= 0.0 {
            return Err(ConfigError::Invalid {
                name: "ROUND_LENGTH_SECS",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Rules every new match starts with
    pub fn match_settings(&self) -> MatchSettings {
        MatchSettings {
            min_players: self.match_min_players,
            max_players: self.match_max_players,
            round_length_secs: self.round_length_secs,
            invincible_policy: self.invincible_hit_policy,
            ..MatchSettings::default()
        }
    }
}

/// Parse an optional raw value, falling back to `default` when unset
fn parse_or<T: FromStr>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            reason: format!("cannot parse {:?}", value),
        }),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "debug".to_string(),
            session_jwt_secret: "secret".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            client_origin: "http://localhost:5173".to_string(),
            match_min_players: 2,
            match_max_players: 8,
            round_length_secs: 180.0,
            invincible_hit_policy: InvincibleHitPolicy::KeepOpen,
        }
    }

    #[test]
    fn unset_values_use_defaults() {
        assert_eq!(parse_or::<usize>("X", None, 4).unwrap(), 4);
        assert_eq!(parse_or::<usize>("X", Some(" 6 ".to_string()), 4).unwrap(), 6);
    }

    #[test]
    fn policy_parses_from_env_text() {
        let policy = parse_or("INVINCIBLE_HIT_POLICY", Some("close".to_string()), InvincibleHitPolicy::KeepOpen);
        assert_eq!(policy.unwrap(), InvincibleHitPolicy::Close);
        assert!(parse_or("INVINCIBLE_HIT_POLICY", Some("sometimes".to_string()), InvincibleHitPolicy::KeepOpen).is_err());
    }

    #[test]
    fn min_players_cannot_exceed_max() {
        let mut c = config();
        assert!(c.validate().is_ok());
        c.match_min_players = 9;
        assert!(matches!(c.validate(), Err(ConfigError::Invalid { name: "MATCH_MIN_PLAYERS", .. })));
    }

    #[test]
    fn settings_carry_policy() {
        let mut c = config();
        c.invincible_hit_policy = InvincibleHitPolicy::Close;
        let settings = c.match_settings();
        assert_eq!(settings.invincible_policy, InvincibleHitPolicy::Close);
        assert_eq!(settings.max_players, 8);
    }
}
