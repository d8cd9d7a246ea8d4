use rocket::figment::{Figment, providers::{Env, Format, Toml}};
use rocket::Config as RocketConfig;
use std::env;

pub struct Config;

impl Config {
    fn figment() -> Figment {
        // Get the current profile
        let profile = env::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string());

        Figment::from(RocketConfig::default())
            .merge(Toml::file("Rocket.toml").nested())
            .select(&profile)
            .merge(Env::prefixed("ROCKET_").split("_"))
    }

    pub fn jwt_secret() -> String {
        Self::figment()
            .extract_inner("jwt_secret")
            .unwrap_or_else(|_| "default-secret".to_string())
    }

    pub fn jwt_expiry() -> i64 {
        Self::figment()
            .extract_inner("jwt_expiry")
            .unwrap_or(900)
    }

    pub fn mongodb_uri() -> String {
        Self::figment()
            .extract_inner("mongodb_uri")
            .unwrap_or_else(|_| "mongodb://localhost:27017/hirelocal".to_string())
    }

    pub fn notify_webhook_url() -> Option<String> {
        Self::figment()
            .extract_inner("notify_webhook_url")
            .ok()
    }

    pub fn notify_signing_secret() -> Option<String> {
        Self::figment()
            .extract_inner("notify_signing_secret")
            .ok()
    }

    /// Candidate-pool radius for location-aware matching, in kilometers.
    pub fn match_radius_km() -> f64 {
        Self::figment()
            .extract_inner("match_radius_km")
            .unwrap_or(25.0)
    }

    pub fn is_development() -> bool {
        let profile = env::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string());
        profile == "development"
    }
}
