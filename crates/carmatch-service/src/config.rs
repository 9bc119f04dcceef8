//! Service configuration.

use std::path::Path;
use std::str::FromStr;

use carmatch_core::PublicationPolicy;
use serde::Deserialize;

/// Default Stripe API base URL.
pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection URL. When unset the in-memory store is used.
    pub database_url: Option<String>,

    /// Maximum pooled database connections (default: 10).
    pub database_max_connections: u32,

    /// HS256 secret for user session tokens. Without it every user request is rejected.
    pub auth_jwt_secret: Option<String>,

    /// Expected `iss` claim, checked when set.
    pub auth_issuer: Option<String>,

    /// Admin API key for privileged endpoints.
    pub admin_api_key: Option<String>,

    /// Emails whose accounts are created as administrators (lowercase).
    pub admin_emails: Vec<String>,

    /// Bearer secret guarding the cron endpoint. Open when unset.
    pub cron_secret: Option<String>,

    /// Run the renewal sweep in-process at this interval.
    pub sweep_interval_seconds: Option<u64>,

    /// Stripe API key (optional).
    pub stripe_api_key: Option<String>,

    /// Stripe webhook secret (optional).
    pub stripe_webhook_secret: Option<String>,

    /// Stripe API base URL.
    pub stripe_api_base: String,

    /// Accepted age of a webhook signature timestamp, in seconds.
    pub stripe_webhook_tolerance_seconds: i64,

    /// Frontend URL for checkout redirects.
    pub frontend_url: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Price of one credit in cents.
    pub credit_price_cents: i64,

    /// Largest number of credits in one checkout.
    pub max_credits_per_purchase: i64,

    /// Publication rules.
    pub policy: PublicationPolicy,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    api_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        // Try to load Stripe secrets from file first, then fall back to env vars
        let (stripe_api_key, stripe_webhook_secret) = load_stripe_secrets();

        let policy = PublicationPolicy {
            vehicle_free_months: env_or("VEHICLE_FREE_MONTHS", defaults.policy.vehicle_free_months),
            business_free_months: env_or(
                "BUSINESS_FREE_MONTHS",
                defaults.policy.business_free_months,
            ),
            admin_free_days: env_or("ADMIN_FREE_DAYS", defaults.policy.admin_free_days),
            renewal_cost_credits: env_or(
                "RENEWAL_COST_CREDITS",
                defaults.policy.renewal_cost_credits,
            ),
            renewal_period_days: env_or("RENEWAL_PERIOD_DAYS", defaults.policy.renewal_period_days),
        };
        let policy = checked_policy(policy);

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            database_url: non_empty_var("DATABASE_URL"),
            database_max_connections: env_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            auth_jwt_secret: non_empty_var("AUTH_JWT_SECRET"),
            auth_issuer: non_empty_var("AUTH_ISSUER"),
            admin_api_key: non_empty_var("ADMIN_API_KEY"),
            admin_emails: std::env::var("ADMIN_EMAILS")
                .map(|s| parse_email_list(&s))
                .unwrap_or_default(),
            cron_secret: non_empty_var("CRON_SECRET"),
            sweep_interval_seconds: std::env::var("SWEEP_INTERVAL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0),
            stripe_api_key,
            stripe_webhook_secret,
            stripe_api_base: std::env::var("STRIPE_API_BASE").unwrap_or(defaults.stripe_api_base),
            stripe_webhook_tolerance_seconds: env_or(
                "STRIPE_WEBHOOK_TOLERANCE_SECONDS",
                defaults.stripe_webhook_tolerance_seconds,
            ),
            frontend_url: std::env::var("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_or("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_or(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            credit_price_cents: env_or("CREDIT_PRICE_CENTS", defaults.credit_price_cents),
            max_credits_per_purchase: env_or(
                "MAX_CREDITS_PER_PURCHASE",
                defaults.max_credits_per_purchase,
            ),
            policy,
        }
    }

    /// Whether `email` is configured as an administrator.
    #[must_use]
    pub fn is_admin_email(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        self.admin_emails.iter().any(|e| *e == email)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 10,
            auth_jwt_secret: None,
            auth_issuer: None,
            admin_api_key: None,
            admin_emails: Vec::new(),
            cron_secret: None,
            sweep_interval_seconds: None,
            stripe_api_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: DEFAULT_STRIPE_API_BASE.into(),
            stripe_webhook_tolerance_seconds: 300,
            frontend_url: "http://localhost:3000".into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            credit_price_cents: 500,
            max_credits_per_purchase: 100,
            policy: PublicationPolicy::default(),
        }
    }
}

/// The policy if it validates, otherwise the defaults.
fn checked_policy(policy: PublicationPolicy) -> PublicationPolicy {
    match policy.validate() {
        Ok(()) => policy,
        Err(e) => {
            tracing::warn!(error = %e, "Invalid publication policy, using defaults");
            PublicationPolicy::default()
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key = %key, value = %raw, "Ignoring unparsable configuration value");
            default
        }),
        Err(_) => default,
    }
}

fn parse_email_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Load Stripe secrets from file or environment.
fn load_stripe_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/stripe.json",
        "carmatch/.secrets/stripe.json",
        "../.secrets/stripe.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<StripeSecrets>(Path::new(path)) {
            tracing::info!(path = %path, "Loaded Stripe secrets from file");
            return (Some(secrets.api_key), secrets.webhook_secret);
        }
    }

    // Fall back to environment variables
    tracing::debug!("Stripe secrets file not found, using environment variables");
    (
        non_empty_var("STRIPE_API_KEY"),
        non_empty_var("STRIPE_WEBHOOK_SECRET"),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, std::io::Error> {
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
