use std::fmt;

use thiserror::Error;

pub const USERNAME_ENV: &str = "SERVICENOW_USERNAME";
pub const PASSWORD_ENV: &str = "SERVICENOW_PASSWORD";
pub const INSTANCE_ENV: &str = "SERVICENOW_INSTANCE";
pub const DEFAULT_INSTANCE: &str = "https://accentureabdemo2.service-now.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVariable(&'static str),
    #[error("Invalid ServiceNow instance URL '{url}': {reason}")]
    InvalidInstance { url: String, reason: String },
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// ServiceNow basic-auth identity and instance base URL.
///
/// Built once at startup and borrowed by every tool call. The password is
/// never printed, including through `Debug`.
pub struct Credentials {
    username: String,
    password: String,
    base_url: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Self::from_raw(
            Some(username.into()),
            Some(password.into()),
            Some(base_url.into()),
        )
    }

    /// Read `SERVICENOW_USERNAME`, `SERVICENOW_PASSWORD` and the optional
    /// `SERVICENOW_INSTANCE` from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|name| std::env::var(name).ok())
    }

    pub(crate) fn load_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_raw(
            lookup(USERNAME_ENV),
            lookup(PASSWORD_ENV),
            lookup(INSTANCE_ENV),
        )
    }

    fn from_raw(
        username: Option<String>,
        password: Option<String>,
        instance: Option<String>,
    ) -> Result<Self, ConfigError> {
        let username = required_value(username, USERNAME_ENV)?;
        let password = required_value(password, PASSWORD_ENV)?;
        let base_url = normalize_instance_url(instance)?;
        Ok(Self {
            username,
            password,
            base_url,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn authorization_header(&self) -> String {
        snow_core::auth::basic_authorization(&self.username, &self.password)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn required_value(raw: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    match raw {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVariable(name)),
    }
}

fn normalize_instance_url(raw: Option<String>) -> Result<String, ConfigError> {
    let trimmed = raw
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_INSTANCE)
        .trim_end_matches('/');
    let parsed = reqwest::Url::parse(trimmed).map_err(|e| ConfigError::InvalidInstance {
        url: trimmed.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidInstance {
            url: trimmed.to_string(),
            reason: "scheme must be http or https".to_string(),
        });
    }
    Ok(trimmed.to_string())
}
