use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};

use crate::auth::backends::{BearerBackend, CookieBackend, CookieSettings, SameSite};
use crate::auth::tokens::MAX_LIFETIME_SECONDS;
use crate::db::{DatabaseConfig, Driver};
use crate::error::ConfigError;
use crate::routes::{GroupOverrides, RouteGroup, RouteSettings};
use crate::users::validation::PasswordPolicy;

const MIN_SECRET_LEN: usize = 32;
const MIN_SECRET_BITS: f64 = 100.0;

#[derive(Debug)]
pub struct Secrets {
    pub jwt: SecretString,
    pub cookie: SecretString,
    pub reset_password: SecretString,
    pub verification: SecretString,
}

/// Token lifetimes in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetimes {
    pub jwt: u64,
    pub cookie: u64,
    pub reset_password: u64,
    pub verification: u64,
}

impl Default for Lifetimes {
    fn default() -> Self {
        Self {
            jwt: BearerBackend::DEFAULT_LIFETIME,
            cookie: CookieBackend::DEFAULT_LIFETIME,
            reset_password: 60 * 60,
            verification: 60 * 60,
        }
    }
}

#[derive(Debug)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub secrets: Secrets,
    pub lifetimes: Lifetimes,
    pub cookie: CookieSettings,
    pub password: PasswordPolicy,
    pub routes: RouteSettings,
}

impl Settings {
    /// Defaults everywhere except the parts that have none.
    pub fn new(database: DatabaseConfig, secrets: Secrets) -> Self {
        Self {
            database,
            secrets,
            lifetimes: Lifetimes::default(),
            cookie: CookieSettings::default(),
            password: PasswordPolicy::default(),
            routes: RouteSettings::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Reads every setting through `lookup`; blank values count as unset.
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let src = Source(lookup);

        let driver: Driver = src.parse("DATABASE_DRIVER", Driver::Postgres)?;
        let database = DatabaseConfig {
            driver,
            host: src.get("DATABASE_HOST").unwrap_or_else(|| "localhost".into()),
            port: src.parse("DATABASE_PORT", 5432)?,
            user: src.get("DATABASE_USER").unwrap_or_else(|| "postgres".into()),
            password: SecretString::from(src.get("DATABASE_PASSWORD").unwrap_or_default()),
            name: match driver {
                Driver::Postgres => src.get("DATABASE_NAME").unwrap_or_else(|| "usergate".into()),
                Driver::Sqlite => src.require("DATABASE_NAME")?,
            },
            max_connections: src.parse("DATABASE_MAX_CONNECTIONS", 10)?,
        };

        let secrets = Secrets {
            jwt: SecretString::from(src.require("USERGATE_JWT_SECRET")?),
            cookie: SecretString::from(src.require("USERGATE_COOKIE_SECRET")?),
            reset_password: SecretString::from(src.require("USERGATE_RESET_PASSWORD_TOKEN_SECRET")?),
            verification: SecretString::from(src.require("USERGATE_VERIFICATION_TOKEN_SECRET")?),
        };

        let defaults = Lifetimes::default();
        let lifetimes = Lifetimes {
            jwt: src.parse("USERGATE_JWT_LIFETIME", defaults.jwt)?,
            cookie: src.parse("USERGATE_COOKIE_LIFETIME", defaults.cookie)?,
            reset_password: src.parse(
                "USERGATE_RESET_PASSWORD_TOKEN_LIFETIME",
                defaults.reset_password,
            )?,
            verification: src.parse(
                "USERGATE_VERIFICATION_TOKEN_LIFETIME",
                defaults.verification,
            )?,
        };

        let base = CookieSettings::default();
        let cookie = CookieSettings {
            name: src.get("USERGATE_COOKIE_NAME").unwrap_or(base.name),
            path: src.get("USERGATE_COOKIE_PATH").unwrap_or(base.path),
            domain: src.get("USERGATE_COOKIE_DOMAIN"),
            secure: src.flag("USERGATE_COOKIE_SECURE", base.secure)?,
            http_only: src.flag("USERGATE_COOKIE_HTTPONLY", base.http_only)?,
            same_site: src.parse::<SameSite>("USERGATE_COOKIE_SAMESITE", base.same_site)?,
        };

        let base = PasswordPolicy::default();
        let password = PasswordPolicy {
            min_length: src.parse("USERGATE_PASSWORD_MIN_LENGTH", base.min_length)?,
            max_length: src.parse("USERGATE_PASSWORD_MAX_LENGTH", base.max_length)?,
            require_letter: src.flag("USERGATE_PASSWORD_REQUIRE_LETTER", base.require_letter)?,
            require_digit: src.flag("USERGATE_PASSWORD_REQUIRE_DIGIT", base.require_digit)?,
            forbid_email: base.forbid_email,
        };

        let mut routes = RouteSettings::default();
        for group in RouteGroup::ALL {
            let key = group.env_key();
            let overrides = GroupOverrides {
                enabled: src.optional_flag(&format!("USERGATE_ENABLE_{key}"))?,
                prefix: src.get(&format!("USERGATE_{key}_PREFIX")),
                enable_refresh: if group == RouteGroup::AuthBearer {
                    src.optional_flag("USERGATE_JWT_ENABLE_REFRESH")?
                } else {
                    None
                },
                guard: None,
            };
            routes = routes.set(group, overrides);
        }

        Ok(Self {
            database,
            secrets,
            lifetimes,
            cookie,
            password,
            routes,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.secrets;
        check_secret("USERGATE_JWT_SECRET", &s.jwt)?;
        check_secret("USERGATE_COOKIE_SECRET", &s.cookie)?;
        check_secret("USERGATE_RESET_PASSWORD_TOKEN_SECRET", &s.reset_password)?;
        check_secret("USERGATE_VERIFICATION_TOKEN_SECRET", &s.verification)?;

        let l = &self.lifetimes;
        for (key, seconds) in [
            ("USERGATE_JWT_LIFETIME", l.jwt),
            ("USERGATE_COOKIE_LIFETIME", l.cookie),
            ("USERGATE_RESET_PASSWORD_TOKEN_LIFETIME", l.reset_password),
            ("USERGATE_VERIFICATION_TOKEN_LIFETIME", l.verification),
        ] {
            if seconds == 0 {
                return Err(ConfigError::invalid(key, "lifetime must be positive"));
            }
            if seconds > MAX_LIFETIME_SECONDS {
                return Err(ConfigError::invalid(
                    key,
                    format!("{seconds}s exceeds the {MAX_LIFETIME_SECONDS}s maximum"),
                ));
            }
        }

        check_cookie(&self.cookie)?;

        let p = &self.password;
        if p.min_length == 0 || p.min_length > p.max_length {
            return Err(ConfigError::invalid(
                "USERGATE_PASSWORD_MIN_LENGTH",
                format!("need 0 < min ({}) <= max ({})", p.min_length, p.max_length),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::invalid(
                "DATABASE_MAX_CONNECTIONS",
                "must be at least 1",
            ));
        }
        if self.database.name.is_empty() {
            return Err(ConfigError::Missing("DATABASE_NAME".into()));
        }
        Ok(())
    }
}

struct Source<F>(F);

impl<F: Fn(&str) -> Option<String>> Source<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::Missing(key.into()))
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .map_err(|e: T::Err| ConfigError::invalid(key, e.to_string())),
            None => Ok(default),
        }
    }

    fn optional_flag(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::invalid(key, format!("expected a boolean, got {raw:?}"))),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        Ok(self.optional_flag(key)?.unwrap_or(default))
    }
}

/// Shannon entropy of the character distribution times the length.
pub(crate) fn estimated_entropy_bits(secret: &str) -> f64 {
    let len = secret.chars().count();
    if len == 0 {
        return 0.0;
    }
    let mut counts: HashMap<char, usize> = HashMap::new();
    for c in secret.chars() {
        *counts.entry(c).or_default() += 1;
    }
    let per_char: f64 = counts
        .values()
        .map(|&n| {
            let p = n as f64 / len as f64;
            -p * p.log2()
        })
        .sum();
    per_char * len as f64
}

fn check_secret(key: &str, secret: &SecretString) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.is_empty() {
        return Err(ConfigError::Missing(key.into()));
    }
    let len = value.chars().count();
    if len < MIN_SECRET_LEN {
        return Err(ConfigError::WeakSecret {
            key: key.into(),
            reason: format!("{len} characters, need at least {MIN_SECRET_LEN}"),
        });
    }
    let bits = estimated_entropy_bits(value);
    if bits < MIN_SECRET_BITS {
        return Err(ConfigError::WeakSecret {
            key: key.into(),
            reason: format!("about {bits:.0} bits of entropy, need {MIN_SECRET_BITS:.0}"),
        });
    }
    Ok(())
}

fn check_cookie(c: &CookieSettings) -> Result<(), ConfigError> {
    const SEPARATORS: &str = "()<>@,;:\\\"/[]?={}";
    if c.name.is_empty()
        || !c
            .name
            .chars()
            .all(|ch| ch.is_ascii_graphic() && !SEPARATORS.contains(ch))
    {
        return Err(ConfigError::invalid(
            "USERGATE_COOKIE_NAME",
            format!("{:?} is not a valid cookie name", c.name),
        ));
    }
    if !c.path.starts_with('/') || c.path.contains(';') || c.path.contains(char::is_whitespace) {
        return Err(ConfigError::invalid(
            "USERGATE_COOKIE_PATH",
            format!("{:?} must be an absolute path", c.path),
        ));
    }
    if let Some(domain) = &c.domain {
        if domain.contains(';') || domain.contains(char::is_whitespace) {
            return Err(ConfigError::invalid(
                "USERGATE_COOKIE_DOMAIN",
                format!("{domain:?} is not a valid domain"),
            ));
        }
    }
    if c.same_site == SameSite::None && !c.secure {
        return Err(ConfigError::invalid(
            "USERGATE_COOKIE_SAMESITE",
            "SameSite=None requires a secure cookie",
        ));
    }
    Ok(())
}
