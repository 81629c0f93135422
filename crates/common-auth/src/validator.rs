use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;

use crate::clock::Clock;
use crate::registry::{RegistryError, RegistrySource, TokenRegistry};

/// Expiry dates are plain calendar days, zero padded.
pub const EXPIRY_FORMAT: &str = "%Y-%m-%d";

/// Identity a live token resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
    pub permissions: Vec<String>,
    /// Last day, inclusive, on which the token is accepted.
    pub expires: NaiveDate,
}

/// Why a token was refused. Never exposed to callers, only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotFound,
    Expired,
    /// The presented token could not be decoded into a string at all.
    Malformed,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NotFound => "not_found",
            RejectReason::Expired => "expired",
            RejectReason::Malformed => "malformed",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("record for user {user:?} has malformed expiry {value:?}")]
    MalformedExpiry { user: String, value: String },
    #[error("record has an empty user")]
    EmptyUser,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid token ({reason})")]
    InvalidToken { reason: RejectReason },
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl From<RegistryError> for ValidationError {
    fn from(error: RegistryError) -> Self {
        ValidationError::Configuration(ConfigurationError::Registry(error))
    }
}

/// Parse an expiry date, rejecting anything that is not exactly `YYYY-MM-DD`.
pub fn parse_expiry(value: &str) -> Option<NaiveDate> {
    let date = NaiveDate::parse_from_str(value, EXPIRY_FORMAT).ok()?;
    // chrono accepts unpadded fields; the registry format does not.
    (date.format(EXPIRY_FORMAT).to_string() == value).then_some(date)
}

/// Resolve `token` against an already loaded registry as of `today`.
pub fn check(
    registry: &TokenRegistry,
    token: &str,
    today: NaiveDate,
) -> Result<Identity, ValidationError> {
    let record = registry.get(token).ok_or(ValidationError::InvalidToken {
        reason: RejectReason::NotFound,
    })?;

    let expires =
        parse_expiry(&record.expires).ok_or_else(|| ConfigurationError::MalformedExpiry {
            user: record.user.clone(),
            value: record.expires.clone(),
        })?;

    if today > expires {
        return Err(ValidationError::InvalidToken {
            reason: RejectReason::Expired,
        });
    }

    if record.user.is_empty() {
        return Err(ConfigurationError::EmptyUser.into());
    }

    Ok(Identity {
        user: record.user.clone(),
        permissions: record.permissions.clone(),
        expires,
    })
}

/// Loads the registry from its source and checks tokens against the clock.
#[derive(Clone)]
pub struct Validator {
    source: Arc<dyn RegistrySource>,
    clock: Arc<dyn Clock>,
}

impl Validator {
    pub fn new(source: Arc<dyn RegistrySource>, clock: Arc<dyn Clock>) -> Self {
        Self { source, clock }
    }

    pub async fn validate(&self, token: &str) -> Result<Identity, ValidationError> {
        let registry = self.source.load().await?;
        check(&registry, token, self.clock.today())
    }

    /// Outcome for a token that can never be a registry key.
    ///
    /// The registry is still loaded first, so a broken registry reports a
    /// configuration fault for malformed tokens exactly as for any other.
    pub async fn reject_malformed(&self) -> ValidationError {
        match self.source.load().await {
            Ok(_) => ValidationError::InvalidToken {
                reason: RejectReason::Malformed,
            },
            Err(error) => error.into(),
        }
    }

    pub async fn reload(&self) -> Result<usize, RegistryError> {
        self.source.reload().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::clock::FixedClock;
    use crate::registry::{FileRegistrySource, IdentityRecord, StaticRegistrySource};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 15).expect("date")
    }

    fn record(user: &str, permissions: &[&str], expires: &str) -> IdentityRecord {
        IdentityRecord {
            user: user.to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            expires: expires.to_string(),
        }
    }

    fn registry(entries: Vec<(&str, IdentityRecord)>) -> TokenRegistry {
        TokenRegistry::new(
            entries
                .into_iter()
                .map(|(token, record)| (token.to_string(), record))
                .collect::<HashMap<_, _>>(),
        )
    }

    fn validator(registry: TokenRegistry) -> Validator {
        Validator::new(
            Arc::new(StaticRegistrySource::new(registry)),
            Arc::new(FixedClock::new(today())),
        )
    }

    #[tokio::test]
    async fn live_token_resolves_identity() {
        let validator = validator(registry(vec![(
            "tok-abc",
            record("alice", &["read", "write"], "2025-12-31"),
        )]));
        let identity = validator.validate("tok-abc").await.expect("valid");
        assert_eq!(identity.user, "alice");
        assert_eq!(identity.permissions, vec!["read", "write"]);
        assert_eq!(
            identity.expires,
            NaiveDate::from_ymd_opt(2025, 12, 31).expect("date")
        );
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let validator = validator(registry(vec![(
            "tok-abc",
            record("alice", &["read"], "2025-12-31"),
        )]));
        for token in ["tok-xyz", "", "TOK-ABC", "tok-abc "] {
            let err = validator.validate(token).await.unwrap_err();
            assert!(matches!(
                err,
                ValidationError::InvalidToken {
                    reason: RejectReason::NotFound
                }
            ));
        }
    }

    #[tokio::test]
    async fn past_expiry_is_rejected() {
        let validator = validator(registry(vec![(
            "tok-old",
            record("bob", &[], "2024-01-01"),
        )]));
        let err = validator.validate("tok-old").await.unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidToken {
                reason: RejectReason::Expired
            }
        ));
    }

    #[test]
    fn expiry_day_itself_is_valid() {
        let registry = registry(vec![(
            "tok-edge",
            record("erin", &["read"], "2025-06-15"),
        )]);
        assert!(check(&registry, "tok-edge", today()).is_ok());

        let tomorrow = today().succ_opt().expect("date");
        assert!(matches!(
            check(&registry, "tok-edge", tomorrow),
            Err(ValidationError::InvalidToken {
                reason: RejectReason::Expired
            })
        ));
    }

    #[test]
    fn malformed_expiry_only_affects_its_record() {
        let registry = registry(vec![
            ("tok-bad", record("mallory", &[], "not-a-date")),
            ("tok-abc", record("alice", &["read"], "2025-12-31")),
        ]);
        assert!(matches!(
            check(&registry, "tok-bad", today()),
            Err(ValidationError::Configuration(
                ConfigurationError::MalformedExpiry { .. }
            ))
        ));
        assert!(check(&registry, "tok-abc", today()).is_ok());
    }

    #[test]
    fn empty_user_is_a_configuration_error() {
        let registry = registry(vec![("tok-anon", record("", &[], "2025-12-31"))]);
        assert!(matches!(
            check(&registry, "tok-anon", today()),
            Err(ValidationError::Configuration(ConfigurationError::EmptyUser))
        ));
    }

    #[test]
    fn expiry_must_be_zero_padded_calendar_date() {
        assert!(parse_expiry("2025-06-15").is_some());
        assert!(parse_expiry("2024-02-29").is_some());
        for value in [
            "",
            "not-a-date",
            "2025-6-15",
            "2025-06-5",
            "2025-13-01",
            "2025-02-30",
            "2025-06-15T00:00:00Z",
            " 2025-06-15",
        ] {
            assert!(parse_expiry(value).is_none(), "{value:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn unreadable_registry_fails_every_token() {
        let dir = tempfile::tempdir().expect("tempdir");
        let validator = Validator::new(
            Arc::new(FileRegistrySource::new(dir.path().join("missing.yaml"))),
            Arc::new(FixedClock::new(today())),
        );
        for token in ["tok-abc", "tok-xyz"] {
            assert!(matches!(
                validator.validate(token).await,
                Err(ValidationError::Configuration(
                    ConfigurationError::Registry(_)
                ))
            ));
        }
    }

    #[tokio::test]
    async fn malformed_token_is_invalid_unless_registry_is_broken() {
        let validator = validator(registry(vec![(
            "tok-abc",
            record("alice", &["read"], "2025-12-31"),
        )]));
        assert!(matches!(
            validator.reject_malformed().await,
            ValidationError::InvalidToken {
                reason: RejectReason::Malformed
            }
        ));

        let dir = tempfile::tempdir().expect("tempdir");
        let broken = Validator::new(
            Arc::new(FileRegistrySource::new(dir.path().join("missing.yaml"))),
            Arc::new(FixedClock::new(today())),
        );
        assert!(matches!(
            broken.reject_malformed().await,
            ValidationError::Configuration(ConfigurationError::Registry(_))
        ));
    }

    #[tokio::test]
    async fn repeated_validation_is_stable() {
        let validator = validator(registry(vec![(
            "tok-abc",
            record("alice", &["read", "write"], "2025-12-31"),
        )]));
        let first = validator.validate("tok-abc").await.expect("valid");
        let second = validator.validate("tok-abc").await.expect("valid");
        assert_eq!(first, second);
    }
}
