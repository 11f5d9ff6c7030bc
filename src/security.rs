//! Password hashing and signed links for email validation and password resets.

use anyhow::anyhow;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use crate::error::{LibError, Result};
use crate::models::UserId;

type HmacSha256 = Hmac<Sha256>;

pub const PASSWORD_COST: u32 = 6;
pub const TOKEN_COST: u32 = 10;
pub const MIN_PASSWORD_LENGTH: usize = 10;
pub const MIN_DISTINCT_GLYPHS: usize = 8;

const SEPARATOR: char = '\u{1}';
const SEPARATOR_COUNT: usize = 5;
const TOKEN_PREFIX: &str = "$2b$10$";

/// How long an issued link stays valid.
pub fn token_ttl() -> Duration {
    Duration::hours(12)
}

/// A link stays usable through the second named by `expiry`.
pub fn is_expired(expiry: i64, now: DateTime<Utc>) -> bool {
    now.timestamp() > expiry
}

/// Human readable reasons why `password` is too weak. Empty when it passes.
pub fn password_weaknesses(password: &str) -> Vec<&'static str> {
    let mut reasons = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        reasons.push("too short (min 10 characters)");
    }
    if password.chars().all(|c| c.is_ascii_digit()) {
        reasons.push("must not be only digits");
    }
    if password.chars().all(|c| c.is_ascii_lowercase()) {
        reasons.push("must not be only lowercase letters");
    }
    if password.chars().all(|c| c.is_ascii_uppercase()) {
        reasons.push("must not be only uppercase letters");
    }
    let mut glyphs: Vec<char> = password.chars().collect();
    glyphs.sort_unstable();
    glyphs.dedup();
    if glyphs.len() < MIN_DISTINCT_GLYPHS {
        reasons.push("must have at least 8 different glyphs");
    }
    reasons
}

pub fn ensure_strong_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(LibError::invalid(
            "password must not be empty",
            anyhow!("empty password"),
        ));
    }
    let reasons = password_weaknesses(password);
    if reasons.is_empty() {
        return Ok(());
    }
    Err(LibError::invalid(
        "password is too weak: %s",
        anyhow!("password rejected: {}", reasons.join(", ")),
    )
    .with_arg(reasons.join(", ")))
}

pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, PASSWORD_COST)
        .map_err(|err| LibError::unknown("could not hash password: %w", anyhow!(err)))
}

/// False for a wrong password and for a malformed hash alike.
pub fn check_password(password_hash: &str, password: &str) -> bool {
    bcrypt::verify(password, password_hash).unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    ValidateEmail,
    ChangePassword,
}

impl TokenPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenPurpose::ValidateEmail => "validate-email",
            TokenPurpose::ChangePassword => "change-password",
        }
    }
}

/// Everything a validation link commits to.
///
/// The user's current password hash is part of the signed data, so a
/// password change invalidates every link issued before it.
#[derive(Debug, Clone, Copy)]
pub struct TokenClaims<'a> {
    pub purpose: TokenPurpose,
    pub user_key: UserId,
    pub expiry: i64,
    pub parameter: &'a str,
    pub password_hash: &'a str,
}

impl TokenClaims<'_> {
    fn material(&self, secret: &str) -> Option<String> {
        let data = format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{secret}",
            self.purpose.as_str(),
            self.user_key,
            self.expiry,
            self.parameter,
            self.password_hash,
        );
        (data.matches(SEPARATOR).count() == SEPARATOR_COUNT).then_some(data)
    }

    pub fn sign(&self, secret: &str) -> Result<String> {
        if secret.is_empty() {
            return Err(LibError::unknown(
                "could not generate validation token: %w",
                anyhow!("validation secret is empty"),
            )
            .with_arg("no signing secret configured"));
        }
        let data = self.material(secret).ok_or_else(|| {
            LibError::invalid(
                "could not generate validation token: %w",
                anyhow!("token field contains the separator"),
            )
            .with_arg("invalid characters in token data")
        })?;
        let salt = salt(&data, secret)?;
        let hash = bcrypt::hash(salt, TOKEN_COST).map_err(|err| {
            LibError::unknown("could not generate validation token: %w", anyhow!(err))
                .with_arg("hashing failed")
        })?;
        Ok(URL_SAFE_NO_PAD.encode(hash))
    }

    pub fn verify(&self, secret: &str, token: &str) -> bool {
        if secret.is_empty() {
            return false;
        }
        let Some(data) = self.material(secret) else {
            return false;
        };
        let Ok(decoded) = URL_SAFE_NO_PAD.decode(token) else {
            return false;
        };
        let Ok(hash) = String::from_utf8(decoded) else {
            return false;
        };
        if !hash.starts_with(TOKEN_PREFIX) {
            return false;
        }
        match salt(&data, secret) {
            Ok(salt) => bcrypt::verify(salt, &hash).unwrap_or(false),
            Err(_) => false,
        }
    }
}

fn salt(data: &str, secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|err| {
        LibError::unknown("could not generate validation token: %w", anyhow!("{err}"))
            .with_arg("invalid signing key")
    })?;
    mac.update(data.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// A signed link handed to the mail layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub user_key: UserId,
    /// Target email for validation links, empty for password resets.
    pub parameter: String,
    pub expiry: i64,
    pub token: String,
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::error::ErrorKind;

    const SECRET: &str = "test-validation-secret";

    fn claims<'a>(user_key: UserId, parameter: &'a str, password_hash: &'a str) -> TokenClaims<'a> {
        TokenClaims {
            purpose: TokenPurpose::ValidateEmail,
            user_key,
            expiry: Utc::now().timestamp() + 3600,
            parameter,
            password_hash,
        }
    }

    #[test]
    fn weak_passwords_list_every_reason() {
        assert_eq!(
            password_weaknesses("abc"),
            vec![
                "too short (min 10 characters)",
                "must not be only lowercase letters",
                "must have at least 8 different glyphs",
            ]
        );
        assert_eq!(
            password_weaknesses("1234567890"),
            vec!["must not be only digits"]
        );
        assert_eq!(
            password_weaknesses("AAAAAAAAAAAA"),
            vec![
                "must not be only uppercase letters",
                "must have at least 8 different glyphs",
            ]
        );
        assert!(password_weaknesses("Sprung-Rolle7").is_empty());
    }

    #[test]
    fn strength_check_reports_a_validation_error() {
        let err = ensure_strong_password("kurz").expect_err("weak");
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.to_string().starts_with("password is too weak: too short"));

        let err = ensure_strong_password("").expect_err("empty");
        assert_eq!(err.public, "password must not be empty");

        ensure_strong_password("Sprung-Rolle7").expect("strong password");
    }

    #[test]
    fn password_hash_checks_only_the_original() {
        let hash = hash_password("Sprung-Rolle7").expect("hash");
        assert!(hash.starts_with("$2"));
        assert!(check_password(&hash, "Sprung-Rolle7"));
        assert!(!check_password(&hash, "Sprung-Rolle8"));
        assert!(!check_password("not a hash", "Sprung-Rolle7"));
    }

    #[test]
    fn token_is_bound_to_every_claim() {
        let user = UserId(Uuid::new_v4());
        let original = claims(user, "erika@example.org", "$2b$06$hash");
        let token = original.sign(SECRET).expect("sign");
        assert!(original.verify(SECRET, &token));

        let other_email = TokenClaims {
            parameter: "max@example.org",
            ..original
        };
        let other_expiry = TokenClaims {
            expiry: original.expiry + 1,
            ..original
        };
        let other_hash = TokenClaims {
            password_hash: "$2b$06$changed",
            ..original
        };
        let other_purpose = TokenClaims {
            purpose: TokenPurpose::ChangePassword,
            ..original
        };
        for tampered in [other_email, other_expiry, other_hash, other_purpose] {
            assert!(!tampered.verify(SECRET, &token));
        }
        assert!(!original.verify("another-secret", &token));
        assert!(!original.verify(SECRET, "invalid-token"));
        assert!(!original.verify(SECRET, ""));
    }

    #[test]
    fn separator_in_claims_cannot_be_signed() {
        let user = UserId(Uuid::new_v4());
        let err = claims(user, "erika\u{1}@example.org", "$2b$06$hash")
            .sign(SECRET)
            .expect_err("separator");
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(claims(user, "erika@example.org", "hash").sign("").is_err());
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        assert!(!is_expired(now.timestamp(), now));
        assert!(is_expired(now.timestamp(), now + Duration::seconds(1)));
    }
}
