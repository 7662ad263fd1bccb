use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use rand_core::OsRng;

use crate::errors::AppError;

const MIN_PASSWORD_LENGTH: usize = 8;

pub fn hash_password(password: &str) -> Result<String, AppError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::bad_request(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::internal(format!("failed to hash password: {err}")))
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|err| AppError::internal(format!("invalid password hash: {err}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Validate a `#RRGGBB` hex color code. Malformed input is rejected before
/// any authorization logic runs.
pub fn validate_hex_color(color: &str) -> Result<(), AppError> {
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());

    if valid {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "invalid color code: {color} (expected #RRGGBB)"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_color_accepts_rrggbb() {
        assert!(validate_hex_color("#3B82F6").is_ok());
        assert!(validate_hex_color("#6b7280").is_ok());
    }

    #[test]
    fn hex_color_rejects_malformed() {
        assert!(validate_hex_color("3B82F6").is_err());
        assert!(validate_hex_color("#3B82F").is_err());
        assert!(validate_hex_color("#3B82FG").is_err());
        assert!(validate_hex_color("#3B82F6AA").is_err());
    }
}
