//! Resetting the password of the built-in `admin` account.

use crate::auth::Argon2Hasher;
use crate::config::{Config, OperationMode};
use crate::error::{Error, Result};
use crate::store::Store;

pub const ADMIN_USER: &str = "admin";
const MIN_PASSWORD_LEN: usize = 8;

/// Refuses unless the instance runs in normal mode, the only mode with
/// accounts.
pub fn ensure_normal_mode(config: &Config) -> Result<()> {
    if config.mode == OperationMode::Normal {
        Ok(())
    } else {
        Err(Error::PermissionDenied(format!(
            "reset-admin needs normal mode, this instance runs in {} mode",
            config.mode
        )))
    }
}

/// Hashes `password` and stores it as the admin password.
pub fn reset_admin_password(store: &dyn Store, hasher: &Argon2Hasher, password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::InvalidPassword(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    store.get_user(ADMIN_USER)?;
    let hash = hasher.hash(password)?;
    store.update_user_password_hash(ADMIN_USER, &hash)?;
    tracing::info!("Password of {} reset", ADMIN_USER);
    Ok(())
}

/// Reads the new password from the terminal without echo, asking twice.
#[cfg(feature = "cli")]
pub fn prompt_password() -> Result<String> {
    inquire::Password::new("New admin password:")
        .with_display_mode(inquire::PasswordDisplayMode::Hidden)
        .with_custom_confirmation_message("Confirm password:")
        .with_validator(|input: &str| {
            if input.chars().count() < MIN_PASSWORD_LEN {
                Ok(inquire::validator::Validation::Invalid(
                    format!("Password must be at least {MIN_PASSWORD_LEN} characters").into(),
                ))
            } else {
                Ok(inquire::validator::Validation::Valid)
            }
        })
        .prompt()
        .map_err(|e| Error::Fatal(format!("failed to read password: {e}")))
}
