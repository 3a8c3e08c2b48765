use anyhow::Result;
use serde_json::json;
use thiserror::Error;
use time::OffsetDateTime;

use crate::config::Settings;
use crate::storage::{StorageHandle, UserRecord};

pub mod password;
pub mod routes;

pub use password::{hash_password, verify_password};
pub use routes::{normalize_route, resolve_route, Route};

const MIN_PASSWORD_LEN: usize = 8;
const SESSION_USER_KEY: &str = "app.state.session_user";
const SESSION_STARTED_KEY: &str = "app.state.session_started";

/// Recoverable authentication and validation failures. Everything here is
/// surfaced as a transient notice and aborts the operation without side
/// effects; infrastructure failures pass through as `Storage`.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("invalid email address")]
    InvalidEmail,
    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    PasswordTooShort,
    #[error("an account with this email already exists")]
    DuplicateEmail,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub struct AuthService {
    storage: StorageHandle,
}

impl AuthService {
    pub fn new(storage: StorageHandle) -> Self {
        Self { storage }
    }

    pub fn signup(&self, name: &str, email: &str, password: &str) -> Result<UserRecord, AuthError> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() {
            return Err(AuthError::MissingField("name"));
        }
        if email.is_empty() {
            return Err(AuthError::MissingField("email"));
        }
        if !is_valid_email(email) {
            return Err(AuthError::InvalidEmail);
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::PasswordTooShort);
        }
        if self.storage.find_user_by_email(email)?.is_some() {
            return Err(AuthError::DuplicateEmail);
        }

        let hash = hash_password(password)?;
        let user_id = self.storage.insert_user(name, email, &hash)?;
        self.storage
            .fetch_user(user_id)?
            .ok_or_else(|| AuthError::Storage(anyhow::anyhow!("user missing after signup")))
    }

    pub fn login(&self, email: &str, password: &str) -> Result<UserRecord, AuthError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingField("email and password"));
        }
        let Some(user) = self.storage.find_user_by_email(email)? else {
            return Err(AuthError::InvalidCredentials);
        };
        if !user.active || !verify_password(password, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }
        self.storage.touch_last_login(user.id)?;
        tracing::info!(user_id = user.id, "user logged in");
        Ok(user)
    }

    /// The implicit identity used when `require_login` is off; keeps per-user
    /// data isolation without a credential check.
    pub fn guest(&self) -> Result<UserRecord, AuthError> {
        Ok(self.storage.get_or_create_guest()?)
    }

    /// Records the authenticated user in the settings document so a restart
    /// within the expiry window resumes the session.
    pub fn persist_session(&self, settings: &mut Settings, user_id: i64) -> Result<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        settings.set(SESSION_USER_KEY, json!(user_id))?;
        settings.set(SESSION_STARTED_KEY, json!(now))?;
        Ok(())
    }

    pub fn clear_session(&self, settings: &mut Settings) -> Result<()> {
        settings.remove(SESSION_USER_KEY)?;
        settings.remove(SESSION_STARTED_KEY)?;
        Ok(())
    }

    /// Restores a persisted session if one exists and has not expired.
    pub fn restore_session(&self, settings: &Settings) -> Result<Option<UserRecord>> {
        let Some(user_id) = settings.get_i64(SESSION_USER_KEY) else {
            return Ok(None);
        };
        let expiry_days = settings.session_expiry_days();
        if expiry_days > 0 {
            let started = settings.get_i64(SESSION_STARTED_KEY).unwrap_or(0);
            let now = OffsetDateTime::now_utc().unix_timestamp();
            if now - started > (expiry_days as i64) * 86_400 {
                tracing::debug!(user_id, "persisted session expired");
                return Ok(None);
            }
        }
        // A deactivated account cannot log in, so it cannot resume either.
        match self.storage.fetch_user(user_id)? {
            Some(user) if user.active => Ok(Some(user)),
            _ => Ok(None),
        }
    }
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return false;
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !host.is_empty() && !tld.is_empty() && !email.contains(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigPaths;
    use crate::storage;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn init() -> Result<(TempDir, AuthService, StorageHandle)> {
        let temp = TempDir::new()?;
        let base = temp.path();
        let data_dir = base.join("data");
        let state_dir = base.join("state");
        let paths = ConfigPaths {
            config_dir: base.join("config"),
            config_file: base.join("config/config.json"),
            data_dir: data_dir.clone(),
            database_path: data_dir.join("cardfile.db"),
            log_dir: state_dir.join("logs"),
            state_dir,
        };
        paths.ensure_directories()?;
        let storage = storage::init(&paths)?;
        Ok((temp, AuthService::new(storage.clone()), storage))
    }

    #[test]
    fn signup_rejects_invalid_input() -> Result<()> {
        let (_temp, auth, _storage) = init()?;
        assert_matches!(
            auth.signup("", "ada@example.com", "long enough"),
            Err(AuthError::MissingField("name"))
        );
        assert_matches!(
            auth.signup("Ada", "not-an-email", "long enough"),
            Err(AuthError::InvalidEmail)
        );
        assert_matches!(
            auth.signup("Ada", "ada@example.com", "short"),
            Err(AuthError::PasswordTooShort)
        );
        Ok(())
    }

    #[test]
    fn signup_rejects_duplicate_email() -> Result<()> {
        let (_temp, auth, _storage) = init()?;
        auth.signup("Ada", "ada@example.com", "hunter2hunter2")
            .expect("first signup succeeds");
        assert_matches!(
            auth.signup("Ada Again", "ada@example.com", "hunter2hunter2"),
            Err(AuthError::DuplicateEmail)
        );
        Ok(())
    }

    #[test]
    fn login_round_trip_updates_last_login() -> Result<()> {
        let (_temp, auth, storage) = init()?;
        let created = auth
            .signup("Ada", "ada@example.com", "hunter2hunter2")
            .expect("signup succeeds");
        assert!(created.last_login.is_none());

        let user = auth
            .login("ada@example.com", "hunter2hunter2")
            .expect("login succeeds");
        assert_eq!(user.id, created.id);
        let refreshed = storage.fetch_user(user.id)?.unwrap();
        assert!(refreshed.last_login.is_some());

        assert_matches!(
            auth.login("ada@example.com", "wrong password"),
            Err(AuthError::InvalidCredentials)
        );
        assert_matches!(
            auth.login("nobody@example.com", "hunter2hunter2"),
            Err(AuthError::InvalidCredentials)
        );
        Ok(())
    }

    #[test]
    fn guest_identity_never_authenticates() -> Result<()> {
        let (_temp, auth, _storage) = init()?;
        let guest = auth.guest()?;
        assert_matches!(
            auth.login(&guest.email, ""),
            Err(AuthError::MissingField(_))
        );
        assert_matches!(
            auth.login(&guest.email, "anything"),
            Err(AuthError::InvalidCredentials)
        );
        Ok(())
    }

    #[test]
    fn session_persists_and_expires() -> Result<()> {
        let (temp, auth, _storage) = init()?;
        let user = auth.signup("Ada", "ada@example.com", "hunter2hunter2")?;
        let mut settings = Settings::load_or_init(temp.path().join("config/config.json"))?;

        auth.persist_session(&mut settings, user.id)?;
        let restored = auth.restore_session(&settings)?.expect("session restored");
        assert_eq!(restored.id, user.id);

        // Backdate the session past the expiry window.
        let stale = OffsetDateTime::now_utc().unix_timestamp()
            - (settings.session_expiry_days() as i64 + 1) * 86_400;
        settings.set(SESSION_STARTED_KEY, json!(stale))?;
        assert!(auth.restore_session(&settings)?.is_none());

        auth.clear_session(&mut settings)?;
        assert!(auth.restore_session(&settings)?.is_none());
        Ok(())
    }

    #[test]
    fn deactivated_account_does_not_resume_a_session() -> Result<()> {
        let (temp, auth, storage) = init()?;
        let user = auth.signup("Ada", "ada@example.com", "hunter2hunter2")?;
        let mut settings = Settings::load_or_init(temp.path().join("config/config.json"))?;
        auth.persist_session(&mut settings, user.id)?;

        storage.with_connection(|conn| {
            conn.execute(
                "UPDATE users SET active = 0 WHERE id = ?1",
                rusqlite::params![user.id],
            )?;
            Ok(())
        })?;

        assert!(auth.restore_session(&settings)?.is_none());
        Ok(())
    }
}
