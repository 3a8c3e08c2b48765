use crate::config::Settings;
use crate::storage::UserRecord;

pub const MASK_CHAR: char = '\u{2022}';

/// Effective lock configuration for one session: the app-wide defaults from
/// the settings document, optionally overridden per user.
#[derive(Debug, Clone, Default)]
pub struct LockSettings {
    pub enabled: bool,
    pub auto_lock_seconds: u64,
    pub mask_visible_chars: usize,
    pub password_hash: String,
}

impl LockSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            enabled: settings.get_bool("app.locking.enabled", false),
            auto_lock_seconds: settings.get_u64("app.locking.auto_lock_seconds", 30),
            mask_visible_chars: settings.get_u64("app.locking.mask_visible_chars", 5) as usize,
            password_hash: settings.get_str("app.locking.password_hash", ""),
        }
    }

    pub fn for_user(settings: &Settings, user: Option<&UserRecord>) -> Self {
        let mut effective = Self::from_settings(settings);
        let Some(user) = user else {
            return effective;
        };
        let overrides = &user.lock_overrides;
        if let Some(enabled) = overrides.enabled {
            effective.enabled = enabled;
        }
        if let Some(seconds) = overrides.auto_lock_seconds {
            effective.auto_lock_seconds = seconds;
        }
        if let Some(chars) = overrides.mask_visible_chars {
            effective.mask_visible_chars = chars;
        }
        if let Some(hash) = &overrides.password_hash {
            effective.password_hash = hash.clone();
        }
        effective
    }

    pub fn has_password(&self) -> bool {
        !self.password_hash.is_empty()
    }
}

/// Masks a title, keeping the first `visible` characters and replacing the
/// rest one-for-one. `visible` clamps to the title length.
pub fn mask_title(title: &str, visible: usize) -> String {
    let total = title.chars().count();
    if total <= visible {
        return title.to_string();
    }
    let mut masked: String = title.chars().take(visible).collect();
    masked.extend(std::iter::repeat(MASK_CHAR).take(total - visible));
    masked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LockOverrides;
    use tempfile::TempDir;

    #[test]
    fn mask_title_replaces_everything_when_nothing_is_visible() {
        assert_eq!(mask_title("abcdef", 0), "\u{2022}".repeat(6));
    }

    #[test]
    fn mask_title_keeps_short_titles_intact() {
        assert_eq!(mask_title("abc", 5), "abc");
        assert_eq!(mask_title("", 3), "");
    }

    #[test]
    fn mask_title_clamps_to_length() {
        assert_eq!(mask_title("abcdef", 5), format!("abcde{}", MASK_CHAR));
    }

    #[test]
    fn mask_title_counts_characters_not_bytes() {
        assert_eq!(mask_title("café", 3), format!("caf{}", MASK_CHAR));
    }

    #[test]
    fn user_overrides_replace_app_defaults() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut settings = Settings::load_or_init(temp.path().join("config.json"))?;
        settings.set("app.locking.enabled", serde_json::json!(true))?;
        settings.set("app.locking.auto_lock_seconds", serde_json::json!(30))?;

        let mut user = UserRecord {
            id: 1,
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password_hash: "!".into(),
            active: true,
            last_login: None,
            lock_overrides: LockOverrides::default(),
            created_at: 0,
            updated_at: 0,
        };
        user.lock_overrides.auto_lock_seconds = Some(120);
        user.lock_overrides.mask_visible_chars = Some(2);

        let effective = LockSettings::for_user(&settings, Some(&user));
        assert!(effective.enabled);
        assert_eq!(effective.auto_lock_seconds, 120);
        assert_eq!(effective.mask_visible_chars, 2);
        Ok(())
    }
}
