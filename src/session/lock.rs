//! Per-session card lock state. Unlocking never clears the persisted lock
//! flag; it only admits the card for the current session. Auto-relock is a
//! deadline per card, armed while an unlocked card is the active selection
//! and checked from the tick loop.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use anyhow::Result;
use thiserror::Error;

use crate::auth::verify_password;
use crate::config::locking::LockSettings;
use crate::storage::{CardRecord, StorageHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardLockState {
    /// Not locked in storage.
    UnlockedPersistent,
    /// Locked in storage and not admitted this session.
    Locked,
    /// Locked in storage but admitted for this session.
    UnlockedSession,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnlockError {
    #[error("no lock password is configured")]
    NotConfigured,
    #[error("incorrect lock password")]
    WrongPassword,
}

#[derive(Debug)]
pub struct LockSession {
    settings: LockSettings,
    unlocked: HashSet<i64>,
    relock_at: HashMap<i64, Instant>,
}

impl LockSession {
    pub fn new(settings: LockSettings) -> Self {
        Self {
            settings,
            unlocked: HashSet::new(),
            relock_at: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// Swaps in new lock settings. Disabling the feature cancels all armed
    /// relock deadlines; session unlocks survive so already-open cards do
    /// not vanish mid-edit.
    pub fn set_settings(&mut self, settings: LockSettings) {
        if !settings.enabled {
            self.relock_at.clear();
        }
        self.settings = settings;
    }

    pub fn state_of(&self, card: &CardRecord) -> CardLockState {
        if !card.locked {
            CardLockState::UnlockedPersistent
        } else if self.unlocked.contains(&card.id) {
            CardLockState::UnlockedSession
        } else {
            CardLockState::Locked
        }
    }

    /// Whether the card's contents must stay hidden until unlocked.
    pub fn requires_unlock(&self, card: &CardRecord) -> bool {
        self.settings.enabled && self.state_of(card) == CardLockState::Locked
    }

    pub fn is_unlocked(&self, card_id: i64) -> bool {
        self.unlocked.contains(&card_id)
    }

    /// Admits a card for the session after checking the lock password.
    pub fn unlock(&mut self, card_id: i64, password: &str) -> Result<(), UnlockError> {
        if !self.settings.has_password() {
            return Err(UnlockError::NotConfigured);
        }
        if !verify_password(password, &self.settings.password_hash) {
            return Err(UnlockError::WrongPassword);
        }
        self.unlocked.insert(card_id);
        self.relock_at.remove(&card_id);
        tracing::debug!(card_id, "card unlocked for session");
        Ok(())
    }

    /// Locks a card immediately: persists the flag, revokes the session
    /// unlock and cancels any pending relock.
    pub fn lock_now(&mut self, storage: &StorageHandle, card_id: i64) -> Result<()> {
        storage.set_card_locked(card_id, true)?;
        self.unlocked.remove(&card_id);
        self.relock_at.remove(&card_id);
        Ok(())
    }

    /// Arms (or re-arms) the auto-relock deadline when a session-unlocked
    /// card becomes the active selection.
    pub fn note_selected(&mut self, card: &CardRecord) {
        let armed = self.settings.enabled
            && self.settings.auto_lock_seconds > 0
            && self.state_of(card) == CardLockState::UnlockedSession;
        if armed {
            let deadline = Instant::now() + Duration::from_secs(self.settings.auto_lock_seconds);
            self.relock_at.insert(card.id, deadline);
        } else {
            self.relock_at.remove(&card.id);
        }
    }

    /// Cancels a pending relock when the card stops being the active
    /// selection. Safe to call for cards with no deadline armed.
    pub fn note_deselected(&mut self, card_id: i64) {
        self.relock_at.remove(&card_id);
    }

    /// Tick entry point: relocks every card whose deadline has passed and
    /// returns the ids that were actually relocked so the caller can refresh
    /// what it shows. A failed write is logged and not re-attempted; each
    /// deadline gets one attempt.
    pub fn poll(&mut self, storage: &StorageHandle) -> Result<Vec<i64>> {
        let now = Instant::now();
        let due: Vec<i64> = self
            .relock_at
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(id, _)| *id)
            .collect();
        let mut relocked = Vec::with_capacity(due.len());
        for card_id in due {
            self.relock_at.remove(&card_id);
            match storage.set_card_locked(card_id, true) {
                Ok(()) => {
                    self.unlocked.remove(&card_id);
                    tracing::debug!(card_id, "card auto-relocked");
                    relocked.push(card_id);
                }
                Err(err) => {
                    tracing::error!(card_id, %err, "auto-relock failed");
                }
            }
        }
        Ok(relocked)
    }

    /// Session teardown: forgets all unlocks and deadlines.
    pub fn clear(&mut self) {
        self.unlocked.clear();
        self.relock_at.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hash_password;
    use crate::config::ConfigPaths;
    use crate::storage;
    use tempfile::TempDir;

    fn init_storage() -> Result<(TempDir, StorageHandle, i64)> {
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
        let owner = storage.insert_user("Ada", "ada@example.com", "!")?;
        Ok((temp, storage, owner))
    }

    fn settings_with_password(password: &str, auto_lock_seconds: u64) -> LockSettings {
        LockSettings {
            enabled: true,
            auto_lock_seconds,
            mask_visible_chars: 2,
            password_hash: hash_password(password).expect("hashing succeeds"),
        }
    }

    #[test]
    fn unlock_round_trip_checks_the_password() -> Result<()> {
        let (_temp, storage, owner) = init_storage()?;
        let card_id = storage.create_card(owner, "Secret")?;
        storage.set_card_locked(card_id, true)?;
        let card = storage.fetch_card(card_id)?.unwrap();

        let mut locks = LockSession::new(settings_with_password("open sesame", 30));
        assert_eq!(locks.state_of(&card), CardLockState::Locked);
        assert!(locks.requires_unlock(&card));

        assert_eq!(
            locks.unlock(card_id, "wrong"),
            Err(UnlockError::WrongPassword)
        );
        assert_eq!(locks.state_of(&card), CardLockState::Locked);

        locks.unlock(card_id, "open sesame").expect("unlock succeeds");
        assert_eq!(locks.state_of(&card), CardLockState::UnlockedSession);
        assert!(!locks.requires_unlock(&card));
        // The persisted flag is untouched by a session unlock.
        assert!(storage.fetch_card(card_id)?.unwrap().locked);
        Ok(())
    }

    #[test]
    fn unlock_without_a_configured_password_is_rejected() {
        let settings = LockSettings {
            enabled: true,
            auto_lock_seconds: 30,
            mask_visible_chars: 2,
            password_hash: String::new(),
        };
        let mut locks = LockSession::new(settings);
        assert_eq!(locks.unlock(1, "anything"), Err(UnlockError::NotConfigured));
    }

    #[test]
    fn lock_now_persists_and_revokes_the_session_unlock() -> Result<()> {
        let (_temp, storage, owner) = init_storage()?;
        let card_id = storage.create_card(owner, "Secret")?;

        let mut locks = LockSession::new(settings_with_password("open sesame", 30));
        locks.unlock(card_id, "open sesame").expect("unlock succeeds");

        locks.lock_now(&storage, card_id)?;
        assert!(!locks.is_unlocked(card_id));
        assert!(storage.fetch_card(card_id)?.unwrap().locked);
        Ok(())
    }

    #[test]
    fn relock_deadline_fires_on_poll() -> Result<()> {
        let (_temp, storage, owner) = init_storage()?;
        let card_id = storage.create_card(owner, "Secret")?;
        storage.set_card_locked(card_id, true)?;
        let card = storage.fetch_card(card_id)?.unwrap();

        let mut locks = LockSession::new(settings_with_password("open sesame", 30));
        locks.unlock(card_id, "open sesame").expect("unlock succeeds");
        locks.note_selected(&card);
        // Force the deadline into the past instead of sleeping.
        locks.relock_at.insert(card_id, Instant::now());

        let relocked = locks.poll(&storage)?;
        assert_eq!(relocked, vec![card_id]);
        assert!(!locks.is_unlocked(card_id));
        assert_eq!(locks.state_of(&card), CardLockState::Locked);
        Ok(())
    }

    #[test]
    fn relock_failure_still_reports_the_cards_that_locked() -> Result<()> {
        let (_temp, storage, owner) = init_storage()?;
        let good_id = storage.create_card(owner, "Secret")?;
        let gone_id = storage.create_card(owner, "Gone")?;
        storage.set_card_locked(good_id, true)?;
        storage.set_card_locked(gone_id, true)?;
        let good = storage.fetch_card(good_id)?.unwrap();
        let gone = storage.fetch_card(gone_id)?.unwrap();

        let mut locks = LockSession::new(settings_with_password("open sesame", 30));
        locks.unlock(good_id, "open sesame").expect("unlock succeeds");
        locks.unlock(gone_id, "open sesame").expect("unlock succeeds");
        locks.note_selected(&good);
        locks.note_selected(&gone);
        locks.relock_at.insert(good_id, Instant::now());
        locks.relock_at.insert(gone_id, Instant::now());

        // Remove one card so its relock write fails.
        storage.soft_delete_card(gone_id)?;
        storage.permanent_delete_card(gone_id)?;

        let relocked = locks.poll(&storage)?;
        assert_eq!(relocked, vec![good_id]);
        assert!(!locks.is_unlocked(good_id));
        // The spent deadline is not re-attempted on later ticks.
        assert!(locks.relock_at.is_empty());
        assert!(locks.poll(&storage)?.is_empty());
        Ok(())
    }

    #[test]
    fn deselection_cancels_the_relock_deadline() -> Result<()> {
        let (_temp, storage, owner) = init_storage()?;
        let card_id = storage.create_card(owner, "Secret")?;
        storage.set_card_locked(card_id, true)?;
        let card = storage.fetch_card(card_id)?.unwrap();

        let mut locks = LockSession::new(settings_with_password("open sesame", 30));
        locks.unlock(card_id, "open sesame").expect("unlock succeeds");
        locks.note_selected(&card);
        assert!(locks.relock_at.contains_key(&card_id));

        locks.note_deselected(card_id);
        locks.note_deselected(card_id);
        assert!(locks.relock_at.is_empty());
        assert!(locks.poll(&storage)?.is_empty());
        assert!(locks.is_unlocked(card_id));
        Ok(())
    }

    #[test]
    fn auto_lock_of_zero_never_arms_a_deadline() -> Result<()> {
        let (_temp, storage, owner) = init_storage()?;
        let card_id = storage.create_card(owner, "Secret")?;
        storage.set_card_locked(card_id, true)?;
        let card = storage.fetch_card(card_id)?.unwrap();

        let mut locks = LockSession::new(settings_with_password("open sesame", 0));
        locks.unlock(card_id, "open sesame").expect("unlock succeeds");
        locks.note_selected(&card);
        assert!(locks.relock_at.is_empty());
        Ok(())
    }

    #[test]
    fn disabling_the_feature_cancels_deadlines() -> Result<()> {
        let (_temp, storage, owner) = init_storage()?;
        let card_id = storage.create_card(owner, "Secret")?;
        storage.set_card_locked(card_id, true)?;
        let card = storage.fetch_card(card_id)?.unwrap();

        let mut locks = LockSession::new(settings_with_password("open sesame", 30));
        locks.unlock(card_id, "open sesame").expect("unlock succeeds");
        locks.note_selected(&card);

        let mut disabled = locks.settings.clone();
        disabled.enabled = false;
        locks.set_settings(disabled);
        assert!(locks.relock_at.is_empty());
        assert!(locks.is_unlocked(card_id));
        assert!(!locks.requires_unlock(&card));
        Ok(())
    }
}
