use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rusqlite::config::DbConfig;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use time::OffsetDateTime;

use crate::config::ConfigPaths;

mod schema;

pub const GUEST_NAME: &str = "Guest";
pub const GUEST_EMAIL: &str = "guest@cardfile.local";

#[derive(Debug, Clone, Serialize)]
pub struct CardRecord {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub owner_id: i64,
    pub active: bool,
    pub locked: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub active: bool,
    pub last_login: Option<i64>,
    pub lock_overrides: LockOverrides,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Per-user lock settings; `None` fields fall back to the app-wide values.
#[derive(Debug, Clone, Default)]
pub struct LockOverrides {
    pub enabled: Option<bool>,
    pub auto_lock_seconds: Option<u64>,
    pub mask_visible_chars: Option<usize>,
    pub password_hash: Option<String>,
}

#[derive(Clone)]
pub struct StorageHandle {
    db_path: Arc<PathBuf>,
}

impl StorageHandle {
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.db_path)
            .with_context(|| format!("opening database {}", self.db_path.display()))?;
        prepare_connection(&conn)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    // ---- users ----

    pub fn insert_user(&self, name: &str, email: &str, password_hash: &str) -> Result<i64> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() || email.is_empty() {
            bail!("user name and email cannot be empty");
        }
        self.with_connection(|conn| {
            let now = OffsetDateTime::now_utc().unix_timestamp();
            conn.execute(
                "INSERT INTO users (name, email, password_hash, active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?4)",
                params![name, email, password_hash, now],
            )
            .context("inserting user")?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn fetch_user(&self, user_id: i64) -> Result<Option<UserRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&user_select("WHERE id = ?1"))?;
            let result = stmt
                .query_row(params![user_id], user_from_row)
                .optional()?;
            Ok(result)
        })
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&user_select("WHERE email = ?1"))?;
            let result = stmt
                .query_row(params![email.trim()], user_from_row)
                .optional()?;
            Ok(result)
        })
    }

    pub fn touch_last_login(&self, user_id: i64) -> Result<()> {
        self.with_connection(|conn| {
            let now = OffsetDateTime::now_utc().unix_timestamp();
            let updated = conn.execute(
                "UPDATE users SET last_login = ?1 WHERE id = ?2",
                params![now, user_id],
            )?;
            if updated == 0 {
                bail!("user {user_id} not found");
            }
            Ok(())
        })
    }

    pub fn count_users(&self) -> Result<usize> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    /// Fetches the implicit guest account, creating it on first use. The
    /// guest row carries an unusable password hash; it never authenticates.
    pub fn get_or_create_guest(&self) -> Result<UserRecord> {
        if let Some(user) = self.find_user_by_email(GUEST_EMAIL)? {
            return Ok(user);
        }
        self.insert_user(GUEST_NAME, GUEST_EMAIL, "!")?;
        self.find_user_by_email(GUEST_EMAIL)?
            .context("guest user missing after insert")
    }

    pub fn update_user_lock_settings(&self, user_id: i64, overrides: &LockOverrides) -> Result<()> {
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE users SET locking_enabled = ?1,
                                  locking_auto_lock_seconds = ?2,
                                  locking_mask_visible_chars = ?3,
                                  locking_password_hash = ?4
                 WHERE id = ?5",
                params![
                    overrides.enabled.map(|b| b as i64),
                    overrides.auto_lock_seconds.map(|s| s as i64),
                    overrides.mask_visible_chars.map(|c| c as i64),
                    overrides.password_hash,
                    user_id
                ],
            )?;
            if updated == 0 {
                bail!("user {user_id} not found");
            }
            Ok(())
        })
    }

    // ---- cards ----

    pub fn create_card(&self, owner_id: i64, title: &str) -> Result<i64> {
        let trimmed = title.trim();
        if trimmed.is_empty() {
            bail!("card title cannot be empty");
        }
        self.with_connection(|conn| {
            let now = OffsetDateTime::now_utc().unix_timestamp();
            conn.execute(
                "INSERT INTO cards (title, body, owner_id, active, locked, created_at, updated_at)
                 VALUES (?1, '', ?2, 1, 0, ?3, ?3)",
                params![trimmed, owner_id, now],
            )
            .context("inserting card")?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn fetch_card(&self, card_id: i64) -> Result<Option<CardRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&card_select("WHERE id = ?1"))?;
            let result = stmt.query_row(params![card_id], card_from_row).optional()?;
            Ok(result)
        })
    }

    /// Active cards for one owner, newest first. `filter` narrows by a
    /// case-insensitive substring match on title or body.
    pub fn list_active_cards(&self, owner_id: i64, filter: Option<&str>) -> Result<Vec<CardRecord>> {
        self.with_connection(|conn| {
            let records = match filter.map(str::trim).filter(|f| !f.is_empty()) {
                Some(needle) => {
                    let pattern = format!("%{}%", like_escape(needle));
                    let mut stmt = conn.prepare(&card_select(
                        "WHERE owner_id = ?1 AND active = 1
                           AND (title LIKE ?2 ESCAPE '\\' OR body LIKE ?2 ESCAPE '\\')
                         ORDER BY updated_at DESC",
                    ))?;
                    let rows = stmt
                        .query_map(params![owner_id, pattern], card_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(&card_select(
                        "WHERE owner_id = ?1 AND active = 1 ORDER BY updated_at DESC",
                    ))?;
                    let rows = stmt
                        .query_map(params![owner_id], card_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    rows
                }
            };
            Ok(records)
        })
    }

    pub fn list_trashed_cards(&self, owner_id: i64) -> Result<Vec<CardRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&card_select(
                "WHERE owner_id = ?1 AND active = 0 ORDER BY updated_at DESC",
            ))?;
            let records = stmt
                .query_map(params![owner_id], card_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }

    pub fn update_card_body(&self, card_id: i64, body: &str) -> Result<()> {
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE cards SET body = ?1 WHERE id = ?2 AND active = 1",
                params![body, card_id],
            )?;
            if updated == 0 {
                bail!("card {card_id} not found");
            }
            Ok(())
        })
    }

    pub fn rename_card_title(&self, card_id: i64, title: &str) -> Result<()> {
        let trimmed = title.trim();
        if trimmed.is_empty() {
            bail!("card title cannot be empty");
        }
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE cards SET title = ?1 WHERE id = ?2 AND active = 1",
                params![trimmed, card_id],
            )?;
            if updated == 0 {
                bail!("card {card_id} not found");
            }
            Ok(())
        })
    }

    pub fn set_card_locked(&self, card_id: i64, locked: bool) -> Result<()> {
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE cards SET locked = ?1 WHERE id = ?2",
                params![locked as i64, card_id],
            )?;
            if updated == 0 {
                bail!("card {card_id} not found");
            }
            Ok(())
        })
    }

    pub fn soft_delete_card(&self, card_id: i64) -> Result<()> {
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE cards SET active = 0 WHERE id = ?1 AND active = 1",
                params![card_id],
            )?;
            if updated == 0 {
                bail!("card {card_id} not found");
            }
            Ok(())
        })
    }

    pub fn restore_card(&self, card_id: i64) -> Result<()> {
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE cards SET active = 1 WHERE id = ?1 AND active = 0",
                params![card_id],
            )?;
            if updated == 0 {
                bail!("card {card_id} not found in trash");
            }
            Ok(())
        })
    }

    pub fn permanent_delete_card(&self, card_id: i64) -> Result<()> {
        self.with_connection(|conn| {
            let deleted = conn.execute(
                "DELETE FROM cards WHERE id = ?1 AND active = 0",
                params![card_id],
            )?;
            if deleted == 0 {
                bail!("card {card_id} not found in trash");
            }
            Ok(())
        })
    }

    pub fn empty_trash(&self, owner_id: i64) -> Result<usize> {
        self.with_connection(|conn| {
            let count = conn.execute(
                "DELETE FROM cards WHERE owner_id = ?1 AND active = 0",
                params![owner_id],
            )?;
            Ok(count)
        })
    }
}

fn user_select(clause: &str) -> String {
    format!(
        "SELECT id, name, email, password_hash, active, last_login,
                locking_enabled, locking_auto_lock_seconds, locking_mask_visible_chars, locking_password_hash,
                created_at, updated_at
         FROM users {clause}"
    )
}

fn card_select(clause: &str) -> String {
    format!(
        "SELECT id, title, body, owner_id, active, locked, created_at, updated_at
         FROM cards {clause}"
    )
}

fn card_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CardRecord> {
    Ok(CardRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        owner_id: row.get(3)?,
        active: row.get::<_, i64>(4)? != 0,
        locked: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        active: row.get::<_, i64>(4)? != 0,
        last_login: row.get(5)?,
        lock_overrides: LockOverrides {
            enabled: row.get::<_, Option<i64>>(6)?.map(|v| v != 0),
            auto_lock_seconds: row.get::<_, Option<i64>>(7)?.map(|v| v.max(0) as u64),
            mask_visible_chars: row.get::<_, Option<i64>>(8)?.map(|v| v.max(0) as usize),
            password_hash: row.get(9)?,
        },
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn like_escape(needle: &str) -> String {
    needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub fn init(paths: &ConfigPaths) -> Result<StorageHandle> {
    let db_path = &paths.database_path;
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let existed = db_path.exists();
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    prepare_connection(&conn)?;
    schema::apply(&conn)?;
    if !existed {
        tracing::info!(path = %db_path.display(), "initialised new card database");
    }
    Ok(StorageHandle {
        db_path: Arc::new(db_path.clone()),
    })
}

fn prepare_connection(conn: &Connection) -> Result<()> {
    conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_FKEY, true)
        .context("enabling foreign keys")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigPaths;
    use tempfile::TempDir;

    fn temp_paths(root: &TempDir) -> ConfigPaths {
        let base = root.path();
        let config_dir = base.join("config");
        let data_dir = base.join("data");
        let state_dir = base.join("state");
        ConfigPaths {
            config_dir: config_dir.clone(),
            config_file: config_dir.join("config.json"),
            data_dir: data_dir.clone(),
            database_path: data_dir.join("cardfile.db"),
            log_dir: state_dir.join("logs"),
            state_dir,
        }
    }

    fn init_storage() -> anyhow::Result<(TempDir, StorageHandle, i64)> {
        let temp = TempDir::new()?;
        let paths = temp_paths(&temp);
        paths.ensure_directories()?;
        let storage = init(&paths)?;
        let owner = storage.insert_user("Ada", "ada@example.com", "!")?;
        Ok((temp, storage, owner))
    }

    #[test]
    fn soft_delete_and_restore_round_trip() -> anyhow::Result<()> {
        let (_temp, storage, owner) = init_storage()?;
        let card_id = storage.create_card(owner, "Groceries")?;

        storage.soft_delete_card(card_id)?;
        let active = storage.list_active_cards(owner, None)?;
        assert!(active.iter().all(|card| card.id != card_id));
        let trashed = storage.list_trashed_cards(owner)?;
        assert!(trashed.iter().any(|card| card.id == card_id));

        storage.restore_card(card_id)?;
        let active = storage.list_active_cards(owner, None)?;
        assert!(active.iter().any(|card| card.id == card_id));
        assert!(storage.list_trashed_cards(owner)?.is_empty());
        Ok(())
    }

    #[test]
    fn permanent_delete_removes_card_from_both_listings() -> anyhow::Result<()> {
        let (_temp, storage, owner) = init_storage()?;
        let card_id = storage.create_card(owner, "Disposable")?;
        storage.soft_delete_card(card_id)?;
        storage.permanent_delete_card(card_id)?;

        assert!(storage.list_active_cards(owner, None)?.is_empty());
        assert!(storage.list_trashed_cards(owner)?.is_empty());
        assert!(storage.fetch_card(card_id)?.is_none());
        Ok(())
    }

    #[test]
    fn permanent_delete_refuses_active_cards() -> anyhow::Result<()> {
        let (_temp, storage, owner) = init_storage()?;
        let card_id = storage.create_card(owner, "Still here")?;
        assert!(storage.permanent_delete_card(card_id).is_err());
        assert!(storage.fetch_card(card_id)?.is_some());
        Ok(())
    }

    #[test]
    fn empty_trash_only_touches_owners_inactive_cards() -> anyhow::Result<()> {
        let (_temp, storage, owner) = init_storage()?;
        let other = storage.insert_user("Brin", "brin@example.com", "!")?;
        let kept = storage.create_card(owner, "Kept")?;
        let trashed = storage.create_card(owner, "Trashed")?;
        let foreign = storage.create_card(other, "Foreign trash")?;
        storage.soft_delete_card(trashed)?;
        storage.soft_delete_card(foreign)?;

        let purged = storage.empty_trash(owner)?;
        assert_eq!(purged, 1);
        assert!(storage.fetch_card(kept)?.is_some());
        assert!(storage.fetch_card(trashed)?.is_none());
        assert!(storage.fetch_card(foreign)?.is_some());
        Ok(())
    }

    #[test]
    fn body_updates_are_rejected_for_trashed_cards() -> anyhow::Result<()> {
        let (_temp, storage, owner) = init_storage()?;
        let card_id = storage.create_card(owner, "Locked out")?;
        storage.soft_delete_card(card_id)?;
        assert!(storage.update_card_body(card_id, "new body").is_err());
        Ok(())
    }

    #[test]
    fn search_matches_title_or_body_scoped_to_owner() -> anyhow::Result<()> {
        let (_temp, storage, owner) = init_storage()?;
        let other = storage.insert_user("Brin", "brin@example.com", "!")?;
        let by_title = storage.create_card(owner, "Nimbus plan")?;
        let by_body = storage.create_card(owner, "Weekly")?;
        storage.update_card_body(by_body, "discuss nimbus rollout")?;
        storage.create_card(other, "Nimbus foreign")?;

        let hits = storage.list_active_cards(owner, Some("nimbus"))?;
        let ids: Vec<i64> = hits.iter().map(|card| card.id).collect();
        assert!(ids.contains(&by_title));
        assert!(ids.contains(&by_body));
        assert_eq!(ids.len(), 2);
        Ok(())
    }

    #[test]
    fn guest_user_is_created_once() -> anyhow::Result<()> {
        let (_temp, storage, _owner) = init_storage()?;
        let first = storage.get_or_create_guest()?;
        let second = storage.get_or_create_guest()?;
        assert_eq!(first.id, second.id);
        assert_eq!(first.email, GUEST_EMAIL);
        Ok(())
    }

    #[test]
    fn lock_flag_round_trips_through_storage() -> anyhow::Result<()> {
        let (_temp, storage, owner) = init_storage()?;
        let card_id = storage.create_card(owner, "Secrets")?;
        storage.set_card_locked(card_id, true)?;
        assert!(storage.fetch_card(card_id)?.unwrap().locked);
        storage.set_card_locked(card_id, false)?;
        assert!(!storage.fetch_card(card_id)?.unwrap().locked);
        Ok(())
    }

    #[test]
    fn user_lock_overrides_persist() -> anyhow::Result<()> {
        let (_temp, storage, owner) = init_storage()?;
        let overrides = LockOverrides {
            enabled: Some(true),
            auto_lock_seconds: Some(45),
            mask_visible_chars: Some(3),
            password_hash: Some("$argon2id$stub".into()),
        };
        storage.update_user_lock_settings(owner, &overrides)?;
        let user = storage.fetch_user(owner)?.unwrap();
        assert_eq!(user.lock_overrides.enabled, Some(true));
        assert_eq!(user.lock_overrides.auto_lock_seconds, Some(45));
        assert_eq!(user.lock_overrides.mask_visible_chars, Some(3));
        assert_eq!(user.lock_overrides.password_hash.as_deref(), Some("$argon2id$stub"));
        Ok(())
    }
}
