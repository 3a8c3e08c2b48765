use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn apply(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            last_login INTEGER,
            locking_enabled INTEGER,
            locking_auto_lock_seconds INTEGER,
            locking_mask_visible_chars INTEGER,
            locking_password_hash TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cards (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            body TEXT NOT NULL DEFAULT '',
            owner_id INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            locked INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_cards_owner_active ON cards(owner_id, active);

        CREATE TRIGGER IF NOT EXISTS cards_touch_updated AFTER UPDATE OF title, body, active, locked ON cards
        BEGIN
            UPDATE cards SET updated_at = strftime('%s', 'now') WHERE id = new.id;
        END;

        CREATE TRIGGER IF NOT EXISTS users_touch_updated AFTER UPDATE OF name, email, password_hash, active,
            locking_enabled, locking_auto_lock_seconds, locking_mask_visible_chars, locking_password_hash ON users
        BEGIN
            UPDATE users SET updated_at = strftime('%s', 'now') WHERE id = new.id;
        END;
        "#,
    )
    .context("applying schema migrations")?;
    Ok(())
}
