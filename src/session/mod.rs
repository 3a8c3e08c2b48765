//! Editing-session state machine: selection, dirty tracking, debounce and
//! periodic autosave. All timers are deadlines checked from the cooperative
//! tick loop, so saves from the debounce and periodic paths can never
//! overlap and cancellation is just clearing a deadline.

use std::time::{Duration, Instant};

use anyhow::Result;
use time::OffsetDateTime;

use crate::storage::{CardRecord, StorageHandle};

pub mod lock;

pub use lock::{CardLockState, LockSession, UnlockError};

#[derive(Debug, Clone, Copy)]
pub struct SaveTimers {
    pub debounce: Duration,
    pub periodic: Duration,
}

impl Default for SaveTimers {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1500),
            periodic: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SaveEvent {
    Saved {
        card_id: i64,
        timestamp: OffsetDateTime,
    },
    Error {
        card_id: i64,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub enum SaveStatus {
    Inactive,
    Idle {
        card_id: i64,
        last_saved_at: Option<OffsetDateTime>,
    },
    Pending {
        card_id: i64,
    },
    Error {
        card_id: i64,
        message: String,
    },
}

#[derive(Debug)]
pub struct EditSession {
    timers: SaveTimers,
    active: Option<ActiveEdit>,
}

#[derive(Debug)]
struct ActiveEdit {
    card_id: i64,
    buffer: String,
    last_saved: String,
    dirty: bool,
    debounce_deadline: Option<Instant>,
    next_periodic: Instant,
    last_saved_at: Option<OffsetDateTime>,
    last_error: Option<String>,
}

impl ActiveEdit {
    fn new(card_id: i64, body: String, periodic: Duration) -> Self {
        Self {
            card_id,
            last_saved: body.clone(),
            buffer: body,
            dirty: false,
            debounce_deadline: None,
            next_periodic: Instant::now() + periodic,
            last_saved_at: None,
            last_error: None,
        }
    }
}

impl EditSession {
    pub fn new(timers: SaveTimers) -> Self {
        Self {
            timers,
            active: None,
        }
    }

    pub fn card_id(&self) -> Option<i64> {
        self.active.as_ref().map(|edit| edit.card_id)
    }

    pub fn buffer(&self) -> Option<&str> {
        self.active.as_ref().map(|edit| edit.buffer.as_str())
    }

    pub fn is_dirty(&self) -> bool {
        self.active.as_ref().map(|edit| edit.dirty).unwrap_or(false)
    }

    pub fn status(&self) -> SaveStatus {
        let Some(edit) = &self.active else {
            return SaveStatus::Inactive;
        };
        if let Some(message) = &edit.last_error {
            return SaveStatus::Error {
                card_id: edit.card_id,
                message: message.clone(),
            };
        }
        if edit.dirty {
            return SaveStatus::Pending {
                card_id: edit.card_id,
            };
        }
        SaveStatus::Idle {
            card_id: edit.card_id,
            last_saved_at: edit.last_saved_at,
        }
    }

    /// Makes `card` the open card. Any pending edits for the previously
    /// selected card are flushed synchronously first, so switching away
    /// never discards changes. The new card's body must come fresh from
    /// storage, not from a cached summary.
    pub fn select(&mut self, storage: &StorageHandle, card: &CardRecord) -> Result<Option<SaveEvent>> {
        let flushed = self.flush_now(storage)?;
        self.active = Some(ActiveEdit::new(
            card.id,
            card.body.clone(),
            self.timers.periodic,
        ));
        Ok(flushed)
    }

    /// Ends the session, flushing dirty state first. All deadlines die with
    /// the session; cancelling them again later is naturally a no-op.
    pub fn close(&mut self, storage: &StorageHandle) -> Result<Option<SaveEvent>> {
        let flushed = self.flush_now(storage)?;
        self.active = None;
        Ok(flushed)
    }

    /// Records an edit to the open card: marks the session dirty and
    /// restarts the debounce deadline, replacing any pending one.
    pub fn on_edit(&mut self, card_id: i64, contents: &str) {
        let Some(edit) = self.active.as_mut() else {
            return;
        };
        if edit.card_id != card_id || edit.buffer == contents {
            return;
        }
        edit.buffer.clear();
        edit.buffer.push_str(contents);
        edit.dirty = true;
        edit.debounce_deadline = Some(Instant::now() + self.timers.debounce);
        edit.last_error = None;
    }

    /// Tick entry point: fires the debounce save once its deadline passes,
    /// and the periodic save on its own cadence regardless of debounce
    /// state. Both funnel into the same idempotent save.
    pub fn poll(&mut self, storage: &StorageHandle) -> Result<Option<SaveEvent>> {
        let now = Instant::now();
        let due = {
            let Some(edit) = self.active.as_mut() else {
                return Ok(None);
            };
            let debounce_due = edit
                .debounce_deadline
                .map(|deadline| now >= deadline)
                .unwrap_or(false);
            let periodic_due = now >= edit.next_periodic;
            if periodic_due {
                edit.next_periodic = now + self.timers.periodic;
            }
            debounce_due || periodic_due
        };
        if !due {
            return Ok(None);
        }
        self.save_if_needed(storage)
    }

    /// Immediate save path for the explicit shortcut, selection changes and
    /// teardown.
    pub fn flush_now(&mut self, storage: &StorageHandle) -> Result<Option<SaveEvent>> {
        self.save_if_needed(storage)
    }

    /// The single write path. A no-op when nothing is selected or the buffer
    /// already matches what storage holds, which makes back-to-back calls
    /// idempotent.
    fn save_if_needed(&mut self, storage: &StorageHandle) -> Result<Option<SaveEvent>> {
        let Some(edit) = self.active.as_mut() else {
            return Ok(None);
        };
        if !edit.dirty && edit.buffer == edit.last_saved {
            return Ok(None);
        }
        // One attempt per deadline. A failed save stays dirty but is only
        // re-attempted by the periodic timer or a new edit, never by the
        // same expired debounce deadline on the next tick.
        edit.debounce_deadline = None;
        let timestamp = OffsetDateTime::now_utc();
        match storage.update_card_body(edit.card_id, &edit.buffer) {
            Ok(()) => {
                edit.last_saved = edit.buffer.clone();
                edit.dirty = false;
                edit.last_saved_at = Some(timestamp);
                edit.last_error = None;
                Ok(Some(SaveEvent::Saved {
                    card_id: edit.card_id,
                    timestamp,
                }))
            }
            Err(err) => {
                let message = err.to_string();
                tracing::error!(card_id = edit.card_id, %message, "card save failed");
                edit.last_error = Some(message.clone());
                Ok(Some(SaveEvent::Error {
                    card_id: edit.card_id,
                    message,
                }))
            }
        }
    }
}
