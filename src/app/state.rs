use anyhow::Result;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::locking::mask_title;
use crate::session::{CardLockState, LockSession, SaveStatus};
use crate::storage::{CardRecord, StorageHandle, UserRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Setup,
    Login,
    Signup,
    Cards,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    List,
    Editor,
}

/// One row of the card list. `display_title` carries the masked form for
/// locked cards; the raw title never reaches the list while masked.
#[derive(Debug, Clone)]
pub struct CardSummary {
    pub id: i64,
    pub title: String,
    pub display_title: String,
    pub updated_label: String,
    pub locked: bool,
    pub unlocked_session: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SearchState {
    pub active: bool,
    pub query: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewCardOverlay {
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct RenameCardOverlay {
    pub card_id: i64,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct DeleteCardOverlay {
    pub card_id: i64,
    pub title: String,
    /// Permanent removal instead of moving to the recycle view.
    pub purge: bool,
}

#[derive(Debug, Clone)]
pub struct UnlockOverlay {
    pub card_id: i64,
    pub input: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EmptyTrashOverlay;

#[derive(Debug, Clone)]
pub enum OverlayState {
    NewCard(NewCardOverlay),
    RenameCard(RenameCardOverlay),
    DeleteCard(DeleteCardOverlay),
    Unlock(UnlockOverlay),
    EmptyTrash(EmptyTrashOverlay),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormFocus {
    Name,
    Email,
    Password,
    Confirm,
}

/// Shared input state for the login, signup and setup screens. Login uses
/// the email and password fields only.
#[derive(Debug, Clone)]
pub struct AccountForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm: String,
    pub focus: FormFocus,
    pub error: Option<String>,
}

impl Default for AccountForm {
    fn default() -> Self {
        Self {
            name: String::new(),
            email: String::new(),
            password: String::new(),
            confirm: String::new(),
            focus: FormFocus::Email,
            error: None,
        }
    }
}

impl AccountForm {
    pub fn for_signup() -> Self {
        Self {
            focus: FormFocus::Name,
            ..Self::default()
        }
    }

    fn fields(full: bool) -> &'static [FormFocus] {
        if full {
            &[
                FormFocus::Name,
                FormFocus::Email,
                FormFocus::Password,
                FormFocus::Confirm,
            ]
        } else {
            &[FormFocus::Email, FormFocus::Password]
        }
    }

    pub fn focus_next(&mut self, full: bool) {
        let fields = Self::fields(full);
        let idx = fields.iter().position(|f| *f == self.focus).unwrap_or(0);
        self.focus = fields[(idx + 1) % fields.len()];
    }

    pub fn focus_prev(&mut self, full: bool) {
        let fields = Self::fields(full);
        let idx = fields.iter().position(|f| *f == self.focus).unwrap_or(0);
        self.focus = fields[(idx + fields.len() - 1) % fields.len()];
    }

    pub fn focused_value_mut(&mut self) -> &mut String {
        match self.focus {
            FormFocus::Name => &mut self.name,
            FormFocus::Email => &mut self.email,
            FormFocus::Password => &mut self.password,
            FormFocus::Confirm => &mut self.confirm,
        }
    }

    pub fn push_char(&mut self, ch: char) {
        let value = self.focused_value_mut();
        if value.len() < 120 {
            value.push(ch);
        }
        self.error = None;
    }

    pub fn pop_char(&mut self) {
        self.focused_value_mut().pop();
        self.error = None;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Cursor-based editor over the open card's body. Byte offsets internally,
/// grapheme boundaries for every cursor movement.
#[derive(Debug, Clone)]
pub struct EditorState {
    card_id: i64,
    pub buffer: String,
    pub cursor: usize,
    preferred_column: Option<usize>,
}

impl EditorState {
    pub fn new(card_id: i64, buffer: String) -> Self {
        let cursor = buffer.len();
        Self {
            card_id,
            buffer,
            cursor,
            preferred_column: None,
        }
    }

    pub fn card_id(&self) -> i64 {
        self.card_id
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn insert_char(&mut self, ch: char) -> bool {
        let mut scratch = [0u8; 4];
        let encoded = ch.encode_utf8(&mut scratch);
        self.buffer.insert_str(self.cursor, encoded);
        self.cursor += encoded.len();
        self.preferred_column = None;
        true
    }

    pub fn insert_newline(&mut self) -> bool {
        self.buffer.insert(self.cursor, '\n');
        self.cursor += 1;
        self.preferred_column = Some(0);
        true
    }

    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let prev = prev_grapheme_boundary(&self.buffer, self.cursor);
        self.buffer.drain(prev..self.cursor);
        self.cursor = prev;
        self.preferred_column = None;
        true
    }

    pub fn delete(&mut self) -> bool {
        if self.cursor >= self.buffer.len() {
            return false;
        }
        let next = next_grapheme_boundary(&self.buffer, self.cursor);
        if next == self.cursor {
            return false;
        }
        self.buffer.drain(self.cursor..next);
        self.preferred_column = None;
        true
    }

    pub fn move_left(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor = prev_grapheme_boundary(&self.buffer, self.cursor);
        self.preferred_column = None;
        true
    }

    pub fn move_right(&mut self) -> bool {
        if self.cursor >= self.buffer.len() {
            return false;
        }
        let next = next_grapheme_boundary(&self.buffer, self.cursor);
        if next == self.cursor {
            return false;
        }
        self.cursor = next;
        self.preferred_column = None;
        true
    }

    pub fn move_home(&mut self) -> bool {
        let start = line_start(&self.buffer, self.cursor);
        if self.cursor == start {
            return false;
        }
        self.cursor = start;
        self.preferred_column = Some(0);
        true
    }

    pub fn move_end(&mut self) -> bool {
        let end = line_end(&self.buffer, self.cursor);
        if self.cursor == end {
            return false;
        }
        self.cursor = end;
        self.preferred_column = None;
        true
    }

    pub fn move_up(&mut self) -> bool {
        let current_start = line_start(&self.buffer, self.cursor);
        let column = self
            .preferred_column
            .unwrap_or_else(|| column_at(&self.buffer, current_start, self.cursor));
        if current_start == 0 {
            if self.cursor == 0 {
                return false;
            }
            self.cursor = 0;
            self.preferred_column = Some(column);
            return true;
        }
        let prev_end = current_start.saturating_sub(1);
        let prev_start = line_start(&self.buffer, prev_end);
        let target = position_for_column(&self.buffer, prev_start, column);
        if self.cursor == target {
            return false;
        }
        self.cursor = target;
        self.preferred_column = Some(column);
        true
    }

    pub fn move_down(&mut self) -> bool {
        let current_start = line_start(&self.buffer, self.cursor);
        let column = self
            .preferred_column
            .unwrap_or_else(|| column_at(&self.buffer, current_start, self.cursor));
        let current_end = line_end(&self.buffer, self.cursor);
        if current_end == self.buffer.len() {
            if self.cursor == self.buffer.len() {
                return false;
            }
            self.cursor = self.buffer.len();
            self.preferred_column = Some(column);
            return true;
        }
        let next_start = current_end + 1;
        let target = position_for_column(&self.buffer, next_start, column);
        if self.cursor == target {
            return false;
        }
        self.cursor = target;
        self.preferred_column = Some(column);
        true
    }
}

#[derive(Debug)]
pub struct AppState {
    pub screen: Screen,
    pub user: Option<UserRecord>,
    pub focus: FocusPane,
    pub show_trash: bool,
    pub selected: usize,
    pub cards: Vec<CardSummary>,
    pub search: SearchState,
    pub status_message: Option<String>,
    pub overlay: Option<OverlayState>,
    pub editor: Option<EditorState>,
    /// Body shown in the reading pane while not editing. `None` for locked
    /// cards and empty selections.
    pub preview: Option<String>,
    pub save_status: SaveStatus,
    pub form: AccountForm,
}

impl AppState {
    pub fn new(screen: Screen) -> Self {
        let form = if matches!(screen, Screen::Setup | Screen::Signup) {
            AccountForm::for_signup()
        } else {
            AccountForm::default()
        };
        Self {
            screen,
            user: None,
            focus: FocusPane::List,
            show_trash: false,
            selected: 0,
            cards: Vec::new(),
            search: SearchState::default(),
            status_message: None,
            overlay: None,
            editor: None,
            preview: None,
            save_status: SaveStatus::Inactive,
            form,
        }
    }

    pub fn switch_screen(&mut self, screen: Screen) {
        self.screen = screen;
        self.form = if matches!(screen, Screen::Setup | Screen::Signup) {
            AccountForm::for_signup()
        } else {
            AccountForm::default()
        };
        self.overlay = None;
        self.status_message = None;
    }

    pub fn owner_id(&self) -> Option<i64> {
        self.user.as_ref().map(|user| user.id)
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn selected(&self) -> Option<&CardSummary> {
        self.cards.get(self.selected)
    }

    pub fn selected_card_id(&self) -> Option<i64> {
        self.selected().map(|card| card.id)
    }

    pub fn select_card_by_id(&mut self, card_id: i64) {
        if let Some(idx) = self.cards.iter().position(|card| card.id == card_id) {
            self.selected = idx;
        } else {
            self.normalize_selection();
        }
    }

    pub fn move_selection(&mut self, delta: isize) {
        if self.cards.is_empty() {
            return;
        }
        let len = self.cards.len() as isize;
        let next = (self.selected as isize + delta).clamp(0, len - 1);
        self.selected = next as usize;
    }

    /// Reloads the card list for the current view, applying the search query
    /// and masking locked titles.
    pub fn refresh(&mut self, storage: &StorageHandle, locks: &LockSession) -> Result<()> {
        let Some(owner_id) = self.owner_id() else {
            self.cards.clear();
            self.selected = 0;
            return Ok(());
        };
        let query = self.search.query.trim();
        let filter = if query.is_empty() { None } else { Some(query) };
        let records = if self.show_trash {
            storage.list_trashed_cards(owner_id)?
        } else {
            storage.list_active_cards(owner_id, filter)?
        };
        self.cards = records
            .into_iter()
            .map(|record| summarize_card(record, locks))
            .collect();
        self.normalize_selection();
        Ok(())
    }

    pub fn set_trash_view(
        &mut self,
        enabled: bool,
        storage: &StorageHandle,
        locks: &LockSession,
    ) -> Result<()> {
        if self.show_trash == enabled {
            return Ok(());
        }
        self.show_trash = enabled;
        self.selected = 0;
        self.refresh(storage, locks)
    }

    pub fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            FocusPane::List => FocusPane::Editor,
            FocusPane::Editor => FocusPane::List,
        };
    }

    pub fn editor(&self) -> Option<&EditorState> {
        self.editor.as_ref()
    }

    pub fn editor_mut(&mut self) -> Option<&mut EditorState> {
        self.editor.as_mut()
    }

    pub fn is_editing(&self) -> bool {
        self.editor.is_some()
    }

    pub fn begin_editor(&mut self, card_id: i64, body: String) {
        self.editor = Some(EditorState::new(card_id, body));
    }

    pub fn close_editor(&mut self) {
        self.editor = None;
        self.focus = FocusPane::List;
    }

    pub fn set_save_status(&mut self, status: SaveStatus) {
        self.save_status = status;
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: Option<S>) {
        self.status_message = message.map(Into::into);
    }

    pub fn begin_search(&mut self) {
        self.search.active = true;
        self.focus = FocusPane::List;
    }

    pub fn is_search_active(&self) -> bool {
        self.search.active
    }

    pub fn finish_search(&mut self) {
        self.search.active = false;
    }

    pub fn cancel_search(&mut self, storage: &StorageHandle, locks: &LockSession) -> Result<()> {
        if !self.search.active && self.search.query.is_empty() {
            return Ok(());
        }
        self.search.active = false;
        self.search.query.clear();
        self.refresh(storage, locks)
    }

    pub fn push_search_char(
        &mut self,
        storage: &StorageHandle,
        locks: &LockSession,
        ch: char,
    ) -> Result<()> {
        self.search.query.push(ch);
        self.selected = 0;
        self.refresh(storage, locks)
    }

    pub fn pop_search_char(&mut self, storage: &StorageHandle, locks: &LockSession) -> Result<()> {
        if self.search.query.pop().is_some() {
            self.refresh(storage, locks)?;
        }
        Ok(())
    }

    pub fn overlay(&self) -> Option<&OverlayState> {
        self.overlay.as_ref()
    }

    pub fn overlay_mut(&mut self) -> Option<&mut OverlayState> {
        self.overlay.as_mut()
    }

    pub fn close_overlay(&mut self) {
        self.overlay = None;
    }

    pub fn open_new_card(&mut self) {
        self.overlay = Some(OverlayState::NewCard(NewCardOverlay::default()));
    }

    pub fn open_rename_card(&mut self) {
        if let Some(card) = self.selected() {
            self.overlay = Some(OverlayState::RenameCard(RenameCardOverlay {
                card_id: card.id,
                title: card.title.clone(),
            }));
        }
    }

    pub fn open_delete_card(&mut self, purge: bool) {
        if let Some(card) = self.selected() {
            self.overlay = Some(OverlayState::DeleteCard(DeleteCardOverlay {
                card_id: card.id,
                title: card.display_title.clone(),
                purge,
            }));
        }
    }

    pub fn open_unlock(&mut self, card_id: i64) {
        self.overlay = Some(OverlayState::Unlock(UnlockOverlay {
            card_id,
            input: String::new(),
            error: None,
        }));
    }

    pub fn open_empty_trash(&mut self) {
        self.overlay = Some(OverlayState::EmptyTrash(EmptyTrashOverlay));
    }

    pub fn new_card_overlay_mut(&mut self) -> Option<&mut NewCardOverlay> {
        match self.overlay_mut() {
            Some(OverlayState::NewCard(overlay)) => Some(overlay),
            _ => None,
        }
    }

    pub fn rename_card_overlay_mut(&mut self) -> Option<&mut RenameCardOverlay> {
        match self.overlay_mut() {
            Some(OverlayState::RenameCard(overlay)) => Some(overlay),
            _ => None,
        }
    }

    pub fn delete_card_overlay(&self) -> Option<&DeleteCardOverlay> {
        match self.overlay() {
            Some(OverlayState::DeleteCard(overlay)) => Some(overlay),
            _ => None,
        }
    }

    pub fn unlock_overlay_mut(&mut self) -> Option<&mut UnlockOverlay> {
        match self.overlay_mut() {
            Some(OverlayState::Unlock(overlay)) => Some(overlay),
            _ => None,
        }
    }

    fn normalize_selection(&mut self) {
        if self.cards.is_empty() {
            self.selected = 0;
        } else if self.selected >= self.cards.len() {
            self.selected = self.cards.len() - 1;
        }
    }
}

fn summarize_card(record: CardRecord, locks: &LockSession) -> CardSummary {
    let state = locks.state_of(&record);
    let settings = locks.settings();
    let display_title = if settings.enabled && state == CardLockState::Locked {
        mask_title(&record.title, settings.mask_visible_chars)
    } else {
        record.title.clone()
    };
    CardSummary {
        id: record.id,
        title: record.title,
        display_title,
        updated_label: format_timestamp(record.updated_at),
        locked: record.locked,
        unlocked_session: state == CardLockState::UnlockedSession,
    }
}

fn format_timestamp(epoch: i64) -> String {
    OffsetDateTime::from_unix_timestamp(epoch)
        .map(|dt| dt.format(&Rfc3339).unwrap_or_else(|_| epoch.to_string()))
        .unwrap_or_else(|_| epoch.to_string())
}

fn prev_grapheme_boundary(text: &str, cursor: usize) -> usize {
    if cursor == 0 {
        return 0;
    }
    let mut last = 0;
    for (idx, _) in text[..cursor].grapheme_indices(true) {
        last = idx;
    }
    last
}

fn next_grapheme_boundary(text: &str, cursor: usize) -> usize {
    if cursor >= text.len() {
        return text.len();
    }
    match text[cursor..].graphemes(true).next() {
        Some(grapheme) => cursor + grapheme.len(),
        None => text.len(),
    }
}

fn line_start(text: &str, cursor: usize) -> usize {
    text[..cursor].rfind('\n').map(|idx| idx + 1).unwrap_or(0)
}

fn line_end(text: &str, cursor: usize) -> usize {
    text[cursor..]
        .find('\n')
        .map(|idx| cursor + idx)
        .unwrap_or(text.len())
}

fn column_at(text: &str, line_start: usize, cursor: usize) -> usize {
    text[line_start..cursor].graphemes(true).count()
}

fn position_for_column(text: &str, line_start: usize, column: usize) -> usize {
    let end = line_end(text, line_start);
    let mut position = line_start;
    let mut count = 0;
    for grapheme in text[line_start..end].graphemes(true) {
        if count >= column {
            break;
        }
        position += grapheme.len();
        count += 1;
    }
    position
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn editor_moves_respect_grapheme_boundaries() {
        let mut editor = EditorState::new(1, "café".to_string());
        assert!(editor.move_left());
        assert_eq!(editor.cursor(), 3);
        assert!(editor.backspace());
        assert_eq!(editor.buffer(), "caé");
    }

    #[test]
    fn editor_vertical_moves_keep_the_column() {
        let mut editor = EditorState::new(1, "alpha\nbe\ngamma".to_string());
        editor.cursor = editor.buffer.len();
        assert!(editor.move_up());
        // "be" is shorter than "gamma", cursor lands at its end.
        assert_eq!(&editor.buffer[..editor.cursor], "alpha\nbe");
        assert!(editor.move_up());
        assert_eq!(&editor.buffer[..editor.cursor], "alpha");
    }

    #[test]
    fn form_focus_cycles_over_the_active_fields() {
        let mut form = AccountForm::default();
        assert_eq!(form.focus, FormFocus::Email);
        form.focus_next(false);
        assert_eq!(form.focus, FormFocus::Password);
        form.focus_next(false);
        assert_eq!(form.focus, FormFocus::Email);

        let mut full = AccountForm::for_signup();
        assert_eq!(full.focus, FormFocus::Name);
        full.focus_prev(true);
        assert_eq!(full.focus, FormFocus::Confirm);
    }

    #[test]
    fn move_selection_clamps_to_bounds() {
        let mut state = AppState::new(Screen::Cards);
        state.cards = vec![
            CardSummary {
                id: 1,
                title: "a".into(),
                display_title: "a".into(),
                updated_label: String::new(),
                locked: false,
                unlocked_session: false,
            },
            CardSummary {
                id: 2,
                title: "b".into(),
                display_title: "b".into(),
                updated_label: String::new(),
                locked: false,
                unlocked_session: false,
            },
        ];
        state.move_selection(5);
        assert_eq!(state.selected, 1);
        state.move_selection(-5);
        assert_eq!(state.selected, 0);
    }
}
