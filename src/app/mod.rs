use std::io::Stdout;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::ListState;
use ratatui::Terminal;

use crate::auth::{resolve_route, AuthError, AuthService, Route};
use crate::config::locking::LockSettings;
use crate::config::Settings;
use crate::session::{EditSession, LockSession, SaveEvent, SaveTimers};
use crate::storage::{StorageHandle, UserRecord};
use crate::ui;

pub mod state;

pub use state::{
    AccountForm, AppState, CardSummary, EditorState, FocusPane, FormFocus, OverlayState, Screen,
};

enum Action {
    Quit,
    SelectNext,
    SelectPrevious,
    ToggleFocus,
    Refresh,
    NewCard,
    RenameCard,
    EnterEdit,
    StartSearch,
    DeleteCard,
    ToggleTrashView,
    RestoreCard,
    EmptyTrash,
    ToggleLock,
    Logout,
    ManualSave,
}

pub struct App {
    storage: StorageHandle,
    settings: Settings,
    auth: AuthService,
    state: AppState,
    list_state: ListState,
    should_quit: bool,
    tick_rate: Duration,
    edits: EditSession,
    locks: LockSession,
}

impl App {
    pub fn new(storage: StorageHandle, settings: Settings) -> Result<Self> {
        let auth = AuthService::new(storage.clone());
        let first_run = storage.count_users()? == 0 && !settings.setup_complete();
        let restored = auth
            .restore_session(&settings)
            .context("restoring persisted session")?;
        let route = resolve_route(
            Route::Root,
            restored.is_some(),
            settings.require_login(),
            first_run,
        );
        let screen = match route {
            Route::Setup => Screen::Setup,
            Route::Login => Screen::Login,
            Route::NewUser => Screen::Signup,
            _ => Screen::Cards,
        };

        let state = AppState::new(screen);
        let locks = LockSession::new(LockSettings::from_settings(&settings));
        let mut app = Self {
            storage,
            settings,
            auth,
            state,
            list_state: ListState::default(),
            should_quit: false,
            tick_rate: Duration::from_millis(250),
            edits: EditSession::new(SaveTimers::default()),
            locks,
        };

        if screen == Screen::Cards {
            let user = match restored {
                Some(user) => user,
                None => app.auth.guest()?,
            };
            app.enter_cards(user, false)?;
        }
        Ok(app)
    }

    pub fn run(&mut self) -> Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        let shutdown = self.shutdown();
        restore_terminal(&mut terminal)?;
        result.and(shutdown)
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            terminal
                .draw(|frame| {
                    if self.state.screen == Screen::Cards && !self.state.is_empty() {
                        self.list_state.select(Some(self.state.selected));
                    } else {
                        self.list_state.select(None);
                    }
                    ui::draw_app(frame, &self.state, &mut self.list_state);
                })
                .context("rendering frame")?;

            if self.should_quit {
                break;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or(Duration::ZERO);

            if event::poll(timeout).context("polling for terminal events")? {
                match event::read().context("reading terminal event")? {
                    Event::Key(key) => self.handle_key(key),
                    Event::Resize(_, _) => {}
                    _ => {}
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                self.on_tick();
                last_tick = Instant::now();
            }
        }
        Ok(())
    }

    fn on_tick(&mut self) {
        match self.edits.poll(&self.storage) {
            Ok(Some(event)) => self.handle_save_event(event),
            Ok(None) => {}
            Err(err) => {
                tracing::error!(?err, "autosave tick errored");
            }
        }
        match self.locks.poll(&self.storage) {
            Ok(relocked) if !relocked.is_empty() => {
                self.handle_relocked(&relocked);
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!(?err, "relock tick errored");
            }
        }
        self.state.set_save_status(self.edits.status());
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        match self.state.screen {
            Screen::Setup | Screen::Login | Screen::Signup => self.handle_form_key(key),
            Screen::Cards => self.handle_cards_key(key),
        }
    }

    // ---- auth screens ----

    fn handle_form_key(&mut self, key: KeyEvent) {
        let full_form = matches!(self.state.screen, Screen::Setup | Screen::Signup);
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
            }
            KeyCode::Esc => match self.state.screen {
                Screen::Signup => self.state.switch_screen(Screen::Login),
                Screen::Login | Screen::Setup => self.should_quit = true,
                Screen::Cards => {}
            },
            KeyCode::Tab | KeyCode::Down => self.state.form.focus_next(full_form),
            KeyCode::BackTab | KeyCode::Up => self.state.form.focus_prev(full_form),
            KeyCode::Backspace => self.state.form.pop_char(),
            KeyCode::Enter => self.submit_form(),
            KeyCode::Char('n') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                if self.state.screen == Screen::Login {
                    self.state.switch_screen(Screen::Signup);
                }
            }
            KeyCode::Char(ch)
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER) =>
            {
                self.state.form.push_char(ch);
            }
            _ => {}
        }
    }

    fn submit_form(&mut self) {
        match self.state.screen {
            Screen::Login => {
                let (email, password) =
                    (self.state.form.email.clone(), self.state.form.password.clone());
                match self.auth.login(&email, &password) {
                    Ok(user) => self.sign_in(user, true),
                    Err(err) => self.report_auth_error(err),
                }
            }
            Screen::Signup | Screen::Setup => {
                let (name, email, password, confirm) = (
                    self.state.form.name.clone(),
                    self.state.form.email.clone(),
                    self.state.form.password.clone(),
                    self.state.form.confirm.clone(),
                );
                if password != confirm {
                    self.state.form.error = Some("passwords do not match".to_string());
                    return;
                }
                let finishing_setup = self.state.screen == Screen::Setup;
                match self.auth.signup(&name, &email, &password) {
                    Ok(user) => {
                        if finishing_setup {
                            if let Err(err) = self.settings.mark_setup_complete() {
                                tracing::error!(?err, "failed to persist setup completion");
                            }
                        }
                        self.sign_in(user, true);
                    }
                    Err(err) => self.report_auth_error(err),
                }
            }
            Screen::Cards => {}
        }
    }

    fn report_auth_error(&mut self, err: AuthError) {
        match err {
            AuthError::Storage(err) => {
                tracing::error!(?err, "auth operation failed");
                self.state.form.error = Some("something went wrong; see logs".to_string());
            }
            err => self.state.form.error = Some(err.to_string()),
        }
    }

    fn sign_in(&mut self, user: UserRecord, persist: bool) {
        if persist {
            if let Err(err) = self.auth.persist_session(&mut self.settings, user.id) {
                tracing::error!(?err, "failed to persist session");
            }
        }
        if let Err(err) = self.enter_cards(user, true) {
            tracing::error!(?err, "failed to enter card view");
            self.state.form.error = Some("failed to load cards; see logs".to_string());
        }
    }

    fn enter_cards(&mut self, user: UserRecord, switch: bool) -> Result<()> {
        self.locks
            .set_settings(LockSettings::for_user(&self.settings, Some(&user)));
        if switch {
            self.state.switch_screen(Screen::Cards);
        }
        self.state.user = Some(user);
        self.state.refresh(&self.storage, &self.locks)?;
        if let Some(card_id) = self.settings.last_selected_card() {
            self.state.select_card_by_id(card_id);
        }
        self.apply_selection();
        Ok(())
    }

    fn logout(&mut self) {
        if let Err(err) = self.edits.close(&self.storage) {
            tracing::error!(?err, "flush on logout failed");
        }
        self.locks.clear();
        if let Err(err) = self.auth.clear_session(&mut self.settings) {
            tracing::error!(?err, "failed to clear persisted session");
        }
        self.state.user = None;
        self.state.cards.clear();
        self.state.editor = None;
        self.state.preview = None;
        if self.settings.require_login() {
            self.state.switch_screen(Screen::Login);
        } else {
            self.should_quit = true;
        }
    }

    // ---- cards screen ----

    fn handle_cards_key(&mut self, key: KeyEvent) {
        if self.handle_overlay_key(key) {
            return;
        }
        if self.state.is_editing() && self.handle_editor_key(key) {
            return;
        }
        if self.state.is_search_active() {
            match key.code {
                KeyCode::Esc => {
                    if let Err(err) = self.state.cancel_search(&self.storage, &self.locks) {
                        tracing::error!(?err, "failed to cancel search");
                    }
                    self.apply_selection();
                    return;
                }
                KeyCode::Enter => {
                    self.state.finish_search();
                    return;
                }
                KeyCode::Backspace => {
                    if let Err(err) = self.state.pop_search_char(&self.storage, &self.locks) {
                        tracing::error!(?err, "failed to trim search query");
                    }
                    self.apply_selection();
                    return;
                }
                KeyCode::Char(ch)
                    if !key.modifiers.intersects(
                        KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER,
                    ) =>
                {
                    if let Err(err) = self.state.push_search_char(&self.storage, &self.locks, ch) {
                        tracing::error!(?err, "failed to extend search query");
                    }
                    self.apply_selection();
                    return;
                }
                _ => {}
            }
        }

        let plain = !key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);
        let action = match key.code {
            KeyCode::Char('q') if plain => Some(Action::Quit),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Action::Quit)
            }
            KeyCode::Char('j') | KeyCode::Down => Some(Action::SelectNext),
            KeyCode::Char('k') | KeyCode::Up => Some(Action::SelectPrevious),
            KeyCode::Tab => Some(Action::ToggleFocus),
            KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Action::Refresh)
            }
            KeyCode::Char('a') if plain => Some(Action::NewCard),
            KeyCode::Char('r') if plain => Some(Action::RenameCard),
            KeyCode::Char('e') if plain => Some(Action::EnterEdit),
            KeyCode::Enter => Some(Action::EnterEdit),
            KeyCode::Char('/') if plain => Some(Action::StartSearch),
            KeyCode::Char('d') if plain => Some(Action::DeleteCard),
            KeyCode::Char('T') => Some(Action::ToggleTrashView),
            KeyCode::Char('u') if plain => Some(Action::RestoreCard),
            KeyCode::Char('E') => Some(Action::EmptyTrash),
            KeyCode::Char('l') if plain => Some(Action::ToggleLock),
            KeyCode::Char('L') => Some(Action::Logout),
            KeyCode::Char('s') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Action::ManualSave)
            }
            _ => None,
        };
        if let Some(action) = action {
            self.handle_action(action);
        }
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.should_quit = true,
            Action::SelectNext => {
                self.state.move_selection(1);
                self.apply_selection();
            }
            Action::SelectPrevious => {
                self.state.move_selection(-1);
                self.apply_selection();
            }
            Action::ToggleFocus => {
                if self.state.is_editing() {
                    self.state.toggle_focus();
                }
            }
            Action::Refresh => {
                if let Err(err) = self.state.refresh(&self.storage, &self.locks) {
                    tracing::error!(?err, "failed to refresh cards");
                }
                self.apply_selection();
            }
            Action::NewCard => {
                if self.state.overlay().is_none() && !self.state.show_trash {
                    self.state.open_new_card();
                    self.state
                        .set_status_message(Some("Enter a title and press Enter"));
                }
            }
            Action::RenameCard => self.handle_rename_card(),
            Action::EnterEdit => self.handle_enter_edit(),
            Action::StartSearch => {
                if !self.state.show_trash {
                    self.state.begin_search();
                }
            }
            Action::DeleteCard => self.handle_delete_card(),
            Action::ToggleTrashView => self.handle_toggle_trash_view(),
            Action::RestoreCard => self.handle_restore_card(),
            Action::EmptyTrash => {
                if self.state.show_trash && !self.state.is_empty() {
                    self.state.open_empty_trash();
                }
            }
            Action::ToggleLock => self.handle_toggle_lock(),
            Action::Logout => self.logout(),
            Action::ManualSave => self.handle_manual_save(),
        }
    }

    /// Runs after every selection change: flushes pending edits for the card
    /// being left, loads the new card's body fresh from storage, arms or
    /// cancels relock deadlines and remembers the selection across restarts.
    fn apply_selection(&mut self) {
        let previous = self.edits.card_id();
        let selected = self.state.selected_card_id();
        if previous == selected && selected.is_some() {
            return;
        }
        if let Some(prev) = previous {
            self.locks.note_deselected(prev);
        }
        self.state.editor = None;

        let Some(card_id) = selected else {
            if let Err(err) = self.edits.close(&self.storage) {
                tracing::error!(?err, "flush on deselection failed");
            }
            self.state.preview = None;
            self.persist_selection(None);
            return;
        };

        let card = match self.storage.fetch_card(card_id) {
            Ok(Some(card)) => card,
            Ok(None) => {
                self.state.preview = None;
                return;
            }
            Err(err) => {
                tracing::error!(?err, card_id, "failed to load selected card");
                self.state.set_status_message(Some("Failed to load card"));
                return;
            }
        };

        if self.state.show_trash || self.locks.requires_unlock(&card) {
            // Flush whatever was pending, but never open the body.
            if let Err(err) = self.edits.close(&self.storage) {
                tracing::error!(?err, "flush on selection failed");
            }
            self.state.preview = None;
        } else {
            match self.edits.select(&self.storage, &card) {
                Ok(Some(event)) => self.handle_save_event(event),
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(?err, card_id, "failed to open edit session");
                }
            }
            self.state.preview = Some(card.body.clone());
            self.locks.note_selected(&card);
        }
        self.persist_selection(Some(card_id));
        self.state.set_save_status(self.edits.status());
    }

    fn persist_selection(&mut self, card_id: Option<i64>) {
        if self.state.show_trash {
            return;
        }
        if let Err(err) = self.settings.set_last_selected_card(card_id) {
            tracing::error!(?err, "failed to persist selected card");
        }
    }

    fn handle_enter_edit(&mut self) {
        if self.state.show_trash {
            self.state
                .set_status_message(Some("Cards in the recycle view are read-only"));
            return;
        }
        let Some(card_id) = self.state.selected_card_id() else {
            self.state.set_status_message(Some("No card selected"));
            return;
        };
        let locked = match self.storage.fetch_card(card_id) {
            Ok(Some(card)) => self.locks.requires_unlock(&card),
            Ok(None) => return,
            Err(err) => {
                tracing::error!(?err, card_id, "failed to load card for editing");
                return;
            }
        };
        if locked {
            self.state.open_unlock(card_id);
            return;
        }
        if self.edits.card_id() != Some(card_id) {
            self.apply_selection();
        }
        let body = self.edits.buffer().unwrap_or_default().to_string();
        self.state.begin_editor(card_id, body);
        self.state.focus = FocusPane::Editor;
        self.state
            .set_status_message(Some("Editing: type to modify • Esc exit • Ctrl-s save"));
    }

    fn handle_editor_key(&mut self, key: KeyEvent) -> bool {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('s') => {
                    self.handle_manual_save();
                    return true;
                }
                KeyCode::Char('c') => {
                    self.should_quit = true;
                    return true;
                }
                _ => return false,
            }
        }
        match key.code {
            KeyCode::Esc => {
                if let Err(err) = self.edits.flush_now(&self.storage) {
                    tracing::error!(?err, "flush on exit failed");
                }
                self.state.close_editor();
                self.state.set_status_message(Some("Exited edit mode"));
                self.state.set_save_status(self.edits.status());
                true
            }
            KeyCode::Enter => self.apply_editor_change(|editor| editor.insert_newline()),
            KeyCode::Backspace => self.apply_editor_change(|editor| editor.backspace()),
            KeyCode::Delete => self.apply_editor_change(|editor| editor.delete()),
            KeyCode::Tab => self.apply_editor_change(|editor| editor.insert_char('\t')),
            KeyCode::Char(ch)
                if !key
                    .modifiers
                    .intersects(KeyModifiers::ALT | KeyModifiers::SUPER) =>
            {
                self.apply_editor_change(|editor| editor.insert_char(ch))
            }
            KeyCode::Left => self.apply_editor_change(|editor| editor.move_left()),
            KeyCode::Right => self.apply_editor_change(|editor| editor.move_right()),
            KeyCode::Up => self.apply_editor_change(|editor| editor.move_up()),
            KeyCode::Down => self.apply_editor_change(|editor| editor.move_down()),
            KeyCode::Home => self.apply_editor_change(|editor| editor.move_home()),
            KeyCode::End => self.apply_editor_change(|editor| editor.move_end()),
            _ => false,
        }
    }

    fn apply_editor_change<F>(&mut self, f: F) -> bool
    where
        F: FnOnce(&mut EditorState) -> bool,
    {
        let Some(editor) = self.state.editor_mut() else {
            return false;
        };
        let changed = f(editor);
        if changed {
            let card_id = editor.card_id();
            let body = editor.buffer().to_string();
            self.edits.on_edit(card_id, &body);
            self.state.preview = Some(body);
            self.state.set_save_status(self.edits.status());
        }
        true
    }

    fn handle_manual_save(&mut self) {
        match self.edits.flush_now(&self.storage) {
            Ok(Some(event)) => {
                let saved = matches!(event, SaveEvent::Saved { .. });
                self.handle_save_event(event);
                if saved {
                    self.state.set_status_message(Some("Changes saved"));
                }
            }
            Ok(None) => {
                self.state.set_status_message(Some("No changes to save"));
            }
            Err(err) => {
                tracing::error!(?err, "manual save failed");
                self.state
                    .set_status_message(Some("Manual save failed; see logs"));
            }
        }
        self.state.set_save_status(self.edits.status());
    }

    fn handle_save_event(&mut self, event: SaveEvent) {
        match event {
            SaveEvent::Saved { card_id, .. } => {
                tracing::debug!(card_id, "card saved");
            }
            SaveEvent::Error { card_id, message } => {
                tracing::warn!(card_id, %message, "autosave error");
                self.state
                    .set_status_message(Some(format!("Save failed for card #{card_id}: {message}")));
            }
        }
        self.state.set_save_status(self.edits.status());
    }

    fn handle_relocked(&mut self, relocked: &[i64]) {
        if let Some(current) = self.edits.card_id() {
            if relocked.contains(&current) {
                if let Err(err) = self.edits.close(&self.storage) {
                    tracing::error!(?err, "flush on relock failed");
                }
                self.state.close_editor();
                self.state.preview = None;
                self.state.set_status_message(Some("Card auto-locked"));
            }
        }
        if let Err(err) = self.state.refresh(&self.storage, &self.locks) {
            tracing::error!(?err, "failed to refresh after relock");
        }
    }

    fn handle_toggle_lock(&mut self) {
        if !self.locks.settings().enabled {
            self.state
                .set_status_message(Some("Locking is disabled in settings"));
            return;
        }
        let Some(card_id) = self.state.selected_card_id() else {
            self.state.set_status_message(Some("No card selected"));
            return;
        };
        let card = match self.storage.fetch_card(card_id) {
            Ok(Some(card)) => card,
            Ok(None) => return,
            Err(err) => {
                tracing::error!(?err, card_id, "failed to load card for locking");
                return;
            }
        };

        if self.locks.requires_unlock(&card) {
            self.state.open_unlock(card_id);
            return;
        }
        if !self.locks.settings().has_password() {
            self.state
                .set_status_message(Some("Set a lock password in settings first"));
            return;
        }
        // Flush before the body disappears behind the lock.
        if self.edits.card_id() == Some(card_id) {
            if let Err(err) = self.edits.close(&self.storage) {
                tracing::error!(?err, "flush before lock failed");
            }
        }
        match self.locks.lock_now(&self.storage, card_id) {
            Ok(()) => {
                self.state.close_editor();
                self.state.preview = None;
                self.state.set_status_message(Some("Card locked"));
                if let Err(err) = self.state.refresh(&self.storage, &self.locks) {
                    tracing::error!(?err, "failed to refresh after lock");
                }
            }
            Err(err) => {
                tracing::error!(?err, card_id, "failed to lock card");
                self.state.set_status_message(Some("Failed to lock card"));
            }
        }
    }

    fn handle_toggle_trash_view(&mut self) {
        let enabled = !self.state.show_trash;
        if enabled {
            if let Err(err) = self.edits.close(&self.storage) {
                tracing::error!(?err, "flush before recycle view failed");
            }
            self.state.close_editor();
            self.state.preview = None;
        }
        match self.state.set_trash_view(enabled, &self.storage, &self.locks) {
            Ok(()) => {
                if enabled {
                    self.state.set_status_message(Some(
                        "Recycle view: u restore • d delete forever • E empty • T exit",
                    ));
                } else {
                    self.state.set_status_message(Some("Back to active cards"));
                    self.apply_selection();
                }
            }
            Err(err) => {
                tracing::error!(?err, "failed to toggle recycle view");
                self.state
                    .set_status_message(Some("Failed to toggle recycle view"));
            }
        }
    }

    fn handle_restore_card(&mut self) {
        if !self.state.show_trash {
            self.state
                .set_status_message(Some("Restore only available in the recycle view"));
            return;
        }
        let Some(card_id) = self.state.selected_card_id() else {
            return;
        };
        match self.storage.restore_card(card_id) {
            Ok(()) => {
                self.state.set_status_message(Some("Card restored"));
                if let Err(err) = self.state.refresh(&self.storage, &self.locks) {
                    tracing::error!(?err, "failed to refresh after restore");
                }
            }
            Err(err) => {
                tracing::error!(?err, card_id, "failed to restore card");
                self.state.set_status_message(Some("Failed to restore card"));
            }
        }
    }

    fn handle_rename_card(&mut self) {
        if self.state.overlay().is_some() || self.state.show_trash {
            return;
        }
        let Some(card) = self.state.selected() else {
            self.state.set_status_message(Some("No card selected"));
            return;
        };
        if card.locked && !card.unlocked_session && self.locks.settings().enabled {
            self.state
                .set_status_message(Some("Unlock the card before renaming it"));
            return;
        }
        self.state.open_rename_card();
        self.state
            .set_status_message(Some("Rename card: Enter save • Esc cancel"));
    }

    fn handle_delete_card(&mut self) {
        if self.state.overlay().is_some() {
            return;
        }
        if self.state.selected().is_none() {
            self.state.set_status_message(Some("No card selected"));
            return;
        }
        let purge = self.state.show_trash;
        self.state.open_delete_card(purge);
        let prompt = if purge {
            "Delete forever: Enter confirm • Esc cancel"
        } else {
            "Move to recycle: Enter confirm • Esc cancel"
        };
        self.state.set_status_message(Some(prompt));
    }

    // ---- overlays ----

    fn handle_overlay_key(&mut self, key: KeyEvent) -> bool {
        let plain = !key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);
        match self.state.overlay() {
            Some(OverlayState::NewCard(_)) => {
                match key.code {
                    KeyCode::Esc => {
                        self.state.close_overlay();
                        self.state.set_status_message(Some("Canceled new card"));
                    }
                    KeyCode::Enter => self.submit_new_card(),
                    KeyCode::Backspace => {
                        if let Some(draft) = self.state.new_card_overlay_mut() {
                            draft.title.pop();
                        }
                    }
                    KeyCode::Char(ch) if plain => {
                        if let Some(draft) = self.state.new_card_overlay_mut() {
                            if draft.title.len() < 120 {
                                draft.title.push(ch);
                            }
                        }
                    }
                    _ => {}
                }
                true
            }
            Some(OverlayState::RenameCard(_)) => {
                match key.code {
                    KeyCode::Esc => {
                        self.state.close_overlay();
                        self.state.set_status_message(Some("Rename canceled"));
                    }
                    KeyCode::Enter => self.submit_rename_card(),
                    KeyCode::Backspace => {
                        if let Some(draft) = self.state.rename_card_overlay_mut() {
                            draft.title.pop();
                        }
                    }
                    KeyCode::Char(ch) if plain => {
                        if let Some(draft) = self.state.rename_card_overlay_mut() {
                            if draft.title.len() < 120 {
                                draft.title.push(ch);
                            }
                        }
                    }
                    _ => {}
                }
                true
            }
            Some(OverlayState::DeleteCard(_)) => {
                match key.code {
                    KeyCode::Esc => {
                        self.state.close_overlay();
                        self.state.set_status_message(Some("Delete canceled"));
                    }
                    KeyCode::Enter => self.submit_delete_card(),
                    _ => {}
                }
                true
            }
            Some(OverlayState::Unlock(_)) => {
                match key.code {
                    KeyCode::Esc => {
                        self.state.close_overlay();
                        self.state.set_status_message(Some("Unlock canceled"));
                    }
                    KeyCode::Enter => self.submit_unlock(),
                    KeyCode::Backspace => {
                        if let Some(overlay) = self.state.unlock_overlay_mut() {
                            overlay.input.pop();
                            overlay.error = None;
                        }
                    }
                    KeyCode::Char(ch) if plain => {
                        if let Some(overlay) = self.state.unlock_overlay_mut() {
                            if overlay.input.len() < 120 {
                                overlay.input.push(ch);
                                overlay.error = None;
                            }
                        }
                    }
                    _ => {}
                }
                true
            }
            Some(OverlayState::EmptyTrash(_)) => {
                match key.code {
                    KeyCode::Esc => {
                        self.state.close_overlay();
                        self.state.set_status_message(Some("Canceled"));
                    }
                    KeyCode::Enter => self.submit_empty_trash(),
                    _ => {}
                }
                true
            }
            None => false,
        }
    }

    fn submit_new_card(&mut self) {
        let Some(owner_id) = self.state.owner_id() else {
            return;
        };
        let title = match self.state.new_card_overlay_mut() {
            Some(draft) => draft.title.trim().to_string(),
            None => return,
        };
        if title.is_empty() {
            self.state.set_status_message(Some("Title cannot be empty"));
            return;
        }
        match self.storage.create_card(owner_id, &title) {
            Ok(card_id) => {
                self.state.close_overlay();
                if let Err(err) = self.state.refresh(&self.storage, &self.locks) {
                    tracing::error!(?err, "failed to refresh after card creation");
                    self.state
                        .set_status_message(Some("Card created, refresh failed"));
                } else {
                    self.state.select_card_by_id(card_id);
                    self.apply_selection();
                    self.state.set_status_message(Some("Card created"));
                }
            }
            Err(err) => {
                tracing::error!(?err, "failed to create card");
                self.state.set_status_message(Some("Failed to create card"));
            }
        }
    }

    fn submit_rename_card(&mut self) {
        let Some((card_id, title)) = self
            .state
            .rename_card_overlay_mut()
            .map(|draft| (draft.card_id, draft.title.trim().to_string()))
        else {
            return;
        };
        if title.is_empty() {
            self.state.set_status_message(Some("Title cannot be empty"));
            return;
        }
        match self.storage.rename_card_title(card_id, &title) {
            Ok(()) => {
                self.state.close_overlay();
                if let Err(err) = self.state.refresh(&self.storage, &self.locks) {
                    tracing::error!(?err, "failed to refresh after rename");
                } else {
                    self.state.select_card_by_id(card_id);
                    self.state.set_status_message(Some("Card renamed"));
                }
            }
            Err(err) => {
                tracing::error!(?err, card_id, "failed to rename card");
                self.state.set_status_message(Some("Failed to rename card"));
            }
        }
    }

    fn submit_delete_card(&mut self) {
        let Some(draft) = self.state.delete_card_overlay() else {
            return;
        };
        let (card_id, purge) = (draft.card_id, draft.purge);
        if self.edits.card_id() == Some(card_id) {
            if let Err(err) = self.edits.close(&self.storage) {
                tracing::error!(?err, "flush before delete failed");
            }
            self.state.close_editor();
            self.state.preview = None;
        }
        let result = if purge {
            self.storage.permanent_delete_card(card_id)
        } else {
            self.storage.soft_delete_card(card_id)
        };
        match result {
            Ok(()) => {
                self.state.close_overlay();
                self.locks.note_deselected(card_id);
                let message = if purge {
                    "Card deleted forever"
                } else {
                    "Card moved to recycle"
                };
                self.state.set_status_message(Some(message));
                if let Err(err) = self.state.refresh(&self.storage, &self.locks) {
                    tracing::error!(?err, "failed to refresh after delete");
                } else {
                    self.apply_selection();
                }
            }
            Err(err) => {
                tracing::error!(?err, card_id, "failed to delete card");
                self.state.set_status_message(Some("Failed to delete card"));
            }
        }
    }

    fn submit_unlock(&mut self) {
        let Some((card_id, input)) = self
            .state
            .unlock_overlay_mut()
            .map(|overlay| (overlay.card_id, overlay.input.clone()))
        else {
            return;
        };
        match self.locks.unlock(card_id, &input) {
            Ok(()) => {
                self.state.close_overlay();
                self.state.set_status_message(Some("Card unlocked"));
                if let Err(err) = self.state.refresh(&self.storage, &self.locks) {
                    tracing::error!(?err, "failed to refresh after unlock");
                }
                self.state.select_card_by_id(card_id);
                self.apply_selection();
            }
            Err(err) => {
                if let Some(overlay) = self.state.unlock_overlay_mut() {
                    overlay.error = Some(err.to_string());
                    overlay.input.clear();
                }
            }
        }
    }

    fn submit_empty_trash(&mut self) {
        let Some(owner_id) = self.state.owner_id() else {
            return;
        };
        match self.storage.empty_trash(owner_id) {
            Ok(count) => {
                self.state.close_overlay();
                self.state
                    .set_status_message(Some(format!("Deleted {count} card(s) forever")));
                if let Err(err) = self.state.refresh(&self.storage, &self.locks) {
                    tracing::error!(?err, "failed to refresh after emptying recycle");
                }
            }
            Err(err) => {
                tracing::error!(?err, "failed to empty recycle");
                self.state
                    .set_status_message(Some("Failed to empty recycle"));
            }
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        self.edits
            .close(&self.storage)
            .context("flushing edits on shutdown")?;
        Ok(())
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen).context("switching to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("creating terminal backend")?;
    terminal.hide_cursor().context("hiding cursor")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor().ok();
    disable_raw_mode().context("disabling raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen).context("restoring screen state")?;
    Ok(())
}
