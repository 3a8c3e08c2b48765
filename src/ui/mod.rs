use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;
use time::macros::format_description;

use crate::app::state::{AppState, FocusPane, FormFocus, OverlayState, Screen};
use crate::session::SaveStatus;

pub fn draw_app(frame: &mut Frame, state: &AppState, list_state: &mut ListState) {
    match state.screen {
        Screen::Cards => draw_cards(frame, state, list_state),
        Screen::Login => draw_account_screen(frame, state, "Sign in", false),
        Screen::Signup => draw_account_screen(frame, state, "Create account", true),
        Screen::Setup => draw_account_screen(frame, state, "First run: create the owner", true),
    }
}

fn draw_cards(frame: &mut Frame, state: &AppState, list_state: &mut ListState) {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(3)])
        .split(frame.size());

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(vertical[0]);

    draw_card_list(frame, state, list_state, columns[0]);
    draw_reading_pane(frame, state, columns[1]);
    draw_status_bar(frame, state, vertical[1]);

    if let Some(overlay) = state.overlay() {
        draw_overlay(frame, overlay);
    }
}

fn draw_card_list(frame: &mut Frame, state: &AppState, list_state: &mut ListState, area: Rect) {
    let block_style = if matches!(state.focus, FocusPane::List) {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };

    let mut items = Vec::with_capacity(state.cards.len());
    for card in &state.cards {
        let mut title_spans = Vec::new();
        if card.locked {
            let color = if card.unlocked_session {
                Color::Green
            } else {
                Color::Red
            };
            title_spans.push(Span::styled(
                "◆ ",
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ));
        }
        title_spans.push(Span::styled(
            card.display_title.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        ));
        let meta = if state.show_trash {
            format!("Deleted · was updated {}", card.updated_label)
        } else {
            format!("Updated {}", card.updated_label)
        };
        items.push(ListItem::new(vec![
            Line::from(title_spans),
            Line::from(Span::styled(meta, Style::default().fg(Color::Gray))),
        ]));
    }
    if items.is_empty() {
        let empty = if state.show_trash {
            "Recycle view is empty."
        } else if !state.search.query.is_empty() {
            "No cards match the search."
        } else {
            "No cards yet. Press `a` to create one."
        };
        items.push(ListItem::new(empty));
    }

    let title = if state.show_trash {
        "Recycle".to_string()
    } else if state.search.active || !state.search.query.is_empty() {
        format!("Cards · /{}", state.search.query)
    } else {
        "Cards".to_string()
    };
    let list = List::new(items)
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(block_style),
        )
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▸ ");
    frame.render_stateful_widget(list, area, list_state);
}

fn draw_reading_pane(frame: &mut Frame, state: &AppState, area: Rect) {
    let block_style = if matches!(state.focus, FocusPane::Editor) {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };

    let (title, body): (String, Text) = if let Some(editor) = state.editor() {
        let label = state
            .selected()
            .map(|card| card.display_title.clone())
            .unwrap_or_else(|| "Card".to_string());
        (
            format!("✎ {label}"),
            editor_text(editor.buffer(), editor.cursor()),
        )
    } else if let Some(card) = state.selected() {
        match &state.preview {
            Some(body) => (card.display_title.clone(), Text::from(body.as_str())),
            None if state.show_trash => (
                card.display_title.clone(),
                Text::from(Span::styled(
                    "Read-only. Press `u` to restore.",
                    Style::default().fg(Color::Gray),
                )),
            ),
            None => (
                card.display_title.clone(),
                Text::from(Span::styled(
                    "Locked. Press `e` to unlock.",
                    Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                )),
            ),
        }
    } else {
        ("Card".to_string(), Text::from(""))
    };

    let paragraph = Paragraph::new(body)
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(block_style),
        )
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

/// Renders the editor buffer with a block cursor at the insertion point.
fn editor_text(buffer: &str, cursor: usize) -> Text<'static> {
    let cursor_style = Style::default().bg(Color::White).fg(Color::Black);
    let mut lines = Vec::new();
    let mut offset = 0;
    let mut placed = false;
    for raw in buffer.split('\n') {
        let start = offset;
        let end = offset + raw.len();
        if !placed && cursor >= start && cursor <= end {
            let at = cursor - start;
            let before = raw[..at].to_string();
            let mut spans = Vec::new();
            if !before.is_empty() {
                spans.push(Span::raw(before));
            }
            let rest = &raw[at..];
            match rest.chars().next() {
                Some(ch) => {
                    spans.push(Span::styled(ch.to_string(), cursor_style));
                    spans.push(Span::raw(rest[ch.len_utf8()..].to_string()));
                }
                None => spans.push(Span::styled(" ", cursor_style)),
            }
            lines.push(Line::from(spans));
            placed = true;
        } else {
            lines.push(Line::from(raw.to_string()));
        }
        offset = end + 1;
    }
    Text::from(lines)
}

fn draw_status_bar(frame: &mut Frame, state: &AppState, area: Rect) {
    let save_label = match &state.save_status {
        SaveStatus::Inactive => String::new(),
        SaveStatus::Idle { last_saved_at, .. } => match last_saved_at {
            Some(at) => {
                let format = format_description!("[hour]:[minute]:[second]");
                at.format(&format)
                    .map(|t| format!("Saved {t}"))
                    .unwrap_or_else(|_| "Saved".to_string())
            }
            None => "Saved".to_string(),
        },
        SaveStatus::Pending { .. } => "Unsaved changes…".to_string(),
        SaveStatus::Error { .. } => "Save failed".to_string(),
    };

    let mut spans = Vec::new();
    if let Some(user) = &state.user {
        spans.push(Span::styled(
            format!("{} ", user.name),
            Style::default().fg(Color::Cyan),
        ));
    }
    if !save_label.is_empty() {
        let style = if matches!(state.save_status, SaveStatus::Error { .. }) {
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Green)
        };
        spans.push(Span::styled(format!("{save_label} "), style));
    }
    if let Some(message) = &state.status_message {
        spans.push(Span::raw(message.clone()));
    } else if state.is_editing() {
        spans.push(Span::styled(
            "Esc exit · Ctrl-s save",
            Style::default().fg(Color::Gray),
        ));
    } else {
        spans.push(Span::styled(
            "a new · e edit · r rename · d delete · l lock · / search · T recycle · L logout · q quit",
            Style::default().fg(Color::Gray),
        ));
    }

    let bar = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL))
        .wrap(Wrap { trim: true });
    frame.render_widget(bar, area);
}

fn draw_overlay(frame: &mut Frame, overlay: &OverlayState) {
    match overlay {
        OverlayState::NewCard(draft) => {
            draw_input_dialog(frame, "New card", &draft.title, None);
        }
        OverlayState::RenameCard(draft) => {
            draw_input_dialog(frame, "Rename card", &draft.title, None);
        }
        OverlayState::DeleteCard(draft) => {
            let prompt = if draft.purge {
                format!("Delete '{}' forever? Enter confirm · Esc cancel", draft.title)
            } else {
                format!("Move '{}' to recycle? Enter confirm · Esc cancel", draft.title)
            };
            draw_confirm_dialog(frame, "Delete card", &prompt);
        }
        OverlayState::Unlock(unlock) => {
            let masked = "•".repeat(unlock.input.chars().count());
            draw_input_dialog(frame, "Unlock card", &masked, unlock.error.as_deref());
        }
        OverlayState::EmptyTrash(_) => {
            draw_confirm_dialog(
                frame,
                "Empty recycle",
                "Delete every card in the recycle view forever? Enter confirm · Esc cancel",
            );
        }
    }
}

fn draw_input_dialog(frame: &mut Frame, title: &str, value: &str, error: Option<&str>) {
    let area = centered_rect(frame.size(), 50, 20);
    frame.render_widget(Clear, area);
    let mut lines = vec![Line::from(vec![
        Span::raw(value.to_string()),
        Span::styled(" ", Style::default().bg(Color::White)),
    ])];
    if let Some(error) = error {
        lines.push(Line::from(Span::styled(
            error.to_string(),
            Style::default().fg(Color::Red),
        )));
    }
    lines.push(Line::from(Span::styled(
        "Enter confirm · Esc cancel",
        Style::default().fg(Color::Gray),
    )));
    let dialog = Paragraph::new(lines)
        .block(Block::default().title(title.to_string()).borders(Borders::ALL))
        .wrap(Wrap { trim: true });
    frame.render_widget(dialog, area);
}

fn draw_confirm_dialog(frame: &mut Frame, title: &str, prompt: &str) {
    let area = centered_rect(frame.size(), 60, 20);
    frame.render_widget(Clear, area);
    let dialog = Paragraph::new(prompt.to_string())
        .block(Block::default().title(title.to_string()).borders(Borders::ALL))
        .wrap(Wrap { trim: true });
    frame.render_widget(dialog, area);
}

fn draw_account_screen(frame: &mut Frame, state: &AppState, title: &str, full: bool) {
    let area = centered_rect(frame.size(), 50, 60);
    frame.render_widget(Clear, area);

    let form = &state.form;
    let mut lines = Vec::new();
    if full {
        lines.push(form_field_line("Name", &form.name, form.focus == FormFocus::Name, false));
    }
    lines.push(form_field_line(
        "Email",
        &form.email,
        form.focus == FormFocus::Email,
        false,
    ));
    lines.push(form_field_line(
        "Password",
        &form.password,
        form.focus == FormFocus::Password,
        true,
    ));
    if full {
        lines.push(form_field_line(
            "Confirm",
            &form.confirm,
            form.focus == FormFocus::Confirm,
            true,
        ));
    }
    lines.push(Line::from(""));
    if let Some(error) = &form.error {
        lines.push(Line::from(Span::styled(
            error.clone(),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )));
    }
    let hint = match state.screen {
        Screen::Login => "Tab next field · Enter sign in · Ctrl-n create account · Esc quit",
        Screen::Signup => "Tab next field · Enter create · Esc back to sign in",
        _ => "Tab next field · Enter finish setup · Esc quit",
    };
    lines.push(Line::from(Span::styled(hint, Style::default().fg(Color::Gray))));

    let dialog = Paragraph::new(lines)
        .block(Block::default().title(title.to_string()).borders(Borders::ALL))
        .wrap(Wrap { trim: true });
    frame.render_widget(dialog, area);
}

fn form_field_line(label: &str, value: &str, focused: bool, secret: bool) -> Line<'static> {
    let shown = if secret {
        "•".repeat(value.chars().count())
    } else {
        value.to_string()
    };
    let label_style = if focused {
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    };
    let mut spans = vec![
        Span::styled(format!("{label:>9}: "), label_style),
        Span::raw(shown),
    ];
    if focused {
        spans.push(Span::styled(" ", Style::default().bg(Color::White)));
    }
    Line::from(spans)
}

fn centered_rect(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1]);
    horizontal[1]
}
