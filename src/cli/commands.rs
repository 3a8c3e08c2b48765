use anyhow::{bail, Result};
use clap::Args;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::app::App;
use crate::storage::{StorageHandle, UserRecord};

#[derive(Args, Debug)]
pub struct NewArgs {
    /// Title of the new card
    pub title: String,

    /// Initial body text
    #[arg(long, default_value = "")]
    pub body: String,

    /// Account that owns the card; the guest account when omitted
    #[arg(long)]
    pub email: Option<String>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Substring to match against titles and bodies
    #[arg(long)]
    pub search: Option<String>,

    /// List the recycle view instead of active cards
    #[arg(long)]
    pub trash: bool,

    /// Emit the matching cards as JSON instead of a table
    #[arg(long)]
    pub json: bool,

    /// Account whose cards to list; the guest account when omitted
    #[arg(long)]
    pub email: Option<String>,
}

pub fn run_tui(app: &mut App) -> Result<()> {
    app.run()
}

pub fn new_card(storage: &StorageHandle, args: NewArgs) -> Result<()> {
    let title = args.title.trim();
    if title.is_empty() {
        bail!("title cannot be empty");
    }
    let owner = resolve_owner(storage, args.email.as_deref())?;
    let card_id = storage.create_card(owner.id, title)?;
    if !args.body.is_empty() {
        storage.update_card_body(card_id, &args.body)?;
    }
    println!("Created card #{card_id}: {title}");
    Ok(())
}

pub fn list_cards(storage: &StorageHandle, args: ListArgs) -> Result<()> {
    let owner = resolve_owner(storage, args.email.as_deref())?;
    let cards = if args.trash {
        storage.list_trashed_cards(owner.id)?
    } else {
        storage.list_active_cards(owner.id, args.search.as_deref())?
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&cards)?);
        return Ok(());
    }
    if cards.is_empty() {
        println!("No cards.");
        return Ok(());
    }
    for card in cards {
        let updated = OffsetDateTime::from_unix_timestamp(card.updated_at)
            .ok()
            .and_then(|dt| dt.format(&Rfc3339).ok())
            .unwrap_or_else(|| card.updated_at.to_string());
        let marker = if card.locked { " [locked]" } else { "" };
        println!("#{}\t{}{}\t{}", card.id, card.title, marker, updated);
    }
    Ok(())
}

fn resolve_owner(storage: &StorageHandle, email: Option<&str>) -> Result<UserRecord> {
    match email {
        Some(email) => match storage.find_user_by_email(email.trim())? {
            Some(user) => Ok(user),
            None => bail!("no account with email {email}"),
        },
        None => storage.get_or_create_guest(),
    }
}
