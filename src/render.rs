//! Pure rendering of sign-up records into announcement layouts.
//!
//! Nothing here talks to Discord; `discord` turns an [`Announcement`] into embeds and buttons.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, Utc};
use serenity::all::UserId;

use crate::config::Artwork;
use crate::registry::{Countdown, EventKind, Payload, SignupRecord};
use crate::time::format_remaining;

pub const CAPT_JOIN: &str = "capt_join";
pub const CAPT_LEAVE: &str = "capt_leave";
pub const CAPT_PICK: &str = "capt_pick";
pub const AIRDROP_JOIN: &str = "airdrop_join";
pub const AIRDROP_LEAVE: &str = "airdrop_leave";
pub const SQUAD_MANAGE: &str = "manage_squad_button";

const WHITE: u32 = 0xFFFFFF;
const RED: u32 = 0xFF0000;
const ORANGE: u32 = 0xFFAA00;

/// Discord caps embed field values at 1024 and descriptions at 4096 characters.
const FIELD_LIMIT: usize = 1024;
const DESCRIPTION_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStyle {
    Primary,
    Success,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub custom_id: &'static str,
    pub label: &'static str,
    pub style: ControlStyle,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
}

impl Field {
    fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub title: String,
    pub description: String,
    pub colour: u32,
    pub thumbnail: Option<String>,
    pub image: Option<String>,
    pub fields: Vec<Field>,
    pub footer: Option<String>,
    pub controls: Vec<Control>,
}

impl Announcement {
    fn new(title: impl Into<String>, description: impl Into<String>, colour: u32) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            colour,
            thumbnail: None,
            image: None,
            fields: Vec::new(),
            footer: None,
            controls: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.name.starts_with(name))
            .map(|field| field.value.as_str())
    }

    pub fn control(&self, custom_id: &str) -> Option<&Control> {
        self.controls.iter().find(|c| c.custom_id == custom_id)
    }
}

/// Display names of guild members, as far as they are known.
pub type Names = HashMap<UserId, String>;

fn member_line(user: UserId, names: &Names, prefix: &str, gone: &str) -> String {
    match names.get(&user) {
        Some(name) => format!("{prefix} <@{user}> | **{name}**"),
        None => format!("{prefix} <@{user}> {gone}"),
    }
}

/// Joins as many lines as fit into `limit` characters, summarising the rest.
fn fit_lines(lines: &[String], limit: usize) -> String {
    let mut out = String::new();
    for (index, line) in lines.iter().enumerate() {
        let rest = lines.len() - index;
        let summary = format!("\n… i {rest} więcej");
        let needed = line.chars().count() + usize::from(!out.is_empty());
        let reserve = if rest > 1 { summary.chars().count() } else { 0 };
        if out.chars().count() + needed + reserve > limit {
            out.push_str(&summary);
            return out;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}

fn participants_field(record: &SignupRecord, names: &Names) -> Field {
    if record.participants.is_empty() {
        return Field::new("Zapisani:", "Brak uczestników");
    }
    let lines = record
        .participants
        .iter()
        .map(|&user| member_line(user, names, "-", "(Użytkownik opuścił serwer)"))
        .collect::<Vec<_>>();
    Field::new(
        format!("Zapisani ({}):", record.participants.len()),
        fit_lines(&lines, FIELD_LIMIT),
    )
}

fn start_field(record: &SignupRecord, now: DateTime<Utc>, what: &str) -> Option<Field> {
    let deadline = record.deadline?;
    let value = match record.countdown(now)? {
        Countdown::Counting(remaining) => format!(
            "Rozpoczęcie {what} o <t:{ts}:t> (za {})",
            format_remaining(remaining),
            ts = deadline.timestamp(),
        ),
        Countdown::Expired => format!("**{what} rozpoczął się**"),
    };
    Some(Field::new("Czas rozpoczęcia:", value))
}

fn control(custom_id: &'static str, label: &'static str, style: ControlStyle, disabled: bool) -> Control {
    Control {
        custom_id,
        label,
        style,
        disabled,
    }
}

/// Lays out the announcement message of a record at the given moment.
pub fn render(record: &SignupRecord, now: DateTime<Utc>, names: &Names, artwork: &Artwork) -> Announcement {
    let closed = matches!(record.countdown(now), Some(Countdown::Expired));
    let mut announcement = match &record.payload {
        Payload::Captures { image_url } => {
            let mut a = Announcement::new("CAPTURES!", "Kliknij przycisk, aby się zapisać!", WHITE);
            a.image = image_url.clone();
            a.fields.extend(start_field(record, now, "CAPT"));
            a.fields.push(participants_field(record, names));
            a.footer = Some(format!("Wystawione przez {}", record.author_name));
            a.controls = vec![
                control(CAPT_JOIN, "✅ Wpisz się", ControlStyle::Success, closed),
                control(CAPT_LEAVE, "❌ Wypisz się", ControlStyle::Danger, closed),
                control(CAPT_PICK, "🎯 Pickuj osoby", ControlStyle::Primary, false),
            ];
            a
        }
        Payload::AirDrop {
            description,
            voice_channel,
            ..
        } => {
            let mut a = Announcement::new("🎁 AirDrop!", description.clone(), WHITE);
            a.fields
                .push(Field::new("Kanał głosowy:", format!("🔊 <#{voice_channel}>")));
            a.fields.extend(start_field(record, now, "AirDrop"));
            a.fields.push(participants_field(record, names));
            a.footer = Some(format!("Wystawione przez {}", record.author_name));
            a.controls = vec![
                control(AIRDROP_JOIN, "✅ Dołącz", ControlStyle::Success, closed),
                control(AIRDROP_LEAVE, "❌ Opuść", ControlStyle::Danger, closed),
            ];
            a
        }
        Payload::Event {
            kind,
            voice_channel,
            ..
        } => {
            let (title, colour, image) = match kind {
                EventKind::Zancudo => ("Atak na FORT ZANCUDO!", RED, &artwork.zancudo),
                EventKind::Cayo => ("Atak na CAYO PERICO!", ORANGE, &artwork.cayo),
            };
            let mut a = Announcement::new(title, format!("Zapraszamy na <#{voice_channel}>!"), colour);
            a.image = Some(image.clone());
            if !record.participants.is_empty() {
                a.fields.push(participants_field(record, names));
            }
            a
        }
        Payload::Squad { title, .. } => {
            let lines = record
                .participants
                .iter()
                .enumerate()
                .map(|(index, &user)| {
                    member_line(user, names, &format!("{}-", index + 1), "(Nieznany/Opuścił serwer)")
                })
                .collect::<Vec<_>>();
            let list = if lines.is_empty() {
                "Brak członków składu.".to_owned()
            } else {
                fit_lines(&lines, DESCRIPTION_LIMIT - 32)
            };
            let mut a = Announcement::new(title.clone(), format!("Oto aktualny skład:\n\n{list}"), WHITE);
            a.fields.push(Field::new(
                "Liczba członków:",
                format!("**{}**", record.participants.len()),
            ));
            a.footer = Some(format!("Aktywowane przez {}", record.author_name));
            a.controls = vec![control(
                SQUAD_MANAGE,
                "Zarządzaj składem (ADMIN)",
                ControlStyle::Primary,
                false,
            )];
            a
        }
    };
    announcement.thumbnail = Some(artwork.logo.clone());
    announcement
}

/// Public result of a captures pick.
pub fn render_pick(
    selected: &[UserId],
    total: usize,
    names: &Names,
    picker: &str,
    picked_at: DateTime<FixedOffset>,
) -> Announcement {
    let lines = selected
        .iter()
        .enumerate()
        .map(|(index, &user)| member_line(user, names, &format!("{}.", index + 1), ""))
        .map(|line| line.trim_end().to_owned())
        .collect::<Vec<_>>();
    let mut a = Announcement::new(
        "Lista osób na captures!",
        format!("Wybrano {}/{} osób:", selected.len(), total),
        WHITE,
    );
    a.fields
        .push(Field::new("Wybrani gracze:", fit_lines(&lines, FIELD_LIMIT)));
    a.footer = Some(format!(
        "Wystawione przez {picker} • {}",
        picked_at.format("%d.%m.%Y %H:%M")
    ));
    a
}

/// Admin overview of every record.
pub fn render_overview(records: &[SignupRecord]) -> Announcement {
    let lines = records
        .iter()
        .map(|record| {
            let name = match &record.payload {
                Payload::Squad { title, .. } => title.as_str(),
                _ => record.family().label(),
            };
            format!(
                "**{} (msg {})**: {} osób",
                name,
                record.id,
                record.participants.len()
            )
        })
        .collect::<Vec<_>>();
    let description = if lines.is_empty() {
        "Brak aktywnych zapisów i składów.".to_owned()
    } else {
        fit_lines(&lines, DESCRIPTION_LIMIT)
    };
    Announcement::new("📋 Lista wszystkich zapisanych i składów", description, WHITE)
}
