use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::all::{
    ButtonStyle, Cache, CreateActionRow, CreateButton, CreateEmbed, CreateEmbedFooter,
    CreateMessage, EditMessage, GuildId, Http, HttpError, UserId,
};

use crate::config::Artwork;
use crate::refresher::{Announcer, PublishError};
use crate::registry::{Payload, SignupRecord};
use crate::render::{render, Announcement, ControlStyle, Names};

const UNKNOWN_CHANNEL: isize = 10003;
const UNKNOWN_MESSAGE: isize = 10008;
const UNKNOWN_INTERACTION: isize = 10062;
/// Discord caps message content at 2000 characters.
const MESSAGE_LIMIT: usize = 2000;

pub fn embed(announcement: &Announcement) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(&announcement.title)
        .description(&announcement.description)
        .colour(announcement.colour);
    if let Some(thumbnail) = &announcement.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }
    if let Some(image) = &announcement.image {
        embed = embed.image(image);
    }
    for field in &announcement.fields {
        embed = embed.field(&field.name, &field.value, false);
    }
    if let Some(footer) = &announcement.footer {
        embed = embed.footer(CreateEmbedFooter::new(footer));
    }
    embed
}

pub fn components(announcement: &Announcement) -> Vec<CreateActionRow> {
    if announcement.controls.is_empty() {
        return Vec::new();
    }
    let buttons = announcement
        .controls
        .iter()
        .map(|control| {
            CreateButton::new(control.custom_id)
                .label(control.label)
                .style(match control.style {
                    ControlStyle::Primary => ButtonStyle::Primary,
                    ControlStyle::Success => ButtonStyle::Success,
                    ControlStyle::Danger => ButtonStyle::Danger,
                })
                .disabled(control.disabled)
        })
        .collect();
    vec![CreateActionRow::Buttons(buttons)]
}

/// Display names of the given users, from the guild member cache.
pub fn member_names(cache: &Cache, guild_id: Option<GuildId>, users: &[UserId]) -> Names {
    let Some(guild) = guild_id.and_then(|id| cache.guild(id)) else {
        return Names::new();
    };
    users
        .iter()
        .filter_map(|user| {
            guild
                .members
                .get(user)
                .map(|member| (*user, member.display_name().to_owned()))
        })
        .collect()
}

/// `headline` followed by as many participant mentions as fit in one message; the rest are
/// summed up at the end.
fn mention_message(headline: &str, users: &[UserId]) -> String {
    let mut out = headline.to_owned();
    for (index, user) in users.iter().enumerate() {
        let mention = format!(" <@{user}>");
        let rest = users.len() - index;
        let reserve = if rest > 1 {
            format!(" … i {rest} więcej").chars().count()
        } else {
            0
        };
        if out.chars().count() + mention.chars().count() + reserve > MESSAGE_LIMIT {
            out.push_str(&format!(" … i {rest} więcej"));
            break;
        }
        out.push_str(&mention);
    }
    out
}

fn json_error_code(error: &serenity::Error) -> Option<isize> {
    match error {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => Some(response.error.code),
        _ => None,
    }
}

/// The message or its channel was deleted.
pub fn is_gone(error: &serenity::Error) -> bool {
    matches!(json_error_code(error), Some(UNKNOWN_CHANNEL | UNKNOWN_MESSAGE))
}

/// The interaction token expired before we could answer.
pub fn is_expired_interaction(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<serenity::Error>()
        .and_then(json_error_code)
        == Some(UNKNOWN_INTERACTION)
}

fn classify(error: serenity::Error) -> PublishError {
    if is_gone(&error) {
        PublishError::Gone
    } else {
        PublishError::Other(error.into())
    }
}

/// Renders records against the live guild and edits their announcement messages.
pub struct DiscordAnnouncer {
    http: Arc<Http>,
    cache: Arc<Cache>,
    artwork: Artwork,
}

impl DiscordAnnouncer {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>, artwork: Artwork) -> Self {
        Self {
            http,
            cache,
            artwork,
        }
    }

    pub fn names(&self, guild_id: Option<GuildId>, users: &[UserId]) -> Names {
        member_names(&self.cache, guild_id, users)
    }

    pub fn render(&self, record: &SignupRecord, now: DateTime<Utc>) -> Announcement {
        let names = self.names(record.guild_id, &record.participants);
        render(record, now, &names, &self.artwork)
    }
}

#[async_trait]
impl Announcer for DiscordAnnouncer {
    async fn edit(
        &self,
        record: &SignupRecord,
        now: DateTime<Utc>,
        content: Option<String>,
    ) -> Result<(), PublishError> {
        let announcement = self.render(record, now);
        let mut edit = EditMessage::new()
            .embed(embed(&announcement))
            .components(components(&announcement));
        if let Some(content) = content {
            edit = edit.content(content);
        }
        record
            .channel_id
            .edit_message(&self.http, record.id, edit)
            .await
            .map(drop)
            .map_err(classify)
    }

    async fn announce_expiry(&self, record: &SignupRecord) -> Result<(), PublishError> {
        let content = match &record.payload {
            Payload::Captures { .. } if !record.participants.is_empty() => {
                mention_message("**CAPT rozpoczął się!**", &record.participants)
            }
            Payload::AirDrop {
                role,
                voice_channel,
                ..
            } => format!("<@&{role}> **AirDrop rozpoczął się!** Wbijajcie na <#{voice_channel}>"),
            _ => return Ok(()),
        };
        record
            .channel_id
            .send_message(
                &self.http,
                CreateMessage::new()
                    .content(content)
                    .reference_message((record.channel_id, record.id)),
            )
            .await
            .map(drop)
            .map_err(classify)
    }
}
