//! Ephemeral select-then-confirm sessions.
//!
//! Each flow tags its components with a `{flow}:` prefix, where `flow` is the id of the
//! interaction that opened it, and only collects events carrying that prefix from the same
//! user. The pending selection lives in the collector loop, so two admins working on the
//! same announcement never see each other's choices.

use std::time::Duration;

use chrono::{DateTime, Utc};
use poise::{CreateReply, ReplyHandle};
use serenity::all::{
    ButtonStyle, ComponentInteraction, ComponentInteractionCollector, ComponentInteractionDataKind,
    CreateActionRow, CreateButton, CreateInteractionResponse, CreateInteractionResponseMessage,
    CreateMessage, CreateSelectMenu, CreateSelectMenuKind, CreateSelectMenuOption,
    EditInteractionResponse, MessageId, RoleId, UserId,
};
use tracing::{info, warn};

use crate::config::Config;
use crate::discord::embed;
use crate::refresher::{Announcer, PublishError};
use crate::registry::{Family, Payload, Registry, SignupRecord};
use crate::render::render_pick;
use crate::{Context, Data, Error};

pub const FLOW_TIMEOUT: Duration = Duration::from_secs(180);
/// Discord allows at most 25 options in a select menu.
pub const MAX_OPTIONS: usize = 25;

pub const DENIED: &str = "⛔ Brak uprawnień!";
pub const STALE: &str =
    "❌ Błąd: Dane zapisu zaginęły po restarcie bota. Spróbuj utworzyć nowy zapis.";
const TIMED_OUT: &str = "⌛ Czas minął. Uruchom akcję ponownie.";
const SQUAD_MISSING: &str = "❌ Błąd: Nie znaleziono danych tego składu.";

/// Who may open a flow from an announcement button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Pick,
    Roster,
}

impl Gate {
    pub fn allows(self, config: &Config, user: UserId, roles: &[RoleId]) -> bool {
        match self {
            Self::Pick => config.can_pick(user, roles),
            Self::Roster => config.is_admin(user, roles),
        }
    }
}

/// The captures record a pick session would work on, or the reply refusing it.
pub async fn open_pick(
    registry: &Registry,
    config: &Config,
    user: UserId,
    roles: &[RoleId],
    id: MessageId,
) -> Result<SignupRecord, &'static str> {
    if !Gate::Pick.allows(config, user, roles) {
        return Err(DENIED);
    }
    match registry.get(Family::Captures, id).await {
        None => Err(STALE),
        Some(record) if record.participants.is_empty() => Err("⚠️ Nikt się jeszcze nie zapisał!"),
        Some(record) => Ok(record),
    }
}

/// The squad a roster session would edit, or the reply refusing it.
pub async fn open_roster(
    registry: &Registry,
    config: &Config,
    user: UserId,
    roles: &[RoleId],
    id: MessageId,
) -> Result<SignupRecord, &'static str> {
    if !Gate::Roster.allows(config, user, roles) {
        return Err(DENIED);
    }
    registry.get(Family::Squad, id).await.ok_or(SQUAD_MISSING)
}

/// Replaces the squad roster and re-renders the announcement with a role ping.
pub async fn apply_roster(
    registry: &Registry,
    announcer: &dyn Announcer,
    now: DateTime<Utc>,
    id: MessageId,
    users: &[UserId],
) -> &'static str {
    let Some(updated) = registry
        .replace_participants(Family::Squad, id, users.iter().copied())
        .await
    else {
        return SQUAD_MISSING;
    };
    info!(record = %id, members = updated.participants.len(), "squad roster replaced");
    let content = match &updated.payload {
        Payload::Squad { role, .. } => Some(format!("<@&{role}> **Zaktualizowano Skład!**")),
        _ => None,
    };
    match announcer.edit(&updated, now, content).await {
        Ok(()) => "✅ Skład został pomyślnie zaktualizowany!",
        Err(PublishError::Gone) => {
            "❌ Błąd: Nie można odświeżyć wiadomości składu. Została usunięta?"
        }
        Err(PublishError::Other(e)) => {
            warn!(record = %id, "could not refresh squad: {e:#}");
            "⚠️ Skład zapisany, ale nie udało się odświeżyć wiadomości."
        }
    }
}

async fn next_event(
    ctx: &serenity::all::Context,
    user: UserId,
    flow: &str,
) -> Option<ComponentInteraction> {
    let prefix = format!("{flow}:");
    ComponentInteractionCollector::new(ctx)
        .author_id(user)
        .timeout(FLOW_TIMEOUT)
        .filter(move |mci| mci.data.custom_id.starts_with(&prefix))
        .await
}

fn string_values(kind: &ComponentInteractionDataKind) -> Vec<String> {
    match kind {
        ComponentInteractionDataKind::StringSelect { values } => values.clone(),
        _ => Vec::new(),
    }
}

fn confirm_row(id: &str, label: &str) -> CreateActionRow {
    CreateActionRow::Buttons(vec![CreateButton::new(id)
        .label(label)
        .style(ButtonStyle::Success)])
}

pub fn member_roles(mci: &ComponentInteraction) -> Vec<RoleId> {
    mci.member
        .as_ref()
        .map(|member| member.roles.clone())
        .unwrap_or_default()
}

pub async fn reply_ephemeral(
    ctx: &serenity::all::Context,
    mci: &ComponentInteraction,
    content: impl Into<String>,
) -> Result<(), Error> {
    mci.create_response(
        ctx,
        CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content(content)
                .ephemeral(true),
        ),
    )
    .await?;
    Ok(())
}

async fn close(
    ctx: &serenity::all::Context,
    mci: &ComponentInteraction,
    content: &str,
) -> Result<(), Error> {
    mci.create_response(
        ctx,
        CreateInteractionResponse::UpdateMessage(
            CreateInteractionResponseMessage::new()
                .content(content)
                .components(Vec::new()),
        ),
    )
    .await?;
    Ok(())
}

async fn time_out(ctx: &serenity::all::Context, opener: &ComponentInteraction) -> Result<(), Error> {
    opener
        .edit_response(
            ctx,
            EditInteractionResponse::new()
                .content(TIMED_OUT)
                .components(Vec::new()),
        )
        .await?;
    Ok(())
}

/// Lets an admin or picker choose who plays from the captures sign-up list.
pub async fn pick_players(
    ctx: serenity::all::Context,
    data: Data,
    opener: ComponentInteraction,
) -> Result<(), Error> {
    let ctx = &ctx;
    let opened = open_pick(
        &data.registry,
        &data.config,
        opener.user.id,
        &member_roles(&opener),
        opener.message.id,
    )
    .await;
    let record = match opened {
        Ok(record) => record,
        Err(reply) => return reply_ephemeral(ctx, &opener, reply).await,
    };

    let names = data.announcer.names(record.guild_id, &record.participants);
    let options = record
        .participants
        .iter()
        .take(MAX_OPTIONS)
        .map(|user| {
            let label = names.get(user).cloned().unwrap_or_else(|| user.to_string());
            CreateSelectMenuOption::new(label, user.to_string())
        })
        .collect::<Vec<_>>();
    let max = options.len() as u8;

    let flow = opener.id.to_string();
    let select_id = format!("{flow}:select");
    let confirm_id = format!("{flow}:confirm");
    let components = vec![
        CreateActionRow::SelectMenu(
            CreateSelectMenu::new(&select_id, CreateSelectMenuKind::String { options })
                .placeholder("Wybierz graczy")
                .min_values(1)
                .max_values(max),
        ),
        confirm_row(&confirm_id, "✅ Zatwierdź wybór"),
    ];
    opener
        .create_response(
            ctx,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(format!(
                        "Wybierz graczy na CAPT ({} zapisanych):",
                        record.participants.len()
                    ))
                    .components(components)
                    .ephemeral(true),
            ),
        )
        .await?;

    let mut pending: Vec<UserId> = Vec::new();
    while let Some(event) = next_event(ctx, opener.user.id, &flow).await {
        if event.data.custom_id == select_id {
            pending = string_values(&event.data.kind)
                .iter()
                .filter_map(|value| value.parse::<u64>().ok())
                .map(UserId::new)
                .collect();
            event
                .create_response(ctx, CreateInteractionResponse::Acknowledge)
                .await?;
        } else if event.data.custom_id == confirm_id {
            if pending.is_empty() {
                reply_ephemeral(ctx, &event, "⚠️ Najpierw wybierz graczy z listy!").await?;
                continue;
            }
            let picker = event
                .member
                .as_ref()
                .map(|member| member.display_name().to_owned())
                .unwrap_or_else(|| event.user.name.clone());
            let names = data.announcer.names(record.guild_id, &pending);
            let picked_at = data.refresher.now().with_timezone(&data.config.offset);
            let result = render_pick(&pending, record.participants.len(), &names, &picker, picked_at);
            record
                .channel_id
                .send_message(ctx, CreateMessage::new().embed(embed(&result)))
                .await?;
            info!(record = %record.id, picked = pending.len(), by = %picker, "captures pick posted");
            return close(ctx, &event, "✅ Lista została wysłana.").await;
        }
    }
    time_out(ctx, &opener).await
}

/// Replaces a squad's member list through a user select pre-filled with the current roster.
pub async fn edit_roster(
    ctx: serenity::all::Context,
    data: Data,
    opener: ComponentInteraction,
) -> Result<(), Error> {
    let ctx = &ctx;
    let opened = open_roster(
        &data.registry,
        &data.config,
        opener.user.id,
        &member_roles(&opener),
        opener.message.id,
    )
    .await;
    let record = match opened {
        Ok(record) => record,
        Err(reply) => return reply_ephemeral(ctx, &opener, reply).await,
    };

    let flow = opener.id.to_string();
    let select_id = format!("{flow}:select");
    let confirm_id = format!("{flow}:confirm");
    let mut pending = record
        .participants
        .iter()
        .copied()
        .take(MAX_OPTIONS)
        .collect::<Vec<_>>();
    let components = vec![
        CreateActionRow::SelectMenu(
            CreateSelectMenu::new(
                &select_id,
                CreateSelectMenuKind::User {
                    default_users: Some(pending.clone()),
                },
            )
            .placeholder("Wybierz członków składu")
            .min_values(0)
            .max_values(MAX_OPTIONS as u8),
        ),
        confirm_row(&confirm_id, "✅ Potwierdź edycję"),
    ];
    opener
        .create_response(
            ctx,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content("Wybierz listę członków składu (max 25), potem potwierdź.")
                    .components(components)
                    .ephemeral(true),
            ),
        )
        .await?;

    while let Some(event) = next_event(ctx, opener.user.id, &flow).await {
        if event.data.custom_id == select_id {
            if let ComponentInteractionDataKind::UserSelect { values } = &event.data.kind {
                pending = values.clone();
            }
            event
                .create_response(ctx, CreateInteractionResponse::Acknowledge)
                .await?;
        } else if event.data.custom_id == confirm_id {
            let reply = apply_roster(
                &data.registry,
                data.announcer.as_ref(),
                data.refresher.now(),
                record.id,
                &pending,
            )
            .await;
            return close(ctx, &event, reply).await;
        }
    }
    time_out(ctx, &opener).await
}

/// Asks the invoking admin which enrollment to act on. `None` when there is nothing to choose
/// from or the admin walked away; the reply has then already been updated.
pub async fn choose_enrollment<'a>(
    ctx: Context<'a>,
    prompt: String,
) -> Result<Option<(ReplyHandle<'a>, SignupRecord)>, Error> {
    let enrollments = ctx.data().registry.enrollments().await;
    if enrollments.is_empty() {
        ctx.send(
            CreateReply::default()
                .content("⚠️ Brak aktywnych zapisów.")
                .ephemeral(true),
        )
        .await?;
        return Ok(None);
    }

    let flow = ctx.id().to_string();
    let select_id = format!("{flow}:select");
    let confirm_id = format!("{flow}:confirm");
    let options = enrollments
        .iter()
        .rev()
        .take(MAX_OPTIONS)
        .map(|record| CreateSelectMenuOption::new(record.label(), record.id.to_string()))
        .collect();
    let handle = ctx
        .send(
            CreateReply::default()
                .content(prompt)
                .components(vec![
                    CreateActionRow::SelectMenu(
                        CreateSelectMenu::new(&select_id, CreateSelectMenuKind::String { options })
                            .placeholder("Wybierz zapis"),
                    ),
                    confirm_row(&confirm_id, "✅ Zatwierdź"),
                ])
                .ephemeral(true),
        )
        .await?;

    let serenity_ctx = ctx.serenity_context();
    let mut pending: Option<MessageId> = None;
    while let Some(event) = next_event(serenity_ctx, ctx.author().id, &flow).await {
        if event.data.custom_id == select_id {
            pending = string_values(&event.data.kind)
                .first()
                .and_then(|value| value.parse::<u64>().ok())
                .map(MessageId::new);
            event
                .create_response(ctx, CreateInteractionResponse::Acknowledge)
                .await?;
        } else if event.data.custom_id == confirm_id {
            let Some(id) = pending else {
                reply_ephemeral(serenity_ctx, &event, "⚠️ Najpierw wybierz zapis z listy!").await?;
                continue;
            };
            event
                .create_response(ctx, CreateInteractionResponse::Acknowledge)
                .await?;
            return match ctx.data().registry.find_enrollment(id).await {
                Some(record) => Ok(Some((handle, record))),
                None => {
                    handle
                        .edit(
                            ctx,
                            CreateReply::default()
                                .content("❌ Błąd: Nie znaleziono aktywnego zapisu o tym ID.")
                                .components(Vec::new()),
                        )
                        .await?;
                    Ok(None)
                }
            };
        }
    }
    handle
        .edit(
            ctx,
            CreateReply::default()
                .content(TIMED_OUT)
                .components(Vec::new()),
        )
        .await?;
    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serenity::all::ChannelId;

    use super::*;
    use crate::refresher::testing::{Call, Recorder};

    const ADMIN_ROLE: RoleId = RoleId::new(10);
    const PICK_ROLE: RoleId = RoleId::new(11);

    fn config() -> Config {
        let vars = HashMap::from([
            ("DISCORD_BOT_TOKEN", "abc"),
            ("ADMIN_ROLE_ID", "10"),
            ("PICK_ROLE_ID", "11"),
        ]);
        Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap()
    }

    async fn registry_with(id: u64, payload: Payload, members: &[u64]) -> Registry {
        let registry = Registry::new();
        let mut record = SignupRecord::new(
            MessageId::new(id),
            ChannelId::new(1),
            None,
            "Admin",
            payload,
        );
        record.participants = members.iter().copied().map(UserId::new).collect();
        registry.create(record).await.unwrap();
        registry
    }

    fn squad() -> Payload {
        Payload::Squad {
            title: "Main Squad".to_owned(),
            role: RoleId::new(9),
        }
    }

    #[test]
    fn gates_follow_the_role_markers() {
        let config = config();
        let user = UserId::new(1);
        assert!(Gate::Pick.allows(&config, user, &[PICK_ROLE]));
        assert!(Gate::Pick.allows(&config, user, &[ADMIN_ROLE]));
        assert!(!Gate::Roster.allows(&config, user, &[PICK_ROLE]));
        assert!(Gate::Roster.allows(&config, user, &[ADMIN_ROLE]));
        assert!(!Gate::Pick.allows(&config, user, &[]));
    }

    #[tokio::test]
    async fn denied_pick_is_refused_before_anything_else() {
        let registry =
            registry_with(50, Payload::Captures { image_url: None }, &[1, 2]).await;
        let opened =
            open_pick(&registry, &config(), UserId::new(3), &[], MessageId::new(50)).await;

        assert_eq!(opened.unwrap_err(), DENIED);
        let record = registry.find(MessageId::new(50)).await.unwrap();
        assert_eq!(record.participants, vec![UserId::new(1), UserId::new(2)]);
    }

    #[tokio::test]
    async fn pick_needs_sign_ups() {
        let registry = registry_with(50, Payload::Captures { image_url: None }, &[]).await;
        let config = config();

        let empty = open_pick(&registry, &config, UserId::new(3), &[PICK_ROLE], MessageId::new(50)).await;
        let missing = open_pick(&registry, &config, UserId::new(3), &[PICK_ROLE], MessageId::new(51)).await;

        assert_eq!(empty.unwrap_err(), "⚠️ Nikt się jeszcze nie zapisał!");
        assert_eq!(missing.unwrap_err(), STALE);
    }

    #[tokio::test]
    async fn denied_roster_edit_leaves_the_squad_alone() {
        let registry = registry_with(60, squad(), &[1]).await;
        let opened = open_roster(
            &registry,
            &config(),
            UserId::new(3),
            &[PICK_ROLE],
            MessageId::new(60),
        )
        .await;

        assert_eq!(opened.unwrap_err(), DENIED);
        let squad = registry.find(MessageId::new(60)).await.unwrap();
        assert_eq!(squad.participants, vec![UserId::new(1)]);
    }

    #[tokio::test]
    async fn roster_is_not_opened_on_captures() {
        let registry =
            registry_with(50, Payload::Captures { image_url: None }, &[1]).await;
        let opened = open_roster(
            &registry,
            &config(),
            UserId::new(3),
            &[ADMIN_ROLE],
            MessageId::new(50),
        )
        .await;

        assert_eq!(opened.unwrap_err(), SQUAD_MISSING);
    }

    #[tokio::test]
    async fn roster_update_pings_the_squad_role() {
        let registry = registry_with(60, squad(), &[1]).await;
        let recorder = Recorder::default();
        let users = [UserId::new(2), UserId::new(3), UserId::new(2)];

        let reply = apply_roster(&registry, &recorder, Utc::now(), MessageId::new(60), &users).await;

        assert_eq!(reply, "✅ Skład został pomyślnie zaktualizowany!");
        let squad = registry.find(MessageId::new(60)).await.unwrap();
        assert_eq!(squad.participants, vec![UserId::new(2), UserId::new(3)]);
        match recorder.calls().as_slice() {
            [Call::Publish { content, .. }] => {
                assert_eq!(content.as_deref(), Some("<@&9> **Zaktualizowano Skład!**"));
            }
            other => panic!("unexpected calls {other:?}"),
        }
    }

    #[tokio::test]
    async fn roster_on_deleted_message_still_saves() {
        let registry = registry_with(60, squad(), &[1]).await;
        let recorder = Recorder::gone();

        let reply =
            apply_roster(&registry, &recorder, Utc::now(), MessageId::new(60), &[UserId::new(4)]).await;

        assert_eq!(
            reply,
            "❌ Błąd: Nie można odświeżyć wiadomości składu. Została usunięta?"
        );
        let squad = registry.find(MessageId::new(60)).await.unwrap();
        assert_eq!(squad.participants, vec![UserId::new(4)]);
    }

    #[tokio::test]
    async fn roster_on_missing_squad_reports_it() {
        let registry = Registry::new();
        let recorder = Recorder::default();

        let reply =
            apply_roster(&registry, &recorder, Utc::now(), MessageId::new(61), &[UserId::new(4)]).await;

        assert_eq!(reply, SQUAD_MISSING);
        assert!(recorder.calls().is_empty());
    }
}
