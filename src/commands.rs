use chrono::{DateTime, Utc};
use poise::CreateReply;
use serenity::all::{
    ActivityData, ChannelId, CreateMessage, GuildChannel, Member, MessageId, OnlineStatus, Role,
    RoleId, UserId,
};
use tracing::{info, warn};

use crate::buttons::rerender;
use crate::discord::{components, embed};
use crate::flows::choose_enrollment;
use crate::refresher::{Announcer, PublishError};
use crate::registry::{
    parse_reference, AddOutcome, EventKind, Payload, Registry, RemoveOutcome, SignupRecord,
};
use crate::render::render_overview;
use crate::time::resolve;
use crate::{Context, Data, Error};

const AUTOCOMPLETE_MATCHES: usize = 3;

pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![
        create_capt(),
        airdrop(),
        ping_zancudo(),
        ping_cayo(),
        create_squad(),
        list_all(),
        set_status(),
        wpisz_na_capt(),
        wypisz_z_capt(),
    ]
}

async fn author_roles(ctx: Context<'_>) -> Vec<RoleId> {
    ctx.author_member()
        .await
        .map(|member| member.roles.clone())
        .unwrap_or_default()
}

async fn author_name(ctx: Context<'_>) -> String {
    match ctx.author_member().await {
        Some(member) => member.display_name().to_owned(),
        None => ctx.author().name.clone(),
    }
}

async fn is_admin(ctx: Context<'_>) -> Result<bool, Error> {
    let roles = author_roles(ctx).await;
    Ok(ctx.data().config.is_admin(ctx.author().id, &roles))
}

async fn is_status_admin(ctx: Context<'_>) -> Result<bool, Error> {
    Ok(ctx.data().config.is_status_admin(ctx.author().id))
}

async fn say(ctx: Context<'_>, content: impl Into<String>) -> Result<(), Error> {
    ctx.send(CreateReply::default().content(content).ephemeral(true))
        .await?;
    Ok(())
}

/// Posts the announcement for a new record, registers it and starts its countdown.
///
/// `draft` carries everything but the message id, which only exists once the message is sent.
async fn publish(
    ctx: Context<'_>,
    channel: ChannelId,
    content: Option<String>,
    mut draft: SignupRecord,
) -> Result<SignupRecord, Error> {
    let data = ctx.data();
    let announcement = data.announcer.render(&draft, data.refresher.now());
    let mut message = CreateMessage::new()
        .embed(embed(&announcement))
        .components(components(&announcement));
    if let Some(content) = content {
        message = message.content(content);
    }
    let message = channel.send_message(ctx, message).await?;

    draft.id = message.id;
    draft.channel_id = channel;
    let id = data.registry.create(draft.clone()).await?;
    if draft.deadline.is_some() && !draft.expired {
        data.refresher.spawn(id);
    }
    info!(
        record = %id,
        family = draft.family().label(),
        by = %ctx.author().name,
        "announcement created"
    );
    Ok(draft)
}

async fn draft(ctx: Context<'_>, payload: Payload) -> SignupRecord {
    SignupRecord::new(
        MessageId::new(ctx.id().max(1)),
        ctx.channel_id(),
        ctx.guild_id(),
        author_name(ctx).await,
        payload,
    )
}

/// Ogłasza zapisy na CAPT
#[poise::command(slash_command, rename = "create-capt", check = "is_admin")]
async fn create_capt(
    ctx: Context<'_>,
    #[description = "Godzina rozpoczęcia (HH:MM)"] czas: String,
    #[description = "Data (DD.MM.RRRR lub DD.MM), domyślnie najbliższa"] data: Option<String>,
    #[description = "Link do zdjęcia"] link_do_zdjecia: Option<String>,
) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let now = ctx.data().refresher.now();
    let deadline = resolve(&czas, data.as_deref(), now, ctx.data().config.offset)?;
    let image_url = link_do_zdjecia.filter(|url| !url.trim().is_empty());

    let record = draft(ctx, Payload::Captures { image_url })
        .await
        .with_deadline(Some(deadline), now);
    publish(ctx, ctx.channel_id(), Some("@everyone".to_owned()), record).await?;
    say(ctx, "✅ Ogłoszenie CAPT zostało wysłane.").await
}

/// Ogłasza AirDrop na wybranym kanale
#[poise::command(slash_command, check = "is_admin")]
async fn airdrop(
    ctx: Context<'_>,
    #[description = "Kanał, na który trafi ogłoszenie"]
    #[channel_types("Text", "News")]
    kanal: GuildChannel,
    #[description = "Kanał głosowy zbiórki"]
    #[channel_types("Voice")]
    glosowy: GuildChannel,
    #[description = "Rola do oznaczenia"] rola: Role,
    #[description = "Opis AirDropa"] opis: String,
    #[description = "Godzina rozpoczęcia (HH:MM)"] czas: String,
    #[description = "Data (DD.MM.RRRR lub DD.MM), domyślnie najbliższa"] data: Option<String>,
) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let now = ctx.data().refresher.now();
    let deadline = resolve(&czas, data.as_deref(), now, ctx.data().config.offset)?;

    let record = draft(
        ctx,
        Payload::AirDrop {
            description: opis,
            voice_channel: glosowy.id,
            role: rola.id,
        },
    )
    .await
    .with_deadline(Some(deadline), now);
    publish(ctx, kanal.id, Some(format!("<@&{}>", rola.id)), record).await?;
    say(ctx, format!("✅ AirDrop ogłoszony na <#{}>.", kanal.id)).await
}

async fn ping_event(ctx: Context<'_>, kind: EventKind, role: Role, voice: GuildChannel) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let record = draft(
        ctx,
        Payload::Event {
            kind,
            role: role.id,
            voice_channel: voice.id,
        },
    )
    .await;
    publish(ctx, ctx.channel_id(), Some(format!("<@&{}>", role.id)), record).await?;
    say(ctx, "✅ Ping wysłany.").await
}

/// Wzywa na atak na Fort Zancudo
#[poise::command(slash_command, rename = "ping-zancudo", check = "is_admin")]
async fn ping_zancudo(
    ctx: Context<'_>,
    #[description = "Rola do oznaczenia"] rola: Role,
    #[description = "Kanał głosowy zbiórki"]
    #[channel_types("Voice")]
    kanal: GuildChannel,
) -> Result<(), Error> {
    ping_event(ctx, EventKind::Zancudo, rola, kanal).await
}

/// Wzywa na atak na Cayo Perico
#[poise::command(slash_command, rename = "ping-cayo", check = "is_admin")]
async fn ping_cayo(
    ctx: Context<'_>,
    #[description = "Rola do oznaczenia"] rola: Role,
    #[description = "Kanał głosowy zbiórki"]
    #[channel_types("Voice")]
    kanal: GuildChannel,
) -> Result<(), Error> {
    ping_event(ctx, EventKind::Cayo, rola, kanal).await
}

/// Tworzy ogłoszenie składu
#[poise::command(slash_command, rename = "create-squad", check = "is_admin")]
async fn create_squad(
    ctx: Context<'_>,
    #[description = "Rola składu"] rola: Role,
    #[description = "Tytuł ogłoszenia"] tytul: Option<String>,
) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let title = tytul
        .filter(|title| !title.trim().is_empty())
        .unwrap_or_else(|| "Main Squad".to_owned());
    let record = draft(
        ctx,
        Payload::Squad {
            title,
            role: rola.id,
        },
    )
    .await;
    publish(ctx, ctx.channel_id(), Some(format!("<@&{}>", rola.id)), record).await?;
    say(ctx, "✅ Skład utworzony.").await
}

/// Pokazuje wszystkie aktywne zapisy i składy
#[poise::command(slash_command, rename = "list-all", check = "is_admin")]
async fn list_all(ctx: Context<'_>) -> Result<(), Error> {
    let records = ctx.data().registry.list().await;
    let overview = render_overview(&records);
    ctx.send(
        CreateReply::default()
            .embed(embed(&overview))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum Status {
    #[name = "online"]
    Online,
    #[name = "idle"]
    Idle,
    #[name = "dnd"]
    Dnd,
    #[name = "invisible"]
    Invisible,
}

impl From<Status> for OnlineStatus {
    fn from(status: Status) -> Self {
        match status {
            Status::Online => OnlineStatus::Online,
            Status::Idle => OnlineStatus::Idle,
            Status::Dnd => OnlineStatus::DoNotDisturb,
            Status::Invisible => OnlineStatus::Invisible,
        }
    }
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum ActivityKind {
    #[name = "gra"]
    Gra,
    #[name = "slucha"]
    Slucha,
    #[name = "patrzy"]
    Patrzy,
    #[name = "stream"]
    Stream,
}

/// Zmienia status i aktywność bota
#[poise::command(slash_command, rename = "set-status", check = "is_status_admin")]
async fn set_status(
    ctx: Context<'_>,
    #[description = "Status"] status: Status,
    #[description = "Opis aktywności"] opis: Option<String>,
    #[description = "Rodzaj aktywności"] typ: Option<ActivityKind>,
    #[description = "Link do streama (dla typu stream)"] url_stream: Option<String>,
) -> Result<(), Error> {
    let opis = opis.filter(|text| !text.trim().is_empty());
    let activity = match (opis, typ.unwrap_or(ActivityKind::Gra)) {
        (None, _) => None,
        (Some(text), ActivityKind::Gra) => Some(ActivityData::playing(text)),
        (Some(text), ActivityKind::Slucha) => Some(ActivityData::listening(text)),
        (Some(text), ActivityKind::Patrzy) => Some(ActivityData::watching(text)),
        (Some(text), ActivityKind::Stream) => {
            let Some(url) = url_stream.filter(|url| url.starts_with("http")) else {
                return say(ctx, "❌ Dla typu `stream` podaj poprawny `url_stream` (http/https).").await;
            };
            Some(ActivityData::streaming(text, url.as_str())?)
        }
    };
    ctx.serenity_context()
        .set_presence(activity, OnlineStatus::from(status));
    info!(?status, by = %ctx.author().name, "presence changed");
    say(ctx, "✅ Status bota został zmieniony.").await
}

async fn autocomplete_enrollment<'a>(
    ctx: Context<'_>,
    partial: &'a str,
) -> impl Iterator<Item = String> + 'a {
    let limit = if partial.trim().is_empty() {
        crate::flows::MAX_OPTIONS
    } else {
        AUTOCOMPLETE_MATCHES
    };
    ctx.data()
        .registry
        .search(partial, limit)
        .await
        .into_iter()
        .map(|record| record.label())
}

const NOT_FOUND: &str = "❌ Błąd: Nie znaleziono aktywnego zapisu o tym ID.";

/// Resolves the target record from the autocomplete value, or asks the admin to pick one.
/// Squads are not enrollments and never resolve.
async fn target<'a>(
    ctx: Context<'a>,
    zapis: Option<String>,
    prompt: String,
) -> Result<Option<(Option<poise::ReplyHandle<'a>>, SignupRecord)>, Error> {
    let Some(zapis) = zapis else {
        return Ok(choose_enrollment(ctx, prompt)
            .await?
            .map(|(handle, record)| (Some(handle), record)));
    };
    let record = match parse_reference(&zapis) {
        Some(id) => ctx.data().registry.find_enrollment(id).await,
        None => None,
    };
    match record {
        Some(record) => Ok(Some((None, record))),
        None => {
            say(ctx, NOT_FOUND).await?;
            Ok(None)
        }
    }
}

async fn finish(
    ctx: Context<'_>,
    handle: Option<poise::ReplyHandle<'_>>,
    content: String,
) -> Result<(), Error> {
    match handle {
        Some(handle) => {
            handle
                .edit(
                    ctx,
                    CreateReply::default()
                        .content(content)
                        .components(Vec::new()),
                )
                .await?;
            Ok(())
        }
        None => say(ctx, content).await,
    }
}

/// Note appended to an admin's reply when the announcement could not be re-rendered.
fn refresh_note(result: Result<(), PublishError>, id: MessageId) -> &'static str {
    match result {
        Ok(()) => "",
        Err(PublishError::Gone) => " Ogłoszenie nie istnieje, nie można go odświeżyć.",
        Err(PublishError::Other(e)) => {
            warn!(record = %id, "could not refresh announcement: {e:#}");
            " Nie udało się odświeżyć ogłoszenia."
        }
    }
}

/// Signs `user` up for the enrollment behind `id` on an admin's behalf and returns the reply.
pub async fn admin_add(
    registry: &Registry,
    announcer: &dyn Announcer,
    now: DateTime<Utc>,
    id: MessageId,
    user: UserId,
    name: &str,
) -> String {
    let Some(record) = registry.find_enrollment(id).await else {
        return NOT_FOUND.to_owned();
    };
    let family = record.family();
    match registry.add_participant(family, id, user).await {
        AddOutcome::Added => {
            info!(record = %id, member = %name, "member added");
            let note = refresh_note(rerender(registry, announcer, id, now).await, id);
            format!(
                "✅ Pomyślnie wpisano **{name}** na **{}** (ID: `{id}`).{note}",
                family.label()
            )
        }
        AddOutcome::AlreadyPresent => {
            format!("⚠️ **{name}** jest już zapisany(a) na **{}**.", family.label())
        }
        AddOutcome::RecordMissing => NOT_FOUND.to_owned(),
    }
}

/// Removes `user` from the enrollment behind `id` on an admin's behalf and returns the reply.
pub async fn admin_remove(
    registry: &Registry,
    announcer: &dyn Announcer,
    now: DateTime<Utc>,
    id: MessageId,
    user: UserId,
    name: &str,
) -> String {
    let Some(record) = registry.find_enrollment(id).await else {
        return NOT_FOUND.to_owned();
    };
    let family = record.family();
    match registry.remove_participant(family, id, user).await {
        RemoveOutcome::Removed => {
            info!(record = %id, member = %name, "member removed");
            let note = refresh_note(rerender(registry, announcer, id, now).await, id);
            format!(
                "✅ Pomyślnie wypisano **{name}** z **{}** (ID: `{id}`).{note}",
                family.label()
            )
        }
        RemoveOutcome::NotPresent => {
            format!("⚠️ **{name}** nie jest zapisany(a) na **{}**.", family.label())
        }
        RemoveOutcome::RecordMissing => NOT_FOUND.to_owned(),
    }
}

/// Wpisuje członka na wybrany zapis
#[poise::command(slash_command, rename = "wpisz-na-capt", check = "is_admin")]
async fn wpisz_na_capt(
    ctx: Context<'_>,
    #[description = "Członek do wpisania"] czlonek: Member,
    #[description = "Zapis"]
    #[autocomplete = autocomplete_enrollment]
    zapis: Option<String>,
) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let name = czlonek.display_name().to_owned();
    let prompt = format!("Wybierz zapis, na który wpisać **{name}**:");
    let Some((handle, record)) = target(ctx, zapis, prompt).await? else {
        return Ok(());
    };

    let data = ctx.data();
    info!(record = %record.id, by = %ctx.author().name, "admin sign-up");
    let content = admin_add(
        &data.registry,
        data.announcer.as_ref(),
        data.refresher.now(),
        record.id,
        czlonek.user.id,
        &name,
    )
    .await;
    finish(ctx, handle, content).await
}

/// Wypisuje członka z wybranego zapisu
#[poise::command(slash_command, rename = "wypisz-z-capt", check = "is_admin")]
async fn wypisz_z_capt(
    ctx: Context<'_>,
    #[description = "Członek do wypisania"] czlonek: Member,
    #[description = "Zapis"]
    #[autocomplete = autocomplete_enrollment]
    zapis: Option<String>,
) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let name = czlonek.display_name().to_owned();
    let prompt = format!("Wybierz zapis, z którego wypisać **{name}**:");
    let Some((handle, record)) = target(ctx, zapis, prompt).await? else {
        return Ok(());
    };

    let data = ctx.data();
    info!(record = %record.id, by = %ctx.author().name, "admin removal");
    let content = admin_remove(
        &data.registry,
        data.announcer.as_ref(),
        data.refresher.now(),
        record.id,
        czlonek.user.id,
        &name,
    )
    .await;
    finish(ctx, handle, content).await
}
