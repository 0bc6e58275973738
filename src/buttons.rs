use chrono::{DateTime, Utc};
use serenity::all::{
    ComponentInteraction, Context, CreateInteractionResponse, CreateInteractionResponseMessage,
    EditInteractionResponse, MessageId, UserId,
};
use tracing::{debug, error, info, warn};

use crate::flows::{self, STALE};
use crate::refresher::{Announcer, PublishError};
use crate::registry::{AddOutcome, Family, Registry, RemoveOutcome};
use crate::render::{AIRDROP_JOIN, AIRDROP_LEAVE, CAPT_JOIN, CAPT_LEAVE, CAPT_PICK, SQUAD_MANAGE};
use crate::{Data, Error};

pub const RENDER_FAILED: &str = "⚠️ Zmiana zapisana, ale nie udało się odświeżyć ogłoszenia (wiadomość mogła zostać usunięta).";

/// Routes a button press on one of our announcements. Presses on other components are ignored.
pub async fn dispatch(ctx: &Context, data: &Data, mci: &ComponentInteraction) -> Result<(), Error> {
    match mci.data.custom_id.as_str() {
        CAPT_JOIN => join(ctx, data, mci, Family::Captures).await,
        AIRDROP_JOIN => join(ctx, data, mci, Family::AirDrop).await,
        CAPT_LEAVE => leave(ctx, data, mci, Family::Captures).await,
        AIRDROP_LEAVE => leave(ctx, data, mci, Family::AirDrop).await,
        CAPT_PICK => {
            spawn_flow("pick", flows::pick_players(ctx.clone(), data.clone(), mci.clone()));
            Ok(())
        }
        SQUAD_MANAGE => {
            spawn_flow("roster", flows::edit_roster(ctx.clone(), data.clone(), mci.clone()));
            Ok(())
        }
        other => {
            debug!(custom_id = other, "ignoring component");
            Ok(())
        }
    }
}

/// Flows wait on their collectors for minutes, so they must not block the event handler.
fn spawn_flow(
    name: &'static str,
    flow: impl std::future::Future<Output = Result<(), Error>> + Send + 'static,
) {
    tokio::spawn(async move {
        if let Err(e) = flow.await {
            error!(flow = name, "{e:?}");
        }
    });
}

async fn defer(ctx: &Context, mci: &ComponentInteraction) -> Result<(), Error> {
    mci.create_response(
        ctx,
        CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new().ephemeral(true)),
    )
    .await?;
    Ok(())
}

async fn answer(ctx: &Context, mci: &ComponentInteraction, content: &str) -> Result<(), Error> {
    mci.edit_response(ctx, EditInteractionResponse::new().content(content))
        .await?;
    Ok(())
}

/// Re-renders the announcement of `id` after its members changed. A record that vanished in
/// the meantime counts as a deleted announcement.
pub async fn rerender(
    registry: &Registry,
    announcer: &dyn Announcer,
    id: MessageId,
    now: DateTime<Utc>,
) -> Result<(), PublishError> {
    match registry.find(id).await {
        Some(record) => announcer.publish(&record, now).await,
        None => Err(PublishError::Gone),
    }
}

fn rendered(result: Result<(), PublishError>, id: MessageId, done: &'static str) -> &'static str {
    match result {
        Ok(()) => done,
        Err(PublishError::Gone) => RENDER_FAILED,
        Err(PublishError::Other(e)) => {
            warn!(record = %id, "could not refresh announcement: {e:#}");
            RENDER_FAILED
        }
    }
}

/// Signs `user` up for the record behind `id` and returns the reply for them.
pub async fn join_reply(
    registry: &Registry,
    announcer: &dyn Announcer,
    now: DateTime<Utc>,
    family: Family,
    id: MessageId,
    user: UserId,
) -> &'static str {
    match registry.add_participant(family, id, user).await {
        AddOutcome::Added => {
            info!(record = %id, %user, "{} join", family.label());
            let result = rerender(registry, announcer, id, now).await;
            rendered(result, id, "✅ Zostałeś(aś) zapisany(a)!")
        }
        AddOutcome::AlreadyPresent => "⚠️ Jesteś już zapisany(a)!",
        AddOutcome::RecordMissing => STALE,
    }
}

pub async fn leave_reply(
    registry: &Registry,
    announcer: &dyn Announcer,
    now: DateTime<Utc>,
    family: Family,
    id: MessageId,
    user: UserId,
) -> &'static str {
    match registry.remove_participant(family, id, user).await {
        RemoveOutcome::Removed => {
            info!(record = %id, %user, "{} leave", family.label());
            let result = rerender(registry, announcer, id, now).await;
            rendered(result, id, "✅ Zostałeś(aś) wypisany(a).")
        }
        RemoveOutcome::NotPresent => "⚠️ Nie jesteś zapisany(a).",
        RemoveOutcome::RecordMissing => STALE,
    }
}

async fn join(ctx: &Context, data: &Data, mci: &ComponentInteraction, family: Family) -> Result<(), Error> {
    defer(ctx, mci).await?;
    let reply = join_reply(
        &data.registry,
        data.announcer.as_ref(),
        data.refresher.now(),
        family,
        mci.message.id,
        mci.user.id,
    )
    .await;
    answer(ctx, mci, reply).await
}

async fn leave(ctx: &Context, data: &Data, mci: &ComponentInteraction, family: Family) -> Result<(), Error> {
    defer(ctx, mci).await?;
    let reply = leave_reply(
        &data.registry,
        data.announcer.as_ref(),
        data.refresher.now(),
        family,
        mci.message.id,
        mci.user.id,
    )
    .await;
    answer(ctx, mci, reply).await
}

#[cfg(test)]
mod tests {
    use serenity::all::ChannelId;

    use super::*;
    use crate::refresher::testing::{Call, Recorder};
    use crate::registry::{Payload, SignupRecord};

    async fn registry_with_captures() -> (Registry, MessageId) {
        let registry = Registry::new();
        let id = registry
            .create(SignupRecord::new(
                MessageId::new(100),
                ChannelId::new(1),
                None,
                "Admin",
                Payload::Captures { image_url: None },
            ))
            .await
            .unwrap();
        (registry, id)
    }

    fn user(id: u64) -> UserId {
        UserId::new(id)
    }

    #[tokio::test]
    async fn join_refreshes_the_announcement() {
        let (registry, id) = registry_with_captures().await;
        let recorder = Recorder::default();

        let reply = join_reply(&registry, &recorder, Utc::now(), Family::Captures, id, user(1)).await;

        assert_eq!(reply, "✅ Zostałeś(aś) zapisany(a)!");
        assert!(matches!(
            recorder.calls().as_slice(),
            [Call::Publish { id: published, content: None, .. }] if *published == id
        ));
    }

    #[tokio::test]
    async fn join_on_deleted_announcement_keeps_the_signup() {
        let (registry, id) = registry_with_captures().await;
        let recorder = Recorder::gone();

        let reply = join_reply(&registry, &recorder, Utc::now(), Family::Captures, id, user(1)).await;

        assert_eq!(reply, RENDER_FAILED);
        assert_eq!(registry.find(id).await.unwrap().participants, vec![user(1)]);
    }

    #[tokio::test]
    async fn leave_on_deleted_announcement_keeps_the_removal() {
        let (registry, id) = registry_with_captures().await;
        registry.add_participant(Family::Captures, id, user(1)).await;
        let recorder = Recorder::gone();

        let reply = leave_reply(&registry, &recorder, Utc::now(), Family::Captures, id, user(1)).await;

        assert_eq!(reply, RENDER_FAILED);
        assert!(registry.find(id).await.unwrap().participants.is_empty());
    }

    #[tokio::test]
    async fn join_on_missing_record_is_stale() {
        let registry = Registry::new();
        let recorder = Recorder::default();

        let reply = join_reply(
            &registry,
            &recorder,
            Utc::now(),
            Family::Captures,
            MessageId::new(404),
            user(1),
        )
        .await;

        assert_eq!(reply, STALE);
        assert!(recorder.calls().is_empty());
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn wrong_family_button_is_stale() {
        let (registry, id) = registry_with_captures().await;
        let recorder = Recorder::default();

        let reply = join_reply(&registry, &recorder, Utc::now(), Family::AirDrop, id, user(1)).await;

        assert_eq!(reply, STALE);
        assert!(registry.find(id).await.unwrap().participants.is_empty());
    }

    #[tokio::test]
    async fn repeated_presses_do_not_rerender() {
        let (registry, id) = registry_with_captures().await;
        let recorder = Recorder::default();
        join_reply(&registry, &recorder, Utc::now(), Family::Captures, id, user(1)).await;

        let again = join_reply(&registry, &recorder, Utc::now(), Family::Captures, id, user(1)).await;
        let absent = leave_reply(&registry, &recorder, Utc::now(), Family::Captures, id, user(2)).await;

        assert_eq!(again, "⚠️ Jesteś już zapisany(a)!");
        assert_eq!(absent, "⚠️ Nie jesteś zapisany(a).");
        assert_eq!(recorder.calls().len(), 1);
        assert_eq!(registry.find(id).await.unwrap().participants, vec![user(1)]);
    }
}
