use std::sync::Arc;

use poise::CreateReply;
use serenity::all::{ClientBuilder, FullEvent, Interaction};
use serenity::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod buttons;
mod commands;
mod config;
mod discord;
mod flows;
mod health;
mod refresher;
mod registry;
mod render;
mod time;

use config::Config;
use discord::DiscordAnnouncer;
use refresher::{MonotonicClock, Refresher};
use registry::Registry;

#[derive(Clone)]
pub struct Data {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub announcer: Arc<DiscordAnnouncer>,
    pub refresher: Refresher,
}

pub type Error = anyhow::Error;
pub type Context<'a> = poise::Context<'a, Data, Error>;

async fn reply_error(ctx: Context<'_>, content: String) {
    let reply = CreateReply::default().content(content).ephemeral(true);
    if let Err(e) = ctx.send(reply).await {
        warn!(command = %ctx.command().name, "could not report error: {e}");
    }
}

async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Setup { error, .. } => error!("setup failed: {error:?}"),
        poise::FrameworkError::Command { error, ctx, .. } => {
            if let Some(e) = error.downcast_ref::<time::ResolveError>() {
                reply_error(ctx, format!("❌ Błąd formatu czasu/daty: **{e}**")).await;
            } else if discord::is_expired_interaction(&error) {
                warn!(command = %ctx.command().name, "interaction expired before we answered");
            } else {
                error!(command = %ctx.command().name, user = %ctx.author().name, "{error:?}");
                reply_error(ctx, format!("❌ Wystąpił błąd: `{error}`. Sprawdź logi bota!")).await;
            }
        }
        poise::FrameworkError::CommandCheckFailed { error: None, ctx, .. } => {
            info!(command = %ctx.command().name, user = %ctx.author().name, "permission denied");
            reply_error(ctx, flows::DENIED.to_owned()).await;
        }
        poise::FrameworkError::EventHandler { error, event, .. } => {
            if discord::is_expired_interaction(&error) {
                warn!(event = event.snake_case_name(), "interaction expired before we answered");
            } else {
                error!(event = event.snake_case_name(), "{error:?}");
            }
        }
        error => {
            if let Err(e) = poise::builtins::on_error(error).await {
                error!("error while handling error: {e}");
            }
        }
    }
}

async fn event_handler(
    ctx: &serenity::all::Context,
    event: &FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        FullEvent::Ready { data_about_bot } => {
            info!(user = %data_about_bot.user.name, guilds = data_about_bot.guilds.len(), "connected");
        }
        FullEvent::InteractionCreate {
            interaction: Interaction::Component(mci),
        } => buttons::dispatch(ctx, data, mci).await?,
        FullEvent::MessageDelete {
            deleted_message_id, ..
        } => {
            if let Some(record) = data.registry.remove(*deleted_message_id).await {
                info!(record = %record.id, family = record.family().label(), "announcement deleted, record dropped");
            }
        }
        _ => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "capt_bot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("invalid configuration: {e:#}");
            std::process::exit(1);
        }
    };
    let token = config.token.clone();
    let registry = Arc::new(Registry::new());
    let shutdown = CancellationToken::new();

    let health = tokio::spawn(health::serve(config.port, shutdown.clone()));

    let intents = GatewayIntents::non_privileged() | GatewayIntents::GUILD_MEMBERS;

    let framework = {
        let registry = registry.clone();
        poise::Framework::builder()
            .options(poise::FrameworkOptions {
                commands: commands::all(),
                on_error: |error| Box::pin(on_error(error)),
                event_handler: |ctx, event, framework, data| {
                    Box::pin(event_handler(ctx, event, framework, data))
                },
                ..Default::default()
            })
            .setup(move |ctx, _ready, framework| {
                Box::pin(async move {
                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                    let announcer = Arc::new(DiscordAnnouncer::new(
                        ctx.http.clone(),
                        ctx.cache.clone(),
                        config.artwork.clone(),
                    ));
                    let refresher = Refresher::new(
                        registry.clone(),
                        announcer.clone(),
                        Arc::new(MonotonicClock::new()),
                    );
                    info!("commands registered");
                    Ok(Data {
                        config,
                        registry,
                        announcer,
                        refresher,
                    })
                })
            })
            .build()
    };

    let mut client = ClientBuilder::new(token, intents)
        .framework(framework)
        .await?;

    let shard_manager = client.shard_manager.clone();
    {
        let registry = registry.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down");
                registry.shutdown();
                shutdown.cancel();
                shard_manager.shutdown_all().await;
            }
        });
    }

    let result = client.start().await;
    registry.shutdown();
    shutdown.cancel();
    let _ = health.await;
    result?;
    Ok(())
}
