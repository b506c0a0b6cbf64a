//! # Bot Module
//!
//! Discord front-end of Hornbot.
//!
//! [`SoundBot`] implements Serenity's [`EventHandler`]. It turns chat commands
//! into plays for the [`PlaybackScheduler`], answers `!help`, filters guilds by
//! shard and serves the owner's control commands (`stats`, `status`, `aps`).
//! Voice connections are never touched here; the scheduler's driver owns them.

use anyhow::Result;
use num_format::{Locale, ToFormattedString};
use parking_lot::Mutex;
use rand::{rngs::StdRng, SeedableRng};
use serenity::{
    all::{ActivityData, ChannelId, Context, EventHandler, Guild, GuildId, Message, Ready, UserId},
    async_trait,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

pub mod commands;

use self::commands::{Command, ControlCommand, Invocation};
use crate::{
    audio::{
        scheduler::{EnqueueOutcome, PlaybackScheduler, Play},
        sound::{Sound, SoundCollection},
        transport::SongbirdConnector,
    },
    config::Config,
    stats::{JsonStatsStore, TOTAL_KEY},
};

/// Window over which `aps` samples the play counter.
const APS_WINDOW: Duration = Duration::from_secs(10);

/// Voice libraries reported by `stats`.
const LIBRARIES: &str = "serenity 0.12, songbird 0.5";

/// Main Discord event handler.
///
/// ## Fields
///
/// - `config`: owner, shards and limits
/// - `scheduler`: per-guild playback queues
/// - `collections`: the preloaded catalog
/// - `rng`: seeded once, shared by every random draw
/// - `stats`: play counters, when `DATA_DIR` is set
pub struct SoundBot {
    config: Arc<Config>,
    scheduler: Arc<PlaybackScheduler<SongbirdConnector>>,
    collections: Vec<Arc<SoundCollection>>,
    rng: Mutex<StdRng>,
    stats: Option<Arc<JsonStatsStore>>,
    started_at: Instant,
}

impl SoundBot {
    pub fn new(
        config: Config,
        scheduler: Arc<PlaybackScheduler<SongbirdConnector>>,
        collections: Vec<Arc<SoundCollection>>,
        stats: Option<Arc<JsonStatsStore>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            scheduler,
            collections,
            rng: Mutex::new(StdRng::from_entropy()),
            stats,
            started_at: Instant::now(),
        }
    }

    /// Resolves the author's voice channel and hands the play to the scheduler.
    ///
    /// Returns immediately; the play happens on the guild's driver task.
    fn dispatch(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        user_id: UserId,
        collection: &SoundCollection,
        sound: Option<Arc<Sound>>,
    ) {
        // Copiar los estados de voz: la referencia de caché no debe cruzar un await
        let voice_states: Option<Vec<(UserId, Option<ChannelId>)>> = ctx.cache.guild(guild_id).map(|guild| {
            guild
                .voice_states
                .iter()
                .map(|(id, state)| (*id, state.channel_id))
                .collect()
        });

        let Some(voice_states) = voice_states else {
            warn!(guild = %guild_id, "⚠️ Guild no encontrada en caché");
            return;
        };

        let Some(channel_id) = commands::find_voice_channel(voice_states, user_id) else {
            warn!(guild = %guild_id, user = %user_id, "⚠️ El usuario no está en un canal de voz");
            return;
        };

        let play = {
            let mut rng = self.rng.lock();
            Play::for_collection(collection, sound, guild_id, channel_id, user_id, &mut *rng)
        };

        let Some(play) = play else {
            warn!(collection = collection.prefix(), "⚠️ Colección sin sonidos con peso");
            return;
        };

        let sound = play.sound.name().to_string();
        match self.scheduler.enqueue(play) {
            EnqueueOutcome::Started => {
                debug!(guild = %guild_id, channel = %channel_id, sound = %sound, "▶️ Reproducción iniciada")
            }
            EnqueueOutcome::Queued => {
                debug!(guild = %guild_id, sound = %sound, "📝 Añadido a la cola")
            }
            EnqueueOutcome::Dropped => {
                debug!(guild = %guild_id, sound = %sound, "🚫 Cola llena, descartado")
            }
        }
    }

    async fn handle_control(&self, ctx: &Context, msg: &Message, guild_id: GuildId, control: ControlCommand) -> Result<()> {
        let our_shard = self.config.shards.contains(guild_id);
        info!(command = ?control, guild = %guild_id, "🛠️ Comando de control");

        match control {
            ControlCommand::Stats if our_shard => {
                let text = self.stats_report(ctx).await;
                msg.channel_id.say(&ctx.http, text).await?;
            }
            ControlCommand::Status => {
                let guilds = ctx
                    .cache
                    .guilds()
                    .into_iter()
                    .filter(|id| self.config.shards.contains(*id))
                    .count();
                msg.channel_id
                    .say(&ctx.http, format!("Shard {} contains {} servers", self.config.shards, guilds))
                    .await?;
            }
            ControlCommand::Aps if our_shard => {
                let Some(stats) = self.stats.clone() else {
                    msg.channel_id.say(&ctx.http, "Stats are disabled").await?;
                    return Ok(());
                };

                msg.channel_id.say(&ctx.http, ":ok_hand: give me a sec m8").await?;

                let http = ctx.http.clone();
                let channel_id = msg.channel_id;
                tokio::spawn(async move {
                    let before = stats.counter(TOTAL_KEY).await;
                    tokio::time::sleep(APS_WINDOW).await;
                    let after = stats.counter(TOTAL_KEY).await;

                    let aps = after.saturating_sub(before) as f64 / APS_WINDOW.as_secs_f64();
                    if let Err(e) = channel_id.say(&http, format!("Current APS: {aps}")).await {
                        error!("Error al enviar APS: {:?}", e);
                    }
                });
            }
            _ => {}
        }

        Ok(())
    }

    async fn stats_report(&self, ctx: &Context) -> String {
        let uptime = Duration::from_secs(self.started_at.elapsed().as_secs());
        let plays = match &self.stats {
            Some(stats) => stats.counter(TOTAL_KEY).await.to_formatted_string(&Locale::en),
            None => "n/a".to_string(),
        };
        let shards = if self.config.shards.is_empty() {
            "all".to_string()
        } else {
            self.config.shards.to_string()
        };

        format!(
            "```\n\
            Hornbot:  v{}\n\
            Voice:    {}\n\
            Uptime:   {}\n\
            Servers:  {}\n\
            Playing:  {}\n\
            Plays:    {}\n\
            Shards:   {}\n\
            ```",
            env!("CARGO_PKG_VERSION"),
            LIBRARIES,
            humantime::format_duration(uptime),
            ctx.cache.guild_count().to_formatted_string(&Locale::en),
            self.scheduler.active_guilds(),
            plays,
            shards,
        )
    }
}

#[async_trait]
impl EventHandler for SoundBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        ctx.set_activity(Some(ActivityData::playing("!airhorn")));
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        if !self.config.shards.contains(guild.id) {
            return;
        }

        debug!(guild = %guild.id, "🏠 Guild disponible: {}", guild.name);
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let Some(invocation) = commands::classify(&msg.content, msg.mentions.len()) else {
            return;
        };

        let Some(guild_id) = msg.guild_id else {
            debug!(channel = %msg.channel_id, "Mensaje fuera de una guild, ignorado");
            return;
        };

        match invocation {
            Invocation::Mention(parts) => {
                // Solo el dueño puede mencionar al bot para controlarlo
                let bot_id = ctx.cache.current_user().id;
                let to_bot = msg.mentions.first().is_some_and(|user| user.id == bot_id);
                if !to_bot || self.config.owner_id != Some(msg.author.id) {
                    return;
                }

                if let Some(control) = ControlCommand::parse(&parts) {
                    if let Err(e) = self.handle_control(&ctx, &msg, guild_id, control).await {
                        error!("Error manejando comando de control: {:?}", e);
                    }
                }
            }
            Invocation::Prefixed(parts) => {
                if !self.config.shards.contains(guild_id) {
                    return;
                }

                match commands::parse_command(&parts, &self.collections) {
                    Some(Command::Help) => {
                        let help = commands::help_text(&self.collections);
                        if let Err(e) = msg.channel_id.say(&ctx.http, help).await {
                            error!("Error al enviar ayuda: {:?}", e);
                        }
                    }
                    Some(Command::Play { collection, sound }) => {
                        self.dispatch(&ctx, guild_id, msg.author.id, &collection, sound);
                    }
                    None => {}
                }
            }
        }
    }
}
