//! Per-guild playback scheduling.
//!
//! A guild is *idle* when it has no queue in [`PlaybackScheduler`] and *active*
//! while a queue exists. The first play for an idle guild creates the queue and
//! spawns that guild's driver task; further plays are appended until the queue is
//! full and dropped afterwards. The driver owns the guild's voice connection and
//! drains the queue in arrival order, playing chained plays right after their
//! parent, then leaves and removes the queue.

use dashmap::{mapref::entry::Entry, DashMap};
use rand::Rng;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        sound::{Sound, SoundCollection},
        transport::{VoiceConnection, VoiceConnector},
    },
    error::TransportError,
    stats::{PlayEvent, TelemetrySink},
};

/// Pending plays allowed per guild on top of the one being played.
pub const DEFAULT_QUEUE_CAPACITY: usize = 6;

/// One request to transmit a sound to a voice channel.
#[derive(Debug)]
pub struct Play {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub sound: Arc<Sound>,
    /// The sound was named explicitly instead of picked at random.
    pub forced: bool,
    /// Chained play from the collection's `chain_with`; not a queue link.
    pub next: Option<Box<Play>>,
}

impl Play {
    pub fn new(guild_id: GuildId, channel_id: ChannelId, user_id: UserId, sound: Arc<Sound>) -> Self {
        Self {
            guild_id,
            channel_id,
            user_id,
            sound,
            forced: false,
            next: None,
        }
    }

    pub fn with_next(mut self, next: Play) -> Self {
        self.next = Some(Box::new(next));
        self
    }

    /// Builds the play for a command on `collection`.
    ///
    /// `requested` forces a specific sound; otherwise one is drawn by weight.
    /// When the collection is chained, a random sound of the chained collection
    /// follows. Returns `None` if nothing can be drawn (weight sum zero).
    pub fn for_collection<R: Rng + ?Sized>(
        collection: &SoundCollection,
        requested: Option<Arc<Sound>>,
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
        rng: &mut R,
    ) -> Option<Play> {
        let (sound, forced) = match requested {
            Some(sound) => (sound, true),
            None => (collection.random(rng)?.clone(), false),
        };

        let mut play = Play::new(guild_id, channel_id, user_id, sound);
        play.forced = forced;

        if let Some(chained) = collection.chain_with() {
            if let Some(next_sound) = chained.random(rng) {
                let mut next = Play::new(guild_id, channel_id, user_id, next_sound.clone());
                next.forced = forced;
                play = play.with_next(next);
            }
        }

        Some(play)
    }
}

/// Fixed waits of the driver.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackTiming {
    /// After moving to another channel; audio sent right away may be dropped.
    pub settle: Duration,
    /// Before every transmission.
    pub warmup: Duration,
}

impl Default for PlaybackTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(125),
            warmup: Duration::from_millis(32),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The guild was idle; a driver was started for this play.
    Started,
    /// Appended to the active guild's queue.
    Queued,
    /// The guild's queue was full; the play was discarded.
    Dropped,
}

pub struct PlaybackScheduler<C: VoiceConnector> {
    connector: C,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    queues: DashMap<GuildId, VecDeque<Play>>,
    capacity: usize,
    timing: PlaybackTiming,
}

impl<C: VoiceConnector> PlaybackScheduler<C> {
    pub fn new(connector: C, capacity: usize) -> Self {
        Self {
            connector,
            telemetry: None,
            queues: DashMap::new(),
            capacity,
            timing: PlaybackTiming::default(),
        }
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn with_timing(mut self, timing: PlaybackTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Hands `play` to its guild.
    ///
    /// The existence check and the create/append happen under the map's entry
    /// lock, so two concurrent calls for the same guild never both start a driver.
    pub fn enqueue(self: &Arc<Self>, play: Play) -> EnqueueOutcome {
        let guild_id = play.guild_id;

        match self.queues.entry(guild_id) {
            Entry::Occupied(mut queue) => {
                if queue.get().len() >= self.capacity {
                    debug!(guild = %guild_id, "Cola llena, play descartado");
                    return EnqueueOutcome::Dropped;
                }
                queue.get_mut().push_back(play);
                return EnqueueOutcome::Queued;
            }
            Entry::Vacant(slot) => {
                slot.insert(VecDeque::with_capacity(self.capacity));
            }
        }

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = scheduler.drive(guild_id, play).await {
                error!(guild = %guild_id, error = %e, "❌ Error al reproducir sonido");
            }
        });

        EnqueueOutcome::Started
    }

    /// Whether a driver currently owns `guild_id`.
    pub fn is_active(&self, guild_id: GuildId) -> bool {
        self.queues.contains_key(&guild_id)
    }

    pub fn pending(&self, guild_id: GuildId) -> usize {
        self.queues.get(&guild_id).map_or(0, |q| q.len())
    }

    pub fn active_guilds(&self) -> usize {
        self.queues.len()
    }

    async fn drive(self: Arc<Self>, guild_id: GuildId, first: Play) -> Result<(), TransportError> {
        let mut connection: Option<C::Connection> = None;
        let mut current = first;

        loop {
            let mut part_delay = current.sound.part_delay();
            let mut chain = Some(current);

            while let Some(mut play) = chain {
                chain = play.next.take().map(|next| *next);
                part_delay = play.sound.part_delay();

                if let Err(e) = self.play_one(&mut connection, play).await {
                    self.abandon(guild_id, connection.take()).await;
                    return Err(e);
                }
            }

            if let Some(next) = self.pop(guild_id) {
                current = next;
                continue;
            }

            sleep(part_delay).await;
            if let Some(next) = self.pop(guild_id) {
                current = next;
                continue;
            }

            if let Some(conn) = connection.take() {
                if let Err(e) = conn.disconnect().await {
                    warn!(guild = %guild_id, error = %e, "⚠️ Error al desconectar");
                }
            }

            // Solo se elimina si sigue vacía; si llegó algo durante la desconexión
            // este mismo driver continúa con una conexión nueva
            if self
                .queues
                .remove_if(&guild_id, |_, pending| pending.is_empty())
                .is_some()
            {
                debug!(guild = %guild_id, "Cola vacía, guild inactiva");
                return Ok(());
            }

            match self.pop(guild_id) {
                Some(next) => current = next,
                None => return Ok(()),
            }
        }
    }

    async fn play_one(&self, connection: &mut Option<C::Connection>, play: Play) -> Result<(), TransportError> {
        info!(
            guild = %play.guild_id,
            channel = %play.channel_id,
            user = %play.user_id,
            sound = play.sound.name(),
            forced = play.forced,
            "▶️ Reproduciendo sonido"
        );

        let conn = match connection.take() {
            Some(conn) => conn,
            None => self.connector.join(play.guild_id, play.channel_id).await?,
        };
        let conn = connection.insert(conn);

        if conn.channel_id() != play.channel_id {
            conn.change_channel(play.channel_id).await?;
            sleep(self.timing.settle).await;
        }

        self.record(&play);

        sleep(self.timing.warmup).await;
        conn.set_speaking(true).await?;
        let sent = conn.transmit(play.sound.frames()).await;
        let silenced = conn.set_speaking(false).await;
        sent?;
        silenced
    }

    fn record(&self, play: &Play) {
        let Some(sink) = self.telemetry.clone() else {
            return;
        };
        let event = PlayEvent::from(play);

        tokio::spawn(async move {
            if let Err(e) = sink.record(&event).await {
                warn!(error = %e, "⚠️ No se pudieron registrar estadísticas");
            }
        });
    }

    fn pop(&self, guild_id: GuildId) -> Option<Play> {
        self.queues
            .get_mut(&guild_id)
            .and_then(|mut pending| pending.pop_front())
    }

    /// Drops the connection and the rest of the guild's queue after a failure.
    async fn abandon(&self, guild_id: GuildId, connection: Option<C::Connection>) {
        if let Some(conn) = connection {
            if let Err(e) = conn.disconnect().await {
                warn!(guild = %guild_id, error = %e, "⚠️ Error al desconectar");
            }
        }

        let dropped = self
            .queues
            .remove(&guild_id)
            .map_or(0, |(_, pending)| pending.len());
        warn!(guild = %guild_id, dropped, "🗑️ Cola abandonada");
    }
}
