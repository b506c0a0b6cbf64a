use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info};

use crate::{audio::scheduler::Play, error::StatsError};

/// Counter every play increments.
pub const TOTAL_KEY: &str = "plays:total";

/// Contadores de uso de un play (independiente de la capa de audio)
#[derive(Debug, Clone, PartialEq)]
pub struct PlayEvent {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub sound: String,
    pub forced: bool,
}

impl From<&Play> for PlayEvent {
    fn from(play: &Play) -> Self {
        Self {
            guild_id: play.guild_id,
            channel_id: play.channel_id,
            user_id: play.user_id,
            sound: play.sound.name().to_string(),
            forced: play.forced,
        }
    }
}

/// Best-effort sink for play events. Errors are logged by the caller and never
/// affect playback.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, event: &PlayEvent) -> Result<(), StatsError>;
}

/// Contenido persistido en `stats.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub counters: HashMap<String, u64>,
    pub sets: HashMap<String, BTreeSet<String>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StatsSnapshot {
    fn incr(&mut self, key: String) {
        *self.counters.entry(key).or_default() += 1;
    }

    fn sadd(&mut self, key: String, member: String) {
        self.sets.entry(key).or_default().insert(member);
    }

    /// Applies the counter updates of one play.
    fn apply(&mut self, event: &PlayEvent) {
        let base = if event.forced { "plays:f" } else { "plays:a" };
        let PlayEvent {
            guild_id,
            channel_id,
            user_id,
            sound,
            ..
        } = event;

        self.incr(TOTAL_KEY.to_string());
        self.incr(format!("{base}:total"));
        self.incr(format!("{base}:sound:{sound}"));
        self.incr(format!("{base}:user:{user_id}:sound:{sound}"));
        self.incr(format!("{base}:guild:{guild_id}:sound:{sound}"));
        self.incr(format!("{base}:guild:{guild_id}:chan:{channel_id}:sound:{sound}"));
        self.sadd(format!("{base}:users"), user_id.to_string());
        self.sadd(format!("{base}:guilds"), guild_id.to_string());
        self.sadd(format!("{base}:channels"), channel_id.to_string());
    }
}

/// Almacén de contadores basado en un archivo JSON
pub struct JsonStatsStore {
    path: PathBuf,
    snapshot: Mutex<StatsSnapshot>,
}

impl JsonStatsStore {
    /// Opens (or creates) `<data_dir>/stats.json`. A corrupt file is an error.
    pub async fn open(data_dir: &Path) -> Result<Self, StatsError> {
        fs::create_dir_all(data_dir).await?;
        let path = data_dir.join("stats.json");

        let snapshot = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatsSnapshot::default(),
            Err(e) => return Err(e.into()),
        };

        info!(
            "📁 Estadísticas cargadas desde {} ({} reproducciones)",
            path.display(),
            snapshot.counters.get(TOTAL_KEY).copied().unwrap_or(0)
        );

        Ok(Self {
            path,
            snapshot: Mutex::new(snapshot),
        })
    }

    pub async fn counter(&self, key: &str) -> u64 {
        self.snapshot.lock().await.counters.get(key).copied().unwrap_or(0)
    }

    pub async fn members(&self, key: &str) -> usize {
        self.snapshot.lock().await.sets.get(key).map_or(0, BTreeSet::len)
    }

    /// Writes the current counters to disk.
    pub async fn flush(&self) -> Result<(), StatsError> {
        let content = {
            let mut snapshot = self.snapshot.lock().await;
            snapshot.updated_at = Some(Utc::now());
            serde_json::to_string_pretty(&*snapshot)?
        };

        // Escribir a un temporal y renombrar para no dejar un archivo a medias
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;

        debug!("💾 Estadísticas guardadas en {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for JsonStatsStore {
    async fn record(&self, event: &PlayEvent) -> Result<(), StatsError> {
        self.snapshot.lock().await.apply(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn event(forced: bool) -> PlayEvent {
        PlayEvent {
            guild_id: GuildId::new(111),
            channel_id: ChannelId::new(222),
            user_id: UserId::new(333),
            sound: "fourtap".into(),
            forced,
        }
    }

    #[tokio::test]
    async fn records_counters_and_sets() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStatsStore::open(dir.path()).await.unwrap();

        store.record(&event(false)).await.unwrap();
        store.record(&event(false)).await.unwrap();
        store.record(&event(true)).await.unwrap();

        assert_eq!(store.counter(TOTAL_KEY).await, 3);
        assert_eq!(store.counter("plays:a:total").await, 2);
        assert_eq!(store.counter("plays:f:total").await, 1);
        assert_eq!(store.counter("plays:a:sound:fourtap").await, 2);
        assert_eq!(store.counter("plays:a:user:333:sound:fourtap").await, 2);
        assert_eq!(store.counter("plays:a:guild:111:sound:fourtap").await, 2);
        assert_eq!(store.counter("plays:a:guild:111:chan:222:sound:fourtap").await, 2);
        assert_eq!(store.members("plays:a:users").await, 1);
        assert_eq!(store.members("plays:f:channels").await, 1);
    }

    #[tokio::test]
    async fn flush_then_reopen_keeps_counters() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonStatsStore::open(dir.path()).await.unwrap();
            store.record(&event(true)).await.unwrap();
            store.flush().await.unwrap();
        }

        let reopened = JsonStatsStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.counter(TOTAL_KEY).await, 1);
        assert_eq!(reopened.members("plays:f:guilds").await, 1);
    }

    #[tokio::test]
    async fn corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stats.json"), "{ not json").unwrap();

        let err = JsonStatsStore::open(dir.path()).await.err().unwrap();
        assert!(matches!(err, StatsError::Serde(_)));
    }
}
