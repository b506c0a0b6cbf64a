use anyhow::{Context, Result};
use serenity::model::id::{GuildId, UserId};
use std::path::PathBuf;

use crate::audio::scheduler::DEFAULT_QUEUE_CAPACITY;

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub owner_id: Option<UserId>,
    pub shards: ShardFilter,

    // Audio
    pub audio_dir: PathBuf,
    pub opus_bitrate: u32,
    pub max_queue_size: usize,

    // Estadísticas (opcionales)
    pub data_dir: Option<PathBuf>,
    pub stats_flush_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?,
            owner_id: match std::env::var("OWNER_ID") {
                Ok(val) if !val.trim().is_empty() => Some(UserId::new(
                    val.trim().parse().context("OWNER_ID inválido")?,
                )),
                _ => None,
            },
            shards: ShardFilter::parse(&std::env::var("SHARDS").unwrap_or_default())?,

            // Audio
            audio_dir: std::env::var("AUDIO_DIR")
                .unwrap_or_else(|_| "audio".to_string())
                .into(),
            opus_bitrate: std::env::var("OPUS_BITRATE")
                .unwrap_or_else(|_| "128000".to_string()) // 128kbps
                .parse()?,
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| DEFAULT_QUEUE_CAPACITY.to_string())
                .parse()?,

            // Estadísticas
            data_dir: std::env::var("DATA_DIR")
                .ok()
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            stats_flush_secs: std::env::var("STATS_FLUSH_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Opus bitrate must be between 8kbps and 510kbps
    /// - Queue size and flush interval must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.opus_bitrate > 510000 {
            anyhow::bail!("Opus bitrate cannot exceed 510kbps, got: {}", self.opus_bitrate);
        }

        if self.opus_bitrate < 8000 {
            anyhow::bail!("Opus bitrate too low, minimum 8kbps, got: {}", self.opus_bitrate);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.stats_flush_secs == 0 {
            anyhow::bail!("Stats flush interval must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: owner {}, shards [{}]\n  \
            Audio: {} dir, {}kbps, {} queue\n  \
            Stats: {}",
            self.owner_id.map_or("none".to_string(), |id| id.to_string()),
            self.shards,
            self.audio_dir.display(),
            self.opus_bitrate / 1000,
            self.max_queue_size,
            self.data_dir
                .as_ref()
                .map_or("disabled".to_string(), |dir| dir.display().to_string()),
        )
    }
}

/// Guilds served by this process, selected by the 5th digit from the end of the
/// guild id. An empty filter serves every guild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardFilter(Vec<char>);

impl ShardFilter {
    /// Parses a comma-separated list of digits such as `"0,1,2"`.
    pub fn parse(list: &str) -> Result<Self> {
        let list = list.trim();
        if list.is_empty() {
            return Ok(Self::default());
        }

        list.split(',')
            .map(|shard| {
                let shard = shard.trim();
                let mut chars = shard.chars();
                match (chars.next(), chars.next()) {
                    (Some(digit), None) if digit.is_ascii_digit() => Ok(digit),
                    _ => anyhow::bail!("Shard inválido: {:?}", shard),
                }
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, guild_id: GuildId) -> bool {
        if self.0.is_empty() {
            return true;
        }

        let id = guild_id.to_string();
        id.len() >= 5
            && id
                .chars()
                .nth(id.len() - 5)
                .is_some_and(|digit| self.0.contains(&digit))
    }
}

impl std::fmt::Display for ShardFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shards: Vec<String> = self.0.iter().map(char::to_string).collect();
        write!(f, "{}", shards.join(","))
    }
}
