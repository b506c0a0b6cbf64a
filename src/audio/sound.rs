use bytes::Bytes;
use rand::Rng;
use regex::Regex;
use std::{
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
    time::Duration,
};

/// Disconnect delay used by every clip in the catalog.
pub const DEFAULT_PART_DELAY: Duration = Duration::from_millis(250);

/// A single clip plus its preloaded Opus frames.
///
/// The frame sequence is empty at construction and is installed exactly once by
/// the preload pipeline; afterwards it is shared read-only by every driver.
#[derive(Debug)]
pub struct Sound {
    name: String,
    weight: u32,
    part_delay: Duration,
    frames: OnceLock<Arc<[Bytes]>>,
}

impl Sound {
    pub fn new(name: impl Into<String>, weight: u32, part_delay: Duration) -> Self {
        Self {
            name: name.into(),
            weight,
            part_delay,
            frames: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Tiempo de espera antes de desconectar cuando este clip es el último.
    pub fn part_delay(&self) -> Duration {
        self.part_delay
    }

    /// Encoded frames in playback order (empty if preload failed or has not run).
    pub fn frames(&self) -> Arc<[Bytes]> {
        self.frames
            .get()
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    pub fn is_loaded(&self) -> bool {
        self.frames.get().is_some()
    }

    /// Installs the encoded frames. Returns `false` if they were already installed.
    pub(crate) fn install_frames(&self, frames: Vec<Bytes>) -> bool {
        self.frames.set(Arc::from(frames)).is_ok()
    }
}

/// How a collection recognises its trigger commands.
#[derive(Debug, Clone)]
pub enum TriggerMatcher {
    /// Any of the listed commands, compared exactly.
    Exact(Vec<String>),
    /// Commands matching a pattern, e.g. `^!shee+it$`. `example` is what help shows.
    Pattern { regex: Regex, example: String },
}

impl TriggerMatcher {
    pub fn exact<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Exact(commands.into_iter().map(Into::into).collect())
    }

    pub fn pattern(pattern: &str, example: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self::Pattern {
            regex: Regex::new(pattern)?,
            example: example.into(),
        })
    }

    pub fn matches(&self, command: &str) -> bool {
        match self {
            Self::Exact(commands) => commands.iter().any(|c| c == command),
            Self::Pattern { regex, .. } => regex.is_match(command),
        }
    }

    /// Commands to advertise in the help text.
    pub fn advertised(&self) -> Vec<&str> {
        match self {
            Self::Exact(commands) => commands.iter().map(String::as_str).collect(),
            Self::Pattern { example, .. } => vec![example.as_str()],
        }
    }
}

/// A weighted group of sounds sharing trigger commands, optionally chained to
/// another collection that plays right after it.
#[derive(Debug)]
pub struct SoundCollection {
    prefix: String,
    trigger: TriggerMatcher,
    sounds: Vec<Arc<Sound>>,
    chain_with: Option<Arc<SoundCollection>>,
    weight_sum: OnceLock<u64>,
}

impl SoundCollection {
    pub fn new(prefix: impl Into<String>, trigger: TriggerMatcher, sounds: Vec<Sound>) -> Self {
        Self {
            prefix: prefix.into(),
            trigger,
            sounds: sounds.into_iter().map(Arc::new).collect(),
            chain_with: None,
            weight_sum: OnceLock::new(),
        }
    }

    /// Chains `next` after every play of this collection.
    pub fn chained_with(mut self, next: Arc<SoundCollection>) -> Self {
        self.chain_with = Some(next);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn trigger(&self) -> &TriggerMatcher {
        &self.trigger
    }

    pub fn sounds(&self) -> &[Arc<Sound>] {
        &self.sounds
    }

    pub fn chain_with(&self) -> Option<&Arc<SoundCollection>> {
        self.chain_with.as_ref()
    }

    pub fn matches(&self, command: &str) -> bool {
        self.trigger.matches(command)
    }

    /// Source file of `sound` inside `audio_dir`: `<prefix>_<name>.wav`.
    pub fn source_path(&self, audio_dir: &Path, sound: &Sound) -> PathBuf {
        audio_dir.join(format!("{}_{}.wav", self.prefix, sound.name()))
    }

    /// Fixes the weight sum. Called by the preload pipeline once every sound is loaded.
    pub(crate) fn seal_weights(&self) -> u64 {
        *self.weight_sum.get_or_init(|| self.sum_weights())
    }

    /// Sum of all weights; recomputed on the fly if preload has not sealed it yet.
    ///
    /// Widened to `u64` so any number of `u32` weights fits.
    pub fn weight_sum(&self) -> u64 {
        self.weight_sum
            .get()
            .copied()
            .unwrap_or_else(|| self.sum_weights())
    }

    fn sum_weights(&self) -> u64 {
        self.sounds.iter().map(|s| u64::from(s.weight())).sum()
    }

    pub fn find(&self, name: &str) -> Option<&Arc<Sound>> {
        self.sounds.iter().find(|s| s.name() == name)
    }

    /// Picks a sound with probability proportional to its weight.
    ///
    /// Returns `None` when the weight sum is zero (empty collection or all
    /// weights zero).
    pub fn random<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Arc<Sound>> {
        let total = self.weight_sum();
        if total == 0 {
            return None;
        }

        let draw = rng.gen_range(0..total);
        let mut cumulative = 0u64;
        self.sounds.iter().find(|sound| {
            cumulative += u64::from(sound.weight());
            draw < cumulative
        })
    }
}
