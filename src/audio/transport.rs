//! Voice transport seam used by the scheduler, plus the songbird implementation.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    events::EventData,
    input::Input,
    tracks::{PlayMode, Track},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::{
    audio::{CHANNELS, FRAME_SAMPLES, SAMPLE_RATE},
    error::TransportError,
};

/// Opens voice connections.
#[async_trait]
pub trait VoiceConnector: Send + Sync + 'static {
    type Connection: VoiceConnection;

    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Self::Connection, TransportError>;
}

/// A held voice connection for one guild.
#[async_trait]
pub trait VoiceConnection: Send + 'static {
    fn channel_id(&self) -> ChannelId;

    async fn change_channel(&mut self, channel_id: ChannelId) -> Result<(), TransportError>;

    async fn set_speaking(&mut self, speaking: bool) -> Result<(), TransportError>;

    /// Sends `frames` in order; resolves once the last one has been handed off.
    async fn transmit(&mut self, frames: Arc<[Bytes]>) -> Result<(), TransportError>;

    async fn disconnect(self) -> Result<(), TransportError>;
}

/// Songbird-backed connector.
#[derive(Clone)]
pub struct SongbirdConnector {
    manager: Arc<Songbird>,
}

impl SongbirdConnector {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

pub struct SongbirdConnection {
    manager: Arc<Songbird>,
    call: Arc<tokio::sync::Mutex<Call>>,
    guild_id: GuildId,
    channel_id: ChannelId,
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    type Connection = SongbirdConnection;

    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<SongbirdConnection, TransportError> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| TransportError::Join(e.to_string()))?;

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);

        Ok(SongbirdConnection {
            manager: self.manager.clone(),
            call,
            guild_id,
            channel_id,
        })
    }
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn change_channel(&mut self, channel_id: ChannelId) -> Result<(), TransportError> {
        // Songbird mueve la llamada existente si ya hay una para la guild
        self.call = self
            .manager
            .join(self.guild_id, channel_id)
            .await
            .map_err(|e| TransportError::ChangeChannel(e.to_string()))?;
        self.channel_id = channel_id;

        debug!("🔀 Canal de voz cambiado a {} en guild {}", channel_id, self.guild_id);
        Ok(())
    }

    async fn set_speaking(&mut self, speaking: bool) -> Result<(), TransportError> {
        // El driver de songbird gestiona el flag de speaking por sí mismo
        debug!(guild = %self.guild_id, speaking, "Estado de habla");
        Ok(())
    }

    async fn transmit(&mut self, frames: Arc<[Bytes]>) -> Result<(), TransportError> {
        if frames.is_empty() {
            return Ok(());
        }

        let (tx, rx) = oneshot::channel();
        let notifier = TrackEndNotifier {
            tx: Arc::new(Mutex::new(Some(tx))),
        };

        // Los eventos van en el track antes de entregarlo al driver: un clip corto
        // puede terminar antes de que un add_event posterior llegue a procesarse
        let track = track_with_notifier(&frames, notifier);
        let _handle = self.call.lock().await.play(track);

        match rx.await {
            Ok(None) => Ok(()),
            Ok(Some(reason)) => Err(TransportError::Transmit(reason)),
            Err(_) => Err(TransportError::Transmit("el track se descartó sin terminar".into())),
        }
    }

    async fn disconnect(self) -> Result<(), TransportError> {
        self.manager
            .remove(self.guild_id)
            .await
            .map_err(|e| TransportError::Disconnect(e.to_string()))?;

        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        Ok(())
    }
}

/// Resuelve la transmisión cuando el track termina o falla.
#[derive(Clone)]
struct TrackEndNotifier {
    tx: Arc<Mutex<Option<oneshot::Sender<Option<String>>>>>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let failure = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(format!("{e:?}")),
                _ => None,
            }),
            _ => None,
        };

        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(failure);
        }

        None
    }
}

/// Builds the track for `frames` with `notifier` already listening for its end.
fn track_with_notifier(frames: &[Bytes], notifier: TrackEndNotifier) -> Track {
    let mut track = Track::new(Input::from(dca_container(frames)));
    for event in [TrackEvent::End, TrackEvent::Error] {
        track
            .events
            .add_event(EventData::new(Event::Track(event), notifier.clone()), Duration::ZERO);
    }
    track
}

/// Wraps Opus packets in an in-memory DCA1 container.
///
/// Layout: `DCA1`, metadata length (i32 LE), JSON metadata, then every packet
/// prefixed by its length (i16 LE).
pub fn dca_container(frames: &[Bytes]) -> Vec<u8> {
    let metadata = serde_json::json!({
        "dca": {
            "version": 1,
            "tool": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "url": null,
                "author": null,
            },
        },
        "opus": {
            "mode": "music",
            "sample_rate": SAMPLE_RATE,
            "frame_size": FRAME_SAMPLES,
            "abr": null,
            "vbr": true,
            "channels": CHANNELS,
        },
        "info": null,
        "origin": null,
        "extra": null,
    })
    .to_string();

    let payload: usize = frames.iter().map(|f| f.len() + 2).sum();
    let mut out = Vec::with_capacity(8 + metadata.len() + payload);
    out.extend_from_slice(b"DCA1");
    out.extend_from_slice(&(metadata.len() as i32).to_le_bytes());
    out.extend_from_slice(metadata.as_bytes());
    for frame in frames {
        out.extend_from_slice(&(frame.len() as i16).to_le_bytes());
        out.extend_from_slice(frame);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn notifier_resolves_once() {
        let (tx, rx) = oneshot::channel();
        let notifier = TrackEndNotifier {
            tx: Arc::new(Mutex::new(Some(tx))),
        };
        let _track = track_with_notifier(&[Bytes::from_static(b"abc")], notifier.clone());

        // End y Error pueden dispararse ambos; solo el primero resuelve
        assert!(notifier.act(&EventContext::Track(&[])).await.is_none());
        assert!(notifier.act(&EventContext::Track(&[])).await.is_none());

        assert_eq!(rx.await.unwrap(), None);
        assert!(notifier.tx.lock().is_none());
    }

    #[test]
    fn dca_container_layout() {
        let frames = [Bytes::from_static(b"abc"), Bytes::from_static(b"de")];
        let out = dca_container(&frames);

        assert_eq!(&out[..4], b"DCA1");
        let meta_len = i32::from_le_bytes(out[4..8].try_into().unwrap()) as usize;
        let meta: serde_json::Value = serde_json::from_slice(&out[8..8 + meta_len]).unwrap();
        assert_eq!(meta["opus"]["sample_rate"], 48_000);
        assert_eq!(meta["opus"]["channels"], 2);

        let body = &out[8 + meta_len..];
        assert_eq!(body, &[3, 0, b'a', b'b', b'c', 2, 0, b'd', b'e'][..]);
    }
}
