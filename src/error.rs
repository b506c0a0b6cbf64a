//! Error types for the soundboard core.
//!
//! The binary edge (`main`, configuration, Discord handlers) works with `anyhow`;
//! the audio pipeline, the voice transport and the stats store report typed errors
//! so callers can decide which ones are allowed to alter playback state.

use std::path::PathBuf;
use thiserror::Error;

/// Failure while turning a source file into Opus frames.
#[derive(Error, Debug)]
pub enum PreloadError {
    #[error("no se pudo lanzar el decodificador para {path}: {source}")]
    DecoderSpawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error leyendo PCM del decodificador: {0}")]
    DecoderIo(#[from] std::io::Error),

    #[error("no se pudo crear el encoder Opus: {0}")]
    EncoderInit(String),

    #[error("error codificando frame {frame}: {reason}")]
    Encode { frame: usize, reason: String },

    #[error("la etapa de codificación terminó inesperadamente: {0}")]
    EncoderTask(String),
}

/// Failure of the voice transport. Any of these aborts the guild's queue.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no se pudo unir al canal de voz: {0}")]
    Join(String),

    #[error("no se pudo cambiar de canal de voz: {0}")]
    ChangeChannel(String),

    #[error("la transmisión de audio falló: {0}")]
    Transmit(String),

    #[error("no se pudo desconectar: {0}")]
    Disconnect(String),
}

/// Failure of the usage counter store.
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("error de E/S en el almacén de estadísticas: {0}")]
    Io(#[from] std::io::Error),

    #[error("archivo de estadísticas inválido: {0}")]
    Serde(#[from] serde_json::Error),
}
