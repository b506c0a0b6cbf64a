//! Startup preload: source file -> PCM (ffmpeg) -> Opus frames (libopus).
//!
//! Each sound runs a decode stage and an encode stage connected by a bounded
//! `flume` channel, so a slow encoder applies backpressure to ffmpeg instead of
//! buffering the whole file in memory.

use async_trait::async_trait;
use audiopus::{coder::Encoder, Application, Bitrate, Channels, SampleRate};
use bytes::Bytes;
use futures::future::join_all;
use std::{
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    sync::Arc,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, ChildStdout, Command},
};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        sound::{Sound, SoundCollection},
        CHANNELS, FRAME_SAMPLES, SAMPLE_RATE,
    },
    error::PreloadError,
};

/// Frames buffered between the decoder and the encoder.
pub const HANDOFF_CAPACITY: usize = 10;

/// Bytes of one PCM frame: 960 samples x 2 channels x 2 bytes.
const FRAME_BYTES: usize = FRAME_SAMPLES * CHANNELS * 2;

/// Upper bound for one encoded packet.
const MAX_PACKET_BYTES: usize = FRAME_BYTES;

/// A stream of interleaved stereo PCM frames.
#[async_trait]
pub trait PcmSource: Send {
    /// Next frame of `FRAME_SAMPLES * CHANNELS` samples, `None` at end of stream.
    async fn next_frame(&mut self) -> Result<Option<Vec<i16>>, PreloadError>;
}

/// Opens a source file as a PCM stream.
#[async_trait]
pub trait PcmDecoder: Send + Sync {
    type Source: PcmSource + 'static;

    async fn open(&self, path: &Path) -> Result<Self::Source, PreloadError>;
}

/// Stateful per-sound codec encoder.
pub trait FrameEncoder: Send + 'static {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, PreloadError>;
}

/// Builds one encoder per sound.
pub trait EncoderFactory: Send + Sync {
    type Encoder: FrameEncoder;

    fn create(&self) -> Result<Self::Encoder, PreloadError>;
}

/// Reads fixed-size little-endian s16 frames from any byte stream.
pub struct PcmReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> PcmReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: vec![0; FRAME_BYTES],
        }
    }

    /// Un frame incompleto al final del stream se descarta.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<i16>>, PreloadError> {
        match self.inner.read_exact(&mut self.buf).await {
            Ok(_) => Ok(Some(
                self.buf
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .collect(),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Decodes files by piping them through an `ffmpeg` child process.
#[derive(Debug, Clone, Default)]
pub struct FfmpegDecoder;

pub struct FfmpegStream {
    child: Child,
    reader: PcmReader<ChildStdout>,
}

#[async_trait]
impl PcmDecoder for FfmpegDecoder {
    type Source = FfmpegStream;

    async fn open(&self, path: &Path) -> Result<FfmpegStream, PreloadError> {
        let spawn_error = |source| PreloadError::DecoderSpawn {
            path: path.to_path_buf(),
            source,
        };

        let mut child = Command::new("ffmpeg")
            .arg("-i")
            .arg(path)
            .args(["-f", "s16le", "-ar"])
            .arg(SAMPLE_RATE.to_string())
            .arg("-ac")
            .arg(CHANNELS.to_string())
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            spawn_error(std::io::Error::other("stdout de ffmpeg no disponible"))
        })?;

        Ok(FfmpegStream {
            child,
            reader: PcmReader::new(stdout),
        })
    }
}

#[async_trait]
impl PcmSource for FfmpegStream {
    async fn next_frame(&mut self) -> Result<Option<Vec<i16>>, PreloadError> {
        match self.reader.read_frame().await? {
            Some(frame) => Ok(Some(frame)),
            None => {
                let status: ExitStatus = self.child.wait().await?;
                if status.success() {
                    Ok(None)
                } else {
                    Err(PreloadError::DecoderIo(std::io::Error::other(format!(
                        "ffmpeg terminó con {status}"
                    ))))
                }
            }
        }
    }
}

/// libopus encoder configured for 48 kHz stereo music at a fixed bitrate.
pub struct OpusFrameEncoder {
    encoder: Encoder,
    packet: Vec<u8>,
    frame: usize,
}

impl OpusFrameEncoder {
    pub fn new(bitrate: u32) -> Result<Self, PreloadError> {
        let init_error = |e: audiopus::Error| PreloadError::EncoderInit(e.to_string());

        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)
            .map_err(init_error)?;
        encoder
            .set_bitrate(Bitrate::BitsPerSecond(bitrate as i32))
            .map_err(init_error)?;

        Ok(Self {
            encoder,
            packet: vec![0; MAX_PACKET_BYTES],
            frame: 0,
        })
    }
}

impl FrameEncoder for OpusFrameEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, PreloadError> {
        let len = self
            .encoder
            .encode(pcm, &mut self.packet)
            .map_err(|e| PreloadError::Encode {
                frame: self.frame,
                reason: e.to_string(),
            })?;
        self.frame += 1;
        Ok(Bytes::copy_from_slice(&self.packet[..len]))
    }
}

#[derive(Debug, Clone)]
pub struct OpusEncoderFactory {
    pub bitrate: u32,
}

impl EncoderFactory for OpusEncoderFactory {
    type Encoder = OpusFrameEncoder;

    fn create(&self) -> Result<OpusFrameEncoder, PreloadError> {
        OpusFrameEncoder::new(self.bitrate)
    }
}

/// Runs the decode/encode pair for one sound and installs the resulting frames.
///
/// Frames produced before a failure are still installed, so a failed sound ends
/// up with a partial (possibly empty) sequence. Returns the number of frames.
pub async fn encode_sound<S, E>(sound: &Sound, mut source: S, mut encoder: E) -> Result<usize, PreloadError>
where
    S: PcmSource,
    E: FrameEncoder,
{
    let (tx, rx) = flume::bounded::<Vec<i16>>(HANDOFF_CAPACITY);

    let encode_stage = tokio::task::spawn_blocking(move || {
        let mut frames = Vec::new();
        for pcm in rx.iter() {
            match encoder.encode(&pcm) {
                Ok(packet) => frames.push(packet),
                Err(e) => return (frames, Some(e)),
            }
        }
        (frames, None)
    });

    let decoded = async {
        while let Some(frame) = source.next_frame().await? {
            // Si el encoder abandonó, su error se reporta abajo
            if tx.send_async(frame).await.is_err() {
                break;
            }
        }
        Ok::<_, PreloadError>(())
    }
    .await;
    drop(tx);

    let (frames, encode_error) = encode_stage
        .await
        .map_err(|e| PreloadError::EncoderTask(e.to_string()))?;
    let count = frames.len();
    sound.install_frames(frames);

    if let Some(e) = encode_error {
        return Err(e);
    }
    decoded?;
    Ok(count)
}

/// Outcome of a preload pass.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub sounds: usize,
    pub frames: usize,
    pub failures: Vec<String>,
}

impl LoadReport {
    fn merge(&mut self, other: LoadReport) {
        self.sounds += other.sounds;
        self.frames += other.frames;
        self.failures.extend(other.failures);
    }
}

pub struct Preloader<D, F> {
    decoder: D,
    encoders: F,
    audio_dir: PathBuf,
}

impl Preloader<FfmpegDecoder, OpusEncoderFactory> {
    pub fn ffmpeg_opus(audio_dir: impl Into<PathBuf>, bitrate: u32) -> Self {
        Self::new(FfmpegDecoder, OpusEncoderFactory { bitrate }, audio_dir)
    }
}

impl<D: PcmDecoder, F: EncoderFactory> Preloader<D, F> {
    pub fn new(decoder: D, encoders: F, audio_dir: impl Into<PathBuf>) -> Self {
        Self {
            decoder,
            encoders,
            audio_dir: audio_dir.into(),
        }
    }

    pub async fn load_sound(&self, collection: &SoundCollection, sound: &Sound) -> Result<usize, PreloadError> {
        let path = collection.source_path(&self.audio_dir, sound);
        debug!(path = %path.display(), "Decodificando sonido");

        let encoder = self.encoders.create()?;
        let source = self.decoder.open(&path).await?;
        encode_sound(sound, source, encoder).await
    }

    /// Loads every sound of `collection` and seals its weight sum.
    ///
    /// A failing sound is logged and reported; the others still load.
    pub async fn load_collection(&self, collection: &SoundCollection) -> LoadReport {
        let results = join_all(collection.sounds().iter().map(|sound| async move {
            (sound.name(), self.load_sound(collection, sound).await)
        }))
        .await;

        let mut report = LoadReport::default();
        for (name, result) in results {
            report.sounds += 1;
            match result {
                Ok(frames) => {
                    debug!(collection = collection.prefix(), sound = name, frames, "Sonido cargado");
                    report.frames += frames;
                }
                Err(e) => {
                    error!(collection = collection.prefix(), sound = name, error = %e, "❌ Error cargando sonido");
                    report.failures.push(format!("{}_{}: {}", collection.prefix(), name, e));
                }
            }
        }

        collection.seal_weights();
        report
    }

    /// Loads every collection, one collection at a time.
    pub async fn preload_all(&self, collections: &[Arc<SoundCollection>]) -> LoadReport {
        let mut report = LoadReport::default();
        for collection in collections {
            report.merge(self.load_collection(collection).await);
        }

        if report.failures.is_empty() {
            info!("🔊 {} sonidos precargados ({} frames)", report.sounds, report.frames);
        } else {
            warn!(
                "⚠️ {} sonidos precargados, {} con errores",
                report.sounds,
                report.failures.len()
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sound::{TriggerMatcher, DEFAULT_PART_DELAY};
    use pretty_assertions::assert_eq;

    /// Produces `frames` frames whose samples all carry the frame index.
    struct SyntheticSource {
        next: usize,
        frames: usize,
        fail_at: Option<usize>,
    }

    #[async_trait]
    impl PcmSource for SyntheticSource {
        async fn next_frame(&mut self) -> Result<Option<Vec<i16>>, PreloadError> {
            if Some(self.next) == self.fail_at {
                return Err(PreloadError::DecoderIo(std::io::Error::other("broken pipe")));
            }
            if self.next == self.frames {
                return Ok(None);
            }
            let frame = vec![self.next as i16; FRAME_SAMPLES * CHANNELS];
            self.next += 1;
            Ok(Some(frame))
        }
    }

    /// "Encodes" a frame as its first sample, little-endian.
    struct IndexEncoder {
        fail_at: Option<i16>,
    }

    impl FrameEncoder for IndexEncoder {
        fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, PreloadError> {
            assert_eq!(pcm.len(), FRAME_SAMPLES * CHANNELS);
            if Some(pcm[0]) == self.fail_at {
                return Err(PreloadError::Encode {
                    frame: pcm[0] as usize,
                    reason: "bad frame".into(),
                });
            }
            Ok(Bytes::copy_from_slice(&pcm[0].to_le_bytes()))
        }
    }

    fn frame_indices(sound: &Sound) -> Vec<i16> {
        sound
            .frames()
            .iter()
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    fn source(frames: usize) -> SyntheticSource {
        SyntheticSource {
            next: 0,
            frames,
            fail_at: None,
        }
    }

    #[tokio::test]
    async fn produces_one_packet_per_frame_in_order() {
        let sound = Sound::new("default", 1, DEFAULT_PART_DELAY);
        let count = encode_sound(&sound, source(57), IndexEncoder { fail_at: None })
            .await
            .unwrap();

        assert_eq!(count, 57);
        assert_eq!(frame_indices(&sound), (0..57).collect::<Vec<i16>>());
    }

    #[tokio::test]
    async fn empty_stream_yields_empty_sequence() {
        let sound = Sound::new("silence", 1, DEFAULT_PART_DELAY);
        let count = encode_sound(&sound, source(0), IndexEncoder { fail_at: None })
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(sound.is_loaded());
    }

    #[tokio::test]
    async fn encode_failure_keeps_partial_frames() {
        let sound = Sound::new("broken", 1, DEFAULT_PART_DELAY);
        let err = encode_sound(&sound, source(40), IndexEncoder { fail_at: Some(12) })
            .await
            .unwrap_err();

        assert!(matches!(err, PreloadError::Encode { frame: 12, .. }));
        assert_eq!(frame_indices(&sound), (0..12).collect::<Vec<i16>>());
    }

    #[tokio::test]
    async fn decode_failure_is_reported() {
        let sound = Sound::new("truncated", 1, DEFAULT_PART_DELAY);
        let failing = SyntheticSource {
            next: 0,
            frames: 30,
            fail_at: Some(5),
        };
        let err = encode_sound(&sound, failing, IndexEncoder { fail_at: None })
            .await
            .unwrap_err();

        assert!(matches!(err, PreloadError::DecoderIo(_)));
        assert_eq!(frame_indices(&sound), (0..5).collect::<Vec<i16>>());
    }

    #[tokio::test]
    async fn pcm_reader_splits_frames_and_drops_tail() {
        let samples: Vec<u8> = (0..(FRAME_SAMPLES * CHANNELS * 2 + 100) as i16)
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let mut reader = PcmReader::new(samples.as_slice());

        let first = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(first.len(), FRAME_SAMPLES * CHANNELS);
        assert_eq!(first[1], 1);

        let second = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(second[0], (FRAME_SAMPLES * CHANNELS) as i16);

        assert!(reader.read_frame().await.unwrap().is_none());
    }

    /// Fails to open any file whose name contains `missing`.
    struct MapDecoder;

    #[async_trait]
    impl PcmDecoder for MapDecoder {
        type Source = SyntheticSource;

        async fn open(&self, path: &Path) -> Result<SyntheticSource, PreloadError> {
            if path.to_string_lossy().contains("missing") {
                return Err(PreloadError::DecoderSpawn {
                    path: path.to_path_buf(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            Ok(source(8))
        }
    }

    struct IndexFactory;

    impl EncoderFactory for IndexFactory {
        type Encoder = IndexEncoder;

        fn create(&self) -> Result<IndexEncoder, PreloadError> {
            Ok(IndexEncoder { fail_at: None })
        }
    }

    #[tokio::test]
    async fn failing_sound_does_not_stop_collection() {
        let collection = SoundCollection::new(
            "misc",
            TriggerMatcher::exact(["!wow"]),
            vec![
                Sound::new("wow", 100, DEFAULT_PART_DELAY),
                Sound::new("missing", 100, DEFAULT_PART_DELAY),
                Sound::new("waow", 50, DEFAULT_PART_DELAY),
            ],
        );
        let preloader = Preloader::new(MapDecoder, IndexFactory, "audio");

        let report = preloader.load_collection(&collection).await;

        assert_eq!(report.sounds, 3);
        assert_eq!(report.frames, 16);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].starts_with("misc_missing"));
        assert_eq!(collection.sounds()[0].frames().len(), 8);
        assert!(!collection.sounds()[1].is_loaded());
        assert_eq!(collection.sounds()[2].frames().len(), 8);
        assert_eq!(collection.weight_sum(), 250);
    }

    #[test]
    fn opus_encoder_produces_packets() {
        let mut encoder = OpusFrameEncoder::new(128_000).unwrap();
        let silence = vec![0i16; FRAME_SAMPLES * CHANNELS];
        let packet = encoder.encode(&silence).unwrap();
        assert!(!packet.is_empty());
        assert!(packet.len() <= MAX_PACKET_BYTES);
    }
}
