use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

mod audio;
mod bot;
mod catalog;
mod config;
mod error;
mod stats;

use crate::audio::{preload::Preloader, scheduler::PlaybackScheduler, transport::SongbirdConnector};
use crate::bot::SoundBot;
use crate::config::Config;
use crate::stats::{JsonStatsStore, TelemetrySink};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hornbot=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("📯 Iniciando Hornbot v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    info!("{}", config.summary());

    // Precargar todos los sonidos antes de conectar
    let collections = catalog::collections()?;
    let preloader = Preloader::ffmpeg_opus(config.audio_dir.clone(), config.opus_bitrate);
    let report = preloader.preload_all(&collections).await;
    if report.sounds == 0 {
        warn!("⚠️ No se cargó ningún sonido, revisa {}", config.audio_dir.display());
    }

    // Inicializar estadísticas (opcional)
    let stats = match &config.data_dir {
        Some(dir) => Some(Arc::new(JsonStatsStore::open(dir).await?)),
        None => {
            info!("📊 Estadísticas desactivadas (DATA_DIR no definido)");
            None
        }
    };

    // Planificador de reproducción sobre songbird
    let songbird = Songbird::serenity();
    let mut scheduler = PlaybackScheduler::new(SongbirdConnector::new(songbird.clone()), config.max_queue_size);
    if let Some(stats) = &stats {
        scheduler = scheduler.with_telemetry(stats.clone() as Arc<dyn TelemetrySink>);
    }
    let scheduler = Arc::new(scheduler);

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    // Crear handler del bot
    let handler = SoundBot::new(config.clone(), scheduler, collections, stats.clone());

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    if let Some(stats) = &stats {
        spawn_stats_flush(stats.clone(), Duration::from_secs(config.stats_flush_secs));
    }

    // Manejar shutdown graceful
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");

        if let Some(stats) = stats {
            if let Err(e) = stats.flush().await {
                error!("Error guardando estadísticas: {:?}", e);
            }
        }
        std::process::exit(0);
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    session_outcome(client.start().await)
}

/// A gateway session that ends with an error is fatal for the process.
fn session_outcome(result: serenity::Result<()>) -> Result<()> {
    result.map_err(|why| {
        error!("Error al ejecutar cliente: {:?}", why);
        why.into()
    })
}

/// Flushes the counters every `every`; the first tick is skipped.
fn spawn_stats_flush(stats: Arc<JsonStatsStore>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Err(e) = stats.flush().await {
                warn!("Error guardando estadísticas: {:?}", e);
            }
        }
    });
}

async fn health_check() -> Result<()> {
    // Verificar dependencias críticas
    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_session_is_fatal() {
        assert!(session_outcome(Ok(())).is_ok());

        let err = session_outcome(Err(serenity::Error::Other("gateway cerrado"))).unwrap_err();
        assert!(err.to_string().contains("gateway cerrado"));
    }
}
