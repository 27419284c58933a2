use anyhow::Result;
use std::io::Write as _;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use playcache::audio::{MpvBackend, PlaybackCoordinator, PlaybackEvent, SessionSettings};
use playcache::cache::{CacheTiers, SystemClock};
use playcache::commands::{Command, Console, ParseError, Reply};
use playcache::config::{parse_flag, Config};
use playcache::sources::{
    smart_source::lookup_from_config, SearchService, ThumbnailFetcher, YtDlpClient,
};
use playcache::storage::PlayHistory;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let debug = std::env::var("PLAYCACHE_DEBUG")
        .map(|v| parse_flag(&v))
        .unwrap_or(false);

    let directive = if debug { "playcache=debug" } else { "playcache=info" };

    // Inicializar logging (stderr; stdout es la consola)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("🎵 Iniciando playcache v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());

    let tiers = CacheTiers::open(&config, Arc::new(SystemClock));
    let shutdown = CancellationToken::new();
    let maintenance = tiers.spawn_maintenance(config.cache_sweep_interval, shutdown.clone());

    let lookup = lookup_from_config(&config);
    let search = SearchService::new(
        lookup.clone(),
        tiers.searches.clone(),
        config.search_results_limit,
    );
    let thumbnails = if config.mock_mode {
        None
    } else {
        match ThumbnailFetcher::new(tiers.thumbnails.clone()) {
            Ok(fetcher) => Some(fetcher),
            Err(e) => {
                warn!("⚠️ Thumbnails disabled: {}", e);
                None
            }
        }
    };

    let coordinator = PlaybackCoordinator::new(
        &tiers,
        lookup,
        Arc::new(MpvBackend::new(config.player_binary.clone())),
        SessionSettings::from_config(&config),
    );
    spawn_event_logger(&coordinator, shutdown.clone());

    let history = Arc::new(PlayHistory::open(config.history_path()));
    let mut console = Console::new(search, coordinator.clone(), history, tiers, thumbnails);

    info!("🚀 Listo. Escribe 'help' para ver los comandos");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("⚠️ Señal de shutdown recibida, cerrando...");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Error leyendo stdin: {:?}", e);
                break;
            }
        };

        match line.parse::<Command>() {
            Ok(command) => match console.execute(command).await {
                Reply::Print(text) => println!("{text}"),
                Reply::Exit => break,
            },
            Err(ParseError::Empty) => {}
            Err(e) => println!("{e}"),
        }
    }

    coordinator.shutdown().await;
    shutdown.cancel();
    let _ = maintenance.await;
    info!("👋 Bye");
    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn spawn_event_logger(coordinator: &PlaybackCoordinator, shutdown: CancellationToken) {
    let mut events = coordinator.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(PlaybackEvent::Finished { item_id }) => info!("🏁 Terminó {}", item_id),
                Ok(PlaybackEvent::DownloadCompleted { item_id }) => {
                    info!("💾 {} disponible sin conexión", item_id)
                }
                Ok(PlaybackEvent::DownloadFailed { item_id, reason }) => {
                    warn!("⚠️ Descarga fallida {}: {}", item_id, reason)
                }
                Ok(PlaybackEvent::StateChanged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("event logger lagged by {} events", n)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let ytdlp = YtDlpClient::new(
        config.ytdlp_binary.clone(),
        config.resolve_timeout,
        config.download_timeout,
    );
    let player = MpvBackend::new(config.player_binary.clone());

    match (ytdlp.verify_available().await, player.verify_available().await) {
        (Ok(_), Ok(_)) => {
            println!("OK");
            Ok(())
        }
        (ytdlp, player) => {
            if let Err(e) = ytdlp {
                error!("❌ {}", e);
            }
            if let Err(e) = player {
                error!("❌ {}", e);
            }
            anyhow::bail!("Dependencias faltantes");
        }
    }
}
