//! Comandos de la consola interactiva.
//!
//! ```text
//! search <query>        buscar
//! play <id|url|#n>      reproducir un id, una URL o el resultado n
//! pause                 pausar / reanudar
//! seek <±segundos>      avanzar o retroceder
//! vol <±n>              subir o bajar volumen
//! stop | history | stats | sweep | help | quit
//! ```

use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::audio::{CommandOutcome, Delivery, PlaybackCoordinator};
use crate::cache::CacheTiers;
use crate::sources::{extract_item_id, SearchResult, SearchService, ThumbnailFetcher};
use crate::storage::PlayHistory;

const HISTORY_SHOWN: usize = 10;
const THUMBNAIL_PREFETCH: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayTarget {
    Item(String),
    /// 1-based index into the last search results.
    Result(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Search(String),
    Play(PlayTarget),
    Pause,
    Seek(i64),
    Volume(i64),
    Stop,
    History,
    Stats,
    Sweep,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),

    #[error("'{0}' needs an argument")]
    MissingArgument(&'static str),

    #[error("not a number: {0}")]
    InvalidNumber(String),

    #[error("not a video id, URL or #result: {0}")]
    InvalidTarget(String),
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        match name.to_lowercase().as_str() {
            "" => Err(ParseError::Empty),
            "search" | "s" => {
                if rest.is_empty() {
                    Err(ParseError::MissingArgument("search"))
                } else {
                    Ok(Command::Search(rest.to_string()))
                }
            }
            "play" | "p" => parse_target(rest).map(Command::Play),
            "pause" => Ok(Command::Pause),
            "seek" => parse_signed(rest, "seek").map(Command::Seek),
            "vol" | "volume" => parse_signed(rest, "vol").map(Command::Volume),
            "stop" => Ok(Command::Stop),
            "history" => Ok(Command::History),
            "stats" => Ok(Command::Stats),
            "sweep" => Ok(Command::Sweep),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

fn parse_target(arg: &str) -> Result<PlayTarget, ParseError> {
    if arg.is_empty() {
        return Err(ParseError::MissingArgument("play"));
    }
    if let Some(index) = arg.strip_prefix('#') {
        return match index.parse::<usize>() {
            Ok(n) if n > 0 => Ok(PlayTarget::Result(n)),
            _ => Err(ParseError::InvalidNumber(arg.to_string())),
        };
    }
    extract_item_id(arg)
        .map(PlayTarget::Item)
        .ok_or_else(|| ParseError::InvalidTarget(arg.to_string()))
}

fn parse_signed(arg: &str, name: &'static str) -> Result<i64, ParseError> {
    if arg.is_empty() {
        return Err(ParseError::MissingArgument(name));
    }
    arg.trim_start_matches('+')
        .parse()
        .map_err(|_| ParseError::InvalidNumber(arg.to_string()))
}

/// Resultado de ejecutar un comando.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Print(String),
    Exit,
}

/// Estado de la consola y sus dependencias.
pub struct Console {
    search: SearchService,
    coordinator: PlaybackCoordinator,
    history: Arc<PlayHistory>,
    tiers: CacheTiers,
    thumbnails: Option<ThumbnailFetcher>,
    last_results: Vec<SearchResult>,
}

impl Console {
    pub fn new(
        search: SearchService,
        coordinator: PlaybackCoordinator,
        history: Arc<PlayHistory>,
        tiers: CacheTiers,
        thumbnails: Option<ThumbnailFetcher>,
    ) -> Self {
        Self {
            search,
            coordinator,
            history,
            tiers,
            thumbnails,
            last_results: Vec::new(),
        }
    }

    pub async fn execute(&mut self, command: Command) -> Reply {
        debug!("command: {:?}", command);
        let text = match command {
            Command::Search(query) => self.search(&query).await,
            Command::Play(target) => self.play(target).await,
            Command::Pause => describe(self.coordinator.toggle_pause().await),
            Command::Seek(seconds) => describe(self.coordinator.seek(seconds).await),
            Command::Volume(delta) => describe(self.coordinator.adjust_volume(delta).await),
            Command::Stop => {
                self.coordinator.stop().await;
                "⏹️ stopped".to_string()
            }
            Command::History => self.history(),
            Command::Stats => self.stats(),
            Command::Sweep => format!(
                "🧹 removed {} expired entries",
                self.tiers.evict_expired_all()
            ),
            Command::Help => HELP.to_string(),
            Command::Quit => return Reply::Exit,
        };
        Reply::Print(text)
    }

    async fn search(&mut self, query: &str) -> String {
        let results = match self.search.search(query).await {
            Ok(results) => results,
            Err(e) => {
                debug!("search failed: {}", e);
                return "could not find anything".to_string();
            }
        };
        if results.is_empty() {
            return "could not find anything".to_string();
        }

        if let Some(fetcher) = &self.thumbnails {
            let fetcher = fetcher.clone();
            let urls: Vec<String> = results
                .iter()
                .take(THUMBNAIL_PREFETCH)
                .map(|r| r.thumbnail_url.clone())
                .collect();
            tokio::spawn(async move { fetcher.prefetch(urls).await });
        }

        let mut out = String::new();
        for (i, result) in results.iter().enumerate() {
            let _ = writeln!(
                out,
                "#{:<2} {} - {} [{}]",
                i + 1,
                result.title,
                result.channel,
                result.id
            );
        }
        self.last_results = results;
        out.trim_end().to_string()
    }

    async fn play(&mut self, target: PlayTarget) -> String {
        let item = match target {
            PlayTarget::Result(n) => match self.last_results.get(n - 1) {
                Some(result) => result.clone(),
                None => return format!("no result #{n}, search first"),
            },
            PlayTarget::Item(id) => self.known_item(&id),
        };

        match self.coordinator.play(&item.id).await {
            Ok(started) => {
                self.history.add(&item);
                format!(
                    "▶️ {} ({})",
                    item.title,
                    if started.from_cache { "cached" } else { "streaming" }
                )
            }
            Err(e) => e.user_message().to_string(),
        }
    }

    /// Metadata for `id` from the last results or the history.
    fn known_item(&self, id: &str) -> SearchResult {
        if let Some(result) = self.last_results.iter().find(|r| r.id == id) {
            return result.clone();
        }
        if let Some(entry) = self
            .history
            .recent(usize::MAX)
            .into_iter()
            .find(|h| h.item_id == id)
        {
            return SearchResult {
                id: entry.item_id,
                title: entry.title,
                channel: entry.channel,
                thumbnail_url: entry.thumbnail_url,
                description: String::new(),
            };
        }
        SearchResult {
            id: id.to_string(),
            title: id.to_string(),
            channel: "Unknown".to_string(),
            thumbnail_url: String::new(),
            description: String::new(),
        }
    }

    fn history(&self) -> String {
        let recent = self.history.recent(HISTORY_SHOWN);
        if recent.is_empty() {
            return "history is empty".to_string();
        }
        recent
            .iter()
            .map(|h| {
                format!(
                    "{} {} - {} [{}]",
                    h.played_at.format("%Y-%m-%d %H:%M"),
                    h.title,
                    h.channel,
                    h.item_id
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn stats(&self) -> String {
        let state = self.coordinator.state();
        format!(
            "state: {}{}\ndownloads running: {}\n{}",
            state.label(),
            state.item_id().map(|id| format!(" ({id})")).unwrap_or_default(),
            self.coordinator.downloads().running(),
            self.tiers.summary()
        )
    }
}

fn describe(outcome: CommandOutcome) -> String {
    match outcome {
        CommandOutcome::Ignored => "nothing is playing".to_string(),
        CommandOutcome::Sent(Delivery::Failed(_)) => "⚠️ player did not take the command".to_string(),
        CommandOutcome::Sent(_) => "ok".to_string(),
    }
}

const HELP: &str = "\
search <query>     search for music
play <id|url|#n>   play an item or search result
pause              toggle pause
seek <+/-secs>     seek relative to the current position
vol <+/-n>         change volume
stop               stop playback
history            recently played
stats              cache and player status
sweep              drop expired cache entries
quit               exit";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{MpvBackend, SessionSettings};
    use crate::cache::ManualClock;
    use crate::config::Config;
    use crate::error::ResolveError;
    use crate::sources::{LookupService, MockLookupService, MockSource};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "search  daft punk ".parse::<Command>(),
            Ok(Command::Search("daft punk".to_string()))
        );
        assert_eq!(
            "play #2".parse::<Command>(),
            Ok(Command::Play(PlayTarget::Result(2)))
        );
        assert_eq!(
            "play https://youtu.be/dQw4w9WgXcQ".parse::<Command>(),
            Ok(Command::Play(PlayTarget::Item("dQw4w9WgXcQ".to_string())))
        );
        assert_eq!("seek -10".parse::<Command>(), Ok(Command::Seek(-10)));
        assert_eq!("vol +5".parse::<Command>(), Ok(Command::Volume(5)));
        assert_eq!("QUIT".parse::<Command>(), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Command>(), Err(ParseError::Empty));
        assert_eq!("search".parse::<Command>(), Err(ParseError::MissingArgument("search")));
        assert_eq!(
            "seek ten".parse::<Command>(),
            Err(ParseError::InvalidNumber("ten".to_string()))
        );
        assert_eq!(
            "play #0".parse::<Command>(),
            Err(ParseError::InvalidNumber("#0".to_string()))
        );
        assert_eq!(
            "play hello".parse::<Command>(),
            Err(ParseError::InvalidTarget("hello".to_string()))
        );
        assert!(matches!("dance".parse::<Command>(), Err(ParseError::Unknown(_))));
    }

    fn console(dir: &std::path::Path) -> Console {
        console_with(dir, Arc::new(MockSource::new()))
    }

    fn console_with(dir: &std::path::Path, lookup: Arc<dyn LookupService>) -> Console {
        let config = Config {
            cache_dir: dir.to_path_buf(),
            player_binary: "definitely-not-mpv".to_string(),
            ..Config::default()
        };
        let tiers = CacheTiers::open(&config, Arc::new(ManualClock::at_epoch()));
        let search = SearchService::new(lookup.clone(), tiers.searches.clone(), 5);
        let coordinator = PlaybackCoordinator::new(
            &tiers,
            lookup,
            Arc::new(MpvBackend::new(config.player_binary.clone())),
            SessionSettings::from_config(&config),
        );
        let history = Arc::new(PlayHistory::open(config.history_path()));
        Console::new(search, coordinator, history, tiers, None)
    }

    #[tokio::test]
    async fn test_search_then_play_by_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut console = console(dir.path());

        let Reply::Print(listing) = console.execute(Command::Search("queen".to_string())).await
        else {
            panic!("search should print");
        };
        assert!(listing.starts_with("#1  Bohemian Rhapsody - Queen Official"));

        // the player binary is missing, so playback fails softly
        let reply = console.execute(Command::Play(PlayTarget::Result(1))).await;
        assert_eq!(reply, Reply::Print("could not start playback".to_string()));

        let reply = console.execute(Command::Play(PlayTarget::Result(9))).await;
        assert_eq!(reply, Reply::Print("no result #9, search first".to_string()));
    }

    #[tokio::test]
    async fn test_failed_search_reads_as_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut lookup = MockLookupService::new();
        lookup
            .expect_search()
            .returning(|_, _| Err(ResolveError::transient("quota exceeded")));
        let mut console = console_with(dir.path(), Arc::new(lookup));

        assert_eq!(
            console.execute(Command::Search("anything".to_string())).await,
            Reply::Print("could not find anything".to_string())
        );
    }

    #[tokio::test]
    async fn test_transport_without_playback() {
        let dir = tempfile::tempdir().unwrap();
        let mut console = console(dir.path());
        assert_eq!(
            console.execute(Command::Pause).await,
            Reply::Print("nothing is playing".to_string())
        );
        assert_eq!(
            console.execute(Command::History).await,
            Reply::Print("history is empty".to_string())
        );
        assert_eq!(console.execute(Command::Quit).await, Reply::Exit);
    }

    #[tokio::test]
    async fn test_stats_and_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let mut console = console(dir.path());
        let Reply::Print(stats) = console.execute(Command::Stats).await else {
            panic!("stats should print");
        };
        assert!(stats.starts_with("state: idle"));
        assert_eq!(
            console.execute(Command::Sweep).await,
            Reply::Print("🧹 removed 0 expired entries".to_string())
        );
    }
}
