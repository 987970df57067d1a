use std::{collections::HashSet, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cinematch_api::{
    client::{
        ratings_csv::read_ratings_file, ApiClient, ItemStatus, SessionCommand, SessionController,
        SessionPhase, SessionSnapshot, TrailerState, ViewItem,
    },
    models::{FavoriteTitle, InterestRequest, Interests, MediaType, DEFAULT_MOOD},
};

const YOUTUBE_WATCH_URL: &str = "https://www.youtube.com/watch?v=";

#[derive(Parser)]
#[command(name = "cinematch")]
#[command(about = "Stream movie and TV recommendations from a cinematch server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Current mood, e.g. "need-a-laugh"
    #[arg(long, global = true, default_value = DEFAULT_MOOD)]
    mood: String,

    #[arg(long, global = true, value_enum, default_value_t = MediaTypeArg::Movie)]
    media_type: MediaTypeArg,

    /// Server base URL
    #[arg(long, global = true, env = "CINEMATCH_SERVER", default_value = "http://127.0.0.1:3000")]
    server: String,

    /// Maximum concurrent title lookups (unbounded when omitted)
    #[arg(long, global = true, env = "CINEMATCH_MAX_LOOKUPS")]
    max_lookups: Option<usize>,

    /// Also look up a trailer for every recommendation
    #[arg(long, global = true, default_value_t = false)]
    trailers: bool,

    /// Print the final list as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Recommend from an IMDb ratings export
    Imdb {
        /// Path to the "Your Ratings" CSV
        csv: PathBuf,
    },
    /// Recommend from favorite titles, written as "Title (Year)"
    Favorites {
        #[arg(required = true)]
        titles: Vec<String>,
    },
    /// Recommend from up to three genres
    Genres {
        #[arg(required = true)]
        genres: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MediaTypeArg {
    Movie,
    Tv,
    Both,
}

impl From<MediaTypeArg> for MediaType {
    fn from(arg: MediaTypeArg) -> Self {
        match arg {
            MediaTypeArg::Movie => MediaType::Movie,
            MediaTypeArg::Tv => MediaType::Tv,
            MediaTypeArg::Both => MediaType::Both,
        }
    }
}

/// Splits `"Arrival (2016)"` into title and year; the year is optional
fn parse_favorite(input: &str) -> FavoriteTitle {
    let input = input.trim();
    if let Some(open) = input.rfind('(') {
        if let Some(year) = input[open + 1..]
            .strip_suffix(')')
            .and_then(|y| y.trim().parse::<i32>().ok())
        {
            return FavoriteTitle {
                title: input[..open].trim().to_string(),
                year: Some(year),
            };
        }
    }
    FavoriteTitle {
        title: input.to_string(),
        year: None,
    }
}

fn describe(item: &ViewItem) -> String {
    match item.year {
        Some(year) => format!("{} ({})", item.title, year),
        None => item.title.clone(),
    }
}

fn print_item(item: &ViewItem) {
    match (&item.status, &item.detail) {
        (ItemStatus::Resolved, Some(detail)) => {
            let rating = detail
                .imdb_rating
                .map(|r| format!(" {:.1}/10", r))
                .unwrap_or_default();
            println!("{:>2}. {}{}", item.index + 1, describe(item), rating);
            println!("    {}", item.reason);
            if let Some(link) = &detail.imdb_link {
                println!("    {}", link);
            }
        }
        _ => {
            println!("{:>2}. {} (not in catalog)", item.index + 1, describe(item));
            println!("    {}", item.reason);
        }
    }
}

/// Prints items as they settle and asks for trailers when enabled
async fn follow(
    mut snapshots: tokio::sync::watch::Receiver<SessionSnapshot>,
    mut commands: Option<mpsc::Sender<SessionCommand>>,
) {
    let mut printed = HashSet::new();
    let mut trailers_requested = HashSet::new();
    let mut trailers_printed = HashSet::new();

    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();

        for item in snapshot.items.iter().filter(|item| !item.is_loading()) {
            if printed.insert(item.index) {
                print_item(item);
            }
            if let Some(tx) = &commands {
                if trailers_requested.insert(item.index)
                    && tx.send(SessionCommand::FindTrailer(item.index)).await.is_err()
                {
                    tracing::debug!("Session stopped accepting commands");
                }
            }
            match &item.trailer {
                TrailerState::Found(video_id) if trailers_printed.insert(item.index) => {
                    println!("    Trailer for {}: {}{}", describe(item), YOUTUBE_WATCH_URL, video_id);
                }
                TrailerState::NotFound if trailers_printed.insert(item.index) => {
                    println!("    No trailer found for {}", describe(item));
                }
                _ => {}
            }
        }

        let finished = match &snapshot.phase {
            SessionPhase::Failed(_) => true,
            SessionPhase::Completed => snapshot.items.iter().all(|item| !item.is_loading()),
            _ => false,
        };
        if finished {
            // No more trailer requests; lets the session finish
            commands = None;
        }
    }
}

/// Filter used when `RUST_LOG` is not set
fn default_log_filter(debug: bool) -> &'static str {
    if debug {
        "cinematch=debug,cinematch_api=debug"
    } else {
        "warn"
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_log_filter(cli.debug).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let interests = match cli.command {
        Command::Imdb { csv } => Interests::Ratings(read_ratings_file(&csv)?),
        Command::Favorites { titles } => {
            Interests::Favorites(titles.iter().map(|t| parse_favorite(t)).collect())
        }
        Command::Genres { genres } => Interests::Genres(genres),
    };
    let request = InterestRequest::new(interests, cli.mood, cli.media_type.into())?;

    let client = Arc::new(ApiClient::new(cli.server));
    let events = client.submit(&request).await?;

    let mut controller = SessionController::new(Arc::clone(&client), cli.max_lookups);
    let (commands_tx, commands_rx) = if cli.trailers {
        let (tx, rx) = mpsc::channel(16);
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let follower = tokio::spawn(follow(controller.subscribe(), commands_tx));
    let outcome = controller.run(events, commands_rx).await;
    drop(controller);
    follower.await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome.items)?);
    }

    if let Some(error) = outcome.error {
        anyhow::bail!("Recommendation failed: {}", error);
    }

    Ok(())
}
