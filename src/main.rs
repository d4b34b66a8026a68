use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::watch;

use matchday::storage::{Database, DatabaseError, StalenessCache, StandingsSnapshot};
use matchday::{Config, IngestContext, RoundData, RoundSource};

/// Get the config directory path (~/.config/matchday/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("matchday"))
}

#[derive(Parser, Debug)]
#[command(name = "matchday", about = "League fixtures, results and standings from lmn-radgona.si")]
struct Args {
    /// Config file (default: ~/.config/matchday/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overrides `database_path` from the config
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show one round's fixtures (the current round by default)
    Round {
        league: String,
        /// Round page URL, relative to the site or absolute
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show the league table
    Standings {
        league: String,
        /// Ignore cached data and harvest every round again
        #[arg(long)]
        force: bool,
        #[arg(long)]
        json: bool,
    },
    /// Drop all cached data for a league
    Invalidate { league: String },
    /// Show cache statistics for a league
    Stats { league: String },
}

fn format_ts(ts: Option<i64>) -> String {
    ts.and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_round(data: &RoundData) {
    let meta = &data.metadata;
    match &meta.source {
        RoundSource::Unavailable { reason } => {
            println!("{} ({})", meta.label, reason);
            println!("This round is currently unavailable.");
            return;
        }
        RoundSource::Cache => println!("{}  [cached {}]", meta.label, format_ts(meta.fetched_at)),
        RoundSource::Fresh => println!("{}", meta.label),
    }

    for (date, matches) in data.grouped_by_date() {
        println!();
        println!("{date}");
        for m in matches {
            println!(
                "  {:>5}  {:<28} {:^9} {:<28} {}",
                m.time_text, m.home_team, m.score_text, m.away_team, m.venue
            );
        }
    }

    if !data.rounds.is_empty() {
        println!();
        println!("{} rounds available", data.rounds.len());
    }
}

fn print_standings(snapshot: &StandingsSnapshot) {
    println!(
        "{:>3}  {:<28} {:>3} {:>3} {:>3} {:>3} {:>7} {:>4}",
        "#", "Ekipa", "T", "Z", "N", "P", "Goli", "Toč"
    );
    for (i, row) in snapshot.rows.iter().enumerate() {
        let marker = match row.rank_tag.css_class() {
            "top-place" => "+",
            "last-place" => "-",
            _ => " ",
        };
        println!(
            "{:>2}{} {:<28} {:>3} {:>3} {:>3} {:>3} {:>3}:{:<3} {:>4}",
            i + 1,
            marker,
            row.team,
            row.played,
            row.won,
            row.drawn,
            row.lost,
            row.goals_for,
            row.goals_against,
            row.points
        );
    }
    println!();
    println!("Calculated {}", format_ts(Some(snapshot.calculated_at)));
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match args.db.clone().or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => {
            std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
            config_dir.join("matchday.db")
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another matchday process appears to be using the database. Please close it and try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let cache = StalenessCache::new(db, config.cache_policy());
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling");
            let _ = cancel_tx.send(true);
        }
    });
    let ctx = IngestContext::new(config, cache)
        .context("Invalid configuration")?
        .with_cancellation(cancel_rx);

    match args.command {
        Command::Round { league, url, json } => {
            let data = ctx
                .get_round_data(&league, url.as_deref())
                .await
                .context("Failed to load round")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                print_round(&data);
            }
        }
        Command::Standings {
            league,
            force,
            json,
        } => {
            let snapshot = ctx
                .get_standings(&league, force)
                .await
                .context("Failed to compute standings")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_standings(&snapshot);
            }
        }
        Command::Invalidate { league } => {
            let removed = ctx
                .invalidate_league_cache(&league)
                .await
                .context("Failed to invalidate cache")?;
            println!("Removed {removed} cached entries for {league}");
        }
        Command::Stats { league } => {
            let stats = ctx
                .cache_stats(&league)
                .await
                .context("Failed to read cache statistics")?;
            println!("League:           {league}");
            println!("Round list:       {}", format_ts(stats.rounds_fetched_at));
            println!("Matches cached:   {}", stats.match_count);
            println!("Oldest match row: {}", format_ts(stats.oldest_match));
            println!("Newest match row: {}", format_ts(stats.newest_match));
            println!("Standings:        {}", format_ts(stats.standings_calculated_at));
        }
    }

    Ok(())
}
