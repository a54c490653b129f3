#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter that hosts a hexfront world.

mod settings;

use std::{path::PathBuf, sync::Arc, time::Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hexfront_core::{distance, Coord, Credential, Leaderboard, Username};
use hexfront_engine::{ActionError, Engine};
use hexfront_world::SqliteBackend;
use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::settings::Settings;

const DEFAULT_DATABASE: &str = "hexfront.db";

#[derive(Debug, Parser)]
#[command(name = "hexfront", about = "Hex-grid territory game server")]
struct Cli {
    /// TOML settings file; missing keys keep their defaults.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// SQLite database path, overriding the settings file.
    #[arg(long, value_name = "PATH", conflicts_with = "in_memory")]
    database: Option<PathBuf>,
    /// Keep all state in memory.
    #[arg(long)]
    in_memory: bool,
    /// Seeds spawn generation and bonus placement.
    #[arg(long)]
    seed: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Runs the background loops until interrupted.
    Serve,
    /// Joins synthetic players concurrently and plays random moves.
    Simulate {
        /// Players joining at once.
        #[arg(long, default_value_t = 8)]
        players: usize,
        /// Random actions per player.
        #[arg(long, default_value_t = 100)]
        actions: usize,
    },
    /// Prints the current leaderboard.
    Leaderboard,
}

/// Entry point for the hexfront command-line interface.
fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(run(cli, settings))
}

async fn run(cli: Cli, settings: Settings) -> Result<()> {
    let engine = Arc::new(open_engine(&cli, &settings)?);

    match cli.command {
        Command::Serve => serve(&engine).await?,
        Command::Simulate { players, actions } => {
            simulate(&engine, players, actions, cli.seed).await?;
            print_leaderboard(&engine.get_leaderboard()?);
        }
        Command::Leaderboard => print_leaderboard(&engine.get_leaderboard()?),
    }

    let written = engine.flush().context("final flush failed")?;
    info!(written, "state flushed");
    Ok(())
}

fn open_engine(cli: &Cli, settings: &Settings) -> Result<Engine> {
    let config = settings.engine_config(cli.seed);
    if cli.in_memory {
        let backend = SqliteBackend::open_in_memory().context("failed to open in-memory store")?;
        return Ok(Engine::open(backend, config)?);
    }

    let path = cli
        .database
        .clone()
        .or_else(|| settings.database.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));
    let backend = SqliteBackend::open(&path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;
    info!(path = %path.display(), "database opened");
    Ok(Engine::open(backend, config)?)
}

async fn serve(engine: &Arc<Engine>) -> Result<()> {
    let background = engine.spawn_background();
    info!("serving; press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    background.shutdown().await;
    Ok(())
}

async fn simulate(
    engine: &Arc<Engine>,
    players: usize,
    actions: usize,
    seed: Option<u64>,
) -> Result<()> {
    let mut rng = seed.map_or_else(ChaCha8Rng::from_entropy, ChaCha8Rng::seed_from_u64);
    let started = Instant::now();

    let mut joins = JoinSet::new();
    for index in 0..players {
        let engine = Arc::clone(engine);
        let _ = joins.spawn(async move {
            let username = format!("player_{index}");
            let secret = Credential::new(format!("{username}-secret"));
            let joined = engine.join(&username, secret).await;
            (username, joined)
        });
    }

    let mut roster = Vec::with_capacity(players);
    while let Some(joined) = joins.join_next().await {
        let (username, joined) = joined.context("join task panicked")?;
        match joined {
            Ok(outcome) => {
                debug!(%username, capital = %outcome.capital, "player joined");
                roster.push((Username::parse(username)?, outcome.capital));
            }
            Err(error) => warn!(%username, %error, "player could not join"),
        }
    }
    roster.sort_by(|a, b| a.0.cmp(&b.0));
    let joined_in = started.elapsed();

    let started = Instant::now();
    let mut refused = 0_usize;
    for (username, capital) in &roster {
        for _ in 0..actions {
            let owned: Vec<Coord> = engine
                .get_region(*capital, engine.config().bonus.initial_radius())?
                .into_iter()
                .filter(|(_, tile)| tile.is_owned_by(username))
                .map(|(coord, _)| coord)
                .collect();
            let Some(origin) = owned.choose(&mut rng) else {
                break;
            };
            let neighbors = origin.neighbors();
            let target = neighbors[rng.gen_range(0..neighbors.len())];

            match engine.act(username, target).await {
                Ok(_) => {}
                Err(ActionError::NotAdjacent | ActionError::CapitalImmune) => refused += 1,
                Err(error) => return Err(error.into()),
            }
        }
    }
    let decayed = engine.tick_decay().await?.len();
    let bonus = engine.tick_spawn_bonus().await?.len();
    let acted_in = started.elapsed();

    let closest = roster
        .iter()
        .enumerate()
        .flat_map(|(index, (_, a))| roster[index + 1..].iter().map(move |(_, b)| distance(*a, *b)))
        .min();

    println!("Joined {} of {players} players in {joined_in:?}", roster.len());
    match closest {
        Some(closest) => println!("Closest capitals: {closest} cells apart"),
        None => println!("Closest capitals: n/a"),
    }
    println!(
        "Played {} actions ({refused} refused) in {acted_in:?}; decay touched {decayed} tiles, {bonus} bonus tiles placed",
        roster.len() * actions
    );
    Ok(())
}

fn print_leaderboard(board: &Leaderboard) {
    println!("Top population:");
    for (rank, entry) in board.by_population.iter().enumerate() {
        println!("  {:>2}. {:<20} {:>8}", rank + 1, entry.username, entry.population);
    }
    println!("Top area:");
    for (rank, entry) in board.by_area.iter().enumerate() {
        println!("  {:>2}. {:<20} {:>8}", rank + 1, entry.username, entry.area);
    }
}
