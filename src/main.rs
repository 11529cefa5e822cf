use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hegemon::{
    oracle::{DecisionOracle, HttpOracle, ScriptedOracle},
    store::{FileStore, GameStore, MemoryStore},
    Config, GameService, ScenarioLoader,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Hegemon self-play runner")]
struct Cli {
    /// Path to the scenario YAML file
    #[arg(long, default_value = "scenarios/tutorial.yaml")]
    scenario: PathBuf,

    /// Number of turns to resolve
    #[arg(long, default_value_t = 10)]
    turns: u32,

    /// Directory for saved games (in-memory when omitted)
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Chat-completions endpoint; the deterministic fallback policy runs
    /// the AI when omitted
    #[arg(long)]
    oracle_url: Option<String>,

    /// Optional YAML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_yaml(path)?,
        None => Config::default(),
    };
    config.oracle.apply_env();
    if let Some(url) = &cli.oracle_url {
        config.oracle.base_url = url.clone();
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let loader = ScenarioLoader::new(".");
    let scenario = loader.load(&cli.scenario)?;

    let store: Box<dyn GameStore> = match &cli.store_dir {
        Some(dir) => Box::new(FileStore::new(dir)?),
        None => Box::new(MemoryStore::new()),
    };
    let oracle: Arc<dyn DecisionOracle> = if cli.oracle_url.is_some() {
        Arc::new(HttpOracle::new(config.oracle.clone()))
    } else {
        Arc::new(ScriptedOracle::failing())
    };

    let service = GameService::new(store, oracle, config);
    let caller = "local";
    let game_id = "selfplay_1";
    service.create_game(caller, game_id, &scenario.name, &scenario)?;

    for _ in 0..cli.turns {
        let outcome = service.end_turn(game_id, caller).await?;
        if let Some(ai_turn) = &outcome.ai_turn {
            let kinds: Vec<&str> = ai_turn
                .sequence
                .iter()
                .map(|s| s.action_type.as_str())
                .collect();
            println!("turn {:>3}: ai played {}", outcome.state.turn, kinds.join(", "));
        }
    }

    let record = service.load_game(game_id, caller)?;
    println!(
        "Scenario '{}' completed after {} turns. AI cities: {}, AI units: {}",
        scenario.name,
        record.state.turn - 1,
        record.state.ai[0].cities.len(),
        record.state.ai[0].units.len(),
    );
    Ok(())
}
