pub mod actions;
pub mod ai;
pub mod cheat;
pub mod config;
pub mod merge;
pub mod oracle;
pub mod scenario;
pub mod spatial;
pub mod state;
pub mod store;
pub mod turn;

pub use config::Config;
pub use scenario::{Scenario, ScenarioLoader};
pub use state::{GameRecord, GameState};
pub use turn::{AiMode, GameService, TurnError};
