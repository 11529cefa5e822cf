//! Scenario definitions and initial game state construction

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::spatial::reveal_radius;
use crate::state::{
    City, GameState, Location, MapSize, PlayerRoster, ResourceState, Unit, WorldMap, PLAYER_TAG,
};

fn default_difficulty() -> String {
    "normal".to_string()
}

fn default_population() -> u32 {
    1
}

fn default_movement_points() -> u32 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    pub map_size: MapSize,
    pub start: StartSetup,
}

/// Player-side starting assets. The AI side always begins empty and builds
/// itself up through its first turns.
#[derive(Debug, Clone, Deserialize)]
pub struct StartSetup {
    pub city: StartCity,
    #[serde(default)]
    pub units: Vec<StartUnit>,
    #[serde(default)]
    pub resources: Vec<StartResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartCity {
    pub id: String,
    pub name: Option<String>,
    pub location: Location,
    #[serde(default = "default_population")]
    pub population: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartUnit {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default = "default_movement_points")]
    pub movement_points: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartResource {
    pub name: String,
    #[serde(default)]
    pub location: Option<Location>,
}

pub struct ScenarioLoader {
    base_dir: PathBuf,
}

impl ScenarioLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<Scenario> {
        let path = self.base_dir.join(file);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        let scenario: Scenario = serde_yaml::from_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(scenario)
    }
}

impl Scenario {
    /// Build the starting [`GameState`]: turn 1, populated player roster,
    /// one empty AI roster, and fog revealed around the starting city.
    pub fn initial_state(&self) -> GameState {
        let mut player = PlayerRoster::default();
        player.cities.push(City {
            id: self.start.city.id.clone(),
            name: self.start.city.name.clone(),
            location: self.start.city.location,
            buildings: Vec::new(),
            population: self.start.city.population,
            owner: PLAYER_TAG.to_string(),
        });
        for unit in &self.start.units {
            player.units.push(Unit {
                id: unit.id.clone(),
                kind: unit.kind.clone(),
                location: unit.location.unwrap_or(self.start.city.location),
                owner: PLAYER_TAG.to_string(),
                movement_points: unit.movement_points,
                health: None,
            });
        }
        for resource in &self.start.resources {
            player.resources.insert(
                resource.name.clone(),
                ResourceState {
                    improved: false,
                    location: resource.location,
                },
            );
        }

        let mut map = WorldMap::unexplored(self.map_size);
        reveal_radius(&mut map, self.start.city.location, 2);

        GameState {
            turn: 1,
            current_player: PLAYER_TAG.to_string(),
            player,
            ai: vec![PlayerRoster::default()],
            map,
        }
    }
}
