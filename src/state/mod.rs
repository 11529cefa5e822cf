//! Typed game state model - rosters, entities, map, and the stored record

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Side tag carried by every player-owned entity.
pub const PLAYER_TAG: &str = "player";

/// Tag prefix shared by all AI-controlled sides.
pub const AI_TAG_PREFIX: &str = "ai";

/// Which roster an action batch acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Player,
    /// AI roster by index into `GameState::ai`.
    Ai(usize),
}

impl Side {
    /// Owner tag written onto entities created by this side.
    pub fn tag(self) -> String {
        match self {
            Side::Player => PLAYER_TAG.to_string(),
            Side::Ai(0) => AI_TAG_PREFIX.to_string(),
            Side::Ai(i) => format!("{}{}", AI_TAG_PREFIX, i + 1),
        }
    }

    pub fn is_ai(self) -> bool {
        matches!(self, Side::Ai(_))
    }
}

/// Tile coordinate in the world grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub location: Location,
    #[serde(default)]
    pub buildings: Vec<String>,
    pub population: u32,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub location: Location,
    pub owner: String,
    pub movement_points: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Technology {
    pub name: String,
    pub turns_remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub improved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

/// One side's owned assets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerRoster {
    #[serde(default)]
    pub cities: Vec<City>,
    #[serde(default)]
    pub units: Vec<Unit>,
    #[serde(default)]
    pub technologies: Vec<Technology>,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
}

impl PlayerRoster {
    pub fn city(&self, id: &str) -> Option<&City> {
        self.cities.iter().find(|c| c.id == id)
    }

    pub fn city_mut(&mut self, id: &str) -> Option<&mut City> {
        self.cities.iter_mut().find(|c| c.id == id)
    }

    pub fn unit(&self, id: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn unit_mut(&mut self, id: &str) -> Option<&mut Unit> {
        self.units.iter_mut().find(|u| u.id == id)
    }

    pub fn has_technology(&self, name: &str) -> bool {
        self.technologies.iter().any(|t| t.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldMap {
    pub size: MapSize,
    /// 0/1 visibility grid, `size.height` rows of `size.width` cells.
    pub explored: Vec<Vec<u8>>,
    /// Opaque to the engine, carried through untouched.
    #[serde(default)]
    pub visible_objects: Vec<serde_json::Value>,
}

impl WorldMap {
    /// All-fogged map of the given dimensions.
    pub fn unexplored(size: MapSize) -> Self {
        Self {
            size,
            explored: vec![vec![0; size.width as usize]; size.height as usize],
            visible_objects: Vec::new(),
        }
    }

    pub fn center(&self) -> Location {
        Location {
            x: self.size.width / 2,
            y: self.size.height / 2,
        }
    }
}

/// Root mutable aggregate for one game instance.
///
/// The engine always works on a clone of the loaded state; a turn either
/// produces a fully valid new state or aborts with itemized errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub turn: u32,
    pub current_player: String,
    pub player: PlayerRoster,
    /// One roster per AI side. Historically a single roster; kept as a list
    /// and lazily initialized to one empty roster before any AI turn.
    pub ai: Vec<PlayerRoster>,
    pub map: WorldMap,
}

impl GameState {
    pub fn roster(&self, side: Side) -> Option<&PlayerRoster> {
        match side {
            Side::Player => Some(&self.player),
            Side::Ai(i) => self.ai.get(i),
        }
    }

    pub fn roster_mut(&mut self, side: Side) -> Option<&mut PlayerRoster> {
        match side {
            Side::Player => Some(&mut self.player),
            Side::Ai(i) => self.ai.get_mut(i),
        }
    }

    /// Guarantees at least one AI roster exists.
    pub fn ensure_ai_roster(&mut self) {
        if self.ai.is_empty() {
            self.ai.push(PlayerRoster::default());
        }
    }

    /// Removes every unit belonging to a side other than `acting` at the
    /// given location. Returns how many were removed.
    pub fn remove_opposing_units_at(&mut self, acting: Side, location: Location) -> usize {
        let mut removed = 0;
        if acting != Side::Player {
            let before = self.player.units.len();
            self.player.units.retain(|u| u.location != location);
            removed += before - self.player.units.len();
        }
        for (i, roster) in self.ai.iter_mut().enumerate() {
            if acting == Side::Ai(i) {
                continue;
            }
            let before = roster.units.len();
            roster.units.retain(|u| u.location != location);
            removed += before - roster.units.len();
        }
        removed
    }

    /// Structural shape check run at the storage boundary.
    ///
    /// Collects every defect instead of stopping at the first so a caller
    /// gets the complete list in one rejection.
    pub fn validate(&self) -> Vec<StateDefect> {
        let mut defects = Vec::new();

        if self.map.explored.len() != self.map.size.height as usize {
            defects.push(StateDefect::ExploredGridShape {
                expected_rows: self.map.size.height,
                actual_rows: self.map.explored.len(),
            });
        }
        for (y, row) in self.map.explored.iter().enumerate() {
            if row.len() != self.map.size.width as usize {
                defects.push(StateDefect::ExploredRowWidth {
                    row: y,
                    expected: self.map.size.width,
                    actual: row.len(),
                });
            }
        }

        check_roster(&self.player, PLAYER_TAG, false, &mut defects);
        for (i, roster) in self.ai.iter().enumerate() {
            let tag = Side::Ai(i).tag();
            check_roster(roster, &tag, true, &mut defects);
        }

        defects
    }
}

fn check_roster(roster: &PlayerRoster, tag: &str, ai: bool, defects: &mut Vec<StateDefect>) {
    let mut city_ids = std::collections::BTreeSet::new();
    for city in &roster.cities {
        if !city_ids.insert(city.id.as_str()) {
            defects.push(StateDefect::DuplicateCityId {
                side: tag.to_string(),
                id: city.id.clone(),
            });
        }
        if !owner_matches(&city.owner, tag, ai) {
            defects.push(StateDefect::OwnerMismatch {
                side: tag.to_string(),
                entity: "city",
                id: city.id.clone(),
                owner: city.owner.clone(),
            });
        }
    }
    let mut unit_ids = std::collections::BTreeSet::new();
    for unit in &roster.units {
        if !unit_ids.insert(unit.id.as_str()) {
            defects.push(StateDefect::DuplicateUnitId {
                side: tag.to_string(),
                id: unit.id.clone(),
            });
        }
        if !owner_matches(&unit.owner, tag, ai) {
            defects.push(StateDefect::OwnerMismatch {
                side: tag.to_string(),
                entity: "unit",
                id: unit.id.clone(),
                owner: unit.owner.clone(),
            });
        }
    }
}

// AI owner tags vary across saves ("ai", "ai2", ...), so AI rosters accept
// any tag carrying the prefix.
fn owner_matches(owner: &str, tag: &str, ai: bool) -> bool {
    if ai {
        owner.starts_with(AI_TAG_PREFIX)
    } else {
        owner == tag
    }
}

/// One itemized structural problem found by [`GameState::validate`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateDefect {
    #[error("duplicate city id '{id}' on side '{side}'")]
    DuplicateCityId { side: String, id: String },
    #[error("duplicate unit id '{id}' on side '{side}'")]
    DuplicateUnitId { side: String, id: String },
    #[error("explored grid has {actual_rows} rows, map height is {expected_rows}")]
    ExploredGridShape { expected_rows: u32, actual_rows: usize },
    #[error("explored row {row} has {actual} cells, map width is {expected}")]
    ExploredRowWidth { row: usize, expected: u32, actual: usize },
    #[error("{entity} '{id}' on side '{side}' has owner '{owner}'")]
    OwnerMismatch {
        side: String,
        entity: &'static str,
        id: String,
        owner: String,
    },
}

/// Stored envelope for one saved game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRecord {
    pub id: String,
    /// Opaque caller identity that owns this record.
    pub owner_id: String,
    pub name: String,
    pub scenario_id: String,
    pub created_at: DateTime<Utc>,
    pub last_saved: DateTime<Utc>,
    pub is_autosave: bool,
    #[serde(default)]
    pub cheats_used: Vec<String>,
    pub state: GameState,
}

impl GameRecord {
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        name: impl Into<String>,
        scenario_id: impl Into<String>,
        state: GameState,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            name: name.into(),
            scenario_id: scenario_id.into(),
            created_at: now,
            last_saved: now,
            is_autosave: false,
            cheats_used: Vec::new(),
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_state() -> GameState {
        GameState {
            turn: 1,
            current_player: PLAYER_TAG.to_string(),
            player: PlayerRoster::default(),
            ai: vec![PlayerRoster::default()],
            map: WorldMap::unexplored(MapSize {
                width: 4,
                height: 3,
            }),
        }
    }

    #[test]
    fn valid_state_has_no_defects() {
        assert!(small_state().validate().is_empty());
    }

    #[test]
    fn duplicate_unit_ids_are_reported() {
        let mut state = small_state();
        for _ in 0..2 {
            state.player.units.push(Unit {
                id: "player_unit_1".into(),
                kind: "warrior".into(),
                location: Location { x: 0, y: 0 },
                owner: PLAYER_TAG.into(),
                movement_points: 2,
                health: None,
            });
        }
        let defects = state.validate();
        assert_eq!(defects.len(), 1);
        assert!(matches!(defects[0], StateDefect::DuplicateUnitId { .. }));
    }

    #[test]
    fn grid_shape_mismatch_is_reported() {
        let mut state = small_state();
        state.map.explored.pop();
        let defects = state.validate();
        assert!(defects
            .iter()
            .any(|d| matches!(d, StateDefect::ExploredGridShape { .. })));
    }

    #[test]
    fn owner_mismatch_is_reported_for_player_side() {
        let mut state = small_state();
        state.player.cities.push(City {
            id: "city1".into(),
            name: None,
            location: Location { x: 1, y: 1 },
            buildings: Vec::new(),
            population: 1,
            owner: "ai".into(),
        });
        let defects = state.validate();
        assert!(defects
            .iter()
            .any(|d| matches!(d, StateDefect::OwnerMismatch { .. })));
    }

    #[test]
    fn ensure_ai_roster_initializes_once() {
        let mut state = small_state();
        state.ai.clear();
        state.ensure_ai_roster();
        state.ensure_ai_roster();
        assert_eq!(state.ai.len(), 1);
    }

    #[test]
    fn state_round_trips_through_json() {
        let state = small_state();
        let json = serde_json::to_string(&state).unwrap();
        let back: GameState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }
}
