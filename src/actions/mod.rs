//! Action validation and application for one side's batch

use rand::Rng;
use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::spatial::{random_unexplored_tile, reveal_radius};
use crate::state::{City, GameState, Location, Side, Technology, Unit};

/// Movement points assigned to freshly trained units.
const DEFAULT_MOVEMENT_POINTS: u32 = 2;

/// One typed player or AI action.
///
/// Parsed from `{type, details}` JSON at the boundary; see [`parse_action`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "details")]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Action {
    MoveUnit {
        unit_id: String,
        destination: Location,
    },
    BuildStructure {
        city_id: String,
        structure_type: String,
    },
    TrainUnit {
        city_id: String,
        unit_type: String,
        quantity: u32,
    },
    ImproveResource {
        resource_type: String,
    },
    ResearchTechnology {
        technology: String,
    },
    FoundCity {
        city_id: Option<String>,
        location: Option<Location>,
    },
    AttackEnemy {
        location: Location,
    },
    EndTurn,
}

impl Action {
    /// Wire name of the action type.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::MoveUnit { .. } => "moveUnit",
            Action::BuildStructure { .. } => "buildStructure",
            Action::TrainUnit { .. } => "trainUnit",
            Action::ImproveResource { .. } => "improveResource",
            Action::ResearchTechnology { .. } => "researchTechnology",
            Action::FoundCity { .. } => "foundCity",
            Action::AttackEnemy { .. } => "attackEnemy",
            Action::EndTurn => "endTurn",
        }
    }

    /// The `details` payload as JSON, used in failure reports and prompts.
    pub fn details_json(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.get("details").cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

/// Why a single action was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("unknown action type '{0}'")]
    UnknownType(String),
    #[error("action is missing field '{0}'")]
    MissingField(&'static str),
    #[error("unit '{0}' not found in acting roster")]
    UnitNotFound(String),
    #[error("city '{0}' not found in acting roster")]
    CityNotFound(String),
    #[error("city '{0}' already exists")]
    CityAlreadyExists(String),
    #[error("resource '{0}' not found in acting roster")]
    ResourceNotFound(String),
    #[error("technology '{0}' is already researched")]
    TechnologyAlreadyKnown(String),
    #[error("no enemy units at ({x}, {y})")]
    NothingToAttack { x: u32, y: u32 },
    #[error("foundCity requires a location")]
    MissingLocation,
    #[error("acting side has no roster")]
    RosterMissing,
}

/// Structured per-action rejection returned alongside the surviving state.
#[derive(Debug, Clone, Serialize)]
pub struct ActionFailure {
    pub action: String,
    pub details: Value,
    #[serde(serialize_with = "error_as_string")]
    pub error: ActionError,
}

fn error_as_string<S: Serializer>(err: &ActionError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(err)
}

impl ActionFailure {
    fn new(action: &str, details: Value, error: ActionError) -> Self {
        Self {
            action: action.to_string(),
            details,
            error,
        }
    }
}

/// Parse one `{type, details}` JSON object into a typed [`Action`].
///
/// Unknown types and missing detail fields come back as [`ActionError`] so a
/// batch can keep processing the remaining entries.
pub fn parse_action(value: &Value) -> Result<Action, ActionError> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ActionError::MissingField("type"))?;
    let details = value.get("details").cloned().unwrap_or_else(|| Value::Object(Default::default()));

    match kind {
        "moveUnit" => Ok(Action::MoveUnit {
            unit_id: require_str(&details, "unitId")?,
            destination: require_location(&details, "destination")?,
        }),
        "buildStructure" => Ok(Action::BuildStructure {
            city_id: require_str(&details, "cityId")?,
            structure_type: require_str(&details, "structureType")?,
        }),
        "trainUnit" => Ok(Action::TrainUnit {
            city_id: require_str(&details, "cityId")?,
            unit_type: require_str(&details, "unitType")?,
            quantity: details
                .get("quantity")
                .and_then(Value::as_u64)
                .map(|q| q as u32)
                .unwrap_or(1),
        }),
        "improveResource" => Ok(Action::ImproveResource {
            resource_type: require_str(&details, "resourceType")?,
        }),
        "researchTechnology" => Ok(Action::ResearchTechnology {
            technology: require_str(&details, "technology")?,
        }),
        "foundCity" => Ok(Action::FoundCity {
            city_id: details
                .get("cityId")
                .and_then(Value::as_str)
                .map(str::to_string),
            location: optional_location(&details, "location"),
        }),
        "attackEnemy" => Ok(Action::AttackEnemy {
            location: require_location(&details, "location")?,
        }),
        "endTurn" => Ok(Action::EndTurn),
        other => Err(ActionError::UnknownType(other.to_string())),
    }
}

fn require_str(details: &Value, field: &'static str) -> Result<String, ActionError> {
    details
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ActionError::MissingField(field))
}

fn optional_location(details: &Value, field: &str) -> Option<Location> {
    let loc = details.get(field)?;
    let x = loc.get("x").and_then(Value::as_u64)? as u32;
    let y = loc.get("y").and_then(Value::as_u64)? as u32;
    Some(Location { x, y })
}

fn require_location(details: &Value, field: &'static str) -> Result<Location, ActionError> {
    optional_location(details, field).ok_or(ActionError::MissingField(field))
}

/// Parse a raw batch, keeping per-entry failures.
pub fn parse_batch(values: &[Value]) -> (Vec<Action>, Vec<ActionFailure>) {
    let mut actions = Vec::with_capacity(values.len());
    let mut failures = Vec::new();
    for value in values {
        match parse_action(value) {
            Ok(action) => actions.push(action),
            Err(error) => {
                let kind = value
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                failures.push(ActionFailure::new(kind, value.clone(), error));
            }
        }
    }
    (actions, failures)
}

/// Apply an ordered batch for one side.
///
/// Works on a clone of `state`; valid actions mutate the clone in order and
/// each rejected action is collected instead of aborting the batch. Later
/// actions observe the effects of earlier ones.
pub fn apply_actions<R: Rng>(
    state: &GameState,
    actions: &[Action],
    side: Side,
    rng: &mut R,
) -> (GameState, Vec<ActionFailure>) {
    let mut next = state.clone();
    let mut failures = Vec::new();

    for action in actions {
        if let Err(error) = apply_one(&mut next, action, side, rng) {
            failures.push(ActionFailure::new(action.kind(), action.details_json(), error));
        }
    }

    (next, failures)
}

fn apply_one<R: Rng>(
    state: &mut GameState,
    action: &Action,
    side: Side,
    rng: &mut R,
) -> Result<(), ActionError> {
    let tag = side.tag();

    match action {
        Action::MoveUnit {
            unit_id,
            destination,
        } => {
            let roster = state.roster_mut(side).ok_or(ActionError::RosterMissing)?;
            let unit = roster
                .unit_mut(unit_id)
                .ok_or_else(|| ActionError::UnitNotFound(unit_id.clone()))?;
            unit.location = *destination;
            Ok(())
        }
        Action::BuildStructure {
            city_id,
            structure_type,
        } => {
            let roster = state.roster_mut(side).ok_or(ActionError::RosterMissing)?;
            let city = roster
                .city_mut(city_id)
                .ok_or_else(|| ActionError::CityNotFound(city_id.clone()))?;
            city.buildings.push(structure_type.clone());
            Ok(())
        }
        Action::TrainUnit {
            city_id,
            unit_type,
            quantity,
        } => {
            let roster = state.roster_mut(side).ok_or(ActionError::RosterMissing)?;
            let location = roster
                .city(city_id)
                .ok_or_else(|| ActionError::CityNotFound(city_id.clone()))?
                .location;
            for _ in 0..*quantity {
                let id = format!("{}_unit_{}", tag, roster.units.len() + 1);
                roster.units.push(Unit {
                    id,
                    kind: unit_type.clone(),
                    location,
                    owner: tag.clone(),
                    movement_points: DEFAULT_MOVEMENT_POINTS,
                    health: None,
                });
            }
            Ok(())
        }
        Action::ImproveResource { resource_type } => {
            let roster = state.roster_mut(side).ok_or(ActionError::RosterMissing)?;
            let resource = roster
                .resources
                .get_mut(resource_type)
                .ok_or_else(|| ActionError::ResourceNotFound(resource_type.clone()))?;
            resource.improved = true;
            Ok(())
        }
        Action::ResearchTechnology { technology } => {
            let roster = state.roster_mut(side).ok_or(ActionError::RosterMissing)?;
            if roster.has_technology(technology) {
                return Err(ActionError::TechnologyAlreadyKnown(technology.clone()));
            }
            roster.technologies.push(Technology {
                name: technology.clone(),
                turns_remaining: 0,
            });
            Ok(())
        }
        Action::FoundCity { city_id, location } => {
            // Pick the site before borrowing the roster: the AI substitutes a
            // random unexplored tile, the player must name one.
            let site = match location {
                Some(loc) => *loc,
                None if side.is_ai() => random_unexplored_tile(&state.map, rng),
                None => return Err(ActionError::MissingLocation),
            };
            let roster = state.roster_mut(side).ok_or(ActionError::RosterMissing)?;
            let id = city_id
                .clone()
                .unwrap_or_else(|| format!("{}_city_{}", tag, roster.cities.len() + 1));
            if roster.city(&id).is_some() {
                return Err(ActionError::CityAlreadyExists(id));
            }
            roster.cities.push(City {
                id,
                name: None,
                location: site,
                buildings: Vec::new(),
                population: 1,
                owner: tag.clone(),
            });
            let first_city = roster.cities.len() == 1;
            if first_city {
                reveal_radius(&mut state.map, site, 2);
            }
            Ok(())
        }
        Action::AttackEnemy { location } => {
            let removed = state.remove_opposing_units_at(side, *location);
            if removed == 0 && !side.is_ai() {
                return Err(ActionError::NothingToAttack {
                    x: location.x,
                    y: location.y,
                });
            }
            Ok(())
        }
        Action::EndTurn => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::explored_count;
    use crate::state::{MapSize, PlayerRoster, ResourceState, WorldMap, PLAYER_TAG};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;

    fn base_state() -> GameState {
        let mut state = GameState {
            turn: 1,
            current_player: PLAYER_TAG.to_string(),
            player: PlayerRoster::default(),
            ai: vec![PlayerRoster::default()],
            map: WorldMap::unexplored(MapSize {
                width: 10,
                height: 10,
            }),
        };
        state.player.cities.push(City {
            id: "city1".into(),
            name: Some("Alpha".into()),
            location: Location { x: 2, y: 3 },
            buildings: vec!["granary".into()],
            population: 5,
            owner: PLAYER_TAG.into(),
        });
        state.player.units.push(Unit {
            id: "unit1".into(),
            kind: "warrior".into(),
            location: Location { x: 2, y: 4 },
            owner: PLAYER_TAG.into(),
            movement_points: 2,
            health: None,
        });
        state
            .player
            .resources
            .insert("wheat".into(), ResourceState {
                improved: false,
                location: Some(Location { x: 3, y: 3 }),
            });
        state
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    #[test]
    fn empty_batch_leaves_state_unchanged() {
        let state = base_state();
        let (next, failures) = apply_actions(&state, &[], Side::Player, &mut rng());
        assert!(failures.is_empty());
        assert_eq!(state, next);
    }

    #[test]
    fn move_unknown_unit_reports_error_and_keeps_state() {
        let state = base_state();
        let batch = [Action::MoveUnit {
            unit_id: "ghost".into(),
            destination: Location { x: 1, y: 1 },
        }];
        let (next, failures) = apply_actions(&state, &batch, Side::Player, &mut rng());
        assert_eq!(state, next);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].error.to_string().contains("ghost"));
    }

    #[test]
    fn move_updates_unit_location() {
        let state = base_state();
        let batch = [Action::MoveUnit {
            unit_id: "unit1".into(),
            destination: Location { x: 5, y: 5 },
        }];
        let (next, failures) = apply_actions(&state, &batch, Side::Player, &mut rng());
        assert!(failures.is_empty());
        assert_eq!(next.player.units[0].location, Location { x: 5, y: 5 });
    }

    #[test]
    fn train_unit_quantity_spawns_units_at_city() {
        let state = base_state();
        let batch = [Action::TrainUnit {
            city_id: "city1".into(),
            unit_type: "archer".into(),
            quantity: 3,
        }];
        let (next, failures) = apply_actions(&state, &batch, Side::Player, &mut rng());
        assert!(failures.is_empty());
        assert_eq!(next.player.units.len(), 4);
        let city_location = next.player.city("city1").unwrap().location;
        for unit in next.player.units.iter().skip(1) {
            assert_eq!(unit.location, city_location);
            assert_eq!(unit.owner, PLAYER_TAG);
            assert_eq!(unit.movement_points, 2);
        }
        assert_eq!(next.player.units[1].id, "player_unit_2");
        assert_eq!(next.player.units[3].id, "player_unit_4");
    }

    #[test]
    fn research_rejects_duplicate_but_keeps_first() {
        let state = base_state();
        let batch = [
            Action::ResearchTechnology {
                technology: "Pottery".into(),
            },
            Action::ResearchTechnology {
                technology: "Pottery".into(),
            },
        ];
        let (next, failures) = apply_actions(&state, &batch, Side::Player, &mut rng());
        let pottery: Vec<_> = next
            .player
            .technologies
            .iter()
            .filter(|t| t.name == "Pottery")
            .collect();
        assert_eq!(pottery.len(), 1);
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            failures[0].error,
            ActionError::TechnologyAlreadyKnown(_)
        ));
    }

    #[test]
    fn improve_resource_sets_flag() {
        let state = base_state();
        let batch = [Action::ImproveResource {
            resource_type: "wheat".into(),
        }];
        let (next, failures) = apply_actions(&state, &batch, Side::Player, &mut rng());
        assert!(failures.is_empty());
        assert!(next.player.resources["wheat"].improved);
    }

    #[test]
    fn player_found_city_without_location_is_an_error() {
        let state = base_state();
        let batch = [Action::FoundCity {
            city_id: None,
            location: None,
        }];
        let (next, failures) = apply_actions(&state, &batch, Side::Player, &mut rng());
        assert_eq!(state, next);
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].error, ActionError::MissingLocation));
    }

    #[test]
    fn ai_found_city_without_location_picks_unexplored_tile() {
        let state = base_state();
        let batch = [Action::FoundCity {
            city_id: None,
            location: None,
        }];
        let (next, failures) = apply_actions(&state, &batch, Side::Ai(0), &mut rng());
        assert!(failures.is_empty());
        assert_eq!(next.ai[0].cities.len(), 1);
        assert_eq!(next.ai[0].cities[0].id, "ai_city_1");
        assert_eq!(next.ai[0].cities[0].owner, "ai");
    }

    #[test]
    fn first_city_reveals_surroundings() {
        let state = base_state();
        assert_eq!(explored_count(&state.map), 0);
        let batch = [Action::FoundCity {
            city_id: Some("ai_city_1".into()),
            location: Some(Location { x: 5, y: 5 }),
        }];
        let (next, _) = apply_actions(&state, &batch, Side::Ai(0), &mut rng());
        // radius-2 square around (5, 5)
        assert_eq!(explored_count(&next.map), 25);
    }

    #[test]
    fn attack_clears_enemy_units_and_misses_report_for_player() {
        let mut state = base_state();
        state.ai[0].units.push(Unit {
            id: "ai_unit_1".into(),
            kind: "warrior".into(),
            location: Location { x: 7, y: 7 },
            owner: "ai".into(),
            movement_points: 2,
            health: None,
        });

        let hit = [Action::AttackEnemy {
            location: Location { x: 7, y: 7 },
        }];
        let (next, failures) = apply_actions(&state, &hit, Side::Player, &mut rng());
        assert!(failures.is_empty());
        assert!(next.ai[0].units.is_empty());

        let miss = [Action::AttackEnemy {
            location: Location { x: 0, y: 0 },
        }];
        let (_, failures) = apply_actions(&state, &miss, Side::Player, &mut rng());
        assert_eq!(failures.len(), 1);

        // the AI variant is silent on a miss
        let (_, failures) = apply_actions(&state, &miss, Side::Ai(0), &mut rng());
        assert!(failures.is_empty());
    }

    #[test]
    fn parse_batch_keeps_going_past_unknown_types() {
        let raw = vec![
            json!({"type": "summonDragon", "details": {}}),
            json!({"type": "endTurn"}),
            json!({"type": "moveUnit", "details": {"unitId": "unit1", "destination": {"x": 1, "y": 2}}}),
        ];
        let (actions, failures) = parse_batch(&raw);
        assert_eq!(actions.len(), 2);
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].error, ActionError::UnknownType(_)));
    }

    #[test]
    fn parse_defaults_train_quantity_to_one() {
        let value = json!({"type": "trainUnit", "details": {"cityId": "c", "unitType": "warrior"}});
        match parse_action(&value).unwrap() {
            Action::TrainUnit { quantity, .. } => assert_eq!(quantity, 1),
            other => panic!("unexpected action {other:?}"),
        }
    }
}
