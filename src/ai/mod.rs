//! AI decision normalizer
//!
//! Turns untrusted oracle output into a sanitized, orderable action
//! sequence. Every failure mode degrades to a deterministic local policy so
//! the AI side always has a legal move.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::actions::{parse_action, Action};
use crate::oracle::{extract_json, DecisionOracle, OraclePrompt};
use crate::spatial::explored_count;
use crate::state::{City, GameState, Location, PlayerRoster, Unit};

/// Unit type proposed when the fallback policy has to train something.
const FALLBACK_UNIT_TYPE: &str = "warrior";

/// Reduced projection of the game state sent to the oracle.
///
/// The player's asset lists are truncated to keep the payload bounded; the
/// AI roster is included in full since it is what the oracle acts on.
#[derive(Debug, Serialize)]
pub struct StateProjection<'a> {
    pub turn: u32,
    pub current_player: &'a str,
    pub map: MapSummary,
    pub player: RosterView<'a>,
    pub ai: RosterView<'a>,
}

#[derive(Debug, Serialize)]
pub struct MapSummary {
    pub width: u32,
    pub height: u32,
    pub explored_tiles: usize,
}

#[derive(Debug, Serialize)]
pub struct RosterView<'a> {
    pub cities: &'a [City],
    pub units: &'a [Unit],
}

impl<'a> StateProjection<'a> {
    pub fn new(state: &'a GameState, roster: &'a PlayerRoster, limit: usize) -> Self {
        Self {
            turn: state.turn,
            current_player: &state.current_player,
            map: MapSummary {
                width: state.map.size.width,
                height: state.map.size.height,
                explored_tiles: explored_count(&state.map),
            },
            player: RosterView {
                cities: truncate(&state.player.cities, limit),
                units: truncate(&state.player.units, limit),
            },
            ai: RosterView {
                cities: &roster.cities,
                units: &roster.units,
            },
        }
    }
}

fn truncate<T>(items: &[T], limit: usize) -> &[T] {
    &items[..items.len().min(limit)]
}

const SYSTEM_PROMPT: &str = "\
You are an AI agent playing a turn-based strategy game in the style of \
Civilization. You can only control assets (units, cities, resources) whose \
'owner' field belongs to you. If you have no cities, found one. If you have \
cities but no units, train one. Take at least one meaningful action before \
ending your turn, and always end with an endTurn action.\n\
Your actions must follow these schemas:\n\
- moveUnit: {\"type\": \"moveUnit\", \"details\": {\"unitId\": <string>, \"destination\": {\"x\": <int>, \"y\": <int>}}}\n\
- buildStructure: {\"type\": \"buildStructure\", \"details\": {\"cityId\": <string>, \"structureType\": <string>}}\n\
- trainUnit: {\"type\": \"trainUnit\", \"details\": {\"cityId\": <string>, \"unitType\": <string>, \"quantity\": <int>}}\n\
- improveResource: {\"type\": \"improveResource\", \"details\": {\"resourceType\": <string>}}\n\
- researchTechnology: {\"type\": \"researchTechnology\", \"details\": {\"technology\": <string>}}\n\
- foundCity: {\"type\": \"foundCity\", \"details\": {\"cityId\": <string>, \"location\": {\"x\": <int>, \"y\": <int>}}}\n\
- attackEnemy: {\"type\": \"attackEnemy\", \"details\": {\"location\": {\"x\": <int>, \"y\": <int>}}}\n\
- endTurn: {\"type\": \"endTurn\", \"details\": {}}\n\
Respond with a JSON object: {\"actions\": [...], \"reasoning\": <string>}. \
Actions that do not follow the schemas are ignored.";

/// Build the prompt pair for one AI turn.
pub fn build_prompt(state: &GameState, roster: &PlayerRoster, limit: usize) -> OraclePrompt {
    let projection = StateProjection::new(state, roster, limit);
    let payload = serde_json::to_string(&projection).unwrap_or_else(|_| "{}".to_string());
    OraclePrompt {
        system: SYSTEM_PROMPT.to_string(),
        user: format!("<game_state>\n{payload}\n</game_state>"),
    }
}

/// Deterministic policy used whenever the oracle cannot be trusted.
///
/// Keeps the AI making forward progress: found a city, then train a unit,
/// then keep a unit moving. Always terminated by `EndTurn`.
pub fn fallback_policy(roster: &PlayerRoster, state: &GameState) -> Vec<Action> {
    let mut actions = Vec::new();
    if roster.cities.is_empty() {
        actions.push(Action::FoundCity {
            city_id: None,
            location: Some(state.map.center()),
        });
    } else if roster.units.is_empty() {
        actions.push(Action::TrainUnit {
            city_id: roster.cities[0].id.clone(),
            unit_type: FALLBACK_UNIT_TYPE.to_string(),
            quantity: 1,
        });
    } else {
        let unit = &roster.units[0];
        let width = state.map.size.width.max(1);
        let height = state.map.size.height.max(1);
        actions.push(Action::MoveUnit {
            unit_id: unit.id.clone(),
            destination: Location {
                x: (unit.location.x + 1) % width,
                y: (unit.location.y + 1) % height,
            },
        });
    }
    actions.push(Action::EndTurn);
    actions
}

/// Resolved entity reference carried by a sequenced action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

/// One entry of the normalized, orderable AI action sequence.
#[derive(Debug, Clone, Serialize)]
pub struct SequencedAction {
    /// Stable 1-based position within the turn.
    pub id: u32,
    pub action_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Location>>,
}

/// Outcome of one normalizer run: the actions to apply plus their sequence.
#[derive(Debug, Serialize)]
pub struct AiTurn {
    pub actions: Vec<Action>,
    pub sequence: Vec<SequencedAction>,
}

/// Ask the oracle for a turn and normalize whatever comes back.
///
/// Never fails: oracle errors, unparsable text, and fully-filtered action
/// lists all degrade to [`fallback_policy`].
pub async fn decide(state: &GameState, oracle: &dyn DecisionOracle, limit: usize) -> AiTurn {
    let empty = PlayerRoster::default();
    let roster = state.ai.first().unwrap_or(&empty);

    let prompt = build_prompt(state, roster, limit);
    let proposed = match oracle.propose(&prompt).await {
        Ok(raw) => parse_oracle_actions(&raw),
        Err(err) => {
            warn!(error = %err, "oracle unavailable, using fallback policy");
            None
        }
    };

    let mut actions = match proposed {
        Some(actions) => filter_owned(actions, roster),
        None => Vec::new(),
    };

    if actions.iter().all(|a| matches!(a, Action::EndTurn)) {
        // Nothing actionable survived sanitization.
        actions = fallback_policy(roster, state);
    } else if !matches!(actions.last(), Some(Action::EndTurn)) {
        actions.push(Action::EndTurn);
    }

    let sequence = build_sequence(&actions);
    AiTurn { actions, sequence }
}

// Extract the `actions` array from raw oracle text; None means the text had
// no usable JSON at all.
fn parse_oracle_actions(raw: &str) -> Option<Vec<Action>> {
    let json = extract_json(raw)?;
    let value: Value = serde_json::from_str(&json).ok()?;
    let entries = value.get("actions")?.as_array()?;

    let mut actions = Vec::with_capacity(entries.len());
    for entry in entries {
        match parse_action(entry) {
            Ok(action) => actions.push(action),
            Err(err) => debug!(error = %err, "skipping malformed oracle action"),
        }
    }
    Some(actions)
}

// Ownership re-validation: the oracle may only reference its own assets.
// Violations are dropped silently since they are the oracle's mistake, not
// the caller's.
fn filter_owned(actions: Vec<Action>, roster: &PlayerRoster) -> Vec<Action> {
    actions
        .into_iter()
        .filter(|action| match action {
            Action::MoveUnit { unit_id, .. } => {
                let owned = roster.unit(unit_id).is_some();
                if !owned {
                    debug!(%unit_id, "dropping oracle action on foreign unit");
                }
                owned
            }
            Action::BuildStructure { city_id, .. } | Action::TrainUnit { city_id, .. } => {
                let owned = roster.city(city_id).is_some();
                if !owned {
                    debug!(%city_id, "dropping oracle action on foreign city");
                }
                owned
            }
            _ => true,
        })
        .collect()
}

fn build_sequence(actions: &[Action]) -> Vec<SequencedAction> {
    actions
        .iter()
        .enumerate()
        .map(|(idx, action)| {
            let entity = match action {
                Action::MoveUnit { unit_id, .. } => Some(EntityRef {
                    id: unit_id.clone(),
                    kind: "unit",
                }),
                Action::BuildStructure { city_id, .. } | Action::TrainUnit { city_id, .. } => {
                    Some(EntityRef {
                        id: city_id.clone(),
                        kind: "city",
                    })
                }
                _ => None,
            };
            let path = match action {
                Action::MoveUnit { destination, .. } => Some(vec![*destination]),
                _ => None,
            };
            SequencedAction {
                id: (idx + 1) as u32,
                action_type: action.kind().to_string(),
                entity,
                path,
            }
        })
        .collect()
}
