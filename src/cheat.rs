//! Privileged single-target mutations with an audit trail

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::GameRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheatTarget {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheatRequest {
    pub cheat_code: String,
    pub target: CheatTarget,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldChange {
    pub before: Value,
    pub after: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct AffectedEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub changes: BTreeMap<String, FieldChange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheatOutcome {
    pub success: bool,
    pub message: String,
    pub affected: AffectedEntity,
}

impl CheatOutcome {
    fn failure(target: &CheatTarget, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            affected: AffectedEntity {
                kind: target.kind.clone(),
                id: target.id.clone(),
                changes: BTreeMap::new(),
            },
        }
    }
}

/// Apply a cheat code directly to the game record, bypassing action
/// validation. Successful cheats are appended to the record's audit log;
/// unknown codes and missing targets come back as failed outcomes rather
/// than errors.
pub fn apply_cheat(record: &mut GameRecord, req: &CheatRequest) -> CheatOutcome {
    match req.cheat_code.as_str() {
        "level_up" => level_up(record, req),
        other => CheatOutcome::failure(&req.target, format!("Unknown cheat code '{other}'.")),
    }
}

fn level_up(record: &mut GameRecord, req: &CheatRequest) -> CheatOutcome {
    if req.target.kind != "city" {
        return CheatOutcome::failure(
            &req.target,
            "Cheat code 'level_up' can only be used on cities.",
        );
    }

    let Some(city) = record.state.player.city_mut(&req.target.id) else {
        return CheatOutcome::failure(&req.target, format!("City '{}' not found.", req.target.id));
    };

    let before = city.population;
    city.population += 1;
    let after = city.population;

    let mut changes = BTreeMap::new();
    changes.insert(
        "population".to_string(),
        FieldChange {
            before: before.into(),
            after: after.into(),
        },
    );

    record.cheats_used.push(req.cheat_code.clone());

    CheatOutcome {
        success: true,
        message: "City leveled up successfully.".to_string(),
        affected: AffectedEntity {
            kind: "city".to_string(),
            id: req.target.id.clone(),
            changes,
        },
    }
}
