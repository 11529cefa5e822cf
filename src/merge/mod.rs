//! State merge guard for the reduced-roster oracle mode
//!
//! In this mode the oracle sees the whole roster list and answers with a
//! complete proposed next state. The guard only lets same-typed leaf values
//! through, and only on entities belonging to AI-controlled sides; every
//! structural deviation keeps the original data. The oracle inventing
//! fields, dropping entities, or echoing fenced JSON must not be able to
//! corrupt the authoritative state.

use serde_json::{Map, Value};
use tracing::warn;

use crate::state::PlayerRoster;

/// Merge an oracle-proposed roster list into the original.
///
/// `original` is the combined side list: index 0 is the human player and
/// every later roster is AI-controlled. `raw` is the oracle's response text.
/// The result always has exactly the same players, in the same order, with
/// the same entity lists as `original`.
pub fn merge_rosters(original: &[PlayerRoster], raw: &str) -> Vec<PlayerRoster> {
    if is_contaminated(raw) {
        warn!("oracle response is contaminated, keeping original rosters");
        return original.to_vec();
    }

    let proposed: Vec<Value> = match parse_roster_list(raw) {
        Some(list) => list,
        None => {
            warn!("oracle response is not a roster list, keeping original rosters");
            return original.to_vec();
        }
    };

    original
        .iter()
        .enumerate()
        .map(|(idx, roster)| {
            // Non-AI sides never accept changes.
            if idx == 0 {
                return roster.clone();
            }
            match proposed.get(idx) {
                Some(candidate) => merge_one(roster, candidate),
                None => roster.clone(),
            }
        })
        .collect()
}

// Formatting artifacts mean the response went through a text channel we do
// not trust; the merge aborts rather than guessing where the JSON starts.
fn is_contaminated(raw: &str) -> bool {
    if raw.contains("```") {
        return true;
    }
    !matches!(raw.as_bytes().first(), Some(b'{') | Some(b'['))
}

fn parse_roster_list(raw: &str) -> Option<Vec<Value>> {
    let value: Value = serde_json::from_str(raw).ok()?;
    match value {
        Value::Array(list) => Some(list),
        Value::Object(mut map) => match map.remove("players") {
            Some(Value::Array(list)) => Some(list),
            _ => None,
        },
        _ => None,
    }
}

fn merge_one(original: &PlayerRoster, proposed: &Value) -> PlayerRoster {
    let original_value = match serde_json::to_value(original) {
        Ok(value) => value,
        Err(_) => return original.clone(),
    };
    let merged = merge_value(&original_value, proposed);
    match serde_json::from_value(merged) {
        Ok(roster) => roster,
        Err(err) => {
            warn!(error = %err, "merged roster failed to deserialize, keeping original");
            original.clone()
        }
    }
}

/// Structural merge of one JSON subtree.
///
/// - Objects keep exactly the original's keys; a same-named proposed field
///   recurses, everything else keeps the original value. `id` and `owner`
///   are pinned: rewriting them would amount to swapping the entity.
/// - Arrays must match in length; object elements must also agree on `id`,
///   otherwise the original element is kept (rejects reorders).
/// - Scalars copy only when the JSON runtime type matches.
fn merge_value(original: &Value, proposed: &Value) -> Value {
    match (original, proposed) {
        (Value::Object(o), Value::Object(p)) => {
            let mut merged = Map::with_capacity(o.len());
            for (key, ov) in o {
                let next = match p.get(key) {
                    Some(_) if key == "id" || key == "owner" => ov.clone(),
                    Some(pv) => merge_value(ov, pv),
                    None => ov.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (Value::Array(o), Value::Array(p)) if o.len() == p.len() => Value::Array(
            o.iter()
                .zip(p)
                .map(|(ov, pv)| {
                    if entity_identity_changed(ov, pv) {
                        ov.clone()
                    } else {
                        merge_value(ov, pv)
                    }
                })
                .collect(),
        ),
        (Value::Array(o), Value::Array(_)) => Value::Array(o.clone()),
        (o, p) if same_runtime_type(o, p) => p.clone(),
        (o, _) => o.clone(),
    }
}

fn entity_identity_changed(original: &Value, proposed: &Value) -> bool {
    match (original.get("id"), proposed.get("id")) {
        (Some(a), Some(b)) => a != b,
        _ => false,
    }
}

fn same_runtime_type(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Null, Value::Null)
            | (Value::Bool(_), Value::Bool(_))
            | (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
    )
}
