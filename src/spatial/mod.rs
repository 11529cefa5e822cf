//! Explored-grid utilities - fog-of-war reveal and tile selection

use rand::Rng;

use crate::state::{Location, WorldMap};

/// Reveal every tile within Chebyshev distance `radius` of `center`.
///
/// The square is clipped to the grid bounds. Re-revealing a tile is a no-op,
/// so applying the same reveal twice leaves the grid unchanged.
pub fn reveal_radius(map: &mut WorldMap, center: Location, radius: u32) {
    let min_x = center.x.saturating_sub(radius);
    let min_y = center.y.saturating_sub(radius);
    let max_x = (center.x + radius).min(map.size.width.saturating_sub(1));
    let max_y = (center.y + radius).min(map.size.height.saturating_sub(1));

    for y in min_y..=max_y {
        let Some(row) = map.explored.get_mut(y as usize) else {
            continue;
        };
        for x in min_x..=max_x {
            if let Some(cell) = row.get_mut(x as usize) {
                *cell = 1;
            }
        }
    }
}

/// Uniformly random unexplored tile.
///
/// Falls back to the geometric center when the whole map is revealed, so
/// callers always get a usable coordinate.
pub fn random_unexplored_tile<R: Rng>(map: &WorldMap, rng: &mut R) -> Location {
    let mut candidates = Vec::new();
    for (y, row) in map.explored.iter().enumerate() {
        for (x, cell) in row.iter().enumerate() {
            if *cell == 0 {
                candidates.push(Location {
                    x: x as u32,
                    y: y as u32,
                });
            }
        }
    }
    if candidates.is_empty() {
        return map.center();
    }
    candidates[rng.gen_range(0..candidates.len())]
}

/// Number of revealed tiles, used to bound the payload sent to the oracle.
pub fn explored_count(map: &WorldMap) -> usize {
    map.explored
        .iter()
        .map(|row| row.iter().filter(|c| **c == 1).count())
        .sum()
}
