//! Persisted-once random sequencing.
//!
//! Each team sees its own question order per phase and its own phase
//! order. Both are uniform Fisher–Yates permutations generated on
//! first access; the caller persists the result immediately and never
//! regenerates it, so a team's experience is stable across reloads
//! while differing between teams.

use rand::Rng;

use super::PhaseId;

/// Uniform random permutation of `[0, n)`.
pub fn shuffled_indices(n: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    fisher_yates(&mut indices);
    indices
}

/// Random per-team ordering of the five phases.
pub fn shuffled_phase_order() -> Vec<PhaseId> {
    let mut order = PhaseId::ALL.to_vec();
    fisher_yates(&mut order);
    order
}

fn fisher_yates<T>(items: &mut [T]) {
    let mut rng = rand::rng();
    for i in (1..items.len()).rev() {
        let j = rng.random_range(0..=i);
        items.swap(i, j);
    }
}
