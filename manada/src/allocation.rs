//! Turning relative archetype weights into absolute instance counts.
//!
//! Fixed-count archetypes are served first. The rest of the population is split
//! with largest-remainder (Hamilton) rounding: every archetype gets the floor of its
//! exact share, and the leftover instances go one each to the largest fractional
//! remainders, ties broken by declaration order. The counts always sum to exactly
//! the population, and the result only depends on the weights and the population.
//!
//! Every weighted archetype is guaranteed at least one instance: if rounding left
//! one empty, an instance is moved to it from the archetype holding the most.
use crate::{archetype::Archetype, error::ConfigError};

/// Per-archetype instance counts, in declaration order.
pub fn allocate(archetypes: &[Archetype], population: usize) -> Result<Vec<usize>, ConfigError> {
    if archetypes.is_empty() {
        return Err(ConfigError::NoArchetypes);
    }

    let mut counts = vec![0usize; archetypes.len()];
    let mut fixed_total = 0usize;
    let mut weighted = Vec::new();
    for (i, a) in archetypes.iter().enumerate() {
        match a.fixed_count {
            Some(n) => {
                counts[i] = n;
                fixed_total += n;
            }
            None => {
                if !(a.weight.is_finite() && a.weight > 0.0) {
                    return Err(ConfigError::InvalidWeight {
                        archetype: a.name.clone(),
                        weight: a.weight,
                    });
                }
                weighted.push(i);
            }
        }
    }

    let required = fixed_total + weighted.len();
    if population < required {
        return Err(ConfigError::PopulationTooSmall { population, required });
    }
    if weighted.is_empty() {
        // nothing can absorb the remainder
        if population != fixed_total {
            return Err(ConfigError::PopulationTooSmall {
                population,
                required: population.max(fixed_total + 1),
            });
        }
        return Ok(counts);
    }

    let weights: Vec<f64> = weighted.iter().map(|&i| archetypes[i].weight).collect();
    let shares = largest_remainder(&weights, population - fixed_total);
    for (&i, share) in weighted.iter().zip(shares) {
        counts[i] = share;
    }
    Ok(counts)
}

/// Largest-remainder split of `total` proportionally to `weights` (all > 0),
/// with every entry at least 1 when `total >= weights.len()`.
fn largest_remainder(weights: &[f64], total: usize) -> Vec<usize> {
    let sum: f64 = weights.iter().sum();
    let exact: Vec<f64> = weights.iter().map(|w| w / sum * total as f64).collect();
    let mut counts: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();

    let mut order: Vec<usize> = (0..weights.len()).collect();
    // stable sort keeps declaration order on equal remainders
    order.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.total_cmp(&ra)
    });

    // float error can push a floor one above the true share
    let mut assigned: usize = counts.iter().sum();
    for &i in order.iter().rev() {
        if assigned <= total {
            break;
        }
        if counts[i] > 0 {
            counts[i] -= 1;
            assigned -= 1;
        }
    }

    let mut leftover = total.saturating_sub(assigned);
    for &i in order.iter().cycle() {
        if leftover == 0 {
            break;
        }
        counts[i] += 1;
        leftover -= 1;
    }

    if total >= weights.len() {
        while let Some(empty) = counts.iter().position(|&c| c == 0) {
            // latest declared among the largest gives one up
            let donor = counts
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(&b.0)))
                .map(|(i, _)| i)
                .unwrap_or(empty);
            if counts[donor] < 2 {
                break;
            }
            counts[donor] -= 1;
            counts[empty] += 1;
        }
    }
    counts
}

/// Interleave archetype indexes round-robin so that a ramp-up launches a mix of
/// behaviors: counts `[3, 1, 2]` launch as `[0, 1, 2, 0, 2, 0]`.
pub fn launch_order(counts: &[usize]) -> Vec<usize> {
    let total = counts.iter().sum();
    let mut remaining = counts.to_vec();
    let mut order = Vec::with_capacity(total);
    while order.len() < total {
        for (i, left) in remaining.iter_mut().enumerate() {
            if *left > 0 {
                *left -= 1;
                order.push(i);
            }
        }
    }
    order
}
