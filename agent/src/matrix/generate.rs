//! Random adjacency matrices for demos and tests

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Distance, INFINITY};
use crate::errors::{AgentError, Result};

/// Random directed graph on `order` vertices, row-major.
///
/// The diagonal is zero. Each off-diagonal edge exists with probability
/// `density` and carries a weight in `[1, max_weight]`; missing edges are
/// `INFINITY`. The same seed always yields the same matrix.
pub fn generate_matrix(
    order: usize,
    density: f64,
    max_weight: Distance,
    seed: u64,
) -> Result<Vec<Distance>> {
    if !(0.0..=1.0).contains(&density) {
        return Err(AgentError::Config(format!(
            "density {} must be within [0, 1]",
            density
        )));
    }
    if max_weight < 1 || max_weight == INFINITY {
        return Err(AgentError::Config(format!(
            "max weight {} must be positive and finite",
            max_weight
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::new();
    data.try_reserve_exact(order * order)?;

    for i in 0..order {
        for j in 0..order {
            let value = if i == j {
                0
            } else if rng.gen_bool(density) {
                rng.gen_range(1..=max_weight)
            } else {
                INFINITY
            };
            data.push(value);
        }
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagonal_is_zero() {
        let m = generate_matrix(6, 0.5, 9, 1).unwrap();
        for i in 0..6 {
            assert_eq!(m[i * 6 + i], 0);
        }
    }

    #[test]
    fn test_weights_within_bounds() {
        let m = generate_matrix(10, 0.7, 5, 3).unwrap();
        assert!(m.iter().all(|&v| v == INFINITY || (0..=5).contains(&v)));
    }

    #[test]
    fn test_same_seed_same_matrix() {
        assert_eq!(
            generate_matrix(8, 0.3, 20, 42).unwrap(),
            generate_matrix(8, 0.3, 20, 42).unwrap()
        );
    }

    #[test]
    fn test_density_extremes() {
        let empty = generate_matrix(4, 0.0, 5, 0).unwrap();
        assert_eq!(empty.iter().filter(|&&v| v == INFINITY).count(), 12);

        let full = generate_matrix(4, 1.0, 5, 0).unwrap();
        assert!(full.iter().all(|&v| v != INFINITY));
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(generate_matrix(4, 1.5, 5, 0).is_err());
        assert!(generate_matrix(4, 0.5, 0, 0).is_err());
    }
}
