//! Assignment solvers turning a cost matrix into `(row, col)` pairs.
//!
//! Cost entries may be `+inf` (pair forbidden) or `-inf` (pair forced). A
//! forced pair that cannot be honoured because another forced pair took its
//! row or column is reported as [`TrackError::InfeasibleMatch`].

use crate::error::TrackError;
use crate::lapjv::lapjv;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Row-to-column pairing, ordered by row.
pub type Matches = Vec<(usize, usize)>;

pub trait AssignmentSolver: std::fmt::Debug + Send + Sync {
    fn solve(&self, cost: &DMatrix<f64>) -> Result<Matches, TrackError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    #[default]
    Optimal,
    Greedy,
}

impl AssignmentStrategy {
    pub fn solver(&self) -> Box<dyn AssignmentSolver> {
        match self {
            AssignmentStrategy::Optimal => Box::new(OptimalSolver),
            AssignmentStrategy::Greedy => Box::new(GreedySolver),
        }
    }
}

/// Minimum total cost matching (Jonker-Volgenant on a padded square matrix).
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimalSolver;

/// Repeatedly take the cheapest cell whose row and column are both free.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedySolver;

impl AssignmentSolver for OptimalSolver {
    fn solve(&self, cost: &DMatrix<f64>) -> Result<Matches, TrackError> {
        hungarian_matching(cost)
    }
}

impl AssignmentSolver for GreedySolver {
    fn solve(&self, cost: &DMatrix<f64>) -> Result<Matches, TrackError> {
        greedy_matching(cost)
    }
}

/// Minimum-cost matching of a rectangular cost matrix.
///
/// Infinite entries are replaced by finite sentinels large enough that the
/// solver first maximises the number of forced pairs, then minimises the
/// number of forbidden pairs, then minimises the finite cost. Forbidden
/// pairs are removed from the result.
pub fn hungarian_matching(cost: &DMatrix<f64>) -> Result<Matches, TrackError> {
    let nrows = cost.nrows();
    let ncols = cost.ncols();
    if nrows == 0 || ncols == 0 {
        return Ok(Vec::new());
    }
    if cost.iter().any(|c| c.is_nan()) {
        return Err(TrackError::Lapjv("cost matrix contains NaN".to_string()));
    }

    let n = nrows.max(ncols);
    let max_abs = cost
        .iter()
        .filter(|c| c.is_finite())
        .fold(0.0f64, |m, c| m.max(c.abs()));
    let forbidden = 2.0 * n as f64 * max_abs + 1.0;
    let forced = -2.0 * (n as f64 + 1.0) * forbidden;

    // padding rows/columns cost 0: they absorb whatever is left unmatched
    let mut square = DMatrix::<f64>::zeros(n, n);
    for i in 0..nrows {
        for j in 0..ncols {
            let c = cost[(i, j)];
            square[(i, j)] = if c == f64::INFINITY {
                forbidden
            } else if c == f64::NEG_INFINITY {
                forced
            } else {
                c
            };
        }
    }

    let x = lapjv(&square)?;
    let matches: Matches = x
        .into_iter()
        .enumerate()
        .filter(|&(i, j)| i < nrows && j < ncols && cost[(i, j)] != f64::INFINITY)
        .collect();

    check_forced(cost, &matches)?;
    Ok(matches)
}

/// Greedy matching; ties broken by lowest row, then lowest column.
pub fn greedy_matching(cost: &DMatrix<f64>) -> Result<Matches, TrackError> {
    let nrows = cost.nrows();
    let ncols = cost.ncols();
    if cost.iter().any(|c| c.is_nan()) {
        return Err(TrackError::Lapjv("cost matrix contains NaN".to_string()));
    }

    let mut cells: Vec<(f64, usize, usize)> = Vec::with_capacity(nrows * ncols);
    for i in 0..nrows {
        for j in 0..ncols {
            let c = cost[(i, j)];
            if c != f64::INFINITY {
                cells.push((c, i, j));
            }
        }
    }
    cells.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.cmp(&b.2))
    });

    let mut row_used = vec![false; nrows];
    let mut col_used = vec![false; ncols];
    let mut matches = Vec::with_capacity(nrows.min(ncols));
    for (_, i, j) in cells {
        if row_used[i] || col_used[j] {
            continue;
        }
        row_used[i] = true;
        col_used[j] = true;
        matches.push((i, j));
        if matches.len() == nrows.min(ncols) {
            break;
        }
    }
    matches.sort_unstable();

    check_forced(cost, &matches)?;
    Ok(matches)
}

/// Every `-inf` cell must appear in `matches`.
fn check_forced(cost: &DMatrix<f64>, matches: &Matches) -> Result<(), TrackError> {
    for i in 0..cost.nrows() {
        for j in 0..cost.ncols() {
            if cost[(i, j)] == f64::NEG_INFINITY && !matches.contains(&(i, j)) {
                return Err(TrackError::InfeasibleMatch { row: i, col: j });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearly_eq::assert_nearly_eq;
    use quickcheck::{Arbitrary, Gen};
    use rand::{Rng, SeedableRng, rngs::StdRng};

    const INF: f64 = f64::INFINITY;

    fn matrix(rows: &[&[f64]]) -> DMatrix<f64> {
        DMatrix::from_fn(rows.len(), rows[0].len(), |i, j| rows[i][j])
    }

    #[test]
    fn test_hungarian_matching() {
        let cost = matrix(&[&[0., 1., 2.], &[1., 10., 15.]]);
        assert_eq!(hungarian_matching(&cost).unwrap(), vec![(0, 1), (1, 0)]);

        let cost = matrix(&[&[-5., INF], &[INF, -5.]]);
        assert_eq!(hungarian_matching(&cost).unwrap(), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_greedy_matching() {
        let cost = matrix(&[&[0., 1., 2.], &[1., 10., 15.]]);
        assert_eq!(greedy_matching(&cost).unwrap(), vec![(0, 0), (1, 1)]);

        let cost = matrix(&[&[-5., INF], &[INF, -5.]]);
        assert_eq!(greedy_matching(&cost).unwrap(), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_tall_matrix() {
        let cost = matrix(&[&[5.], &[1.], &[3.]]);
        assert_eq!(hungarian_matching(&cost).unwrap(), vec![(1, 0)]);
        assert_eq!(greedy_matching(&cost).unwrap(), vec![(1, 0)]);
    }

    #[test]
    fn test_forbidden_row_left_unmatched() {
        let cost = matrix(&[&[INF, INF], &[1., 2.]]);
        assert_eq!(hungarian_matching(&cost).unwrap(), vec![(1, 0)]);
        assert_eq!(greedy_matching(&cost).unwrap(), vec![(1, 0)]);

        let all_inf = matrix(&[&[INF, INF], &[INF, INF]]);
        assert!(hungarian_matching(&all_inf).unwrap().is_empty());
        assert!(greedy_matching(&all_inf).unwrap().is_empty());
    }

    #[test]
    fn test_forced_pair_wins_over_cheaper_total() {
        let cost = matrix(&[&[f64::NEG_INFINITY, 0.], &[0., 100.]]);
        assert_eq!(hungarian_matching(&cost).unwrap(), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_conflicting_forced_pairs() {
        let cost = matrix(&[&[f64::NEG_INFINITY, f64::NEG_INFINITY], &[INF, 0.]]);
        assert_eq!(
            hungarian_matching(&cost),
            Err(TrackError::InfeasibleMatch { row: 0, col: 1 })
        );
        let cost = matrix(&[&[f64::NEG_INFINITY], &[f64::NEG_INFINITY]]);
        assert_eq!(
            greedy_matching(&cost),
            Err(TrackError::InfeasibleMatch { row: 1, col: 0 })
        );
    }

    #[test]
    fn test_greedy_ties_prefer_low_indices() {
        let cost = matrix(&[&[1., 1.], &[1., 1.]]);
        assert_eq!(greedy_matching(&cost).unwrap(), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_empty_matrix() {
        let cost = DMatrix::<f64>::zeros(0, 3);
        assert!(hungarian_matching(&cost).unwrap().is_empty());
        assert!(greedy_matching(&cost).unwrap().is_empty());
    }

    #[test]
    fn test_strategy_dispatch() {
        let cost = matrix(&[&[0., 1., 2.], &[1., 10., 15.]]);
        let optimal = AssignmentStrategy::Optimal.solver();
        let greedy = AssignmentStrategy::Greedy.solver();
        assert_eq!(optimal.solve(&cost).unwrap(), vec![(0, 1), (1, 0)]);
        assert_eq!(greedy.solve(&cost).unwrap(), vec![(0, 0), (1, 1)]);
    }

    #[derive(Debug, Clone)]
    struct Costs(DMatrix<f64>);

    impl Arbitrary for Costs {
        fn arbitrary(g: &mut Gen) -> Self {
            let r = usize::arbitrary(g) % 6 + 1;
            let c = usize::arbitrary(g) % 6 + 1;
            Costs(DMatrix::from_fn(r, c, |_, _| {
                if u8::arbitrary(g) % 5 == 0 {
                    INF
                } else {
                    (i8::arbitrary(g) as f64) / 4.0
                }
            }))
        }
    }

    fn total(cost: &DMatrix<f64>, m: &Matches) -> f64 {
        m.iter().map(|&(i, j)| cost[(i, j)]).sum()
    }

    #[test]
    fn test_quickcheck_optimal_never_worse_than_greedy() {
        fn prop(costs: Costs) -> bool {
            let cost = costs.0;
            let opt = hungarian_matching(&cost).unwrap();
            let greedy = greedy_matching(&cost).unwrap();
            let valid = |m: &Matches| {
                let mut rows: Vec<_> = m.iter().map(|p| p.0).collect();
                let mut cols: Vec<_> = m.iter().map(|p| p.1).collect();
                rows.sort_unstable();
                rows.dedup();
                cols.sort_unstable();
                cols.dedup();
                rows.len() == m.len()
                    && cols.len() == m.len()
                    && m.iter().all(|&(i, j)| cost[(i, j)].is_finite())
            };
            // more feasible pairs always beats a lower total
            valid(&opt)
                && valid(&greedy)
                && (opt.len() > greedy.len()
                    || (opt.len() == greedy.len()
                        && total(&cost, &opt) <= total(&cost, &greedy) + 1e-9))
        }
        quickcheck::quickcheck(prop as fn(Costs) -> bool);
    }

    /// Best (pair count, total) over every partial matching that avoids
    /// `+inf` cells.
    fn brute_force(cost: &DMatrix<f64>) -> (usize, f64) {
        fn search(
            cost: &DMatrix<f64>,
            row: usize,
            used: &mut Vec<bool>,
            pairs: usize,
            sum: f64,
            best: &mut (usize, f64),
        ) {
            if row == cost.nrows() {
                if pairs > best.0 || (pairs == best.0 && sum < best.1) {
                    *best = (pairs, sum);
                }
                return;
            }
            search(cost, row + 1, used, pairs, sum, best);
            for col in 0..cost.ncols() {
                if !used[col] && cost[(row, col)].is_finite() {
                    used[col] = true;
                    search(cost, row + 1, used, pairs + 1, sum + cost[(row, col)], best);
                    used[col] = false;
                }
            }
        }
        let mut best = (0, 0.0);
        search(cost, 0, &mut vec![false; cost.ncols()], 0, 0.0, &mut best);
        best
    }

    #[test]
    fn test_hungarian_matches_brute_force_on_rectangular() {
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..2000 {
            let rows = rng.gen_range(1..=6);
            let cols = rng.gen_range(1..=6);
            let ties = rng.gen_bool(0.5);
            let cost = DMatrix::from_fn(rows, cols, |_, _| {
                if rng.gen_bool(0.2) {
                    INF
                } else if ties {
                    rng.gen_range(0..4) as f64
                } else {
                    rng.gen_range(-10.0..10.0)
                }
            });

            let m = hungarian_matching(&cost).unwrap();
            let (pairs, best) = brute_force(&cost);
            assert_eq!(m.len(), pairs, "pair count on {}", cost);
            assert_nearly_eq!(total(&cost, &m), best, 1e-9);
        }
    }

    #[test]
    fn test_hungarian_forced_cells_match_brute_force() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..500 {
            let rows = rng.gen_range(2..=5);
            let cols = rng.gen_range(2..=5);
            let mut cost = DMatrix::from_fn(rows, cols, |_, _| {
                if rng.gen_bool(0.2) { INF } else { rng.gen_range(-5.0..5.0) }
            });
            // one forced cell can always be honoured
            let (fr, fc) = (rng.gen_range(0..rows), rng.gen_range(0..cols));
            cost[(fr, fc)] = f64::NEG_INFINITY;

            let m = hungarian_matching(&cost).unwrap();
            assert!(m.contains(&(fr, fc)));

            let rest = cost.clone().remove_row(fr).remove_column(fc);
            let (pairs, best) = brute_force(&rest);
            let others: Matches = m.iter().copied().filter(|&p| p != (fr, fc)).collect();
            assert_eq!(others.len(), pairs, "pair count on {}", cost);
            assert_nearly_eq!(total(&cost, &others), best, 1e-9);
        }
    }
}
