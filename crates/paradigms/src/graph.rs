//! Flash-ordering graph heuristics
//!
//! Two schedulers over a weighted complete graph whose nodes are on-screen
//! targets and whose edge weights are screen-space separation: a greedy
//! maximum-weight tour that orders single flashes so visually distant
//! targets alternate, and a spectral bi-partition that groups simultaneous
//! flashes so each group is visually spread out.

use nalgebra::{DMatrix, SymmetricEigen};
use rand::Rng;

/// Greedy maximum-weight tour.
///
/// Builds a path visiting every node exactly once by repeatedly appending
/// the unvisited node with the maximum edge weight from the current tail,
/// ties broken by the lowest index. The path does not return to `start`.
pub fn solve_tour(weights: &[Vec<f32>], start: usize) -> Vec<usize> {
    let n = weights.len();
    if n == 0 || start >= n {
        return Vec::new();
    }

    let mut visited = vec![false; n];
    let mut path = Vec::with_capacity(n);
    let mut current = start;
    visited[current] = true;
    path.push(current);

    for _ in 1..n {
        let mut best: Option<(usize, f32)> = None;
        for next in 0..n {
            if visited[next] {
                continue;
            }
            let w = weights[current][next];
            match best {
                Some((_, best_w)) if w <= best_w => {}
                _ => best = Some((next, w)),
            }
        }
        let (next, _) = match best {
            Some(found) => found,
            None => break,
        };
        visited[next] = true;
        path.push(next);
        current = next;
    }

    path
}

/// Orders successive tours so the first flash of a new tour never repeats
/// the last flash of the previous one: the start node is drawn at random
/// from every node except the remembered final node of the last tour.
#[derive(Debug, Default)]
pub struct TourScheduler {
    last_end: Option<usize>,
}

impl TourScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the next tour over `weights`, avoiding the previous tour's
    /// final node as the start.
    pub fn next_tour<R: Rng + ?Sized>(&mut self, rng: &mut R, weights: &[Vec<f32>]) -> Vec<usize> {
        let n = weights.len();
        if n == 0 {
            self.last_end = None;
            return Vec::new();
        }

        let start = match self.last_end {
            Some(banned) if banned < n && n > 1 => {
                let mut pick = rng.gen_range(0..n - 1);
                if pick >= banned {
                    pick += 1;
                }
                pick
            }
            _ => rng.gen_range(0..n),
        };

        let tour = solve_tour(weights, start);
        self.last_end = tour.last().copied();
        tour
    }
}

/// Two-way balanced spectral partition.
///
/// Computes the graph Laplacian `L = D - W`, takes the eigenvector of the
/// second-smallest eigenvalue (the Fiedler vector), sorts nodes by their
/// component, and splits by rank into two halves whose sizes differ by at
/// most one. Rank splitting, rather than a sign threshold, guarantees the
/// balance regardless of the spectrum.
pub fn partition(weights: &[Vec<f32>]) -> (Vec<usize>, Vec<usize>) {
    let n = weights.len();
    if n < 2 {
        return ((0..n).collect(), Vec::new());
    }

    let mut laplacian = DMatrix::<f64>::zeros(n, n);
    for i in 0..n {
        let mut degree = 0.0f64;
        for j in 0..n {
            if i == j {
                continue;
            }
            let w = weights[i][j] as f64;
            degree += w;
            laplacian[(i, j)] = -w;
        }
        laplacian[(i, i)] = degree;
    }

    let eigen = SymmetricEigen::new(laplacian);

    // Index of the second-smallest eigenvalue.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[a]
            .partial_cmp(&eigen.eigenvalues[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let fiedler = eigen.eigenvectors.column(order[1]);

    let mut nodes: Vec<usize> = (0..n).collect();
    nodes.sort_by(|&a, &b| {
        fiedler[a]
            .partial_cmp(&fiedler[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let half = (n + 1) / 2;
    let group_a = nodes[..half].to_vec();
    let group_b = nodes[half..].to_vec();
    (group_a, group_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn symmetric(weights: &[&[f32]]) -> Vec<Vec<f32>> {
        weights.iter().map(|row| row.to_vec()).collect()
    }

    #[test]
    fn test_tour_visits_every_node_once() {
        let weights = symmetric(&[
            &[0.0, 3.0, 1.0, 7.0],
            &[3.0, 0.0, 5.0, 2.0],
            &[1.0, 5.0, 0.0, 4.0],
            &[7.0, 2.0, 4.0, 0.0],
        ]);
        for start in 0..4 {
            let tour = solve_tour(&weights, start);
            let mut sorted = tour.clone();
            sorted.sort();
            assert_eq!(sorted, vec![0, 1, 2, 3]);
            assert_eq!(tour[0], start);
        }
    }

    #[test]
    fn test_tour_greedy_order_and_tie_break() {
        let weights = symmetric(&[
            &[0.0, 2.0, 2.0, 1.0],
            &[2.0, 0.0, 4.0, 4.0],
            &[2.0, 4.0, 0.0, 3.0],
            &[1.0, 4.0, 3.0, 0.0],
        ]);
        // From 0 the max weight is 2.0 shared by nodes 1 and 2: lowest index
        // wins. From 1 both unvisited nodes weigh 4.0: node 2 wins. Node 3
        // closes the path.
        assert_eq!(solve_tour(&weights, 0), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_tour_degenerate_inputs() {
        assert!(solve_tour(&[], 0).is_empty());
        assert_eq!(solve_tour(&[vec![0.0]], 0), vec![0]);
        assert!(solve_tour(&[vec![0.0]], 3).is_empty());
    }

    #[test]
    fn test_scheduler_never_starts_on_previous_end() {
        let weights = symmetric(&[
            &[0.0, 3.0, 1.0, 7.0],
            &[3.0, 0.0, 5.0, 2.0],
            &[1.0, 5.0, 0.0, 4.0],
            &[7.0, 2.0, 4.0, 0.0],
        ]);
        let mut rng = StdRng::seed_from_u64(17);
        let mut scheduler = TourScheduler::new();
        let mut prev_end: Option<usize> = None;
        for _ in 0..40 {
            let tour = scheduler.next_tour(&mut rng, &weights);
            if let Some(end) = prev_end {
                assert_ne!(tour[0], end, "tour started on the previous final node");
            }
            prev_end = tour.last().copied();
        }
    }

    #[test]
    fn test_scheduler_two_nodes() {
        let weights = symmetric(&[&[0.0, 1.0], &[1.0, 0.0]]);
        let mut rng = StdRng::seed_from_u64(3);
        let mut scheduler = TourScheduler::new();
        let first = scheduler.next_tour(&mut rng, &weights);
        let second = scheduler.next_tour(&mut rng, &weights);
        assert_ne!(second[0], *first.last().unwrap());
    }

    #[test]
    fn test_partition_balance_and_cover() {
        let mut rng = StdRng::seed_from_u64(99);
        for n in 2..8usize {
            let mut weights = vec![vec![0.0f32; n]; n];
            for i in 0..n {
                for j in (i + 1)..n {
                    let w: f32 = rng.gen_range(0.1..10.0);
                    weights[i][j] = w;
                    weights[j][i] = w;
                }
            }
            let (a, b) = partition(&weights);
            assert!(a.len().abs_diff(b.len()) <= 1, "unbalanced for n={n}");
            let mut all: Vec<usize> = a.iter().chain(b.iter()).copied().collect();
            all.sort();
            assert_eq!(all, (0..n).collect::<Vec<_>>(), "not a cover for n={n}");
        }
    }

    #[test]
    fn test_partition_spreads_each_group() {
        // Targets on a line at 0, 1, 10, 11; weight = distance. High-weight
        // (distant) pairs must stay within a group, so neither group may be
        // one of the two adjacent pairs.
        let weights = symmetric(&[
            &[0.0, 1.0, 10.0, 11.0],
            &[1.0, 0.0, 9.0, 10.0],
            &[10.0, 9.0, 0.0, 1.0],
            &[11.0, 10.0, 1.0, 0.0],
        ]);
        let (mut a, _) = partition(&weights);
        a.sort();
        assert_ne!(a, vec![0, 1]);
        assert_ne!(a, vec![2, 3]);
    }

    #[test]
    fn test_partition_single_node() {
        let (a, b) = partition(&[vec![0.0]]);
        assert_eq!(a, vec![0]);
        assert!(b.is_empty());
    }
}
