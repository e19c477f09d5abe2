//! Density-based clustering over a precomputed distance matrix.
//!
//! Points within `eps` of each other form neighbourhoods; a point with at
//! least `min_cluster_size` neighbours (itself included) is a core point.
//! Clusters grow from core points, border points join the first cluster that
//! reaches them, and everything else is noise. Expansion scans points in
//! index order, so labels are deterministic for a given matrix.

use ndarray::Array2;

/// Result of one clustering run.
#[derive(Debug, Clone)]
pub struct ClusteringOutcome {
    /// Cluster label per point, `None` for noise. Labels are dense and start
    /// at zero.
    pub labels: Vec<Option<usize>>,
    /// Membership strength per point: the fraction of the point's own cluster
    /// that lies within `eps` of it. Noise points get 0.0.
    pub probabilities: Vec<f32>,
    pub cluster_count: usize,
}

/// Cluster points given their pairwise distances.
///
/// `distances` must be square and symmetric with zeros on the diagonal.
pub fn cluster(distances: &Array2<f32>, min_cluster_size: usize, eps: f32) -> ClusteringOutcome {
    let n = distances.nrows();
    let min_cluster_size = min_cluster_size.max(1);

    let neighbors: Vec<Vec<usize>> = (0..n)
        .map(|i| (0..n).filter(|&j| distances[(i, j)] <= eps).collect())
        .collect();

    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut cluster_count = 0;

    for i in 0..n {
        if visited[i] || neighbors[i].len() < min_cluster_size {
            continue;
        }

        // New cluster seeded from core point i; expand breadth-first.
        let label = cluster_count;
        cluster_count += 1;

        let mut queue = std::collections::VecDeque::from([i]);
        visited[i] = true;
        labels[i] = Some(label);

        while let Some(p) = queue.pop_front() {
            // Only core points extend the cluster; border points join but
            // do not expand.
            if neighbors[p].len() < min_cluster_size {
                continue;
            }
            for &q in &neighbors[p] {
                if labels[q].is_none() {
                    labels[q] = Some(label);
                }
                if !visited[q] {
                    visited[q] = true;
                    queue.push_back(q);
                }
            }
        }
    }

    let probabilities = membership_strengths(distances, &labels, cluster_count, eps);

    ClusteringOutcome {
        labels,
        probabilities,
        cluster_count,
    }
}

/// For each clustered point, the fraction of its cluster within `eps` of it.
fn membership_strengths(
    distances: &Array2<f32>,
    labels: &[Option<usize>],
    cluster_count: usize,
    eps: f32,
) -> Vec<f32> {
    let mut sizes = vec![0usize; cluster_count];
    for label in labels.iter().flatten() {
        sizes[*label] += 1;
    }

    labels
        .iter()
        .enumerate()
        .map(|(i, label)| match label {
            None => 0.0,
            Some(c) => {
                let near = labels
                    .iter()
                    .enumerate()
                    .filter(|(j, l)| **l == Some(*c) && distances[(i, *j)] <= eps)
                    .count();
                (near as f32 / sizes[*c] as f32).clamp(0.0, 1.0)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[&[f32]]) -> Array2<f32> {
        let n = rows.len();
        let mut m = Array2::<f32>::zeros((n, n));
        for (i, row) in rows.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                m[(i, j)] = v;
            }
        }
        m
    }

    #[test]
    fn test_identical_points_form_one_cluster() {
        let d = matrix(&[
            &[0.0, 0.0, 0.0],
            &[0.0, 0.0, 0.0],
            &[0.0, 0.0, 0.0],
        ]);
        let outcome = cluster(&d, 3, 0.2);

        assert_eq!(outcome.cluster_count, 1);
        assert_eq!(outcome.labels, vec![Some(0), Some(0), Some(0)]);
        for p in &outcome.probabilities {
            assert!((p - 1.0).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn test_two_separated_groups() {
        // Points 0-2 close together, points 3-5 close together, groups far apart.
        let d = matrix(&[
            &[0.0, 0.1, 0.1, 0.9, 0.9, 0.9],
            &[0.1, 0.0, 0.1, 0.9, 0.9, 0.9],
            &[0.1, 0.1, 0.0, 0.9, 0.9, 0.9],
            &[0.9, 0.9, 0.9, 0.0, 0.1, 0.1],
            &[0.9, 0.9, 0.9, 0.1, 0.0, 0.1],
            &[0.9, 0.9, 0.9, 0.1, 0.1, 0.0],
        ]);
        let outcome = cluster(&d, 3, 0.2);

        assert_eq!(outcome.cluster_count, 2);
        assert_eq!(outcome.labels[0], Some(0));
        assert_eq!(outcome.labels[1], Some(0));
        assert_eq!(outcome.labels[2], Some(0));
        assert_eq!(outcome.labels[3], Some(1));
        assert_eq!(outcome.labels[4], Some(1));
        assert_eq!(outcome.labels[5], Some(1));
    }

    #[test]
    fn test_isolated_point_is_noise() {
        let d = matrix(&[
            &[0.0, 0.1, 0.1, 0.9],
            &[0.1, 0.0, 0.1, 0.9],
            &[0.1, 0.1, 0.0, 0.9],
            &[0.9, 0.9, 0.9, 0.0],
        ]);
        let outcome = cluster(&d, 3, 0.2);

        assert_eq!(outcome.cluster_count, 1);
        assert_eq!(outcome.labels[3], None);
        assert_eq!(outcome.probabilities[3], 0.0);
    }

    #[test]
    fn test_too_few_points_all_noise() {
        let d = matrix(&[&[0.0, 0.1], &[0.1, 0.0]]);
        let outcome = cluster(&d, 3, 0.2);

        assert_eq!(outcome.cluster_count, 0);
        assert_eq!(outcome.labels, vec![None, None]);
    }

    #[test]
    fn test_border_point_joins_but_does_not_expand() {
        // Point 3 reaches only core point 2 within eps, so its own
        // neighbourhood {2, 3} is too small to be core: it joins as a border
        // member without pulling in point 4, which stays noise.
        let d = matrix(&[
            &[0.0, 0.1, 0.1, 0.9, 0.9],
            &[0.1, 0.0, 0.1, 0.9, 0.9],
            &[0.1, 0.1, 0.0, 0.15, 0.9],
            &[0.9, 0.9, 0.15, 0.0, 0.25],
            &[0.9, 0.9, 0.9, 0.25, 0.0],
        ]);
        let outcome = cluster(&d, 3, 0.2);

        assert_eq!(outcome.cluster_count, 1);
        assert_eq!(outcome.labels[3], Some(0));
        assert_eq!(outcome.labels[4], None);
    }

    #[test]
    fn test_probability_reflects_own_neighbourhood() {
        // Border point 3 sees only half of its four-member cluster within
        // eps, so its membership strength is lower than the core points'.
        let d = matrix(&[
            &[0.0, 0.1, 0.1, 0.9, 0.9],
            &[0.1, 0.0, 0.1, 0.9, 0.9],
            &[0.1, 0.1, 0.0, 0.15, 0.9],
            &[0.9, 0.9, 0.15, 0.0, 0.25],
            &[0.9, 0.9, 0.9, 0.25, 0.0],
        ]);
        let outcome = cluster(&d, 3, 0.2);

        assert!(outcome.probabilities[3] < outcome.probabilities[0]);
        assert!(outcome.probabilities[3] > 0.0);
    }

    #[test]
    fn test_labels_are_deterministic() {
        let d = matrix(&[
            &[0.0, 0.1, 0.1, 0.9, 0.9, 0.9],
            &[0.1, 0.0, 0.1, 0.9, 0.9, 0.9],
            &[0.1, 0.1, 0.0, 0.9, 0.9, 0.9],
            &[0.9, 0.9, 0.9, 0.0, 0.1, 0.1],
            &[0.9, 0.9, 0.9, 0.1, 0.0, 0.1],
            &[0.9, 0.9, 0.9, 0.1, 0.1, 0.0],
        ]);
        let a = cluster(&d, 3, 0.2);
        let b = cluster(&d, 3, 0.2);

        assert_eq!(a.labels, b.labels);
        assert_eq!(a.probabilities, b.probabilities);
    }
}
