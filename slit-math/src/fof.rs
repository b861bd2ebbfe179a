//! Friends-of-friends grouping of 2-D points.
//!
//! Two points are friends when their Euclidean separation is at most the
//! linking length; groups are the transitive closure of that relation. Group
//! ids are dense, start at 0 and follow the order in which each group's first
//! member appears in the input.

/// Find the root label in a disjoint-set structure, compressing the path.
fn find_root(labels: &mut [usize], label: usize) -> usize {
    let mut current = label;
    while current != labels[current] {
        labels[current] = labels[labels[current]];
        current = labels[current];
    }
    current
}

/// Union two sets, keeping the smaller index as the canonical root.
fn union_labels(labels: &mut [usize], a: usize, b: usize) {
    let root_a = find_root(labels, a);
    let root_b = find_root(labels, b);
    if root_a < root_b {
        labels[root_b] = root_a;
    } else if root_b < root_a {
        labels[root_a] = root_b;
    }
}

/// Group `points` with linking length `link`.
///
/// A single point forms group 0. Non-finite points are never linked and get a
/// group of their own.
///
/// # Examples
///
/// ```rust
/// use slit_math::fof::friends_of_friends;
///
/// let groups = friends_of_friends(&[(0.40, 0.0), (0.90, 0.0), (0.42, 0.0)], 0.375);
/// assert_eq!(groups, vec![0, 1, 0]);
/// ```
pub fn friends_of_friends(points: &[(f64, f64)], link: f64) -> Vec<usize> {
    let n = points.len();
    let mut labels: Vec<usize> = (0..n).collect();

    // Sweep in x so only pairs within the link length in x are compared
    let mut by_x: Vec<usize> = (0..n).filter(|&i| points[i].0.is_finite()).collect();
    by_x.sort_by(|&a, &b| points[a].0.total_cmp(&points[b].0));

    for (k, &i) in by_x.iter().enumerate() {
        let (xi, yi) = points[i];
        for &j in &by_x[k + 1..] {
            let (xj, yj) = points[j];
            if xj - xi > link {
                break;
            }
            if ((xj - xi).powi(2) + (yj - yi).powi(2)).sqrt() <= link {
                union_labels(&mut labels, i, j);
            }
        }
    }

    let mut group_of_root = vec![usize::MAX; n];
    let mut next = 0;
    (0..n)
        .map(|i| {
            let root = find_root(&mut labels, i);
            if group_of_root[root] == usize::MAX {
                group_of_root[root] = next;
                next += 1;
            }
            group_of_root[root]
        })
        .collect()
}
