//! Intra-epoch dependency ordering.
//!
//! Nodes are numbered in registration order; an edge `(producer, consumer)`
//! exists for every `Current`-epoch requirement satisfied by another node.
//! Kahn's algorithm peels off ready levels, each level sorted ascending, so
//! the flattened order is a topological order that is deterministic across
//! runs. Nodes left with positive in-degree after the peel are the ones
//! caught in or downstream of a cycle.

/// Group nodes into dependency levels.
///
/// `Err` carries the nodes involved in at least one cycle.
pub(crate) fn topological_levels(
    n: usize,
    edges: &[(usize, usize)],
) -> Result<Vec<Vec<usize>>, Vec<usize>> {
    let mut indegree = vec![0usize; n];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(from, to) in edges {
        adjacency[from].push(to);
        indegree[to] += 1;
    }

    let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut levels = Vec::new();
    let mut placed = 0;

    while !ready.is_empty() {
        ready.sort_unstable();
        let mut next = Vec::new();
        for &node in &ready {
            for &succ in &adjacency[node] {
                indegree[succ] -= 1;
                if indegree[succ] == 0 {
                    next.push(succ);
                }
            }
        }
        placed += ready.len();
        levels.push(std::mem::replace(&mut ready, next));
    }

    if placed < n {
        let involved: Vec<usize> = (0..n).filter(|&i| indegree[i] > 0).collect();
        return Err(involved);
    }

    Ok(levels)
}

/// Flattened execution order.
pub(crate) fn execution_order(n: usize, edges: &[(usize, usize)]) -> Result<Vec<usize>, Vec<usize>> {
    Ok(topological_levels(n, edges)?.concat())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain() {
        let order = execution_order(3, &[(0, 1), (1, 2)]).unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_diamond_levels() {
        // 0 feeds 1 and 2, both feed 3
        let levels = topological_levels(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]).unwrap();
        assert_eq!(levels, vec![vec![0], vec![1, 2], vec![3]]);
    }

    #[test]
    fn test_no_edges_keeps_registration_order() {
        let order = execution_order(4, &[]).unwrap();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_reversed_registration_still_orders() {
        // 2 produces what 0 consumes
        let order = execution_order(3, &[(2, 0)]).unwrap();
        let pos = |x: usize| order.iter().position(|&n| n == x).unwrap();
        assert!(pos(2) < pos(0));
    }

    #[test]
    fn test_cycle_reports_involved_nodes() {
        // 1 -> 2 -> 3 -> 1 is a cycle, 0 stands alone
        let err = execution_order(4, &[(1, 2), (2, 3), (3, 1)]).unwrap_err();
        assert_eq!(err, vec![1, 2, 3]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = execution_order(2, &[(1, 1)]).unwrap_err();
        assert_eq!(err, vec![1]);
    }

    #[test]
    fn test_duplicate_edges_are_harmless() {
        let order = execution_order(2, &[(0, 1), (0, 1)]).unwrap();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn test_empty_graph() {
        assert_eq!(execution_order(0, &[]).unwrap(), Vec::<usize>::new());
    }
}
