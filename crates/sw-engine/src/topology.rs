//! Execution order of the render graph.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use sw_ir::StageId;

/// Topological sort via Kahn's algorithm.
///
/// Every producer appears before its consumers. Among stages that are ready
/// at the same time the lowest id (oldest stage) goes first, so the order is
/// deterministic. Edges naming unknown nodes are ignored.
///
/// On a cycle, returns the nodes that could not be ordered.
pub fn topological_sort(
    nodes: &[StageId],
    edges: &[(StageId, StageId)],
) -> Result<Vec<StageId>, Vec<StageId>> {
    topological_sort_by_key(nodes, edges, |id| u64::from(id.0))
}

/// [`topological_sort`] with ties broken by the lowest `key`, then the
/// lowest id.
pub fn topological_sort_by_key(
    nodes: &[StageId],
    edges: &[(StageId, StageId)],
    key: impl Fn(StageId) -> u64,
) -> Result<Vec<StageId>, Vec<StageId>> {
    let mut in_degree: BTreeMap<StageId, usize> = nodes.iter().map(|&id| (id, 0)).collect();
    let mut successors: BTreeMap<StageId, Vec<StageId>> = BTreeMap::new();
    for &(from, to) in edges {
        if !in_degree.contains_key(&from) {
            continue;
        }
        if let Some(d) = in_degree.get_mut(&to) {
            *d += 1;
            successors.entry(from).or_default().push(to);
        }
    }

    let mut ready: BinaryHeap<Reverse<(u64, StageId)>> = in_degree
        .iter()
        .filter(|&(_, &d)| d == 0)
        .map(|(&id, _)| Reverse((key(id), id)))
        .collect();
    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(Reverse((_, id))) = ready.pop() {
        order.push(id);
        for next in successors.get(&id).into_iter().flatten() {
            if let Some(d) = in_degree.get_mut(next) {
                *d -= 1;
                if *d == 0 {
                    ready.push(Reverse((key(*next), *next)));
                }
            }
        }
    }

    if order.len() < in_degree.len() {
        let stuck = in_degree
            .into_iter()
            .filter(|(id, _)| !order.contains(id))
            .map(|(id, _)| id)
            .collect();
        return Err(stuck);
    }
    Ok(order)
}
