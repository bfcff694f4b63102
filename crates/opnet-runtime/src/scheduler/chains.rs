//! Chain planning.
//!
//! Partitions an operator DAG into *chains*, maximal linear runs of
//! operators sharing a device context, and derives the chain-level DAG the
//! scheduler executes. In inference mode the whole net collapses into a
//! single chain in topological order, since no cross-chain synchronization
//! is needed.

use std::collections::BTreeSet;

use opnet_core::{DeviceOption, NetError, NetResult};

/// Parent/child adjacency of one chain in the chain-level DAG.
///
/// Both lists are deduplicated and sorted by task id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainNode {
    /// Task ids of chains whose tails feed this chain's head.
    pub parents: Vec<usize>,
    /// Task ids of chains consuming this chain's tail.
    pub children: Vec<usize>,
}

/// Output of the planner: chains and their DAG, in parallel vectors indexed
/// by task id.
#[derive(Debug, Clone)]
pub struct ExecutionChains {
    /// Operator indices of each chain, in execution order.
    pub chains: Vec<Vec<usize>>,
    /// Chain-level adjacency, parallel to `chains`.
    pub chain_nodes: Vec<ChainNode>,
}

impl ExecutionChains {
    /// Number of chains.
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// Whether the net had no operators.
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

/// Group operators into maximal linear same-device chains.
///
/// An operator is appended to the running chain only when it is the sole
/// child of the previous operator, has that operator as its sole parent, and
/// shares its device context. Everything else starts a new chain.
pub fn compute_chains(
    devices: &[DeviceOption],
    parents: &[Vec<usize>],
) -> NetResult<ExecutionChains> {
    let order = topological_order(parents)?;
    let children = invert(parents);

    let mut assigned = vec![false; parents.len()];
    let mut chains = Vec::new();
    for &head in &order {
        if assigned[head] {
            continue;
        }
        let mut chain = vec![head];
        assigned[head] = true;
        let mut tail = head;
        loop {
            if children[tail].len() != 1 {
                break;
            }
            let next = children[tail][0];
            if assigned[next] || parents[next].len() != 1 {
                break;
            }
            if !devices[tail].same_device(&devices[next]) {
                break;
            }
            chain.push(next);
            assigned[next] = true;
            tail = next;
        }
        chains.push(chain);
    }

    let chain_nodes = chain_graph(&chains, parents);
    Ok(ExecutionChains {
        chains,
        chain_nodes,
    })
}

/// Inference-mode planning: one chain holding every operator in a
/// topologically valid order.
pub fn compute_inference_chain(parents: &[Vec<usize>]) -> NetResult<ExecutionChains> {
    let order = topological_order(parents)?;
    if order.is_empty() {
        return Ok(ExecutionChains {
            chains: Vec::new(),
            chain_nodes: Vec::new(),
        });
    }
    Ok(ExecutionChains {
        chains: vec![order],
        chain_nodes: vec![ChainNode::default()],
    })
}

/// Build the chain-level DAG from the operator-level parent lists.
fn chain_graph(chains: &[Vec<usize>], parents: &[Vec<usize>]) -> Vec<ChainNode> {
    let mut chain_of = vec![0usize; parents.len()];
    for (task_id, chain) in chains.iter().enumerate() {
        for &op_id in chain {
            chain_of[op_id] = task_id;
        }
    }

    let mut parent_sets: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); chains.len()];
    for (op_id, op_parents) in parents.iter().enumerate() {
        let child_chain = chain_of[op_id];
        for &parent_op in op_parents {
            let parent_chain = chain_of[parent_op];
            if parent_chain != child_chain {
                parent_sets[child_chain].insert(parent_chain);
            }
        }
    }

    let mut nodes: Vec<ChainNode> = vec![ChainNode::default(); chains.len()];
    for (task_id, parent_set) in parent_sets.iter().enumerate() {
        for &parent in parent_set {
            nodes[parent].children.push(task_id);
        }
        nodes[task_id].parents = parent_set.iter().copied().collect();
    }
    nodes
}

/// Kahn's algorithm over the parent lists.
///
/// Dequeues lowest index first so the order is deterministic.
fn topological_order(parents: &[Vec<usize>]) -> NetResult<Vec<usize>> {
    let children = invert(parents);
    let mut in_degree: Vec<usize> = parents.iter().map(Vec::len).collect();

    let mut ready: BTreeSet<usize> = (0..parents.len())
        .filter(|&op_id| in_degree[op_id] == 0)
        .collect();
    let mut order = Vec::with_capacity(parents.len());
    while let Some(op_id) = ready.pop_first() {
        order.push(op_id);
        for &child in &children[op_id] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.insert(child);
            }
        }
    }

    if order.len() != parents.len() {
        return Err(NetError::Net {
            message: "operator graph contains a cycle".to_string(),
        });
    }
    Ok(order)
}

fn invert(parents: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); parents.len()];
    for (op_id, op_parents) in parents.iter().enumerate() {
        for &parent in op_parents {
            children[parent].push(op_id);
        }
    }
    children
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu(n: usize) -> Vec<DeviceOption> {
        vec![DeviceOption::cpu(); n]
    }

    fn flatten_sorted(chains: &ExecutionChains) -> Vec<usize> {
        let mut ops: Vec<usize> = chains.chains.iter().flatten().copied().collect();
        ops.sort_unstable();
        ops
    }

    #[test]
    fn test_single_op() {
        let chains = compute_chains(&cpu(1), &[vec![]]).unwrap();
        assert_eq!(chains.chains, vec![vec![0]]);
        assert!(chains.chain_nodes[0].parents.is_empty());
        assert!(chains.chain_nodes[0].children.is_empty());
    }

    #[test]
    fn test_linear_run_collapses_to_one_chain() {
        let parents = vec![vec![], vec![0], vec![1], vec![2]];
        let chains = compute_chains(&cpu(4), &parents).unwrap();
        assert_eq!(chains.chains, vec![vec![0, 1, 2, 3]]);
    }

    #[test]
    fn test_diamond_stays_solitary() {
        // A -> {B, C} -> D: fan-out and fan-in keep every op in its own chain.
        let parents = vec![vec![], vec![0], vec![0], vec![1, 2]];
        let chains = compute_chains(&cpu(4), &parents).unwrap();
        assert_eq!(chains.len(), 4);
        assert_eq!(flatten_sorted(&chains), vec![0, 1, 2, 3]);

        assert_eq!(chains.chain_nodes[0].children, vec![1, 2]);
        assert_eq!(chains.chain_nodes[3].parents, vec![1, 2]);
    }

    #[test]
    fn test_device_boundary_splits_chain() {
        let devices = vec![
            DeviceOption::cpu(),
            DeviceOption::cpu(),
            DeviceOption::gpu(0),
            DeviceOption::gpu(0),
        ];
        let parents = vec![vec![], vec![0], vec![1], vec![2]];
        let chains = compute_chains(&devices, &parents).unwrap();
        assert_eq!(chains.chains, vec![vec![0, 1], vec![2, 3]]);
        assert_eq!(chains.chain_nodes[1].parents, vec![0]);
        assert_eq!(chains.chain_nodes[0].children, vec![1]);
    }

    #[test]
    fn test_distinct_gpu_ids_split_chain() {
        let devices = vec![DeviceOption::gpu(0), DeviceOption::gpu(1)];
        let parents = vec![vec![], vec![0]];
        let chains = compute_chains(&devices, &parents).unwrap();
        assert_eq!(chains.len(), 2);
    }

    #[test]
    fn test_independent_ops_all_roots() {
        let parents = vec![vec![], vec![], vec![]];
        let chains = compute_chains(&cpu(3), &parents).unwrap();
        assert_eq!(chains.len(), 3);
        for node in &chains.chain_nodes {
            assert!(node.parents.is_empty());
        }
    }

    #[test]
    fn test_cross_device_edge_targets_downstream_head() {
        let devices = vec![
            DeviceOption::cpu(),
            DeviceOption::gpu(0),
            DeviceOption::gpu(0),
        ];
        let parents = vec![vec![], vec![0], vec![1]];
        let chains = compute_chains(&devices, &parents).unwrap();
        assert_eq!(chains.chains, vec![vec![0], vec![1, 2]]);
        assert_eq!(chains.chain_nodes[0].children, vec![1]);
        assert_eq!(chains.chain_nodes[1].parents, vec![0]);
    }

    #[test]
    fn test_parents_children_mutually_consistent() {
        let parents = vec![vec![], vec![0], vec![0], vec![1, 2], vec![3], vec![]];
        let chains = compute_chains(&cpu(6), &parents).unwrap();
        for (task_id, node) in chains.chain_nodes.iter().enumerate() {
            for &parent in &node.parents {
                assert!(chains.chain_nodes[parent].children.contains(&task_id));
            }
            for &child in &node.children {
                assert!(chains.chain_nodes[child].parents.contains(&task_id));
            }
        }
    }

    #[test]
    fn test_inference_mode_single_chain() {
        let parents = vec![vec![], vec![0], vec![1]];
        let chains = compute_inference_chain(&parents).unwrap();
        assert_eq!(chains.chains, vec![vec![0, 1, 2]]);
        assert!(chains.chain_nodes[0].parents.is_empty());
        assert!(chains.chain_nodes[0].children.is_empty());
    }

    #[test]
    fn test_inference_mode_respects_dependencies() {
        // 2 depends on 0 and 1; 1 depends on 0.
        let parents = vec![vec![], vec![0], vec![0, 1]];
        let order = &compute_inference_chain(&parents).unwrap().chains[0];
        let pos = |op: usize| order.iter().position(|&o| o == op).unwrap();
        assert!(pos(0) < pos(1));
        assert!(pos(1) < pos(2));
    }

    #[test]
    fn test_cycle_detected() {
        let parents = vec![vec![1], vec![0]];
        assert!(compute_chains(&cpu(2), &parents).is_err());
        assert!(compute_inference_chain(&parents).is_err());
    }

    #[test]
    fn test_empty_net() {
        let chains = compute_chains(&[], &[]).unwrap();
        assert!(chains.is_empty());
        assert!(compute_inference_chain(&[]).unwrap().is_empty());
    }
}
