//! Net definition.
//!
//! The consumed description of an operator graph: a name, an execution type
//! string selecting a scheduling preset, optional worker-count and profiling
//! arguments, and one entry per operator carrying its device binding and the
//! indices of the operators it depends on.

use serde::{Deserialize, Serialize};

use crate::types::DeviceOption;

/// One operator entry in a [`NetDef`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpDef {
    /// Operator type name, used in diagnostics and profiling reports.
    pub op_type: String,
    /// Device the operator is bound to.
    #[serde(default)]
    pub device: DeviceOption,
    /// Indices of the operators whose outputs this operator consumes.
    /// Omitted from serialization when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<usize>,
}

impl OpDef {
    /// Create an entry with no dependencies.
    pub fn new(op_type: impl Into<String>, device: DeviceOption) -> Self {
        Self {
            op_type: op_type.into(),
            device,
            parents: Vec::new(),
        }
    }

    /// Add dependencies on earlier operators.
    pub fn with_parents(mut self, parents: Vec<usize>) -> Self {
        self.parents = parents;
        self
    }
}

/// Definition of an operator net.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetDef {
    /// Net name, used in logs and trace events.
    pub name: String,
    /// Execution type selecting a scheduling preset. An empty string selects
    /// the `simple` preset driven by the global options.
    #[serde(default)]
    pub net_type: String,
    /// Worker-pool size override for this net. `None` defers to the global
    /// CPU pool size, which in turn defers to the machine's logical CPUs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_workers: Option<usize>,
    /// Per-net override of the profiling preset flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_profiling: Option<bool>,
    /// Operator entries, in graph order.
    #[serde(default)]
    pub ops: Vec<OpDef>,
}

impl NetDef {
    /// Create an empty net with the given name and type.
    pub fn new(name: impl Into<String>, net_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            net_type: net_type.into(),
            num_workers: None,
            enable_profiling: None,
            ops: Vec::new(),
        }
    }

    /// Append an operator entry and return its index.
    pub fn add_op(&mut self, op: OpDef) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    /// Validate the definition.
    ///
    /// Checks that every parent index names an existing, distinct operator
    /// and that the dependency graph is acyclic (Kahn's algorithm).
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        for (op_id, op) in self.ops.iter().enumerate() {
            for &parent in &op.parents {
                if parent >= self.ops.len() {
                    return Err(format!(
                        "op {} references non-existent parent {}",
                        op_id, parent
                    ));
                }
                if parent == op_id {
                    return Err(format!("op {} depends on itself", op_id));
                }
            }
        }

        // Kahn's algorithm over the parent lists; a leftover node means a cycle.
        let mut in_degree: Vec<usize> = self.ops.iter().map(|op| op.parents.len()).collect();
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); self.ops.len()];
        for (op_id, op) in self.ops.iter().enumerate() {
            for &parent in &op.parents {
                children[parent].push(op_id);
            }
        }

        let mut queue: Vec<usize> = (0..self.ops.len())
            .filter(|&op_id| in_degree[op_id] == 0)
            .collect();
        let mut processed = 0;
        while let Some(op_id) = queue.pop() {
            processed += 1;
            for &child in &children[op_id] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    queue.push(child);
                }
            }
        }

        if processed != self.ops.len() {
            return Err("operator graph contains a cycle".to_string());
        }
        Ok(())
    }
}
