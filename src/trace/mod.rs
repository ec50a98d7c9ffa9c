//! Trace Collector, Sanitizer, Syncer (spec §4.F): execution traces are
//! captured locally first, sanitized before they ever leave process
//! memory, and synced to the cloud catalog in dependency order so a child
//! trace never uploads before its parent (testable property #2).

mod sanitizer;
mod syncer;

pub use sanitizer::sanitize;
pub use syncer::{SyncOutcome, Syncer};

use std::collections::HashMap;

use uuid::Uuid;

use crate::domain::ExecutionTrace;

/// Orders traces so a parent always precedes its children. A trace whose
/// parent isn't present in this same batch (already synced earlier, or a
/// root) is treated as its own root — nothing is dropped.
pub fn topological_order(traces: Vec<ExecutionTrace>) -> Vec<ExecutionTrace> {
    let index_by_id: HashMap<Uuid, usize> = traces
        .iter()
        .enumerate()
        .map(|(i, t)| (t.trace_id, i))
        .collect();

    let mut visited = vec![false; traces.len()];
    let mut order = Vec::with_capacity(traces.len());

    fn visit(
        i: usize,
        traces: &[ExecutionTrace],
        index_by_id: &HashMap<Uuid, usize>,
        visited: &mut [bool],
        order: &mut Vec<usize>,
    ) {
        if visited[i] {
            return;
        }
        visited[i] = true;
        if let Some(parent_id) = traces[i].parent_trace_id {
            if let Some(&parent_index) = index_by_id.get(&parent_id) {
                visit(parent_index, traces, index_by_id, visited, order);
            }
        }
        order.push(i);
    }

    for i in 0..traces.len() {
        visit(i, &traces, &index_by_id, &mut visited, &mut order);
    }

    let mut slots: Vec<Option<ExecutionTrace>> = traces.into_iter().map(Some).collect();
    order
        .into_iter()
        .map(|i| slots[i].take().expect("each index appears exactly once"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionTrace;

    #[test]
    fn parent_always_precedes_its_child_even_out_of_order() {
        let root = ExecutionTrace::new_root(Some("cap.root".to_string()));
        let child = ExecutionTrace::new_child(&root, Some("cap.child".to_string()));
        let root_id = root.trace_id;
        let child_id = child.trace_id;

        // Fed in reverse (child before parent) — the sort must still put
        // the parent first.
        let ordered = topological_order(vec![child, root]);
        let position = |id: Uuid| ordered.iter().position(|t| t.trace_id == id).unwrap();
        assert!(position(root_id) < position(child_id));
    }

    #[test]
    fn an_orphaned_trace_is_kept_not_dropped() {
        let orphan = ExecutionTrace::new_child(&ExecutionTrace::new_root(None), None);
        let ordered = topological_order(vec![orphan.clone()]);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].trace_id, orphan.trace_id);
    }
}
