// Content-addressed block-processing engine.

//! Arena-allocated DAG of processing stages.
//!
//! Nodes are referenced by index rather than by `Rc`/`Arc` pointers so the
//! graph can hold cycles-free parent-to-child edges without needing a
//! back-reference from child to parent: nothing at execution time needs to
//! walk upward, only downward from each node to its children.

use std::sync::Arc;

use super::processor::BlockProcessor;

/// An index into a [Dag]'s node arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct NodeId(pub(crate) usize);

pub(crate) struct DagNode {
    pub processor: Arc<dyn BlockProcessor>,
    pub children: Vec<NodeId>,
}

/// The stage graph itself: an arena of nodes plus the id of the root stage
/// that receives carriers directly from the source.
pub struct Dag {
    pub(crate) nodes: Vec<DagNode>,
    pub(crate) root: NodeId,
}

impl Dag {
    /// Start a new graph whose root stage runs `processor`.
    pub fn new(processor: Arc<dyn BlockProcessor>) -> Dag {
        Dag {
            nodes: vec![DagNode {
                processor,
                children: Vec::new(),
            }],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Add a new stage as a child of `parent`, running `processor` on every
    /// carrier `parent` emits. Returns the new stage's id.
    pub fn par_do(&mut self, parent: NodeId, processor: Arc<dyn BlockProcessor>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(DagNode {
            processor,
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub(crate) fn children_of(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub(crate) fn processor_of(&self, id: NodeId) -> Arc<dyn BlockProcessor> {
        self.nodes[id.0].processor.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processor::HashProcessor;

    #[test]
    fn par_do_records_child_under_parent() {
        let mut dag = Dag::new(Arc::new(HashProcessor));
        let root = dag.root();
        let child = dag.par_do(root, Arc::new(HashProcessor));
        assert_eq!(dag.children_of(root), &[child]);
        assert!(dag.children_of(child).is_empty());
    }

    #[test]
    fn fan_out_to_multiple_children() {
        let mut dag = Dag::new(Arc::new(HashProcessor));
        let root = dag.root();
        let a = dag.par_do(root, Arc::new(HashProcessor));
        let b = dag.par_do(root, Arc::new(HashProcessor));
        assert_eq!(dag.children_of(root), &[a, b]);
        assert_eq!(dag.len(), 3);
    }
}
