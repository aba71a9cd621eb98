//! Immutable description of a requested search.

use std::sync::{Arc, OnceLock};

use crate::node::{same_node, NodeRef};

/// What the hub wants the engine to work on: a node, an optional limit,
/// and an optional restriction to particular root moves.
///
/// Values are immutable and shared as `Arc<SearchParams>`. Identity
/// (`Arc::ptr_eq`) is meaningful: two structurally identical instances
/// are still distinct requests, which is what lets a halt-then-resume
/// with unchanged parameters launch a fresh search.
pub struct SearchParams {
    node: Option<NodeRef>,
    limit: Option<u64>,
    searchmoves: Vec<String>,
}

static NO_SEARCH: OnceLock<Arc<SearchParams>> = OnceLock::new();

impl SearchParams {
    /// Build a search request. An empty node yields the shared
    /// [`SearchParams::none`] value without allocating. `searchmoves`
    /// is validated against the node; the caller's slice is copied,
    /// never retained.
    pub fn new(node: Option<NodeRef>, limit: Option<u64>, searchmoves: &[String]) -> Arc<Self> {
        let Some(node) = node else {
            return Self::none();
        };
        Arc::new(Self {
            searchmoves: node.validate_moves(searchmoves),
            node: Some(node),
            limit: limit.filter(|&n| n > 0),
        })
    }

    /// The canonical empty search. A single shared value; compare with
    /// `Arc::ptr_eq`.
    pub fn none() -> Arc<Self> {
        NO_SEARCH
            .get_or_init(|| {
                Arc::new(Self {
                    node: None,
                    limit: None,
                    searchmoves: Vec::new(),
                })
            })
            .clone()
    }

    pub fn node(&self) -> Option<&NodeRef> {
        self.node.as_ref()
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn searchmoves(&self) -> &[String] {
        &self.searchmoves
    }

    /// Structural comparison: same node (by identity), same limit, same
    /// searchmoves. Distinct from value identity, which is `Arc::ptr_eq`
    /// on the handles.
    pub fn same_params(&self, other: &SearchParams) -> bool {
        let nodes_match = match (&self.node, &other.node) {
            (None, None) => true,
            (Some(a), Some(b)) => same_node(a, b),
            _ => false,
        };
        nodes_match && self.limit == other.limit && self.searchmoves == other.searchmoves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::BoardNode;

    #[test]
    fn test_empty_node_returns_shared_singleton() {
        let a = SearchParams::new(None, Some(1000), &["e2e4".to_string()]);
        let b = SearchParams::none();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.node().is_none());
        assert!(a.limit().is_none());
        assert!(a.searchmoves().is_empty());
    }

    #[test]
    fn test_identity_differs_for_equal_params() {
        let node: NodeRef = BoardNode::startpos();
        let a = SearchParams::new(Some(node.clone()), Some(1000), &[]);
        let b = SearchParams::new(Some(node), Some(1000), &[]);
        assert!(a.same_params(&b));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_searchmoves_validated_at_construction() {
        let node: NodeRef = BoardNode::startpos();
        let requested = vec!["d2d4".to_string(), "e7e5".to_string()];
        let params = SearchParams::new(Some(node), None, &requested);
        assert_eq!(params.searchmoves(), ["d2d4"]);
        assert_eq!(requested, ["d2d4", "e7e5"]);
    }

    #[test]
    fn test_zero_limit_normalized() {
        let node: NodeRef = BoardNode::startpos();
        let params = SearchParams::new(Some(node), Some(0), &[]);
        assert_eq!(params.limit(), None);
    }

    #[test]
    fn test_same_params_discriminates() {
        let n1: NodeRef = BoardNode::startpos();
        let n2: NodeRef = BoardNode::startpos();
        let base = SearchParams::new(Some(n1.clone()), Some(500), &[]);
        assert!(!base.same_params(&SearchParams::new(Some(n2), Some(500), &[])));
        assert!(!base.same_params(&SearchParams::new(Some(n1.clone()), Some(501), &[])));
        assert!(!base.same_params(&SearchParams::new(
            Some(n1),
            Some(500),
            &["e2e4".to_string()]
        )));
        assert!(!base.same_params(&SearchParams::none()));
    }
}
