//! Summary plan trees and their JSON form.
//!
//! The host's executable plan is opaque here. What the selector and the
//! learning service see is a [`PlanNode`] tree: node kind, the host's numeric
//! node tag, cost, row estimate, optional relation name and up to two
//! children (outer/inner). Plan shapes with more children are reduced to
//! their first two.
//!
//! Trees may be arbitrarily deep. JSON encoding and decoding grow the stack
//! on the heap as needed, and dropping or comparing a tree does not recurse.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;

/// Maximum children kept per node.
pub const MAX_CHILDREN: usize = 2;

/// The plan node kinds the learning service distinguishes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum NodeKind {
    #[serde(rename = "Seq Scan")]
    SeqScan,
    #[serde(rename = "Index Scan")]
    IndexScan,
    #[serde(rename = "Index Only Scan")]
    IndexOnlyScan,
    #[serde(rename = "Bitmap Index Scan")]
    BitmapIndexScan,
    #[serde(rename = "Nested Loop")]
    NestedLoop,
    #[serde(rename = "Merge Join")]
    MergeJoin,
    #[serde(rename = "Hash Join")]
    HashJoin,
    #[serde(other)]
    Other,
}

impl NodeKind {
    /// Whether this node reads a base relation.
    pub fn is_scan(self) -> bool {
        matches!(
            self,
            NodeKind::SeqScan
                | NodeKind::IndexScan
                | NodeKind::IndexOnlyScan
                | NodeKind::BitmapIndexScan
        )
    }

    /// Whether this node joins its two children.
    pub fn is_join(self) -> bool {
        matches!(
            self,
            NodeKind::NestedLoop | NodeKind::MergeJoin | NodeKind::HashJoin
        )
    }
}

/// One node of a summary plan tree.
///
/// Estimates should be finite: JSON has no NaN or infinity, so serde_json
/// writes them as `null` and such a tree does not parse back.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanNode {
    #[serde(rename = "Node Type")]
    pub kind: NodeKind,

    /// Host-specific numeric node tag.
    #[serde(
        rename = "Node Type ID",
        serialize_with = "type_id::serialize",
        deserialize_with = "type_id::deserialize"
    )]
    pub type_id: u32,

    #[serde(
        rename = "Relation Name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub relation: Option<String>,

    #[serde(rename = "Total Cost")]
    pub total_cost: f64,

    #[serde(rename = "Plan Rows")]
    pub plan_rows: f64,

    #[serde(
        rename = "Plans",
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_children"
    )]
    children: Vec<PlanNode>,
}

impl PlanNode {
    /// Create a leaf node.
    pub fn new(kind: NodeKind, type_id: u32, total_cost: f64, plan_rows: f64) -> Self {
        Self {
            kind,
            type_id,
            relation: None,
            total_cost,
            plan_rows,
            children: Vec::new(),
        }
    }

    /// Set the relation this node scans.
    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    /// Append a child. Children past the second are ignored.
    pub fn with_child(mut self, child: PlanNode) -> Self {
        if self.children.len() < MAX_CHILDREN {
            self.children.push(child);
        }
        self
    }

    /// The node's children, outer first.
    pub fn children(&self) -> &[PlanNode] {
        &self.children
    }

    /// Outer (left) child.
    pub fn left(&self) -> Option<&PlanNode> {
        self.children.first()
    }

    /// Inner (right) child.
    pub fn right(&self) -> Option<&PlanNode> {
        self.children.get(1)
    }

    /// Pre-order traversal of the tree rooted at this node.
    pub fn iter(&self) -> PlanIter<'_> {
        PlanIter { stack: vec![self] }
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    /// Height of the tree (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 1usize)];
        while let Some((node, depth)) = stack.pop() {
            max = max.max(depth);
            stack.extend(node.children.iter().map(|c| (c, depth + 1)));
        }
        max
    }

    /// Relation names in pre-order.
    pub fn relations(&self) -> impl Iterator<Item = &str> {
        self.iter().filter_map(|node| node.relation.as_deref())
    }
}

impl PartialEq for PlanNode {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self, other)];
        while let Some((a, b)) = stack.pop() {
            if a.kind != b.kind
                || a.type_id != b.type_id
                || a.relation != b.relation
                || a.total_cost != b.total_cost
                || a.plan_rows != b.plan_rows
                || a.children.len() != b.children.len()
            {
                return false;
            }
            stack.extend(a.children.iter().zip(&b.children));
        }
        true
    }
}

impl Drop for PlanNode {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.children);
        }
    }
}

/// Pre-order iterator over a [`PlanNode`] tree.
pub struct PlanIter<'a> {
    stack: Vec<&'a PlanNode>,
}

impl<'a> Iterator for PlanIter<'a> {
    type Item = &'a PlanNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

#[derive(Serialize)]
struct PlanDocumentRef<'a> {
    #[serde(rename = "Plan")]
    plan: &'a PlanNode,
}

#[derive(Deserialize)]
struct PlanDocument {
    #[serde(rename = "Plan")]
    plan: PlanNode,
}

/// Serialize a plan tree as `{"Plan": ...}`, or `null` for no plan.
pub fn plan_json(plan: Option<&PlanNode>) -> Result<String> {
    let document = plan.map(|plan| PlanDocumentRef { plan });
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::new(&mut out);
    document.serialize(serde_stacker::Serializer::new(&mut serializer))?;
    let json = String::from_utf8(out).map_err(|err| {
        serde_json::Error::io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    })?;
    Ok(json)
}

/// Parse the output of [`plan_json`].
pub fn parse_plan_json(json: &str) -> Result<Option<PlanNode>> {
    let mut deserializer = serde_json::Deserializer::from_str(json);
    deserializer.disable_recursion_limit();
    let document =
        Option::<PlanDocument>::deserialize(serde_stacker::Deserializer::new(&mut deserializer))?;
    deserializer.end()?;
    Ok(document.map(|d| d.plan))
}

fn deserialize_children<'de, D>(deserializer: D) -> std::result::Result<Vec<PlanNode>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut children = Vec::<PlanNode>::deserialize(deserializer)?;
    children.truncate(MAX_CHILDREN);
    Ok(children)
}

/// The node tag is written as a decimal string and read from either form.
mod type_id {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(id)
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(id) => Ok(id),
            Raw::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| D::Error::custom(format!("invalid node type id {:?}", text))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PlanNode {
        PlanNode::new(NodeKind::HashJoin, 38, 1234.5, 100.0)
            .with_child(
                PlanNode::new(NodeKind::SeqScan, 19, 400.25, 1000.0).with_relation("title"),
            )
            .with_child(
                PlanNode::new(NodeKind::NestedLoop, 36, 700.0, 10.0)
                    .with_child(
                        PlanNode::new(NodeKind::IndexScan, 21, 8.5, 1.0)
                            .with_relation("movie_info"),
                    )
                    .with_child(
                        PlanNode::new(NodeKind::IndexOnlyScan, 22, 4.25, 1.0)
                            .with_relation("cast \"info\""),
                    ),
            )
    }

    #[test]
    fn test_null_plan() {
        assert_eq!(plan_json(None).unwrap(), "null");
        assert_eq!(parse_plan_json("null").unwrap(), None);
    }

    #[test]
    fn test_leaf_json_shape() {
        let leaf = PlanNode::new(NodeKind::SeqScan, 19, 10.5, 3.0).with_relation("users");
        assert_eq!(
            plan_json(Some(&leaf)).unwrap(),
            r#"{"Plan":{"Node Type":"Seq Scan","Node Type ID":"19","Relation Name":"users","Total Cost":10.5,"Plan Rows":3.0}}"#
        );
    }

    #[test]
    fn test_tree_roundtrip() {
        let tree = sample();
        let json = plan_json(Some(&tree)).unwrap();
        let parsed = parse_plan_json(&json).unwrap().unwrap();
        assert_eq!(parsed, tree);
        assert_eq!(parsed.right().unwrap().right().unwrap().relation.as_deref(), Some("cast \"info\""));
    }

    /// Left-deep join chain: `levels` joins over a leaf, `levels + 1` deep.
    fn join_chain(levels: usize) -> PlanNode {
        let mut tree = PlanNode::new(NodeKind::SeqScan, 19, 1.0, 1.0).with_relation("leaf");
        for level in 0..levels {
            tree = PlanNode::new(NodeKind::MergeJoin, 37, level as f64 * 1.5, level as f64)
                .with_child(tree)
                .with_child(PlanNode::new(NodeKind::BitmapIndexScan, 24, 0.75, 2.0));
        }
        tree
    }

    #[test]
    fn test_deep_tree_roundtrip() {
        let tree = join_chain(40);
        assert_eq!(tree.depth(), 41);
        let parsed = parse_plan_json(&plan_json(Some(&tree)).unwrap()).unwrap().unwrap();
        assert_eq!(parsed, tree);
        assert_eq!(parsed.depth(), 41);
    }

    #[test]
    fn test_very_deep_tree_roundtrip() {
        for levels in [64, 100, 5_000] {
            let tree = join_chain(levels);
            let json = plan_json(Some(&tree)).unwrap();
            let parsed = parse_plan_json(&json).unwrap().unwrap();
            assert_eq!(parsed.depth(), levels + 1);
            assert_eq!(parsed.node_count(), 2 * levels + 1);
            assert!(parsed == tree, "round trip differs at {} levels", levels);
        }
    }

    #[test]
    fn test_very_deep_tree_drop() {
        let mut tree = PlanNode::new(NodeKind::SeqScan, 19, 1.0, 1.0);
        for _ in 0..200_000 {
            tree = PlanNode::new(NodeKind::NestedLoop, 36, 1.0, 1.0).with_child(tree);
        }
        assert_eq!(tree.depth(), 200_001);
        drop(tree);
    }

    #[test]
    fn test_trailing_input_rejected() {
        assert!(parse_plan_json("null x").is_err());
    }

    #[test]
    fn test_non_finite_cost_is_lossy() {
        let node = PlanNode::new(NodeKind::SeqScan, 19, f64::NAN, 1.0);
        let json = plan_json(Some(&node)).unwrap();
        assert!(json.contains(r#""Total Cost":null"#));
        assert!(parse_plan_json(&json).is_err());
    }

    #[test]
    fn test_equality_checks_every_field() {
        let tree = join_chain(3);
        let mut other = join_chain(3);
        assert!(tree == other);
        other.children[0].children[1].relation = Some("x".into());
        assert!(tree != other);
    }

    #[test]
    fn test_type_id_accepts_number() {
        let json = r#"{"Plan":{"Node Type":"Hash Join","Node Type ID":38,"Total Cost":1.0,"Plan Rows":2.0}}"#;
        let node = parse_plan_json(json).unwrap().unwrap();
        assert_eq!(node.type_id, 38);
        assert!(node.children().is_empty());
        assert!(node.relation.is_none());
    }

    #[test]
    fn test_unknown_kind_is_other() {
        let json = r#"{"Plan":{"Node Type":"Gather Merge","Node Type ID":"50","Total Cost":1.0,"Plan Rows":2.0}}"#;
        let node = parse_plan_json(json).unwrap().unwrap();
        assert_eq!(node.kind, NodeKind::Other);
    }

    #[test]
    fn test_extra_children_dropped() {
        let node = PlanNode::new(NodeKind::Other, 1, 0.0, 0.0)
            .with_child(PlanNode::new(NodeKind::SeqScan, 19, 1.0, 1.0))
            .with_child(PlanNode::new(NodeKind::SeqScan, 19, 2.0, 1.0))
            .with_child(PlanNode::new(NodeKind::SeqScan, 19, 3.0, 1.0));
        assert_eq!(node.children().len(), 2);

        let json = r#"{"Plan":{"Node Type":"Append","Node Type ID":"3","Total Cost":0.0,"Plan Rows":0.0,"Plans":[
            {"Node Type":"Seq Scan","Node Type ID":"19","Total Cost":1.0,"Plan Rows":1.0},
            {"Node Type":"Seq Scan","Node Type ID":"19","Total Cost":2.0,"Plan Rows":1.0},
            {"Node Type":"Seq Scan","Node Type ID":"19","Total Cost":3.0,"Plan Rows":1.0}]}}"#;
        let parsed = parse_plan_json(json).unwrap().unwrap();
        assert_eq!(parsed.children().len(), 2);
    }

    #[test]
    fn test_traversal() {
        let tree = sample();
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.depth(), 3);
        let relations: Vec<_> = tree.relations().collect();
        assert_eq!(relations, vec!["title", "movie_info", "cast \"info\""]);
        let joins = tree.iter().filter(|n| n.kind.is_join()).count();
        let scans = tree.iter().filter(|n| n.kind.is_scan()).count();
        assert_eq!((joins, scans), (2, 3));
    }
}
