//! Document-tree snapshots delivered by the host
//!
//! The engine never holds live nodes. The host serializes the handful of
//! properties the interest filter needs and identifies nodes by `NodeId`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable identity of a document-tree node, assigned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// DOM node type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Element,
    Text,
    Comment,
    Other,
}

/// Computed style properties relevant to visibility and size
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStyle {
    pub display: Option<String>,
    pub visibility: Option<String>,
    /// Style width in CSS pixels
    pub width: Option<f64>,
    /// Style height in CSS pixels
    pub height: Option<f64>,
}

/// A serialized view of one node and (for containers) its descendants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,

    #[serde(default)]
    pub kind: NodeKind,

    /// Upper-case node name (`IMG`, `IFRAME`, `LINK`, `IMAGE`, `DIV`, ...)
    #[serde(default)]
    pub tag: String,

    /// Resolved resource URL (`img.src`, `link.href`, ...), if the host has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Raw attributes (`src`, `href`, `xlink:href`, `rel`, `width`, `height`, `loading`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,

    #[serde(default)]
    pub natural_width: u32,

    #[serde(default)]
    pub natural_height: u32,

    /// `img.complete`
    #[serde(default)]
    pub complete: bool,

    #[serde(default)]
    pub style: NodeStyle,

    /// Element descendants, in document order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    /// Create an element snapshot
    pub fn element(id: u64, tag: impl Into<String>) -> Self {
        Self {
            id: NodeId(id),
            kind: NodeKind::Element,
            tag: tag.into().to_ascii_uppercase(),
            url: None,
            attributes: BTreeMap::new(),
            natural_width: 0,
            natural_height: 0,
            complete: false,
            style: NodeStyle::default(),
            children: Vec::new(),
        }
    }

    /// Create a text node snapshot
    pub fn text(id: u64) -> Self {
        Self {
            kind: NodeKind::Text,
            tag: "#TEXT".to_string(),
            ..Self::element(id, "")
        }
    }

    /// Shorthand for an `<img src=...>`
    pub fn image(id: u64, src: impl Into<String>) -> Self {
        Self::element(id, "IMG").with_src(src)
    }

    pub fn with_src(mut self, src: impl Into<String>) -> Self {
        let src = src.into();
        self.attributes.insert("src".to_string(), src.clone());
        self.url = Some(src);
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_natural_size(mut self, width: u32, height: u32) -> Self {
        self.natural_width = width;
        self.natural_height = height;
        self
    }

    pub fn with_complete(mut self, complete: bool) -> Self {
        self.complete = complete;
        self
    }

    pub fn with_style(mut self, style: NodeStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_child(mut self, child: NodeSnapshot) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn is_element(&self) -> bool {
        self.kind == NodeKind::Element
    }

    pub fn tag_is(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }

    /// The URL this node would fetch: resolved url, then `src`, `href`, `xlink:href`
    pub fn resource_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .or_else(|| self.attr("src"))
            .or_else(|| self.attr("href"))
            .or_else(|| self.attr("xlink:href"))
            .filter(|u| !u.is_empty())
    }

    /// All descendants in document order (not including `self`)
    pub fn descendants(&self) -> Vec<&NodeSnapshot> {
        let mut out = Vec::new();
        let mut stack: Vec<&NodeSnapshot> = self.children.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }
}

/// One entry of a mutation-observer batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MutationRecord {
    /// An attribute changed on `target`
    Attributes {
        target: NodeSnapshot,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attribute_name: Option<String>,
    },
    /// Children were added to or removed from `target`
    ChildList {
        target: NodeId,
        #[serde(default)]
        added: Vec<NodeSnapshot>,
        #[serde(default)]
        removed: Vec<NodeSnapshot>,
    },
}

impl MutationRecord {
    pub fn added(target: u64, nodes: Vec<NodeSnapshot>) -> Self {
        MutationRecord::ChildList {
            target: NodeId(target),
            added: nodes,
            removed: Vec::new(),
        }
    }

    pub fn removed(target: u64, nodes: Vec<NodeSnapshot>) -> Self {
        MutationRecord::ChildList {
            target: NodeId(target),
            added: Vec::new(),
            removed: nodes,
        }
    }

    pub fn attribute(target: NodeSnapshot, name: impl Into<String>) -> Self {
        MutationRecord::Attributes {
            target,
            attribute_name: Some(name.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descendants_in_document_order() {
        let tree = NodeSnapshot::element(1, "div")
            .with_child(NodeSnapshot::element(2, "p").with_child(NodeSnapshot::image(3, "a.png")))
            .with_child(NodeSnapshot::image(4, "b.png"));

        let ids: Vec<u64> = tree.descendants().iter().map(|n| n.id.0).collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn test_resource_url_fallbacks() {
        let svg = NodeSnapshot::element(1, "image").with_attr("xlink:href", "/sprite.svg");
        assert_eq!(svg.resource_url(), Some("/sprite.svg"));
        assert!(svg.tag_is("IMAGE"));

        let empty = NodeSnapshot::element(2, "img").with_attr("src", "");
        assert_eq!(empty.resource_url(), None);
    }

    #[test]
    fn test_mutation_record_json() {
        let json = r#"{"type":"child_list","target":7,"added":[{"id":8,"tag":"IMG","url":"https://cdn.example.com/a.png"}]}"#;
        let record: MutationRecord = serde_json::from_str(json).unwrap();
        match record {
            MutationRecord::ChildList { target, added, removed } => {
                assert_eq!(target, NodeId(7));
                assert_eq!(added.len(), 1);
                assert!(added[0].is_element());
                assert!(removed.is_empty());
            }
            other => panic!("unexpected record: {:?}", other),
        }
    }
}
