use crate::binary::attrs::AttrParser;
use crate::binary::jid::Jid;
use indexmap::IndexMap;
use std::fmt;

/// Attribute values are either plain text or a structured JID. Keeping JIDs
/// structured lets the encoder emit the compact jid-pair/ad-jid wire forms.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    Text(String),
    Jid(Jid),
}

impl NodeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NodeValue::Text(s) => Some(s),
            NodeValue::Jid(_) => None,
        }
    }

    /// The value as a JID, parsing text values on demand.
    pub fn to_jid(&self) -> Option<Jid> {
        match self {
            NodeValue::Jid(j) => Some(j.clone()),
            NodeValue::Text(s) => s.parse().ok(),
        }
    }
}

impl fmt::Display for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeValue::Text(s) => write!(f, "{s}"),
            NodeValue::Jid(j) => write!(f, "{j}"),
        }
    }
}

impl From<&str> for NodeValue {
    fn from(s: &str) -> Self {
        NodeValue::Text(s.to_string())
    }
}

impl From<String> for NodeValue {
    fn from(s: String) -> Self {
        NodeValue::Text(s)
    }
}

impl From<Jid> for NodeValue {
    fn from(j: Jid) -> Self {
        NodeValue::Jid(j)
    }
}

/// Order-preserving attribute map; wire order is significant.
pub type Attrs = IndexMap<String, NodeValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeContent {
    Bytes(Vec<u8>),
    Text(String),
    Nodes(Vec<Node>),
}

/// The universal stanza unit: a tag, ordered attributes, and either a leaf
/// payload or child nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    pub tag: String,
    pub attrs: Attrs,
    pub content: Option<NodeContent>,
}

impl Node {
    pub fn new(tag: impl Into<String>, attrs: Attrs, content: Option<NodeContent>) -> Self {
        Self {
            tag: tag.into(),
            attrs,
            content,
        }
    }

    pub fn children(&self) -> Option<&[Node]> {
        match &self.content {
            Some(NodeContent::Nodes(nodes)) => Some(nodes),
            _ => None,
        }
    }

    pub fn content_bytes(&self) -> Option<&[u8]> {
        match &self.content {
            Some(NodeContent::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    pub fn attrs(&self) -> AttrParser<'_> {
        AttrParser::new(self)
    }

    pub fn get_optional_child(&self, tag: &str) -> Option<&Node> {
        self.children()
            .and_then(|nodes| nodes.iter().find(|node| node.tag == tag))
    }

    pub fn get_children_by_tag(&self, tag: &str) -> Vec<&Node> {
        self.children()
            .map(|children| children.iter().filter(|c| c.tag == tag).collect())
            .unwrap_or_default()
    }

    /// Walks a path of child tags, returning the node at the end of it.
    pub fn get_optional_child_by_tag<'a>(&'a self, tags: &[&str]) -> Option<&'a Node> {
        let mut current = self;
        for &tag in tags {
            current = current.get_optional_child(tag)?;
        }
        Some(current)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.tag)?;
        for (key, value) in &self.attrs {
            write!(f, " {key}=\"{value}\"")?;
        }
        match &self.content {
            None => write!(f, "/>"),
            Some(NodeContent::Bytes(b)) => write!(f, ">[{} bytes]</{}>", b.len(), self.tag),
            Some(NodeContent::Text(s)) => write!(f, ">{}</{}>", s, self.tag),
            Some(NodeContent::Nodes(children)) => {
                write!(f, ">")?;
                for child in children {
                    write!(f, "{child}")?;
                }
                write!(f, "</{}>", self.tag)
            }
        }
    }
}
