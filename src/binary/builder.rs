use crate::binary::jid::Jid;
use crate::binary::node::{Attrs, Node, NodeContent, NodeValue};

#[derive(Debug, Default)]
pub struct NodeBuilder {
    tag: String,
    attrs: Attrs,
    content: Option<NodeContent>,
}

impl NodeBuilder {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), NodeValue::Text(value.into()));
        self
    }

    /// Attach a JID attribute without stringifying; the encoder emits the
    /// compact jid wire form for these.
    pub fn jid_attr(mut self, key: impl Into<String>, jid: Jid) -> Self {
        self.attrs.insert(key.into(), NodeValue::Jid(jid));
        self
    }

    pub fn attrs<I, K, V>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<NodeValue>,
    {
        for (key, value) in attrs {
            self.attrs.insert(key.into(), value.into());
        }
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.content = Some(NodeContent::Nodes(children.into_iter().collect()));
        self
    }

    pub fn bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.content = Some(NodeContent::Bytes(bytes.into()));
        self
    }

    pub fn build(self) -> Node {
        Node {
            tag: self.tag,
            attrs: self.attrs,
            content: self.content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_shapes() {
        let node = NodeBuilder::new("iq")
            .attr("type", "get")
            .jid_attr("to", Jid::server_jid())
            .children([NodeBuilder::new("ping").build()])
            .build();

        assert_eq!(node.tag, "iq");
        assert_eq!(node.attrs.len(), 2);
        assert_eq!(node.children().unwrap().len(), 1);
        assert!(matches!(node.attrs.get("to"), Some(NodeValue::Jid(_))));
    }
}
