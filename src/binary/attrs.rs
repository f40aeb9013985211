use crate::binary::error::{BinaryError, Result};
use crate::binary::jid::Jid;
use crate::binary::node::Node;

/// Accumulating attribute reader. Parse errors are collected rather than
/// returned eagerly so a caller can read every field and then check once.
pub struct AttrParser<'a> {
    node: &'a Node,
    pub errors: Vec<String>,
}

impl<'a> AttrParser<'a> {
    pub fn new(node: &'a Node) -> Self {
        Self {
            node,
            errors: Vec::new(),
        }
    }

    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(&self) -> Result<()> {
        if self.ok() {
            Ok(())
        } else {
            Err(BinaryError::AttrList(self.errors.clone()))
        }
    }

    fn get(&mut self, key: &str, required: bool) -> Option<&'a crate::binary::node::NodeValue> {
        let value = self.node.attrs.get(key);
        if required && value.is_none() {
            self.errors.push(format!("required attribute '{key}' not found"));
        }
        value
    }

    pub fn optional_string(&mut self, key: &str) -> Option<String> {
        self.get(key, false).map(|v| v.to_string())
    }

    pub fn required_string(&mut self, key: &str) -> Result<String> {
        self.get(key, false)
            .map(|v| v.to_string())
            .ok_or_else(|| BinaryError::MissingAttr(key.to_string()))
    }

    pub fn string(&mut self, key: &str) -> String {
        self.get(key, true).map(|v| v.to_string()).unwrap_or_default()
    }

    pub fn optional_jid(&mut self, key: &str) -> Option<Jid> {
        let value = self.get(key, false)?;
        match value.to_jid() {
            Some(jid) => Some(jid),
            None => {
                self.errors.push(format!("invalid JID in '{key}': {value}"));
                None
            }
        }
    }

    pub fn jid(&mut self, key: &str) -> Jid {
        self.get(key, true);
        self.optional_jid(key).unwrap_or_default()
    }

    pub fn optional_u64(&mut self, key: &str) -> Option<u64> {
        let value = self.get(key, false)?.to_string();
        match value.parse::<u64>() {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors
                    .push(format!("failed to parse u64 from '{value}' for '{key}': {e}"));
                None
            }
        }
    }

    pub fn optional_bool(&mut self, key: &str) -> bool {
        self.get(key, false)
            .map(|v| v.to_string() == "true")
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::builder::NodeBuilder;

    #[test]
    fn test_typed_reads() {
        let node = NodeBuilder::new("iq")
            .attr("id", "abc.1")
            .attr("count", "42")
            .attr("from", "123@s.whatsapp.net")
            .build();

        let mut parser = node.attrs();
        assert_eq!(parser.optional_string("id").as_deref(), Some("abc.1"));
        assert_eq!(parser.optional_u64("count"), Some(42));
        assert_eq!(parser.jid("from").user, "123");
        assert!(parser.finish().is_ok());
    }

    #[test]
    fn test_missing_required_collects_error() {
        let node = NodeBuilder::new("iq").build();
        let mut parser = node.attrs();
        let _ = parser.string("id");
        assert!(!parser.ok());
        assert!(parser.finish().is_err());
    }

    #[test]
    fn test_bad_number_collects_error() {
        let node = NodeBuilder::new("iq").attr("count", "NaN").build();
        let mut parser = node.attrs();
        assert_eq!(parser.optional_u64("count"), None);
        assert!(!parser.ok());
    }
}
