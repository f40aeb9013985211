//! The tagged binary tree codec used on the wire.

pub mod attrs;
pub mod builder;
mod decoder;
mod encoder;
pub mod error;
pub mod jid;
pub mod node;
pub mod token;
pub mod util;

pub use attrs::AttrParser;
pub use builder::NodeBuilder;
pub use error::{BinaryError, Result};
pub use jid::Jid;
pub use node::{Attrs, Node, NodeContent, NodeValue};

use decoder::Decoder;
use encoder::Encoder;

/// Serializes a node into a frame payload, including the leading flag byte.
pub fn marshal(node: &Node) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new();
    encoder.write_node(node)?;
    Ok(encoder.into_bytes())
}

/// Parses one node from an unpacked payload (no flag byte). The whole input
/// must be consumed.
pub fn unmarshal(data: &[u8]) -> Result<Node> {
    let mut decoder = Decoder::new(data);
    let node = decoder.read_node()?;
    if decoder.is_finished() {
        Ok(node)
    } else {
        Err(BinaryError::LeftoverData(decoder.bytes_left()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marshal_unmarshal_roundtrip() {
        let node = NodeBuilder::new("iq")
            .attr("id", "abc.1")
            .attr("type", "result")
            .children([NodeBuilder::new("count").attr("value", "30").build()])
            .build();

        let payload = marshal(&node).unwrap();
        let unpacked = util::unpack(&payload).unwrap();
        let decoded = unmarshal(&unpacked).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_unmarshal_rejects_leftover() {
        let mut payload = marshal(&NodeBuilder::new("ping").build()).unwrap();
        payload.push(0xAB);
        let unpacked = util::unpack(&payload).unwrap();
        assert!(matches!(
            unmarshal(&unpacked),
            Err(BinaryError::LeftoverData(1))
        ));
    }
}
