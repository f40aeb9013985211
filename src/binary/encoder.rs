use crate::binary::error::{BinaryError, Result};
use crate::binary::jid::{self, Jid};
use crate::binary::node::{Attrs, Node, NodeContent, NodeValue};
use crate::binary::token;

pub(crate) struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub(crate) fn new() -> Self {
        // The leading byte is the stanza flag: 0 = uncompressed.
        Self { buf: vec![0] }
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn push(&mut self, val: u8) {
        self.buf.push(val);
    }

    fn push_u16_be(&mut self, val: u16) {
        self.buf.extend_from_slice(&val.to_be_bytes());
    }

    fn push_u20_be(&mut self, val: u32) {
        self.buf.push(((val >> 16) & 0x0F) as u8);
        self.buf.push(((val >> 8) & 0xFF) as u8);
        self.buf.push((val & 0xFF) as u8);
    }

    fn push_u32_be(&mut self, val: u32) {
        self.buf.extend_from_slice(&val.to_be_bytes());
    }

    fn write_bytes_with_len(&mut self, bytes: &[u8]) {
        let len = bytes.len();
        if len < 256 {
            self.push(token::BINARY_8);
            self.push(len as u8);
        } else if len < (1 << 20) {
            self.push(token::BINARY_20);
            self.push_u20_be(len as u32);
        } else {
            self.push(token::BINARY_32);
            self.push_u32_be(len as u32);
        }
        self.buf.extend_from_slice(bytes);
    }

    fn write_string(&mut self, s: &str) -> Result<()> {
        if let Some(index) = token::index_of_single_token(s) {
            self.push(index);
        } else if let Some((dict, index)) = token::index_of_double_byte_token(s) {
            self.push(token::DICTIONARY_0 + dict);
            self.push(index);
        } else if is_nibble_packable(s) {
            self.write_packed(s, token::NIBBLE_8)?;
        } else if is_hex_packable(s) {
            self.write_packed(s, token::HEX_8)?;
        } else if s.contains('@') {
            match s.parse::<Jid>() {
                Ok(parsed) => self.write_jid(&parsed)?,
                Err(_) => self.write_bytes_with_len(s.as_bytes()),
            }
        } else {
            self.write_bytes_with_len(s.as_bytes());
        }
        Ok(())
    }

    fn write_jid(&mut self, jid: &Jid) -> Result<()> {
        if jid.device != 0 {
            self.push(token::AD_JID);
            self.push(domain_type(jid));
            self.push(jid.device as u8);
            self.write_string(&jid.user)?;
        } else {
            self.push(token::JID_PAIR);
            if jid.user.is_empty() {
                self.push(token::LIST_EMPTY);
            } else {
                self.write_string(&jid.user)?;
            }
            self.write_string(&jid.server)?;
        }
        Ok(())
    }

    fn write_packed(&mut self, value: &str, data_type: u8) -> Result<()> {
        if value.len() > token::PACKED_MAX {
            return Err(BinaryError::PackedTooLong(value.len()));
        }

        self.push(data_type);

        let mut len_byte = value.len().div_ceil(2) as u8;
        if value.len() % 2 != 0 {
            len_byte |= 0x80;
        }
        self.push(len_byte);

        let pack: fn(u8) -> u8 = if data_type == token::NIBBLE_8 {
            pack_nibble
        } else {
            pack_hex
        };

        let bytes = value.as_bytes();
        for pair in bytes.chunks(2) {
            let high = pack(pair[0]);
            // Odd-length strings are padded with 0xF in the low nibble.
            let low = if pair.len() == 2 { pack(pair[1]) } else { 0x0F };
            self.push((high << 4) | low);
        }
        Ok(())
    }

    fn write_list_start(&mut self, len: usize) {
        if len == 0 {
            self.push(token::LIST_EMPTY);
        } else if len < 256 {
            self.push(token::LIST_8);
            self.push(len as u8);
        } else {
            self.push(token::LIST_16);
            self.push_u16_be(len as u16);
        }
    }

    fn write_attributes(&mut self, attrs: &Attrs) -> Result<()> {
        for (key, value) in attrs {
            self.write_string(key)?;
            match value {
                NodeValue::Text(s) => self.write_string(s)?,
                NodeValue::Jid(j) => self.write_jid(j)?,
            }
        }
        Ok(())
    }

    fn write_content(&mut self, content: &NodeContent) -> Result<()> {
        match content {
            NodeContent::Text(s) => self.write_string(s)?,
            NodeContent::Bytes(bytes) => self.write_bytes_with_len(bytes),
            NodeContent::Nodes(nodes) => {
                self.write_list_start(nodes.len());
                for node in nodes {
                    self.write_node(node)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn write_node(&mut self, node: &Node) -> Result<()> {
        let content_len = usize::from(node.content.is_some());
        let list_len = 1 + node.attrs.len() * 2 + content_len;

        self.write_list_start(list_len);
        self.write_string(&node.tag)?;
        self.write_attributes(&node.attrs)?;

        if let Some(content) = &node.content {
            self.write_content(content)?;
        }
        Ok(())
    }
}

fn domain_type(jid: &Jid) -> u8 {
    match jid.server.as_str() {
        jid::HIDDEN_USER_SERVER => 1,
        jid::HOSTED_SERVER => 128,
        _ => jid.agent,
    }
}

fn is_nibble_packable(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= token::PACKED_MAX
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || b == b'-' || b == b'.')
}

fn is_hex_packable(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= token::PACKED_MAX
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
}

fn pack_nibble(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'-' => 10,
        b'.' => 11,
        _ => unreachable!("caller validated nibble alphabet"),
    }
}

fn pack_hex(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'A'..=b'F' => 10 + b - b'A',
        _ => unreachable!("caller validated hex alphabet"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::node::Attrs;

    fn encode(node: &Node) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_node(node).unwrap();
        enc.into_bytes()
    }

    #[test]
    fn test_encode_tokenized_leaf() {
        let node = Node::new(
            "message",
            Attrs::new(),
            Some(NodeContent::Text("receipt".to_string())),
        );
        // flag, LIST_8, len 2, token(message), token(receipt)
        assert_eq!(encode(&node), vec![0, 248, 2, 19, 7]);
    }

    #[test]
    fn test_encode_minimal_node() {
        let node = Node::new("ping", Attrs::new(), None);
        assert_eq!(encode(&node), vec![0, 248, 1, 86]);
    }

    #[test]
    fn test_nibble_packed_content() {
        let node = Node::new(
            "test",
            Attrs::new(),
            Some(NodeContent::Text("-.0123456789".to_string())),
        );
        let expected = vec![
            0, 248, 2, 252, 4, 116, 101, 115, 116, 255, 6, 171, 1, 35, 69, 103, 137,
        ];
        assert_eq!(encode(&node), expected);
    }

    #[test]
    fn test_odd_nibble_padding() {
        let mut enc = Encoder::new();
        enc.write_string("123").unwrap();
        // NIBBLE_8, len 2 with the odd-length bit, 0x12, 0x3F
        assert_eq!(enc.into_bytes()[1..], [255, 0x82, 0x12, 0x3F]);
    }

    #[test]
    fn test_hex_requires_uppercase() {
        assert!(is_hex_packable("DEADBEEF"));
        assert!(!is_hex_packable("deadbeef"));
        assert!(!is_hex_packable(""));
    }

    #[test]
    fn test_packed_max_boundary() {
        assert!(is_nibble_packable(&"0".repeat(token::PACKED_MAX)));
        assert!(!is_nibble_packable(&"0".repeat(token::PACKED_MAX + 1)));
    }

    #[test]
    fn test_list_header_boundaries() {
        let mut enc = Encoder::new();
        enc.write_list_start(255);
        assert_eq!(enc.into_bytes()[1..], [token::LIST_8, 255]);

        let mut enc = Encoder::new();
        enc.write_list_start(256);
        assert_eq!(enc.into_bytes()[1..], [token::LIST_16, 0x01, 0x00]);

        let mut enc = Encoder::new();
        enc.write_list_start(0);
        assert_eq!(enc.into_bytes()[1..], [token::LIST_EMPTY]);
    }

    #[test]
    fn test_binary_length_boundaries() {
        let mut enc = Encoder::new();
        enc.write_bytes_with_len(&[0x42; 255]);
        assert_eq!(enc.buf[1], token::BINARY_8);
        assert_eq!(enc.buf[2], 255);

        let mut enc = Encoder::new();
        enc.write_bytes_with_len(&[0x42; 256]);
        assert_eq!(enc.buf[1..5], [token::BINARY_20, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_jid_pair_server_only() {
        let mut enc = Encoder::new();
        enc.write_jid(&Jid::server_jid()).unwrap();
        // JID_PAIR, empty user, token(s.whatsapp.net)
        assert_eq!(enc.into_bytes()[1..], [token::JID_PAIR, 0, 3]);
    }

    #[test]
    fn test_ad_jid_encoding() {
        let mut enc = Encoder::new();
        let jid = Jid {
            user: "123".to_string(),
            server: jid::HIDDEN_USER_SERVER.to_string(),
            agent: 0,
            device: 7,
        };
        enc.write_jid(&jid).unwrap();
        let bytes = enc.into_bytes();
        assert_eq!(bytes[1], token::AD_JID);
        assert_eq!(bytes[2], 1); // lid domain
        assert_eq!(bytes[3], 7);
    }
}
