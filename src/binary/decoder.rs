use crate::binary::error::{BinaryError, Result};
use crate::binary::jid::{self, Jid};
use crate::binary::node::{Attrs, Node, NodeContent, NodeValue};
use crate::binary::token;

pub(crate) struct Decoder<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.position >= self.data.len()
    }

    pub(crate) fn bytes_left(&self) -> usize {
        self.data.len() - self.position
    }

    fn check_eos(&self, len: usize) -> Result<()> {
        if self.bytes_left() >= len {
            Ok(())
        } else {
            Err(BinaryError::UnexpectedEof)
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.check_eos(1)?;
        let value = self.data[self.position];
        self.position += 1;
        Ok(value)
    }

    fn read_u16_be(&mut self) -> Result<u16> {
        self.check_eos(2)?;
        let value = u16::from_be_bytes([self.data[self.position], self.data[self.position + 1]]);
        self.position += 2;
        Ok(value)
    }

    fn read_u20_be(&mut self) -> Result<u32> {
        self.check_eos(3)?;
        let b = &self.data[self.position..self.position + 3];
        self.position += 3;
        Ok(((b[0] as u32 & 0x0F) << 16) | ((b[1] as u32) << 8) | b[2] as u32)
    }

    fn read_u32_be(&mut self) -> Result<u32> {
        self.check_eos(4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[self.position..self.position + 4]);
        self.position += 4;
        Ok(u32::from_be_bytes(bytes))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.check_eos(len)?;
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn read_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        Ok(std::str::from_utf8(bytes)?.to_string())
    }

    fn read_list_size(&mut self, tag: u8) -> Result<usize> {
        match tag {
            token::LIST_EMPTY => Ok(0),
            token::LIST_8 => self.read_u8().map(usize::from),
            token::LIST_16 => self.read_u16_be().map(usize::from),
            _ => Err(BinaryError::InvalidToken(tag)),
        }
    }

    fn read_jid_pair(&mut self) -> Result<Jid> {
        let user = self.read_value_text()?.unwrap_or_default();
        let server = self.read_value_text()?.unwrap_or_default();
        Ok(Jid {
            user,
            server,
            agent: 0,
            device: 0,
        })
    }

    fn read_ad_jid(&mut self) -> Result<Jid> {
        let agent = self.read_u8()?;
        let device = u16::from(self.read_u8()?);
        let user = self.read_value_text()?.ok_or(BinaryError::InvalidNode)?;

        let server = match agent {
            0 => jid::DEFAULT_USER_SERVER,
            1 => jid::HIDDEN_USER_SERVER,
            _ => jid::HOSTED_SERVER,
        };

        Ok(Jid {
            user,
            server: server.to_string(),
            agent,
            device,
        })
    }

    /// Reads one encoded value. `None` encodes the empty value.
    fn read_value(&mut self) -> Result<Option<NodeValue>> {
        let tag = self.read_u8()?;
        match tag {
            token::LIST_EMPTY => Ok(None),
            token::BINARY_8 => {
                let len = self.read_u8()? as usize;
                self.read_string(len).map(|s| Some(NodeValue::Text(s)))
            }
            token::BINARY_20 => {
                let len = self.read_u20_be()? as usize;
                self.read_string(len).map(|s| Some(NodeValue::Text(s)))
            }
            token::BINARY_32 => {
                let len = self.read_u32_be()? as usize;
                self.read_string(len).map(|s| Some(NodeValue::Text(s)))
            }
            token::JID_PAIR => self.read_jid_pair().map(|j| Some(NodeValue::Jid(j))),
            token::AD_JID => self.read_ad_jid().map(|j| Some(NodeValue::Jid(j))),
            token::NIBBLE_8 | token::HEX_8 => {
                self.read_packed(tag).map(|s| Some(NodeValue::Text(s)))
            }
            tag @ token::DICTIONARY_0..=token::DICTIONARY_3 => {
                let index = self.read_u8()?;
                token::get_double_token(tag - token::DICTIONARY_0, index)
                    .map(|s| Some(NodeValue::Text(s.to_string())))
                    .ok_or(BinaryError::InvalidToken(index))
            }
            _ => token::get_single_token(tag)
                .map(|s| Some(NodeValue::Text(s.to_string())))
                .ok_or(BinaryError::InvalidToken(tag)),
        }
    }

    /// Like [`Self::read_value`] but flattens JIDs to their string form, for
    /// positions that are strings by contract (tags, attribute keys).
    fn read_value_text(&mut self) -> Result<Option<String>> {
        Ok(self.read_value()?.map(|v| v.to_string()))
    }

    fn read_packed(&mut self, tag: u8) -> Result<String> {
        let len_byte = self.read_u8()?;
        let is_odd = (len_byte & 0x80) != 0;
        let packed_len = (len_byte & 0x7F) as usize;

        let mut result = String::with_capacity(packed_len * 2);
        let packed = self.read_bytes(packed_len)?;
        for &byte in packed {
            result.push(unpack_nibble(tag, byte >> 4)?);
            result.push(unpack_nibble(tag, byte & 0x0F)?);
        }
        if is_odd {
            result.pop();
        }
        Ok(result)
    }

    fn read_attributes(&mut self, count: usize) -> Result<Attrs> {
        let mut attrs = Attrs::with_capacity(count);
        for _ in 0..count {
            let key = self.read_value_text()?.ok_or(BinaryError::NonStringKey)?;
            let value = self.read_value()?.unwrap_or(NodeValue::Text(String::new()));
            attrs.insert(key, value);
        }
        Ok(attrs)
    }

    fn read_content(&mut self) -> Result<Option<NodeContent>> {
        let tag = self.read_u8()?;
        match tag {
            token::LIST_EMPTY => Ok(None),
            token::BINARY_8 => {
                let len = self.read_u8()? as usize;
                Ok(Some(NodeContent::Bytes(self.read_bytes(len)?.to_vec())))
            }
            token::BINARY_20 => {
                let len = self.read_u20_be()? as usize;
                Ok(Some(NodeContent::Bytes(self.read_bytes(len)?.to_vec())))
            }
            token::BINARY_32 => {
                let len = self.read_u32_be()? as usize;
                Ok(Some(NodeContent::Bytes(self.read_bytes(len)?.to_vec())))
            }
            _ => {
                let size = self.read_list_size(tag)?;
                let mut nodes = Vec::with_capacity(size);
                for _ in 0..size {
                    nodes.push(self.read_node()?);
                }
                Ok(Some(NodeContent::Nodes(nodes)))
            }
        }
    }

    pub(crate) fn read_node(&mut self) -> Result<Node> {
        let tag = self.read_u8()?;
        let list_size = self.read_list_size(tag)?;
        if list_size == 0 {
            return Err(BinaryError::InvalidNode);
        }

        let tag = self.read_value_text()?.ok_or(BinaryError::InvalidNode)?;

        let attr_count = (list_size - 1) / 2;
        let has_content = list_size % 2 == 0;

        let attrs = self.read_attributes(attr_count)?;
        let content = if has_content {
            self.read_content()?
        } else {
            None
        };

        Ok(Node {
            tag,
            attrs,
            content,
        })
    }
}

fn unpack_nibble(tag: u8, value: u8) -> Result<char> {
    match tag {
        token::NIBBLE_8 => match value {
            0..=9 => Ok((b'0' + value) as char),
            10 => Ok('-'),
            11 => Ok('.'),
            15 => Ok('\x00'),
            _ => Err(BinaryError::InvalidToken(value)),
        },
        token::HEX_8 => match value {
            0..=9 => Ok((b'0' + value) as char),
            10..=15 => Ok((b'A' + value - 10) as char),
            _ => Err(BinaryError::InvalidToken(value)),
        },
        _ => Err(BinaryError::InvalidToken(tag)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_bytes_content() {
        // LIST_8, len 2, token(message), BINARY_8 "abc" — without the flag byte
        let mut dec = Decoder::new(&[248, 2, 19, 252, 3, 97, 98, 99]);
        let node = dec.read_node().unwrap();
        assert_eq!(node.tag, "message");
        assert_eq!(node.content_bytes(), Some(&b"abc"[..]));
        assert!(dec.is_finished());
    }

    #[test]
    fn test_decode_minimal_node() {
        let mut dec = Decoder::new(&[248, 1, 86]);
        let node = dec.read_node().unwrap();
        assert_eq!(node.tag, "ping");
        assert!(node.attrs.is_empty());
        assert!(node.content.is_none());
    }

    #[test]
    fn test_unknown_token_is_error() {
        // 240 is not a dictionary tag, list tag, or known single-byte token
        let mut dec = Decoder::new(&[248, 1, 240]);
        assert!(matches!(
            dec.read_node(),
            Err(BinaryError::InvalidToken(240))
        ));
    }

    #[test]
    fn test_truncated_input() {
        let mut dec = Decoder::new(&[248, 2, 19]);
        assert!(matches!(dec.read_node(), Err(BinaryError::UnexpectedEof)));
    }

    #[test]
    fn test_empty_list_node_is_invalid() {
        let mut dec = Decoder::new(&[token::LIST_EMPTY]);
        assert!(matches!(dec.read_node(), Err(BinaryError::InvalidNode)));
    }

    #[test]
    fn test_decode_jid_pair_attr() {
        // <iq to="s.whatsapp.net"/> : LIST_8 len 3, token(iq), token(to), jid-pair
        let mut dec = Decoder::new(&[248, 3, 25, 17, token::JID_PAIR, 0, 3]);
        let node = dec.read_node().unwrap();
        let jid = node.attrs.get("to").and_then(|v| v.to_jid()).unwrap();
        assert!(jid.user.is_empty());
        assert_eq!(jid.server, "s.whatsapp.net");
    }
}
