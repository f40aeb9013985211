use thiserror::Error;

use crate::binary::jid::JidError;

#[derive(Debug, Error)]
pub enum BinaryError {
    #[error("invalid token read from stream: {0}")]
    InvalidToken(u8),
    #[error("invalid node format")]
    InvalidNode,
    #[error("attribute key was not a string")]
    NonStringKey,
    #[error("attribute parsing failed: {0}")]
    AttrParse(String),
    #[error("missing required attribute: {0}")]
    MissingAttr(String),
    #[error("data is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("zlib decompression error: {0}")]
    Zlib(String),
    #[error("JID parsing error: {0}")]
    Jid(#[from] JidError),
    #[error("unexpected end of binary data")]
    UnexpectedEof,
    #[error("received empty data where payload was expected")]
    EmptyData,
    #[error("leftover data after decoding: {0} bytes")]
    LeftoverData(usize),
    #[error("string too long for packed encoding: {0} chars")]
    PackedTooLong(usize),
    #[error("multiple attribute parsing errors: {0:?}")]
    AttrList(Vec<String>),
}

pub type Result<T> = std::result::Result<T, BinaryError>;
