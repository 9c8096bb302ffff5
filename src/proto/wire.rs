// Copyright (c) 2025 Crest Developers

//! Wire protocol framing: the 17-byte message header, the peer handshake
//! and the score message. Both encodings are an external compatibility
//! contract and must stay bit-exact.

use thiserror::Error;

use crate::crypto::digest;

pub const HEADER_SIZE: usize = 17;

/// Content identifiers carried in the message header.
pub const CONTENT_ID_GET_PEERS: u8 = 1;
pub const CONTENT_ID_PEERS: u8 = 2;
pub const CONTENT_ID_GET_SIGNATURES: u8 = 20;
pub const CONTENT_ID_SIGNATURES: u8 = 21;
pub const CONTENT_ID_GET_BLOCK: u8 = 22;
pub const CONTENT_ID_BLOCK: u8 = 23;
pub const CONTENT_ID_SCORE: u8 = 24;
pub const CONTENT_ID_TRANSACTION: u8 = 25;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unexpected end of input: need {need} bytes, have {have}")]
    UnexpectedEof { need: usize, have: usize },
    #[error("length field {0} does not fit the declared sizes")]
    InvalidLength(usize),
    #[error("string field is not valid utf-8")]
    NonUtf8,
}

/// The fixed message header: `{length, magic, content-id, payload-length,
/// payload-checksum}`, all multi-byte fields big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub length: u32,
    pub magic: u32,
    pub content_id: u8,
    pub payload_length: u32,
    pub payload_checksum: u32,
}

impl Header {
    pub fn marshal_binary(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.length.to_be_bytes());
        buf[4..8].copy_from_slice(&self.magic.to_be_bytes());
        buf[8] = self.content_id;
        buf[9..13].copy_from_slice(&self.payload_length.to_be_bytes());
        buf[13..17].copy_from_slice(&self.payload_checksum.to_be_bytes());
        buf
    }

    pub fn unmarshal_binary(data: &[u8]) -> Result<Header, WireError> {
        if data.len() < HEADER_SIZE {
            return Err(WireError::UnexpectedEof {
                need: HEADER_SIZE,
                have: data.len(),
            });
        }
        Ok(Header {
            length: u32::from_be_bytes(data[0..4].try_into().unwrap()),
            magic: u32::from_be_bytes(data[4..8].try_into().unwrap()),
            content_id: data[8],
            payload_length: u32::from_be_bytes(data[9..13].try_into().unwrap()),
            payload_checksum: u32::from_be_bytes(data[13..17].try_into().unwrap()),
        })
    }
}

/// The peer handshake exchanged right after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub app_name: String,
    pub version_major: u32,
    pub version_minor: u32,
    pub version_patch: u32,
    pub node_name: String,
    pub node_nonce: u64,
    pub declared_addr: Vec<u8>,
    pub timestamp: u64,
}

impl Handshake {
    pub fn marshal_binary(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            1 + self.app_name.len() + 12 + 1 + self.node_name.len() + 8 + 4
                + self.declared_addr.len()
                + 8,
        );
        buf.push(self.app_name.len() as u8);
        buf.extend_from_slice(self.app_name.as_bytes());
        buf.extend_from_slice(&self.version_major.to_be_bytes());
        buf.extend_from_slice(&self.version_minor.to_be_bytes());
        buf.extend_from_slice(&self.version_patch.to_be_bytes());
        buf.push(self.node_name.len() as u8);
        buf.extend_from_slice(self.node_name.as_bytes());
        buf.extend_from_slice(&self.node_nonce.to_be_bytes());
        buf.extend_from_slice(&(self.declared_addr.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.declared_addr);
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf
    }

    pub fn unmarshal_binary(data: &[u8]) -> Result<Handshake, WireError> {
        let mut r = Reader::new(data);
        let app_name_len = r.u8()? as usize;
        let app_name = r.string(app_name_len)?;
        let version_major = r.u32()?;
        let version_minor = r.u32()?;
        let version_patch = r.u32()?;
        let node_name_len = r.u8()? as usize;
        let node_name = r.string(node_name_len)?;
        let node_nonce = r.u64()?;
        let decl_addr_len = r.u32()? as usize;
        let declared_addr = r.bytes(decl_addr_len)?.to_vec();
        let timestamp = r.u64()?;
        Ok(Handshake {
            app_name,
            version_major,
            version_minor,
            version_patch,
            node_name,
            node_nonce,
            declared_addr,
            timestamp,
        })
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.data.len() - self.pos < n {
            return Err(WireError::UnexpectedEof {
                need: n,
                have: self.data.len() - self.pos,
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_be_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_be_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    fn string(&mut self, n: usize) -> Result<String, WireError> {
        let raw = self.bytes(n)?;
        String::from_utf8(raw.to_vec()).map_err(|_| WireError::NonUtf8)
    }
}

/// Frame a payload into a complete wire message.
///
/// The checksum is the first four bytes of the payload digest; the length
/// field covers everything after itself.
pub fn build_message(magic: u32, content_id: u8, payload: &[u8]) -> Vec<u8> {
    let checksum_src = digest(payload);
    let checksum = u32::from_be_bytes(checksum_src.0[0..4].try_into().unwrap());
    let header = Header {
        length: (HEADER_SIZE - 4 + payload.len()) as u32,
        magic,
        content_id,
        payload_length: payload.len() as u32,
        payload_checksum: checksum,
    };
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.marshal_binary());
    out.extend_from_slice(payload);
    out
}

/// Build the score gossip message: the payload is the big-endian byte form
/// of the cumulative chain score.
pub fn score_message(magic: u32, score_bytes: &[u8]) -> Vec<u8> {
    build_message(magic, CONTENT_ID_SCORE, score_bytes)
}
