/// ANS-104 data items
///
/// Binary layout (all integers little-endian):
///
/// ```text
/// signature type   u16
/// signature        fixed length per type
/// owner            fixed length per type
/// target           0 | 1 + 32 bytes
/// anchor           0 | 1 + 32 bytes
/// tag count        u64
/// tag bytes        u64
/// tags             Avro array of { name: bytes, value: bytes }
/// data             remainder
/// ```
///
/// The signature covers the SHA-384 deep hash of the item fields, and the
/// item id is base64url(SHA-256(signature)).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384};
use thiserror::Error;

use super::signer::Signer;

pub const MAX_TAGS: usize = 128;
pub const MAX_TAG_NAME_BYTES: usize = 1024;
pub const MAX_TAG_VALUE_BYTES: usize = 3072;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DataItemError {
    #[error("{field} must be 32 bytes of base64url")]
    InvalidAddress { field: &'static str },
    #[error("too many tags: {0}")]
    TooManyTags(usize),
    #[error("tag `{0}` exceeds the size limit")]
    TagTooLarge(String),
    #[error("unsupported signature type {0}")]
    UnsupportedSignatureType(u16),
    #[error("signature is {actual} bytes, expected {expected}")]
    SignatureLength { expected: usize, actual: usize },
    #[error("data item truncated")]
    Truncated,
    #[error("malformed tag block")]
    MalformedTags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// (signature length, owner length) for each known signature type
fn key_lengths(signature_type: u16) -> Result<(usize, usize), DataItemError> {
    match signature_type {
        1 => Ok((512, 512)), // Arweave RSA-PSS
        2 => Ok((64, 32)),   // Ed25519
        3 => Ok((65, 65)),   // Ethereum secp256k1
        4 => Ok((64, 32)),   // Solana
        other => Err(DataItemError::UnsupportedSignatureType(other)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItem {
    pub signature_type: u16,
    pub signature: Vec<u8>,
    pub owner: Vec<u8>,
    pub target: Option<[u8; 32]>,
    pub anchor: Option<[u8; 32]>,
    pub tags: Vec<Tag>,
    pub data: Vec<u8>,
}

impl DataItem {
    /// Build and sign a data item addressed to `target` (a process id)
    pub fn sign(
        signer: &dyn Signer,
        target: Option<&str>,
        anchor: Option<[u8; 32]>,
        tags: Vec<Tag>,
        data: Vec<u8>,
    ) -> Result<Self, DataItemError> {
        validate_tags(&tags)?;

        let target = target.map(|t| decode_address(t, "target")).transpose()?;
        let signature_type = signer.signature_type();
        let (signature_len, _) = key_lengths(signature_type)?;

        let mut item = Self {
            signature_type,
            signature: Vec::new(),
            owner: signer.owner(),
            target,
            anchor,
            tags,
            data,
        };

        let signature = signer.sign(&item.signing_message());
        if signature.len() != signature_len {
            return Err(DataItemError::SignatureLength {
                expected: signature_len,
                actual: signature.len(),
            });
        }
        item.signature = signature;

        Ok(item)
    }

    /// Deep hash signed by the owner
    pub fn signing_message(&self) -> [u8; 48] {
        let signature_type = self.signature_type.to_string();
        let target = self.target.map(|t| t.to_vec()).unwrap_or_default();
        let anchor = self.anchor.map(|a| a.to_vec()).unwrap_or_default();
        let tags = encode_tags(&self.tags);

        deep_hash(&DeepHashChunk::List(vec![
            DeepHashChunk::Blob(b"dataitem"),
            DeepHashChunk::Blob(b"1"),
            DeepHashChunk::Blob(signature_type.as_bytes()),
            DeepHashChunk::Blob(&self.owner),
            DeepHashChunk::Blob(&target),
            DeepHashChunk::Blob(&anchor),
            DeepHashChunk::Blob(&tags),
            DeepHashChunk::Blob(&self.data),
        ]))
    }

    /// Item id: base64url(SHA-256(signature))
    pub fn id(&self) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(&self.signature))
    }

    pub fn owner_address(&self) -> String {
        super::signer::address_of(&self.owner)
    }

    pub fn target_id(&self) -> Option<String> {
        self.target.map(|t| URL_SAFE_NO_PAD.encode(t))
    }

    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.value.as_str())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let tags = encode_tags(&self.tags);
        let mut out = Vec::with_capacity(
            2 + self.signature.len() + self.owner.len() + 66 + 16 + tags.len() + self.data.len(),
        );

        out.extend_from_slice(&self.signature_type.to_le_bytes());
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&self.owner);
        write_optional(&mut out, self.target.as_ref());
        write_optional(&mut out, self.anchor.as_ref());
        out.extend_from_slice(&(self.tags.len() as u64).to_le_bytes());
        out.extend_from_slice(&(tags.len() as u64).to_le_bytes());
        out.extend_from_slice(&tags);
        out.extend_from_slice(&self.data);

        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DataItemError> {
        let mut reader = Reader { bytes, pos: 0 };

        let signature_type = u16::from_le_bytes(reader.array::<2>()?);
        let (signature_len, owner_len) = key_lengths(signature_type)?;
        let signature = reader.take(signature_len)?.to_vec();
        let owner = reader.take(owner_len)?.to_vec();
        let target = reader.optional()?;
        let anchor = reader.optional()?;
        let tag_count = u64::from_le_bytes(reader.array::<8>()?) as usize;
        let tag_bytes_len = u64::from_le_bytes(reader.array::<8>()?) as usize;
        let tag_bytes = reader.take(tag_bytes_len)?;
        let tags = decode_tags(tag_bytes)?;
        if tags.len() != tag_count {
            return Err(DataItemError::MalformedTags);
        }
        let data = reader.rest().to_vec();

        Ok(Self {
            signature_type,
            signature,
            owner,
            target,
            anchor,
            tags,
            data,
        })
    }
}

fn validate_tags(tags: &[Tag]) -> Result<(), DataItemError> {
    if tags.len() > MAX_TAGS {
        return Err(DataItemError::TooManyTags(tags.len()));
    }
    for tag in tags {
        if tag.name.is_empty()
            || tag.name.len() > MAX_TAG_NAME_BYTES
            || tag.value.len() > MAX_TAG_VALUE_BYTES
        {
            return Err(DataItemError::TagTooLarge(tag.name.clone()));
        }
    }
    Ok(())
}

fn decode_address(value: &str, field: &'static str) -> Result<[u8; 32], DataItemError> {
    URL_SAFE_NO_PAD
        .decode(value.as_bytes())
        .ok()
        .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
        .ok_or(DataItemError::InvalidAddress { field })
}

fn write_optional(out: &mut Vec<u8>, value: Option<&[u8; 32]>) {
    match value {
        Some(bytes) => {
            out.push(1);
            out.extend_from_slice(bytes);
        }
        None => out.push(0),
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], DataItemError> {
        let end = self.pos.checked_add(len).ok_or(DataItemError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(DataItemError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DataItemError> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn optional(&mut self) -> Result<Option<[u8; 32]>, DataItemError> {
        match self.take(1)?[0] {
            0 => Ok(None),
            1 => Ok(Some(self.array::<32>()?)),
            _ => Err(DataItemError::Truncated),
        }
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}

/// Avro encoding of the tag list; an empty list encodes to no bytes at all
pub fn encode_tags(tags: &[Tag]) -> Vec<u8> {
    if tags.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    write_long(&mut out, tags.len() as i64);
    for tag in tags {
        write_bytes(&mut out, tag.name.as_bytes());
        write_bytes(&mut out, tag.value.as_bytes());
    }
    write_long(&mut out, 0);
    out
}

pub fn decode_tags(bytes: &[u8]) -> Result<Vec<Tag>, DataItemError> {
    let mut tags = Vec::new();
    if bytes.is_empty() {
        return Ok(tags);
    }

    let mut pos = 0;
    loop {
        let mut count = read_long(bytes, &mut pos)?;
        if count == 0 {
            break;
        }
        if count < 0 {
            // Negative block count is followed by the block size in bytes
            count = -count;
            read_long(bytes, &mut pos)?;
        }
        for _ in 0..count {
            let name = read_string(bytes, &mut pos)?;
            let value = read_string(bytes, &mut pos)?;
            tags.push(Tag { name, value });
        }
    }

    if pos != bytes.len() {
        return Err(DataItemError::MalformedTags);
    }
    Ok(tags)
}

fn write_long(out: &mut Vec<u8>, n: i64) {
    let mut zigzag = ((n << 1) ^ (n >> 63)) as u64;
    while zigzag & !0x7f != 0 {
        out.push(((zigzag & 0x7f) | 0x80) as u8);
        zigzag >>= 7;
    }
    out.push(zigzag as u8);
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_long(out, bytes.len() as i64);
    out.extend_from_slice(bytes);
}

fn read_long(bytes: &[u8], pos: &mut usize) -> Result<i64, DataItemError> {
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *bytes.get(*pos).ok_or(DataItemError::MalformedTags)?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return Err(DataItemError::MalformedTags);
        }
    }
    Ok(((value >> 1) as i64) ^ -((value & 1) as i64))
}

fn read_string(bytes: &[u8], pos: &mut usize) -> Result<String, DataItemError> {
    let len = usize::try_from(read_long(bytes, pos)?).map_err(|_| DataItemError::MalformedTags)?;
    let end = pos.checked_add(len).ok_or(DataItemError::MalformedTags)?;
    let slice = bytes.get(*pos..end).ok_or(DataItemError::MalformedTags)?;
    *pos = end;
    String::from_utf8(slice.to_vec()).map_err(|_| DataItemError::MalformedTags)
}

pub enum DeepHashChunk<'a> {
    Blob(&'a [u8]),
    List(Vec<DeepHashChunk<'a>>),
}

/// SHA-384 deep hash over nested byte blobs
pub fn deep_hash(chunk: &DeepHashChunk<'_>) -> [u8; 48] {
    match chunk {
        DeepHashChunk::Blob(data) => {
            let tag = [b"blob".as_slice(), data.len().to_string().as_bytes()].concat();
            let mut hasher = Sha384::new();
            hasher.update(Sha384::digest(&tag));
            hasher.update(Sha384::digest(data));
            digest_bytes(&hasher.finalize())
        }
        DeepHashChunk::List(chunks) => {
            let tag = [b"list".as_slice(), chunks.len().to_string().as_bytes()].concat();
            let mut acc = digest_bytes(&Sha384::digest(&tag));
            for chunk in chunks {
                let mut hasher = Sha384::new();
                hasher.update(acc);
                hasher.update(deep_hash(chunk));
                acc = digest_bytes(&hasher.finalize());
            }
            acc
        }
    }
}

fn digest_bytes(digest: &[u8]) -> [u8; 48] {
    let mut out = [0u8; 48];
    out.copy_from_slice(digest);
    out
}
