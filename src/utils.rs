use std::iter::FromIterator;

use anyhow::{Context, Result};
use prost::Message;
use sled::IVec;

/// The byte separating the type and ID components of a document key.
const DOC_KEY_SEPARATOR: u8 = 0;

/// Encode a byte prefixed document key of the form `{prefix}{type}\0{id}`.
///
/// Document types may not contain NUL bytes, so the separator keeps keys of different types
/// from colliding and keeps all documents of a type contiguous in the tree.
pub fn encode_doc_key(prefix: &[u8; 1], doc_type: &str, id: &str) -> IVec {
    ivec_from_iter(
        prefix
            .iter()
            .copied()
            .chain(doc_type.as_bytes().iter().copied())
            .chain(std::iter::once(DOC_KEY_SEPARATOR))
            .chain(id.as_bytes().iter().copied()),
    )
}

/// Encode the given model into a bytes vec.
pub fn encode_model<M: Message>(model: &M) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(model.encoded_len());
    model.encode(&mut buf).context("error serializing data model")?;
    Ok(buf)
}

/// Decode an object from the given buffer.
pub fn decode_model<M: Message + Default>(data: &[u8]) -> Result<M> {
    M::decode(data).context("error decoding object from storage")
}

/// Encode the given bytes iterator as an IVec.
pub fn ivec_from_iter<T: IntoIterator<Item = u8>>(data: T) -> IVec {
    IVec::from_iter(data)
}

/// The DJB2 string hash used for document routing.
///
/// The hash works over UTF-16 code units with wrapping `i32` arithmetic so that a given routing
/// value always lands on the same shard regardless of platform.
pub fn djb_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(5381i32, |hash, unit| hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(i32::from(unit)))
}
