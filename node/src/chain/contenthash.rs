//! Contenthash payload decoding.
//!
//! Naming records carry an opaque binary payload. The only shape this store
//! recognizes is "IPFS content, DAG-PB, length-prefixed":
//!
//!   `e3 01 01 70 | len | digest[len]`
//!
//! Everything else decodes to `None`: an absent content reference is a
//! normal outcome for records that do not point at this store, not an error.

use multihash::Multihash;

/// Fixed multicodec prefix for IPFS DAG-PB content references.
const IPFS_DAG_PB_PREFIX: [u8; 4] = [0xe3, 0x01, 0x01, 0x70];

/// SHA2-256 multihash code.
const SHA2_256: u64 = 0x12;

/// Decode a hex-encoded chain payload into the store's canonical content id.
///
/// Accepts payloads with or without a `0x` prefix. Total over all inputs:
/// undecodable hex, an unknown prefix, or a digest that does not match its
/// declared length all yield `None`.
pub fn decode_content_ref(payload: &str) -> Option<String> {
    let stripped = payload.strip_prefix("0x").unwrap_or(payload);
    let bytes = hex::decode(stripped).ok()?;
    decode_content_ref_bytes(&bytes)
}

/// Decode raw payload bytes into the canonical base58 multihash string.
pub fn decode_content_ref_bytes(bytes: &[u8]) -> Option<String> {
    if bytes.len() < IPFS_DAG_PB_PREFIX.len() + 1 {
        return None;
    }
    if bytes[..IPFS_DAG_PB_PREFIX.len()] != IPFS_DAG_PB_PREFIX {
        return None;
    }
    let declared_len = bytes[IPFS_DAG_PB_PREFIX.len()] as usize;
    let digest = &bytes[IPFS_DAG_PB_PREFIX.len() + 1..];
    if digest.len() != declared_len {
        return None;
    }
    let multihash = Multihash::<64>::wrap(SHA2_256, digest).ok()?;
    Some(bs58::encode(multihash.to_bytes()).into_string())
}
