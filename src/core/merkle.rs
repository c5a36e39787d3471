//! Merkle root computation over ordered lists of hex SHA-256 digests.
//!
//! Leaves are the hex-decoded 32-byte hashes. At each level adjacent nodes
//! are concatenated and re-hashed; an odd trailing node is duplicated. The
//! root of an empty list is the SHA-256 of no input.

use crate::core::error::{MeshError, MeshResult};
use sha2::{Digest, Sha256};

const EMPTY_ROOT: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

pub fn merkle_root_hex(hashes: &[String]) -> MeshResult<String> {
    if hashes.is_empty() {
        return Ok(EMPTY_ROOT.to_string());
    }
    let mut level: Vec<Vec<u8>> = Vec::with_capacity(hashes.len());
    for h in hashes {
        let bytes = hex::decode(h)
            .map_err(|e| MeshError::Integrity(format!("merkle leaf {} not hex: {}", h, e)))?;
        level.push(bytes);
    }

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = level.last().cloned().unwrap_or_default();
            level.push(last);
        }
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(&pair[0]);
            hasher.update(&pair[1]);
            next.push(hasher.finalize().to_vec());
        }
        level = next;
    }

    Ok(hex::encode(&level[0]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::canon::sha256_hex;

    #[test]
    fn test_empty_list_yields_empty_root() {
        assert_eq!(merkle_root_hex(&[]).unwrap(), EMPTY_ROOT);
    }

    #[test]
    fn test_single_leaf_is_its_own_root() {
        let leaf = sha256_hex(b"exec");
        assert_eq!(merkle_root_hex(&[leaf.clone()]).unwrap(), leaf);
    }

    #[test]
    fn test_two_leaves_combine_bytewise() {
        let a = sha256_hex(b"exec");
        let b = sha256_hex(b"sla");
        let mut hasher = sha2::Sha256::new();
        hasher.update(hex::decode(&a).unwrap());
        hasher.update(hex::decode(&b).unwrap());
        let expected = hex::encode(hasher.finalize());
        assert_eq!(merkle_root_hex(&[a, b]).unwrap(), expected);
    }

    #[test]
    fn test_odd_trailing_leaf_is_duplicated() {
        let a = sha256_hex(b"a");
        let b = sha256_hex(b"b");
        let c = sha256_hex(b"c");
        let three = merkle_root_hex(&[a.clone(), b.clone(), c.clone()]).unwrap();
        let four = merkle_root_hex(&[a, b, c.clone(), c]).unwrap();
        assert_eq!(three, four);
    }

    #[test]
    fn test_rejects_non_hex_leaf() {
        assert!(matches!(
            merkle_root_hex(&["zzzz".to_string()]),
            Err(MeshError::Integrity(_))
        ));
    }
}
