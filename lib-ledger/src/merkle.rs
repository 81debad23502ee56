//! Merkle commitment over transaction ids.
//!
//! Leaves are sorted by tx id before hashing, so the root is independent of
//! arrival order by construction. Odd layers duplicate their last node.

use lib_crypto::{sha256_hex, hashing::zero_hash};

/// Compute the merkle root of a set of transaction ids.
///
/// The empty set commits to the all-zero hash (genesis convention).
pub fn merkle_root<S: AsRef<str>>(tx_ids: &[S]) -> String {
    if tx_ids.is_empty() {
        return zero_hash();
    }

    let mut layer: Vec<String> = tx_ids
        .iter()
        .map(|id| id.as_ref().to_string())
        .collect();
    layer.sort();
    let mut layer: Vec<String> = layer
        .iter()
        .map(|id| sha256_hex(id.as_bytes()))
        .collect();

    while layer.len() > 1 {
        if layer.len() % 2 == 1 {
            layer.push(layer.last().cloned().unwrap_or_default());
        }
        layer = layer
            .chunks(2)
            .map(|pair| {
                let mut joined = pair[0].clone();
                joined.push_str(&pair[1]);
                sha256_hex(joined.as_bytes())
            })
            .collect();
    }
    layer.pop().unwrap_or_else(zero_hash)
}
