//! A module for proving membership and non-membership of keys, and verifying the proofs.
//!
//! A proof lists the digests of the siblings met on the way from the root to the key's
//! position, deepest first. Verifiers only need the root digest and the `TreeHasher` the
//! tree was built with.
use crate::consts::*;
use crate::node::Record;
use crate::utils::*;
use crate::*;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SparseMerkleProof {
    /// Sibling digests, deepest first: `side_nodes[j]` is the sibling at depth
    /// `side_nodes.len() - 1 - j`.
    pub side_nodes: Vec<Vec<u8>>,
    /// The record of the leaf found where the key would be, if it holds another path.
    pub non_membership_leaf_data: Option<Vec<u8>>,
    /// The record of the deepest sibling, when known. Not used by verification.
    pub sibling_data: Option<Vec<u8>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// A `SparseMerkleProof` with the placeholder side nodes replaced by a bitmask.
pub struct SparseCompactMerkleProof {
    /// The side nodes that are not the placeholder, deepest first.
    pub side_nodes: Vec<Vec<u8>>,
    pub non_membership_leaf_data: Option<Vec<u8>>,
    /// Bit `j`, most significant first, is set iff side node `j` is the placeholder.
    pub bit_mask: Vec<u8>,
    pub num_side_nodes: usize,
    pub sibling_data: Option<Vec<u8>>,
}

/// Check the shape of a proof, independently of any root.
fn sanity_check<H, P>(
    proof: &SparseMerkleProof,
    hasher: &TreeHasher<H, P>,
) -> std::result::Result<(), String>
where
    H: Hasher,
    P: PathHasher,
{
    if proof.side_nodes.len() > DEPTH {
        return Err(format!("{} side nodes", proof.side_nodes.len()));
    }
    if let Some(side) = proof.side_nodes.iter().find(|s| s.len() != HASH_LEN) {
        return Err(format!("side node of {} bytes", side.len()));
    }
    if let Some(data) = &proof.non_membership_leaf_data {
        if data.len() != LEAF_LEN || data[0] != LEAF_PREFIX {
            return Err("non-membership data is not a leaf record".to_string());
        }
    }
    if let Some(data) = &proof.sibling_data {
        let deepest = match proof.side_nodes.first() {
            Some(side) => side,
            None => return Err("sibling data without side nodes".to_string()),
        };
        match hasher.digest_record(data) {
            Ok(hash) if hash[..] == deepest[..] => {}
            _ => return Err("sibling data does not match the deepest side node".to_string()),
        }
    }
    Ok(())
}

/// Fold the side nodes from the bottom up. `None` if the proof cannot stand for `value`.
fn compute_root<H, P>(
    proof: &SparseMerkleProof,
    path: &Hash,
    value: &[u8],
    hasher: &TreeHasher<H, P>,
) -> Option<Hash>
where
    H: Hasher,
    P: PathHasher,
{
    let mut current = match (value.is_empty(), &proof.non_membership_leaf_data) {
        (false, _) => hasher.digest_leaf(path, &hasher.value_hash(value)),
        (true, None) => hasher.placeholder(),
        (true, Some(data)) => match Record::parse(data).ok()? {
            Record::Leaf {
                path: leaf_path,
                value_hash,
            } if leaf_path != *path => hasher.digest_leaf(&leaf_path, &value_hash),
            _ => return None,
        },
    };
    let n = proof.side_nodes.len();
    for (j, side) in proof.side_nodes.iter().enumerate() {
        current = match bit(path, n - 1 - j) {
            true => hasher.digest_node(side, &current),
            false => hasher.digest_node(&current, side),
        };
    }
    Some(current)
}

/// Verify that `key` maps to `value` in the tree of digest `root`. An empty `value`
/// stands for an absent key.
pub fn verify_proof<H, P>(
    proof: &SparseMerkleProof,
    root: &Hash,
    key: &[u8],
    value: &[u8],
    hasher: &TreeHasher<H, P>,
) -> bool
where
    H: Hasher,
    P: PathHasher,
{
    if let Err(reason) = sanity_check(proof, hasher) {
        log::debug!("proof rejected: {}", reason);
        return false;
    }
    let path = hasher.path(key);
    compute_root(proof, &path, value, hasher).as_ref() == Some(root)
}

pub fn compact_proof<H, P>(
    proof: &SparseMerkleProof,
    hasher: &TreeHasher<H, P>,
) -> Result<SparseCompactMerkleProof>
where
    H: Hasher,
    P: PathHasher,
{
    sanity_check(proof, hasher).map_err(Errors::BadProof)?;
    let num_side_nodes = proof.side_nodes.len();
    let mut bit_mask = vec![0u8; num_side_nodes.div_ceil(8)];
    let mut side_nodes = vec![];
    for (j, side) in proof.side_nodes.iter().enumerate() {
        match hasher.is_placeholder(side) {
            true => set_bit(&mut bit_mask, j, true),
            false => side_nodes.push(side.clone()),
        }
    }
    Ok(SparseCompactMerkleProof {
        side_nodes,
        non_membership_leaf_data: proof.non_membership_leaf_data.clone(),
        bit_mask,
        num_side_nodes,
        sibling_data: proof.sibling_data.clone(),
    })
}

pub fn decompact_proof<H, P>(
    proof: &SparseCompactMerkleProof,
    hasher: &TreeHasher<H, P>,
) -> Result<SparseMerkleProof>
where
    H: Hasher,
    P: PathHasher,
{
    let n = proof.num_side_nodes;
    if n > DEPTH {
        return Err(Errors::BadProof(format!("{} side nodes", n)));
    }
    if proof.bit_mask.len() != n.div_ceil(8) {
        return Err(Errors::BadProof(format!(
            "bitmask of {} bytes for {} side nodes",
            proof.bit_mask.len(),
            n
        )));
    }
    let placeholder = hasher.placeholder().to_vec();
    let mut given = proof.side_nodes.iter();
    let side_nodes = (0..n)
        .map(|j| match bit(&proof.bit_mask, j) {
            true => Ok(placeholder.clone()),
            false => given
                .next()
                .cloned()
                .ok_or_else(|| Errors::BadProof("too few side nodes".to_string())),
        })
        .collect::<Result<Vec<_>>>()?;
    if given.next().is_some() {
        return Err(Errors::BadProof("too many side nodes".to_string()));
    }
    Ok(SparseMerkleProof {
        side_nodes,
        non_membership_leaf_data: proof.non_membership_leaf_data.clone(),
        sibling_data: proof.sibling_data.clone(),
    })
}

pub fn verify_compact_proof<H, P>(
    proof: &SparseCompactMerkleProof,
    root: &Hash,
    key: &[u8],
    value: &[u8],
    hasher: &TreeHasher<H, P>,
) -> bool
where
    H: Hasher,
    P: PathHasher,
{
    match decompact_proof(proof, hasher) {
        Ok(proof) => verify_proof(&proof, root, key, value, hasher),
        Err(err) => {
            log::debug!("compact proof rejected: {}", err);
            false
        }
    }
}
