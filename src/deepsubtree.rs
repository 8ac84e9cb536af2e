//! A module for rebuilding part of a tree from proofs.
//!
//! A `DeepSubTree` starts out knowing nothing but a root digest. Every verified proof
//! added to it materialises the nodes along one key's path, after which the subtree
//! answers `get`, `update`, `delete` and `prove` for that key exactly like the full tree
//! would. Reaching a node no proof has revealed fails with `KeyNotLoaded`.
use crate::node::Record;
use crate::proof::verify_proof;
use crate::utils::*;
use crate::*;
use std::ops::{Deref, DerefMut};

#[derive(Debug)]
pub struct DeepSubTree<D = DefaultDatabase, H = DefaultHasher, P = H> {
    tree: SparseMerkleTree<D, H, P>,
}

impl<D, H, P> DeepSubTree<D, H, P>
where
    D: Database,
    H: Hasher,
    P: PathHasher,
{
    /// An empty subtree of the tree of digest `root`.
    pub fn new(db: D, hasher: TreeHasher<H, P>, root: Hash) -> Self {
        Self::with_options(db, hasher, root, Options::default())
    }

    pub fn with_options(db: D, hasher: TreeHasher<H, P>, root: Hash, options: Options) -> Self {
        DeepSubTree {
            tree: SparseMerkleTree::import(db, hasher, root, options),
        }
    }

    pub fn into_inner(self) -> SparseMerkleTree<D, H, P> {
        self.tree
    }

    /// Materialise the path of `key` from `proof`, which must prove `key` maps to `value`
    /// (empty for an absent key) against the current root.
    pub fn add_branch(&mut self, proof: &SparseMerkleProof, key: &[u8], value: &[u8]) -> Result<()> {
        let root = self.tree.root();
        let hasher = self.tree.hasher();
        if !verify_proof(proof, &root, key, value, hasher) {
            return Err(Errors::BadProof(format!(
                "proof for {} does not verify against {}",
                hex!(key),
                hex!(root)
            )));
        }
        let path = hasher.path(key);
        let branch = match build_branch(proof, &path, value, hasher)? {
            Some(branch) => branch,
            None => return Ok(()),
        };
        let root = match self.tree.root_node_mut() {
            Some(node) => node,
            None => {
                return Err(Errors::BadProof(
                    "non-empty branch for an empty tree".to_string(),
                ))
            }
        };
        if !fits(root, &branch) {
            return Err(Errors::BadProof(
                "branch does not fit the tree".to_string(),
            ));
        }
        graft(root, branch);
        log::debug!(
            "added branch of {} ({} side nodes)",
            hex!(path),
            proof.side_nodes.len()
        );
        Ok(())
    }
}

impl<D, H, P> Deref for DeepSubTree<D, H, P> {
    type Target = SparseMerkleTree<D, H, P>;

    fn deref(&self) -> &Self::Target {
        &self.tree
    }
}

impl<D, H, P> DerefMut for DeepSubTree<D, H, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.tree
    }
}

/// Rebuild the canonical nodes on the path of a verified proof, bottom-up.
///
/// Side nodes become `Lazy` siblings, except the deepest one when the proof carries its
/// record. Placeholder side nodes fold the branch the way `delete()` does.
fn build_branch<H, P>(
    proof: &SparseMerkleProof,
    path: &Hash,
    value: &[u8],
    hasher: &TreeHasher<H, P>,
) -> Result<Option<Node>>
where
    H: Hasher,
    P: PathHasher,
{
    let mut current = match (value.is_empty(), &proof.non_membership_leaf_data) {
        (false, _) => Some(Node::leaf(*path, hasher.value_hash(value))),
        (true, Some(data)) => Some(Node::from_record(Record::parse(data)?)),
        (true, None) => None,
    };
    // orphans only arise from persisted nodes, and none of these are
    let mut orphans = vec![];
    let n = proof.side_nodes.len();
    for (j, side) in proof.side_nodes.iter().enumerate() {
        let depth = n - 1 - j;
        let right = bit(path, depth);
        if hasher.is_placeholder(side) {
            current = current.map(|node| node.collapse(depth, right, hasher, &mut orphans));
            continue;
        }
        let sibling = match (j, &proof.sibling_data) {
            (0, Some(data)) => Node::from_record(Record::parse(data)?),
            _ => Node::lazy(slice_to_hash(side)),
        };
        current = Some(match current {
            Some(node) => Node::branch(right, node, sibling),
            None => sibling.collapse(depth, !right, hasher, &mut orphans),
        });
    }
    Ok(current)
}

/// Whether `branch` can be grafted onto `node`: wherever both are loaded, their shapes agree.
fn fits(node: &Node, branch: &Node) -> bool {
    if branch.is_lazy() || node.is_lazy() {
        return true;
    }
    match (node.kind(), branch.kind()) {
        (Kind::Leaf { .. }, Kind::Leaf { .. }) => true,
        (Kind::Inner { left, right }, Kind::Inner { left: l, right: r }) => {
            fits(left, l) && fits(right, r)
        }
        (
            Kind::Extension {
                start, end, child, ..
            },
            Kind::Extension {
                start: s,
                end: e,
                child: c,
                ..
            },
        ) => (start, end) == (s, e) && fits(child, c),
        _ => false,
    }
}

/// Install the materialised parts of `branch` into `node`. Both stand for the same digest
/// and `fits(node, &branch)` holds.
fn graft(node: &mut Node, branch: Node) {
    if branch.is_lazy() {
        return;
    }
    if node.is_lazy() {
        *node = branch;
        return;
    }
    match (node.kind_mut(), branch.into_kind()) {
        (Kind::Inner { left, right }, Kind::Inner { left: l, right: r }) => {
            graft(left, *l);
            graft(right, *r);
        }
        (Kind::Extension { child, .. }, Kind::Extension { child: c, .. }) => graft(child, *c),
        _ => {}
    }
}
