//! A module implementing the sparse Merkle tree.
use crate::bits::common_prefix_from;
use crate::consts::*;
use crate::node::Record;
use crate::proof::{compact_proof, SparseCompactMerkleProof, SparseMerkleProof};
use crate::utils::*;
use crate::*;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// Tree-wide behaviour switches.
pub struct Options {
    auto_remove_orphans: bool,
}

impl Options {
    /// Remove orphaned records from the database right after each `update()` or
    /// `delete()`, instead of deferring to `commit()`.
    pub fn auto_remove_orphans(mut self, on: bool) -> Self {
        self.auto_remove_orphans = on;
        self
    }

    pub fn removes_orphans(&self) -> bool {
        self.auto_remove_orphans
    }
}

/// A sparse Merkle tree over a `Database`.
///
/// The tree owns a single in-memory root. Nodes below it stay `Lazy` until a traversal
/// reaches them. Mutations only change memory; displaced records are queued as orphans
/// and `commit()` brings the database in line with the in-memory tree.
#[derive(Debug)]
pub struct SparseMerkleTree<D = DefaultDatabase, H = DefaultHasher, P = H> {
    db: D,
    hasher: TreeHasher<H, P>,
    root: Option<Node>,
    saved_root: Hash,
    orphans: Vec<Vec<Hash>>,
    options: Options,
}

impl Default for SparseMerkleTree<DefaultDatabase, DefaultHasher> {
    fn default() -> Self {
        Self::new(MemoryDB::default(), TreeHasher::new())
    }
}

impl<D, H> SparseMerkleTree<D, H, H>
where
    D: Database,
    H: Hasher + Clone,
{
    /// Open the database at `dbpath` with an empty tree on top of it.
    pub fn open(dbpath: &str) -> Result<Self> {
        Ok(Self::new(D::new(dbpath)?, TreeHasher::new()))
    }
}

impl<D, H, P> SparseMerkleTree<D, H, P>
where
    D: Database,
    H: Hasher,
    P: PathHasher,
{
    pub fn new(db: D, hasher: TreeHasher<H, P>) -> Self {
        Self::with_options(db, hasher, Options::default())
    }

    pub fn with_options(db: D, hasher: TreeHasher<H, P>, options: Options) -> Self {
        let saved_root = hasher.placeholder();
        SparseMerkleTree {
            db,
            hasher,
            root: None,
            saved_root,
            orphans: vec![],
            options,
        }
    }

    /// Re-open a committed tree by its root digest. The placeholder root means empty.
    pub fn import(db: D, hasher: TreeHasher<H, P>, root: Hash, options: Options) -> Self {
        let node = match hasher.is_placeholder(&root) {
            true => None,
            false => Some(Node::lazy(root)),
        };
        SparseMerkleTree {
            db,
            hasher,
            root: node,
            saved_root: root,
            orphans: vec![],
            options,
        }
    }

    pub fn hasher(&self) -> &TreeHasher<H, P> {
        &self.hasher
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    pub fn database_mut(&mut self) -> &mut D {
        &mut self.db
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn root_node(&self) -> Option<&Node> {
        self.root.as_ref()
    }

    pub(crate) fn root_node_mut(&mut self) -> &mut Option<Node> {
        &mut self.root
    }

    /// The orphan sets queued since the last `commit()`, one per mutation, oldest first.
    pub fn pending_orphans(&self) -> &[Vec<Hash>] {
        &self.orphans
    }

    /// The digest of the current in-memory tree.
    pub fn root(&self) -> Hash {
        match &self.root {
            Some(node) => node.digest(&self.hasher),
            None => self.hasher.placeholder(),
        }
    }

    /// The root as of the last `commit()` or `import()`.
    pub fn saved_root(&self) -> Hash {
        self.saved_root
    }

    /// Get the value hash stored under `key`, `None` for an absent key.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Hash>> {
        let path = self.hasher.path(key);
        let loader = Loader {
            db: &self.db,
            hasher: &self.hasher,
        };
        let mut node = match self.root.as_mut() {
            Some(node) => node,
            None => return Ok(None),
        };
        let mut depth = 0;
        loop {
            loader.resolve(node)?;
            match node.kind_mut() {
                Kind::Leaf {
                    path: leaf_path,
                    value_hash,
                } => {
                    return match *leaf_path == path {
                        true => Ok(Some(*value_hash)),
                        false => Ok(None),
                    }
                }
                Kind::Inner { left, right } => {
                    node = match bit(&path, depth) {
                        true => right.as_mut(),
                        false => left.as_mut(),
                    };
                    depth += 1;
                }
                Kind::Extension {
                    path: ext_path,
                    start,
                    end,
                    child,
                } => {
                    if matched_bits(ext_path, *start, *end, &path) < *end - *start {
                        return Ok(None);
                    }
                    depth = *end;
                    node = child.as_mut();
                }
                Kind::Lazy(_) => unreachable!("get(): resolved above"),
            }
        }
    }

    pub fn has(&mut self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Set `key` to `value`. An empty `value` removes the key, if present.
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if value.is_empty() {
            return match self.delete(key) {
                Err(Errors::KeyNotPresent) => Ok(()),
                other => other,
            };
        }
        let path = self.hasher.path(key);
        let value_hash = self.hasher.value_hash(value);
        let mut orphans = vec![];
        let loader = Loader {
            db: &self.db,
            hasher: &self.hasher,
        };
        match self.root.as_mut() {
            Some(root) => insert(&loader, root, 0, &path, &value_hash, &mut orphans)?,
            None => self.root = Some(Node::leaf(path, value_hash)),
        }
        log::trace!("update {}: {} orphans", hex!(path), orphans.len());
        self.record_orphans(orphans);
        Ok(())
    }

    /// Remove `key`. Fails with `KeyNotPresent` if the tree does not hold it.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        let path = self.hasher.path(key);
        let mut orphans = vec![];
        let loader = Loader {
            db: &self.db,
            hasher: &self.hasher,
        };
        let root = match self.root.as_mut() {
            Some(root) => root,
            None => return Err(Errors::KeyNotPresent),
        };
        if remove(&loader, root, 0, &path, &mut orphans)? {
            self.root = None;
        }
        log::trace!("delete {}: {} orphans", hex!(path), orphans.len());
        self.record_orphans(orphans);
        Ok(())
    }

    /// Queue the orphans of one successful mutation, collected deepest first.
    ///
    /// With `auto_remove_orphans`, a failing store delete defers the rest to `commit()`:
    /// the mutation itself has already taken effect.
    fn record_orphans(&mut self, mut orphans: Vec<Hash>) {
        if orphans.is_empty() {
            return;
        }
        orphans.reverse();
        if !self.options.removes_orphans() {
            self.orphans.push(orphans);
            return;
        }
        for (i, hash) in orphans.iter().enumerate() {
            if let Err(err) = self.db.delete(hash) {
                log::warn!(
                    "failed to remove orphan {} ({}), {} left for commit()",
                    hex!(hash),
                    err,
                    orphans.len() - i
                );
                self.orphans.push(orphans[i..].to_vec());
                return;
            }
        }
    }

    /// Build a proof of membership or non-membership of `key` against `root()`.
    pub fn prove(&mut self, key: &[u8]) -> Result<SparseMerkleProof> {
        let path = self.hasher.path(key);
        let placeholder = self.hasher.placeholder().to_vec();
        let loader = Loader {
            db: &self.db,
            hasher: &self.hasher,
        };
        let mut side_nodes: Vec<Vec<u8>> = vec![];
        let mut non_membership_leaf_data = None;
        let mut deepest = Sibling::Empty;
        let mut node = match self.root.as_mut() {
            Some(node) => node,
            None => return Ok(SparseMerkleProof::default()),
        };
        let mut depth = 0;
        loop {
            loader.resolve(node)?;
            match node.kind_mut() {
                Kind::Leaf {
                    path: leaf_path,
                    value_hash,
                } => {
                    if *leaf_path != path {
                        non_membership_leaf_data = Some(Record::leaf(leaf_path, value_hash));
                    }
                    break;
                }
                Kind::Inner { left, right } => {
                    let (next, sibling) = match bit(&path, depth) {
                        true => (right, left),
                        false => (left, right),
                    };
                    side_nodes.push(sibling.digest(loader.hasher).to_vec());
                    deepest = Sibling::of(sibling, loader.hasher);
                    node = next.as_mut();
                    depth += 1;
                }
                Kind::Extension {
                    path: ext_path,
                    start,
                    end,
                    child,
                } => {
                    let (start, end) = (*start, *end);
                    let m = matched_bits(ext_path, start, end, &path);
                    side_nodes.extend(std::iter::repeat(placeholder.clone()).take(m));
                    if m > 0 {
                        deepest = Sibling::Empty;
                    }
                    if m == end - start {
                        depth = end;
                        node = child.as_mut();
                        continue;
                    }
                    // The query leaves the run at bit `p`: what remains of the run below
                    // `p` is the only sibling there, and nothing lies on the query side.
                    let p = start + m;
                    match p + 1 == end {
                        true => {
                            side_nodes.push(child.digest(loader.hasher).to_vec());
                            deepest = Sibling::of(child, loader.hasher);
                        }
                        false => {
                            let child_hash = child.digest(loader.hasher);
                            let masked = Bits::with_range(ext_path, p + 1, end).to_masked();
                            let digest =
                                loader.hasher.digest_extension(&masked, p + 1, end, &child_hash);
                            side_nodes.push(digest.to_vec());
                            deepest = Sibling::Known(Record::extension(
                                &masked,
                                p + 1,
                                end,
                                &child_hash,
                            ));
                        }
                    }
                    break;
                }
                Kind::Lazy(_) => unreachable!("prove(): resolved above"),
            }
        }
        let sibling_data = match deepest {
            Sibling::Known(bytes) => Some(bytes),
            Sibling::Stored(hash) => self.db.get(&hash)?,
            Sibling::Empty => None,
        };
        side_nodes.reverse();
        Ok(SparseMerkleProof {
            side_nodes,
            non_membership_leaf_data,
            sibling_data,
        })
    }

    pub fn prove_compact(&mut self, key: &[u8]) -> Result<SparseCompactMerkleProof> {
        let proof = self.prove(key)?;
        compact_proof(&proof, &self.hasher)
    }

    /// Remove every queued orphan from the database, then write every node not yet
    /// persisted. Committing twice in a row is the same as committing once.
    pub fn commit(&mut self) -> Result<()> {
        self.db.init_batch()?;
        let mut removed = 0;
        for orphans in self.orphans.iter() {
            for hash in orphans {
                self.db.delete(hash)?;
                removed += 1;
            }
        }
        self.orphans.clear();
        let written = match self.root.as_mut() {
            Some(root) => persist(&mut self.db, &self.hasher, root)?,
            None => 0,
        };
        self.db.finish_batch()?;
        self.saved_root = self.root();
        log::debug!(
            "commit {}: removed {} orphans, wrote {} nodes",
            hex!(self.saved_root),
            removed,
            written
        );
        Ok(())
    }

    /// Drop every uncommitted change and go back to `saved_root()`.
    pub fn revert(&mut self) {
        let dropped: usize = self.orphans.iter().map(|o| o.len()).sum();
        self.orphans.clear();
        self.root = match self.hasher.is_placeholder(&self.saved_root) {
            true => None,
            false => Some(Node::lazy(self.saved_root)),
        };
        log::debug!(
            "revert to {}: dropped {} orphans",
            hex!(self.saved_root),
            dropped
        );
    }

    /// Load the whole tree into memory. Fails with `KeyNotLoaded` on the first record
    /// missing from the database.
    pub fn load_all(&mut self) -> Result<()> {
        let loader = Loader {
            db: &self.db,
            hasher: &self.hasher,
        };
        match self.root.as_mut() {
            Some(root) => load_subtree(&loader, root),
            None => Ok(()),
        }
    }
}

/// Read access to persisted records during a traversal.
struct Loader<'a, D, H, P> {
    db: &'a D,
    hasher: &'a TreeHasher<H, P>,
}

impl<D, H, P> Loader<'_, D, H, P>
where
    D: Database,
    H: Hasher,
    P: PathHasher,
{
    fn load(&self, hash: &Hash) -> Result<Node> {
        let bytes = self
            .db
            .get(hash)?
            .ok_or_else(|| Errors::KeyNotLoaded(hex!(hash)))?;
        let mut node = Node::from_record(Record::parse(&bytes)?);
        if cfg!(debug_assertions) {
            let actual = node.digest(self.hasher);
            if actual != *hash {
                return Err(Errors::Corrupt(format!(
                    "record under {} hashes to {}",
                    hex!(hash),
                    hex!(actual)
                )));
            }
        }
        node.set_persisted(*hash);
        log::trace!("loaded {}", hex!(hash));
        Ok(node)
    }

    /// Replace a `Lazy` node by its decoded record. Loaded nodes are left alone.
    fn resolve(&self, node: &mut Node) -> Result<()> {
        if let Kind::Lazy(hash) = node.kind() {
            *node = self.load(hash)?;
        }
        Ok(())
    }
}

/// The deepest sibling met by a proof traversal.
enum Sibling {
    Known(Vec<u8>),
    Stored(Hash),
    Empty,
}

impl Sibling {
    fn of<H: Hasher, P: PathHasher>(node: &Node, hasher: &TreeHasher<H, P>) -> Self {
        match node.to_record(hasher) {
            Some(record) => Sibling::Known(record.to_bytes()),
            None => Sibling::Stored(node.digest(hasher)),
        }
    }
}

/// Number of leading bits of `[start, end)` on which `ext_path` and `path` agree.
fn matched_bits(ext_path: &Hash, start: usize, end: usize, path: &Hash) -> usize {
    let n = Bits::len_common_bits(
        &Bits::with_range(ext_path, start, end),
        &Bits::with_range(path, start, end),
    );
    cast(n)
}

/// Move `node` out, leaving a throwaway in its place.
fn take(node: &mut Node) -> Node {
    std::mem::replace(node, Node::lazy([0u8; HASH_LEN]))
}

/// Recursively insert a leaf of `path` and `value_hash` below `node`, sitting at `depth`.
///
/// Lazy nodes are resolved on the way down and nodes are rewritten on the way up, so a
/// failed load leaves the tree as it was. Every node on the way is touched: persisted ones
/// hand their digests over to `orphans`.
///
/// There are four modes, one per shape met at the bottom of the descent.
///
/// * replacement
///     the leaf of the same path is replaced.
/// * fork
///     a leaf of another path moves down next to the new leaf, below an inner node at
///     their first differing bit. The run of bits they share becomes an extension.
/// * pass-over
///     an extension matching the path entirely is consumed, and the work passes on to
///     its child.
/// * split
///     an extension diverging from the path at bit `p` is split around a new inner node
///     at `p`: the bits above `p` stay an extension, the bits below form another one
///     (or none, when `p` is the last bit of the run).
fn insert<D, H, P>(
    loader: &Loader<D, H, P>,
    node: &mut Node,
    depth: usize,
    path: &Hash,
    value_hash: &Hash,
    orphans: &mut Vec<Hash>,
) -> Result<()>
where
    D: Database,
    H: Hasher,
    P: PathHasher,
{
    loader.resolve(node)?;
    match node.kind_mut() {
        Kind::Leaf { path: leaf_path, .. } if leaf_path == path => {
            orphans.extend(node.orphan());
            *node = Node::leaf(*path, *value_hash);
        }
        Kind::Leaf { path: leaf_path, .. } => {
            let p = depth + common_prefix_from(path, &leaf_path[..], depth);
            let fork = Node::branch(bit(path, p), Node::leaf(*path, *value_hash), take(node));
            *node = match p > depth {
                true => Node::extension(path, depth, p, fork),
                false => fork,
            };
        }
        Kind::Inner { left, right } => {
            let next = match bit(path, depth) {
                true => right,
                false => left,
            };
            insert(loader, next, depth + 1, path, value_hash, orphans)?;
            node.touch(orphans);
        }
        Kind::Extension {
            path: ext_path,
            start,
            end,
            child,
        } => {
            let (start, end) = (*start, *end);
            let m = matched_bits(ext_path, start, end, path);
            if m == end - start {
                insert(loader, child, end, path, value_hash, orphans)?;
                node.touch(orphans);
                return Ok(());
            }
            let p = start + m;
            let ext_path = *ext_path;
            let child = take(child);
            let far = match p + 1 == end {
                true => child,
                false => Node::extension(&ext_path, p + 1, end, child),
            };
            let fork = Node::branch(bit(path, p), Node::leaf(*path, *value_hash), far);
            orphans.extend(node.orphan());
            *node = match m > 0 {
                true => Node::extension(&ext_path, start, p, fork),
                false => fork,
            };
        }
        Kind::Lazy(_) => unreachable!("insert(): resolved above"),
    }
    Ok(())
}

/// Recursively remove the leaf of `path` below `node`, sitting at `depth`.
///
/// Returns `true` when `node` itself is that leaf: unlinking it is left to the caller,
/// which is the one to fold. Nothing is rewritten until every node needed to reshape the
/// tree is loaded, so a failed load leaves the tree as it was.
fn remove<D, H, P>(
    loader: &Loader<D, H, P>,
    node: &mut Node,
    depth: usize,
    path: &Hash,
    orphans: &mut Vec<Hash>,
) -> Result<bool>
where
    D: Database,
    H: Hasher,
    P: PathHasher,
{
    loader.resolve(node)?;
    match node.kind_mut() {
        Kind::Leaf { path: leaf_path, .. } => {
            if *leaf_path != *path {
                return Err(Errors::KeyNotPresent);
            }
            orphans.extend(node.orphan());
            Ok(true)
        }
        Kind::Inner { left, right } => {
            let go_right = bit(path, depth);
            let (target, sibling) = match go_right {
                true => (right, left),
                false => (left, right),
            };
            if !remove(loader, target, depth + 1, path, orphans)? {
                node.touch(orphans);
                return Ok(false);
            }
            loader.resolve(sibling)?;
            let sibling = take(sibling);
            orphans.extend(node.orphan());
            *node = sibling.collapse(depth, !go_right, loader.hasher, orphans);
            Ok(false)
        }
        Kind::Extension {
            path: ext_path,
            start,
            end,
            child,
        } => {
            let (start, end) = (*start, *end);
            if matched_bits(ext_path, start, end, path) < end - start {
                return Err(Errors::KeyNotPresent);
            }
            let ext_path = *ext_path;
            if remove(loader, child, end, path, orphans)? {
                orphans.extend(node.orphan());
                return Ok(true);
            }
            let child = take(child);
            orphans.extend(node.orphan());
            *node = child.prepend(&ext_path, start, end, loader.hasher, orphans);
            Ok(false)
        }
        Kind::Lazy(_) => unreachable!("remove(): resolved above"),
    }
}

/// Write every node below `node` that is not persisted yet, children first.
/// Returns the number of records written.
fn persist<D, H, P>(db: &mut D, hasher: &TreeHasher<H, P>, node: &mut Node) -> Result<usize>
where
    D: Database,
    H: Hasher,
    P: PathHasher,
{
    if node.is_persisted() {
        return Ok(0);
    }
    let written = match node.kind_mut() {
        Kind::Inner { left, right } => persist(db, hasher, left)? + persist(db, hasher, right)?,
        Kind::Extension { child, .. } => persist(db, hasher, child)?,
        Kind::Leaf { .. } | Kind::Lazy(_) => 0,
    };
    let hash = node.digest(hasher);
    if let Some(record) = node.to_record(hasher) {
        db.put(&hash, record.to_bytes())?;
    }
    node.set_persisted(hash);
    Ok(written + 1)
}

fn load_subtree<D, H, P>(loader: &Loader<D, H, P>, node: &mut Node) -> Result<()>
where
    D: Database,
    H: Hasher,
    P: PathHasher,
{
    loader.resolve(node)?;
    match node.kind_mut() {
        Kind::Inner { left, right } => {
            load_subtree(loader, left)?;
            load_subtree(loader, right)
        }
        Kind::Extension { child, .. } => load_subtree(loader, child),
        Kind::Leaf { .. } | Kind::Lazy(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::Sha2;
    use crate::proof::verify_proof;

    type IdTree = SparseMerkleTree<MemoryDB, Sha2, IdentityPath>;

    fn id_tree() -> IdTree {
        SparseMerkleTree::new(
            MemoryDB::default(),
            TreeHasher::with_path_hasher(Sha2, IdentityPath),
        )
    }

    /// A path with exactly the given bits set.
    fn path_with(bits: &[usize]) -> Hash {
        let mut path = [0u8; HASH_LEN];
        bits.iter().for_each(|&i| set_bit(&mut path, i, true));
        path
    }

    /// The root of `leaves` computed without extensions or lazy nodes.
    fn naive_root<P: PathHasher>(th: &TreeHasher<Sha2, P>, leaves: &[(Hash, Hash)], depth: usize) -> Hash {
        match leaves {
            [] => th.placeholder(),
            [(path, value_hash)] => th.digest_leaf(path, value_hash),
            _ => {
                let (right, left): (Vec<_>, Vec<_>) =
                    leaves.iter().cloned().partition(|(path, _)| bit(path, depth));
                th.digest_node(
                    &naive_root(th, &left, depth + 1),
                    &naive_root(th, &right, depth + 1),
                )
            }
        }
    }

    /// Walk the loaded tree and check its shape is canonical.
    fn assert_canonical<P: PathHasher>(th: &TreeHasher<Sha2, P>, node: &Node, prefix: &Hash, depth: usize) {
        match node.kind() {
            Kind::Leaf { path, .. } => {
                assert!(common_prefix_from(path, prefix, 0) >= depth);
            }
            Kind::Inner { left, right } => {
                for (side, child) in [(false, left), (true, right)] {
                    assert!(!th.is_placeholder(&child.digest(th)));
                    let mut prefix = *prefix;
                    set_bit(&mut prefix, depth, side);
                    assert_canonical(th, child, &prefix, depth + 1);
                }
            }
            Kind::Extension {
                path,
                start,
                end,
                child,
            } => {
                assert_eq!(*start, depth);
                assert!(start < end);
                assert!(matches!(child.kind(), Kind::Inner { .. } | Kind::Lazy(_)));
                let mut prefix = *prefix;
                for i in *start..*end {
                    set_bit(&mut prefix, i, bit(path, i));
                }
                assert_canonical(th, child, &prefix, *end);
            }
            Kind::Lazy(_) => {}
        }
    }

    fn check(tree: &IdTree, leaves: &[(Hash, Hash)]) {
        assert_eq!(tree.root(), naive_root(tree.hasher(), leaves, 0));
        if let Some(root) = tree.root_node() {
            assert_canonical(tree.hasher(), root, &[0u8; HASH_LEN], 0);
        }
    }

    #[test]
    fn test_empty_tree() {
        let mut tree = id_tree();
        assert_eq!(tree.root(), tree.hasher().placeholder());
        assert_eq!(tree.get(&random_hash()).unwrap(), None);
        assert!(matches!(tree.delete(&random_hash()), Err(Errors::KeyNotPresent)));
        tree.commit().unwrap();
        assert!(tree.database().is_empty());
    }

    #[test]
    fn test_fork_makes_extension() {
        let mut tree = id_tree();
        let (a, b) = (path_with(&[]), path_with(&[200]));
        tree.update(&a, b"a").unwrap();
        tree.update(&b, b"b").unwrap();
        match tree.root_node().unwrap().kind() {
            Kind::Extension { start, end, child, .. } => {
                assert_eq!((*start, *end), (0, 200));
                assert!(matches!(child.kind(), Kind::Inner { .. }));
            }
            _ => panic!("expected an extension at the root"),
        }
        let th = tree.hasher().clone();
        check(
            &tree,
            &[(a, th.value_hash(b"a")), (b, th.value_hash(b"b"))],
        );
    }

    #[test]
    fn test_extension_splits() {
        // a run over [0, 200) split at its first, second, middle and last bit
        for split in [0usize, 1, 100, 199] {
            let mut tree = id_tree();
            let th = tree.hasher().clone();
            let (a, b, c) = (path_with(&[]), path_with(&[200]), path_with(&[split]));
            let mut leaves = vec![];
            for key in [a, b, c] {
                tree.update(&key, &key).unwrap();
                leaves.push((key, th.value_hash(&key)));
                check(&tree, &leaves);
            }
            for key in [a, b, c] {
                assert_eq!(tree.get(&key).unwrap(), Some(th.value_hash(&key)));
            }

            let root = tree.root_node().unwrap();
            let inner = match (split, root.kind()) {
                (0, Kind::Inner { .. }) => root,
                (
                    _,
                    Kind::Extension {
                        start: 0,
                        end,
                        child,
                        ..
                    },
                ) if *end == split => child.as_ref(),
                _ => panic!("split at {}: unexpected root {:?}", split, root),
            };
            let far = match inner.kind() {
                Kind::Inner { left, right } => {
                    assert!(right.is_leaf());
                    left
                }
                _ => panic!("split at {}: expected an inner node", split),
            };
            match (split, far.kind()) {
                (199, Kind::Inner { .. }) => {}
                (_, Kind::Extension { start, end, .. }) => {
                    assert_eq!((*start, *end), (split + 1, 200));
                }
                _ => panic!("split at {}: unexpected far side {:?}", split, far),
            }

            // removing the splitting key restores the run
            tree.delete(&c).unwrap();
            leaves.pop();
            check(&tree, &leaves);
            assert!(matches!(
                tree.root_node().unwrap().kind(),
                Kind::Extension { start: 0, end: 200, .. }
            ));
        }
    }

    #[test]
    fn test_delete_folds() {
        let mut tree = id_tree();
        let th = tree.hasher().clone();
        // leaf sibling
        let (a, b) = (path_with(&[0]), path_with(&[]));
        tree.update(&a, b"a").unwrap();
        tree.update(&b, b"b").unwrap();
        tree.delete(&a).unwrap();
        assert!(tree.root_node().unwrap().is_leaf());
        check(&tree, &[(b, th.value_hash(b"b"))]);

        // extension sibling fuses upward
        let c = path_with(&[30]);
        tree.update(&a, b"a").unwrap();
        tree.update(&c, b"c").unwrap();
        tree.delete(&a).unwrap();
        assert!(matches!(
            tree.root_node().unwrap().kind(),
            Kind::Extension { start: 0, end: 30, .. }
        ));
        check(&tree, &[(b, th.value_hash(b"b")), (c, th.value_hash(b"c"))]);

        // inner sibling gets a one-bit extension
        let mut tree = id_tree();
        let (x, y, z) = (path_with(&[0]), path_with(&[]), path_with(&[1]));
        for key in [x, y, z] {
            tree.update(&key, b"v").unwrap();
        }
        tree.delete(&x).unwrap();
        assert!(matches!(
            tree.root_node().unwrap().kind(),
            Kind::Extension { start: 0, end: 1, .. }
        ));
        check(&tree, &[(y, th.value_hash(b"v")), (z, th.value_hash(b"v"))]);

        tree.delete(&y).unwrap();
        tree.delete(&z).unwrap();
        assert!(tree.root_node().is_none());
        assert_eq!(tree.root(), th.placeholder());
    }

    #[test]
    fn test_random_ops_match_naive_root() {
        let mut tree = id_tree();
        let th = tree.hasher().clone();
        let mut keys = random_hashes(64);
        for (i, key) in keys.iter().enumerate() {
            tree.update(key, key).unwrap();
            if i % 16 == 0 {
                tree.commit().unwrap();
            }
        }
        shuffle(&mut keys);
        let (gone, kept) = keys.split_at(24);
        for key in gone {
            tree.delete(key).unwrap();
        }
        let leaves: Vec<_> = kept.iter().map(|k| (*k, th.value_hash(k))).collect();
        tree.load_all().unwrap();
        check(&tree, &leaves);
        for key in gone {
            assert_eq!(tree.get(key).unwrap(), None);
        }
    }

    #[test]
    fn test_orphans_are_root_first() {
        let mut tree = id_tree();
        let (a, b) = (path_with(&[0]), path_with(&[]));
        tree.update(&a, b"a").unwrap();
        tree.update(&b, b"b").unwrap();
        tree.commit().unwrap();
        let root = tree.root();
        let old_leaf = tree.hasher().digest_leaf(&a, &tree.hasher().value_hash(b"a"));

        tree.update(&a, b"a2").unwrap();
        assert_eq!(tree.pending_orphans(), &[vec![root, old_leaf]]);
        tree.commit().unwrap();
        assert!(tree.pending_orphans().is_empty());
        assert!(!tree.database().contains(&old_leaf));
        assert!(!tree.database().contains(&root));
        assert!(tree.database().contains(&tree.root()));
    }

    #[test]
    fn test_relocated_leaf_is_kept() {
        let mut tree = id_tree();
        let (a, b) = (path_with(&[]), path_with(&[3]));
        tree.update(&a, b"a").unwrap();
        tree.commit().unwrap();
        let leaf = tree.root();

        tree.update(&b, b"b").unwrap();
        assert!(tree.pending_orphans().is_empty());
        tree.commit().unwrap();
        assert!(tree.database().contains(&leaf));

        tree.delete(&b).unwrap();
        tree.commit().unwrap();
        assert_eq!(tree.root(), leaf);
        assert_eq!(tree.database().len(), 1);
    }

    #[test]
    fn test_commit_is_idempotent() {
        let mut tree = id_tree();
        for key in random_hashes(20) {
            tree.update(&key, b"v").unwrap();
        }
        tree.commit().unwrap();
        let (root, len) = (tree.root(), tree.database().len());
        tree.commit().unwrap();
        assert_eq!(tree.root(), root);
        assert_eq!(tree.saved_root(), root);
        assert_eq!(tree.database().len(), len);
    }

    #[test]
    fn test_failed_mutation_leaves_tree_unchanged() {
        let mut tree = id_tree();
        let keys = random_hashes(10);
        for key in keys.iter() {
            tree.update(key, b"v").unwrap();
        }
        tree.commit().unwrap();
        let root = tree.root();
        let absent = random_hash();
        assert!(matches!(tree.delete(&absent), Err(Errors::KeyNotPresent)));
        assert_eq!(tree.root(), root);
        assert!(tree.pending_orphans().is_empty());

        // an empty database under a non-empty root
        let saved = tree.saved_root();
        let db = MemoryDB::default();
        let mut broken = IdTree::import(db, tree.hasher().clone(), saved, Options::default());
        assert!(matches!(broken.get(&keys[0]), Err(Errors::KeyNotLoaded(_))));
        assert!(matches!(broken.update(&keys[0], b"w"), Err(Errors::KeyNotLoaded(_))));
        assert!(matches!(broken.delete(&keys[0]), Err(Errors::KeyNotLoaded(_))));
        assert_eq!(broken.root(), saved);
        assert!(broken.root_node().unwrap().is_lazy());
        assert!(broken.pending_orphans().is_empty());
    }

    #[test]
    fn test_update_empty_value_deletes() {
        let mut tree = id_tree();
        let key = random_hash();
        tree.update(&key, b"").unwrap();
        assert_eq!(tree.root(), tree.hasher().placeholder());
        tree.update(&key, b"v").unwrap();
        assert!(tree.has(&key).unwrap());
        tree.update(&key, b"").unwrap();
        assert!(!tree.has(&key).unwrap());
        assert_eq!(tree.root(), tree.hasher().placeholder());
    }

    #[test]
    fn test_auto_remove_orphans() {
        let options = Options::default().auto_remove_orphans(true);
        let th = TreeHasher::with_path_hasher(Sha2, IdentityPath);
        let mut tree = SparseMerkleTree::with_options(MemoryDB::default(), th, options);
        let key = random_hash();
        tree.update(&key, b"a").unwrap();
        tree.commit().unwrap();
        let old = tree.root();
        tree.update(&key, b"b").unwrap();
        assert!(tree.pending_orphans().is_empty());
        assert!(!tree.database().contains(&old));
    }

    /// A store whose deletes can be switched off.
    #[derive(Default)]
    struct StuckDB {
        db: MemoryDB,
        stuck: bool,
    }

    impl Database for StuckDB {
        fn new(_dbpath: &str) -> Result<Self> {
            Ok(Self::default())
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            self.db.get(key)
        }

        fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
            self.db.put(key, value)
        }

        fn delete(&mut self, key: &[u8]) -> Result<()> {
            match self.stuck {
                true => Err(Errors::Store("disk gone".to_string())),
                false => self.db.delete(key),
            }
        }
    }

    #[test]
    fn test_failed_orphan_removal_is_deferred() {
        let options = Options::default().auto_remove_orphans(true);
        let th = TreeHasher::with_path_hasher(Sha2, IdentityPath);
        let mut tree = SparseMerkleTree::with_options(StuckDB::default(), th, options);
        let key = random_hash();
        tree.update(&key, b"v1").unwrap();
        tree.commit().unwrap();
        let old = tree.root();

        tree.database_mut().stuck = true;
        tree.update(&key, b"v2").unwrap();
        assert_ne!(tree.root(), old);
        assert_eq!(tree.get(&key).unwrap(), Some(tree.hasher().value_hash(b"v2")));
        assert_eq!(tree.pending_orphans(), &[vec![old]][..]);
        assert!(tree.database().db.contains(&old));

        tree.database_mut().stuck = false;
        tree.commit().unwrap();
        assert!(tree.pending_orphans().is_empty());
        assert!(!tree.database().db.contains(&old));
        assert!(tree.database().db.contains(&tree.root()));
    }

    #[test]
    fn test_revert() {
        let mut tree = id_tree();
        let (a, b) = (random_hash(), random_hash());
        tree.update(&a, b"a").unwrap();
        tree.commit().unwrap();
        let saved = tree.root();
        tree.update(&b, b"b").unwrap();
        tree.delete(&a).unwrap();
        tree.revert();
        assert_eq!(tree.root(), saved);
        assert!(tree.pending_orphans().is_empty());
        assert!(tree.has(&a).unwrap());
        assert!(!tree.has(&b).unwrap());

        let mut fresh = id_tree();
        fresh.update(&a, b"a").unwrap();
        fresh.revert();
        assert!(fresh.root_node().is_none());
    }

    #[test]
    fn test_import_reads_committed_tree() {
        let mut tree = id_tree();
        let keys = random_hashes(30);
        for key in keys.iter() {
            tree.update(key, key).unwrap();
        }
        tree.commit().unwrap();
        let root = tree.root();
        let th = tree.hasher().clone();
        let db = tree.database().clone();
        let mut imported = IdTree::import(db, th.clone(), root, Options::default());
        assert_eq!(imported.root(), root);
        for key in keys.iter() {
            assert_eq!(imported.get(key).unwrap(), Some(th.value_hash(key)));
            let proof = imported.prove(key).unwrap();
            assert_eq!(proof, tree.prove(key).unwrap());
            assert!(verify_proof(&proof, &root, key, key, &th));
        }
    }

    #[test]
    fn test_adjacent_leaves_prove_full_depth() {
        let mut tree = id_tree();
        let (a, b) = (path_with(&[]), path_with(&[255]));
        tree.update(&a, b"a").unwrap();
        tree.update(&b, b"b").unwrap();
        let proof = tree.prove(&a).unwrap();
        assert_eq!(proof.side_nodes.len(), DEPTH);
        assert!(verify_proof(&proof, &tree.root(), &a, b"a", tree.hasher()));
        let leaf = tree.hasher().digest_leaf(&b, &tree.hasher().value_hash(b"b"));
        assert_eq!(proof.side_nodes[0], leaf.to_vec());
        assert_eq!(proof.sibling_data, Some(Record::leaf(&b, &tree.hasher().value_hash(b"b"))));
    }

    #[test]
    fn test_prove_through_split_run() {
        let mut tree = id_tree();
        let (a, b) = (path_with(&[]), path_with(&[200]));
        tree.update(&a, b"a").unwrap();
        tree.update(&b, b"b").unwrap();
        let root = tree.root();
        for split in [0usize, 1, 100, 199] {
            let key = path_with(&[split]);
            let proof = tree.prove(&key).unwrap();
            assert_eq!(proof.side_nodes.len(), split + 1);
            assert!(proof.non_membership_leaf_data.is_none());
            assert!(verify_proof(&proof, &root, &key, b"", tree.hasher()));
            assert!(!verify_proof(&proof, &root, &key, b"x", tree.hasher()));
            let sibling = proof.sibling_data.as_ref().unwrap();
            assert_eq!(
                tree.hasher().digest_record(sibling).unwrap().to_vec(),
                proof.side_nodes[0]
            );
        }
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_corrupt_record_is_detected() {
        let th = TreeHasher::with_path_hasher(Sha2, IdentityPath);
        let mut db = MemoryDB::default();
        let root = random_hash();
        db.put(&root, Record::leaf(&random_hash(), &random_hash()))
            .unwrap();
        let mut tree = IdTree::import(db, th, root, Options::default());
        assert!(matches!(tree.get(&random_hash()), Err(Errors::Corrupt(_))));

        let mut db = MemoryDB::default();
        db.put(&root, vec![0x7f; 3]).unwrap();
        let th = TreeHasher::with_path_hasher(Sha2, IdentityPath);
        let mut tree = IdTree::import(db, th, root, Options::default());
        assert!(matches!(tree.get(&random_hash()), Err(Errors::Corrupt(_))));
    }
}
