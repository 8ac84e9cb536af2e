//! A module for defining `Node` used in `lazysmt`.
use crate::bits::Bits;
use crate::consts::*;
use crate::utils::*;
use crate::*;
use std::cell::Cell;

#[derive(Clone, Debug, PartialEq, Eq)]
/// A parsed node record, as persisted in a `Database` under the node's digest.
///
/// # Byte-Serialized View
/// Numbers in parentheses refer to byte length. By default `HASH_LEN = 32`.
///
/// _Leaf_ = `LEAF_PREFIX`(1) + `path`(`HASH_LEN`) + `value_hash`(`HASH_LEN`)
///
/// _Inner_ = `NODE_PREFIX`(1) + `left`(`HASH_LEN`) + `right`(`HASH_LEN`)
///
/// _Extension_ = `EXT_PREFIX`(1) + `start`(1) + `end`(1) + `path`(`HASH_LEN`) + `child`(`HASH_LEN`),
/// where only bits `[start, end)` of `path` may be set.
pub enum Record {
    Leaf {
        path: Hash,
        value_hash: Hash,
    },
    Inner {
        left: Hash,
        right: Hash,
    },
    Extension {
        path: Hash,
        start: usize,
        end: usize,
        child: Hash,
    },
}

impl Record {
    pub fn leaf(path: &[u8], value_hash: &[u8]) -> Vec<u8> {
        [&[LEAF_PREFIX][..], path, value_hash].concat()
    }

    pub fn inner(left: &[u8], right: &[u8]) -> Vec<u8> {
        [&[NODE_PREFIX][..], left, right].concat()
    }

    pub fn extension(path: &Hash, start: usize, end: usize, child: &Hash) -> Vec<u8> {
        [&[EXT_PREFIX, start as u8, end as u8][..], &path[..], &child[..]].concat()
    }

    /// Serialize `Record` into bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Record::Leaf { path, value_hash } => Record::leaf(path, value_hash),
            Record::Inner { left, right } => Record::inner(left, right),
            Record::Extension {
                path,
                start,
                end,
                child,
            } => Record::extension(path, *start, *end, child),
        }
    }

    /// Construct `Record` by deserializing bytes slice.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let (prefix, body) = match bytes.split_first() {
            Some((prefix, body)) => (*prefix, body),
            None => return Err(Errors::Corrupt("empty record".to_string())),
        };
        let expected = match prefix {
            LEAF_PREFIX => LEAF_LEN,
            NODE_PREFIX => INNER_LEN,
            EXT_PREFIX => EXT_LEN,
            _ => {
                return Err(Errors::Corrupt(format!(
                    "unknown record prefix {:#04x}",
                    prefix
                )))
            }
        };
        if bytes.len() != expected {
            return Err(Errors::Corrupt(format!(
                "record with prefix {:#04x} has length {}, expected {}",
                prefix,
                bytes.len(),
                expected
            )));
        }
        match prefix {
            LEAF_PREFIX => Ok(Record::Leaf {
                path: slice_to_hash(&body[..HASH_LEN]),
                value_hash: slice_to_hash(&body[HASH_LEN..]),
            }),
            NODE_PREFIX => Ok(Record::Inner {
                left: slice_to_hash(&body[..HASH_LEN]),
                right: slice_to_hash(&body[HASH_LEN..]),
            }),
            _ => {
                let (start, end) = (body[0] as usize, body[1] as usize);
                let path = slice_to_hash(&body[2..2 + HASH_LEN]);
                if start >= end {
                    return Err(Errors::Corrupt(format!(
                        "extension bounds [{}, {}) are empty",
                        start, end
                    )));
                }
                if Bits::with_range(&path, start, end).to_masked() != path {
                    return Err(Errors::Corrupt(format!(
                        "extension path has bits set outside [{}, {})",
                        start, end
                    )));
                }
                Ok(Record::Extension {
                    path,
                    start,
                    end,
                    child: slice_to_hash(&body[2 + HASH_LEN..]),
                })
            }
        }
    }
}

#[derive(Clone, Debug)]
/// The shape of a `Node`.
pub enum Kind {
    /// A terminal node holding the full path of its key and the hash of its value.
    Leaf { path: Hash, value_hash: Hash },
    /// A binary branch; neither child is empty.
    Inner { left: Box<Node>, right: Box<Node> },
    /// A run of single-branch inner nodes over bits `[start, end)` of `path`,
    /// ending in `child`, which is always an inner node.
    Extension {
        path: Hash,
        start: usize,
        end: usize,
        child: Box<Node>,
    },
    /// A persisted node that has not been loaded yet.
    Lazy(Hash),
}

#[derive(Clone, Debug)]
/// The only component of the in-memory tree.
///
/// A node is `persisted` iff a record under its digest is known to exist in the database.
/// Persisted nodes are never changed in place: mutating one first hands its digest over
/// to the orphan list (`touch`).
pub struct Node {
    kind: Kind,
    persisted: bool,
    digest: Cell<Option<Hash>>,
}

impl Node {
    fn dirty(kind: Kind) -> Self {
        Node {
            kind,
            persisted: false,
            digest: Cell::new(None),
        }
    }

    pub fn leaf(path: Hash, value_hash: Hash) -> Self {
        Node::dirty(Kind::Leaf { path, value_hash })
    }

    pub fn inner(left: Node, right: Node) -> Self {
        Node::dirty(Kind::Inner {
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Place `near` on the side named by `right` and `far` on the other.
    pub fn branch(right: bool, near: Node, far: Node) -> Self {
        if right {
            Node::inner(far, near)
        } else {
            Node::inner(near, far)
        }
    }

    /// A new extension over bits `[start, end)` of `path`. Bits outside the range are cleared.
    pub fn extension(path: &Hash, start: usize, end: usize, child: Node) -> Self {
        debug_assert!(start < end && end < DEPTH, "extension [{}, {})", start, end);
        Node::dirty(Kind::Extension {
            path: Bits::with_range(path, start, end).to_masked(),
            start,
            end,
            child: Box::new(child),
        })
    }

    pub fn lazy(hash: Hash) -> Self {
        Node {
            kind: Kind::Lazy(hash),
            persisted: true,
            digest: Cell::new(Some(hash)),
        }
    }

    /// Build a node from a record; children become `Lazy`.
    pub fn from_record(record: Record) -> Self {
        match record {
            Record::Leaf { path, value_hash } => Node::leaf(path, value_hash),
            Record::Inner { left, right } => Node::inner(Node::lazy(left), Node::lazy(right)),
            Record::Extension {
                path,
                start,
                end,
                child,
            } => Node::extension(&path, start, end, Node::lazy(child)),
        }
    }

    /// Serialize the node into its record. `Lazy` nodes have none in memory.
    pub fn to_record<H: Hasher, P: PathHasher>(&self, hasher: &TreeHasher<H, P>) -> Option<Record> {
        match &self.kind {
            Kind::Leaf { path, value_hash } => Some(Record::Leaf {
                path: *path,
                value_hash: *value_hash,
            }),
            Kind::Inner { left, right } => Some(Record::Inner {
                left: left.digest(hasher),
                right: right.digest(hasher),
            }),
            Kind::Extension {
                path,
                start,
                end,
                child,
            } => Some(Record::Extension {
                path: *path,
                start: *start,
                end: *end,
                child: child.digest(hasher),
            }),
            Kind::Lazy(_) => None,
        }
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut Kind {
        &mut self.kind
    }

    pub(crate) fn into_kind(self) -> Kind {
        self.kind
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self.kind, Kind::Lazy(_))
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, Kind::Leaf { .. })
    }

    /// The cached digest, if any. Never recomputes.
    pub fn cached_digest(&self) -> Option<Hash> {
        self.digest.get()
    }

    /// The digest of the subtree, computed on demand and cached.
    pub fn digest<H: Hasher, P: PathHasher>(&self, hasher: &TreeHasher<H, P>) -> Hash {
        if let Some(hash) = self.digest.get() {
            return hash;
        }
        let hash = match &self.kind {
            Kind::Leaf { path, value_hash } => hasher.digest_leaf(path, value_hash),
            Kind::Inner { left, right } => {
                hasher.digest_node(&left.digest(hasher), &right.digest(hasher))
            }
            Kind::Extension {
                path,
                start,
                end,
                child,
            } => hasher.digest_extension(path, *start, *end, &child.digest(hasher)),
            Kind::Lazy(hash) => *hash,
        };
        self.digest.set(Some(hash));
        hash
    }

    /// Mark the node as written under `hash`.
    pub(crate) fn set_persisted(&mut self, hash: Hash) {
        self.persisted = true;
        self.digest.set(Some(hash));
    }

    /// The digest this node leaves behind in the database once it is replaced.
    pub fn orphan(&self) -> Option<Hash> {
        match self.persisted {
            true => self.digest.get(),
            false => None,
        }
    }

    /// Prepare the node for mutation: orphan it if persisted and drop the cached digest.
    pub(crate) fn touch(&mut self, orphans: &mut Vec<Hash>) {
        debug_assert!(!self.is_lazy(), "touch(): lazy node");
        orphans.extend(self.orphan());
        self.persisted = false;
        self.digest.set(None);
    }

    /// Put the run of single-branch inner nodes over bits `[start, end)` of `path` on top
    /// of `self`, in canonical form.
    ///
    /// A leaf needs no run above it and moves up unchanged. An extension starting at `end`
    /// absorbs the run. An inner node gets a new extension on top. A lazy node stays opaque
    /// and only its digest moves up.
    pub fn prepend<H: Hasher, P: PathHasher>(
        self,
        path: &Hash,
        start: usize,
        end: usize,
        hasher: &TreeHasher<H, P>,
        orphans: &mut Vec<Hash>,
    ) -> Node {
        let Node {
            kind,
            persisted,
            digest,
        } = self;
        match kind {
            leaf @ Kind::Leaf { .. } => Node {
                kind: leaf,
                persisted,
                digest,
            },
            Kind::Extension {
                path: lower,
                start: lower_start,
                end: lower_end,
                child,
            } => {
                debug_assert_eq!(lower_start, end);
                if persisted {
                    orphans.extend(digest.get());
                }
                let mut merged = Bits::with_range(path, start, end).to_masked();
                merged.iter_mut().zip(lower.iter()).for_each(|(m, l)| *m |= l);
                Node::extension(&merged, start, lower_end, *child)
            }
            inner @ Kind::Inner { .. } => {
                let child = Node {
                    kind: inner,
                    persisted,
                    digest,
                };
                Node::extension(path, start, end, child)
            }
            Kind::Lazy(hash) => Node::lazy(hasher.digest_extension(path, start, end, &hash)),
        }
    }

    /// Fold an inner node at `depth` whose only non-empty child is `self`, sitting on
    /// the side named by `right`.
    pub fn collapse<H: Hasher, P: PathHasher>(
        self,
        depth: usize,
        right: bool,
        hasher: &TreeHasher<H, P>,
        orphans: &mut Vec<Hash>,
    ) -> Node {
        let mut path = [0u8; HASH_LEN];
        set_bit(&mut path, depth, right);
        self.prepend(&path, depth, depth + 1, hasher, orphans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::Sha2;

    fn hasher() -> TreeHasher<Sha2> {
        TreeHasher::new()
    }

    #[test]
    fn test_record_layouts() {
        let (a, b) = (random_hash(), random_hash());
        let leaf = Record::leaf(&a, &b);
        assert_eq!(leaf.len(), LEAF_LEN);
        assert_eq!(leaf[0], LEAF_PREFIX);
        assert_eq!(&leaf[1..1 + HASH_LEN], &a);

        let inner = Record::inner(&a, &b);
        assert_eq!(inner.len(), INNER_LEN);
        assert_eq!(inner[0], NODE_PREFIX);

        let path = Bits::with_range(&a, 7, 200).to_masked();
        let ext = Record::extension(&path, 7, 200, &b);
        assert_eq!(ext.len(), EXT_LEN);
        assert_eq!(&ext[..3], &[EXT_PREFIX, 7, 200]);
        assert_eq!(
            Record::parse(&ext).unwrap(),
            Record::Extension {
                path,
                start: 7,
                end: 200,
                child: b
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_records() {
        let (a, b) = (random_hash(), random_hash());
        let mut leaf = Record::leaf(&a, &b);
        leaf.pop();
        assert!(matches!(Record::parse(&leaf), Err(Errors::Corrupt(_))));
        assert!(matches!(Record::parse(&[]), Err(Errors::Corrupt(_))));

        let mut unknown = Record::inner(&a, &b);
        unknown[0] = 0x7f;
        assert!(matches!(Record::parse(&unknown), Err(Errors::Corrupt(_))));

        // an inner record is too short to pass for an extension
        let mut short = Record::inner(&a, &b);
        short[0] = EXT_PREFIX;
        assert!(matches!(Record::parse(&short), Err(Errors::Corrupt(_))));

        let empty_range = Record::extension(&[0u8; HASH_LEN], 9, 9, &b);
        assert!(matches!(Record::parse(&empty_range), Err(Errors::Corrupt(_))));

        let unmasked = Record::extension(&[0xffu8; HASH_LEN], 0, 8, &b);
        assert!(matches!(Record::parse(&unmasked), Err(Errors::Corrupt(_))));
    }

    #[test]
    fn test_node_record_roundtrip() {
        let th = hasher();
        let inner = Node::inner(Node::lazy(random_hash()), Node::lazy(random_hash()));
        let node = Node::extension(&random_hash(), 3, 17, inner);
        let record = node.to_record(&th).unwrap();
        let parsed = Record::parse(&record.to_bytes()).unwrap();
        assert_eq!(parsed, record);
        let rebuilt = Node::from_record(parsed);
        assert_eq!(rebuilt.digest(&th), node.digest(&th));
        assert_eq!(th.digest_record(&record.to_bytes()).unwrap(), node.digest(&th));
        assert!(Node::lazy(random_hash()).to_record(&th).is_none());
    }

    #[test]
    fn test_extension_masks_path() {
        let node = Node::extension(&[0xffu8; HASH_LEN], 8, 16, Node::lazy(random_hash()));
        match node.kind() {
            Kind::Extension { path, .. } => {
                assert_eq!(path[0], 0x00);
                assert_eq!(path[1], 0xff);
                assert!(path[2..].iter().all(|&b| b == 0));
            }
            _ => panic!("expected an extension"),
        }
    }

    #[test]
    fn test_touch_orphans_persisted_only() {
        let th = hasher();
        let mut orphans = vec![];
        let mut node = Node::leaf(random_hash(), random_hash());
        node.touch(&mut orphans);
        assert!(orphans.is_empty());

        let hash = node.digest(&th);
        node.set_persisted(hash);
        node.touch(&mut orphans);
        assert_eq!(orphans, vec![hash]);
        assert!(!node.is_persisted());
        assert_eq!(node.cached_digest(), None);
    }

    #[test]
    fn test_collapse_shapes() {
        let th = hasher();
        let mut orphans = vec![];

        let leaf = Node::leaf(random_hash(), random_hash());
        let digest = leaf.digest(&th);
        let up = leaf.collapse(4, true, &th, &mut orphans);
        assert!(up.is_leaf());
        assert_eq!(up.digest(&th), digest);

        let inner = Node::inner(Node::lazy(random_hash()), Node::lazy(random_hash()));
        let below = inner.digest(&th);
        let up = inner.collapse(4, true, &th, &mut orphans);
        assert!(matches!(up.kind(), Kind::Extension { start: 4, end: 5, .. }));
        assert_eq!(up.digest(&th), th.digest_node(&th.placeholder(), &below));

        let mut ext = Node::extension(&[0u8; HASH_LEN], 5, 9, Node::lazy(random_hash()));
        let before = ext.digest(&th);
        ext.set_persisted(before);
        let up = ext.collapse(4, false, &th, &mut orphans);
        assert!(matches!(up.kind(), Kind::Extension { start: 4, end: 9, .. }));
        assert_eq!(up.digest(&th), th.digest_node(&before, &th.placeholder()));
        assert_eq!(orphans, vec![before]);

        let hash = random_hash();
        let up = Node::lazy(hash).collapse(0, false, &th, &mut orphans);
        assert_eq!(up.digest(&th), th.digest_node(&hash, &th.placeholder()));
    }

    #[test]
    fn test_prepend_merges_runs() {
        let th = hasher();
        let mut orphans = vec![];
        let (upper, lower) = (random_hash(), random_hash());
        let child = Node::inner(Node::lazy(random_hash()), Node::lazy(random_hash()));
        let below = child.digest(&th);

        let ext = Node::extension(&lower, 40, 90, child);
        let merged = ext.prepend(&upper, 10, 40, &th, &mut orphans);
        assert!(matches!(merged.kind(), Kind::Extension { start: 10, end: 90, .. }));
        let expected = th.digest_extension(&upper, 10, 40, &th.digest_extension(&lower, 40, 90, &below));
        assert_eq!(merged.digest(&th), expected);
        // the lower extension was never written
        assert!(orphans.is_empty());
    }
}
