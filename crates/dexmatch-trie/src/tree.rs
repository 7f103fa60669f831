//! Persistent red-black ordered index with Merkle commitments.
//!
//! An [`OrderedIndex`] is a handle on one namespace of the keyed store. It
//! holds no state of its own: nodes, per-node commitments and the root
//! pointer all live in the store under the prefixes of
//! [`dexmatch_types::codec::prefix`]. Every mutating call loads the nodes it
//! touches into a [`Txn`], runs the classical red-black algorithm over them,
//! re-hashes the touched nodes and their ancestors, then writes the result
//! back.
//!
//! Commitment of a node:
//!
//! ```text
//! H(n) = sha256("dexmatch:index:node:v1:" ‖ key ‖ color ‖ len(value) ‖ value ‖ H(left) ‖ H(right))
//! H(empty) = 0x00…00
//! ```
//!
//! so [`OrderedIndex::root`] commits to every key, value and color in the tree.

use std::collections::{BTreeSet, HashMap};

use sha2::{Digest, Sha256};

use dexmatch_types::codec::{index_node_key, index_root_key, node_hash_key};
use dexmatch_types::{DexError, EMPTY_KEY, H256, IndexNode, NodeColor, Result};

use crate::store::{StoreReader, StoreWriter};

const NODE_DOMAIN: &[u8] = b"dexmatch:index:node:v1:";

/// Shape summary returned by [`OrderedIndex::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub nodes: usize,
    /// Black nodes on every root-to-leaf path.
    pub black_height: usize,
}

/// Handle on the ordered index stored under `namespace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderedIndex {
    namespace: H256,
}

impl OrderedIndex {
    #[must_use]
    pub fn new(namespace: H256) -> Self {
        Self { namespace }
    }

    #[must_use]
    pub fn namespace(&self) -> H256 {
        self.namespace
    }

    // =====================================================================
    // Queries
    // =====================================================================

    /// Key of the root node, or the empty sentinel.
    pub fn root_key<S: StoreReader + ?Sized>(&self, store: &S) -> Result<H256> {
        match store.get(&index_root_key(&self.namespace))? {
            None => Ok(EMPTY_KEY),
            Some(raw) if raw.len() == 32 => Ok(H256::from_slice(&raw)),
            Some(raw) => Err(DexError::CorruptRecord {
                kind: "index root",
                reason: format!("{} bytes", raw.len()),
            }),
        }
    }

    /// Merkle commitment of the whole tree; zero when empty.
    pub fn root<S: StoreReader + ?Sized>(&self, store: &S) -> Result<H256> {
        let root = self.root_key(store)?;
        self.commitment(store, &root)
    }

    pub fn get<S: StoreReader + ?Sized>(&self, store: &S, key: &H256) -> Result<Option<Vec<u8>>> {
        if *key == EMPTY_KEY {
            return Ok(None);
        }
        let mut cursor = self.root_key(store)?;
        while cursor != EMPTY_KEY {
            let node = self.load(store, &cursor)?;
            if cursor == *key {
                return Ok(Some(node.value));
            }
            cursor = if *key < cursor { node.left } else { node.right };
        }
        Ok(None)
    }

    /// Minimum key and its value.
    pub fn best_left<S: StoreReader + ?Sized>(&self, store: &S) -> Result<Option<(H256, Vec<u8>)>> {
        self.extreme(store, true)
    }

    /// Maximum key and its value.
    pub fn best_right<S: StoreReader + ?Sized>(
        &self,
        store: &S,
    ) -> Result<Option<(H256, Vec<u8>)>> {
        self.extreme(store, false)
    }

    pub fn best_right_key<S: StoreReader + ?Sized>(&self, store: &S) -> Result<Option<H256>> {
        Ok(self.best_right(store)?.map(|(key, _)| key))
    }

    /// All entries in ascending key order.
    pub fn entries<S: StoreReader + ?Sized>(&self, store: &S) -> Result<Vec<(H256, Vec<u8>)>> {
        let mut out = Vec::new();
        let mut stack: Vec<(H256, IndexNode)> = Vec::new();
        let mut cursor = self.root_key(store)?;
        loop {
            while cursor != EMPTY_KEY {
                let node = self.load(store, &cursor)?;
                let left = node.left;
                stack.push((cursor, node));
                cursor = left;
            }
            let Some((key, node)) = stack.pop() else {
                break;
            };
            cursor = node.right;
            out.push((key, node.value));
        }
        Ok(out)
    }

    /// All keys in ascending order.
    pub fn keys<S: StoreReader + ?Sized>(&self, store: &S) -> Result<Vec<H256>> {
        Ok(self.entries(store)?.into_iter().map(|(k, _)| k).collect())
    }

    pub fn len<S: StoreReader + ?Sized>(&self, store: &S) -> Result<usize> {
        Ok(self.entries(store)?.len())
    }

    pub fn is_empty<S: StoreReader + ?Sized>(&self, store: &S) -> Result<bool> {
        Ok(self.root_key(store)? == EMPTY_KEY)
    }

    /// Check the red-black properties, parent links, key order and stored
    /// commitments of the whole tree.
    pub fn verify<S: StoreReader + ?Sized>(&self, store: &S) -> Result<IndexStats> {
        let root = self.root_key(store)?;
        if root == EMPTY_KEY {
            return Ok(IndexStats {
                nodes: 0,
                black_height: 0,
            });
        }
        let node = self.load(store, &root)?;
        if node.parent != EMPTY_KEY {
            return Err(self.violation("root has a parent"));
        }
        if node.color != NodeColor::Black {
            return Err(self.violation("root is red"));
        }
        let (nodes, black_height, _) = self.verify_subtree(store, &root, None, None)?;
        Ok(IndexStats {
            nodes,
            black_height,
        })
    }

    /// Returns (node count, black height, commitment).
    fn verify_subtree<S: StoreReader + ?Sized>(
        &self,
        store: &S,
        key: &H256,
        low: Option<H256>,
        high: Option<H256>,
    ) -> Result<(usize, usize, H256)> {
        if *key == EMPTY_KEY {
            return Ok((0, 1, H256::zero()));
        }
        if low.is_some_and(|l| *key <= l) || high.is_some_and(|h| *key >= h) {
            return Err(self.violation("key out of order"));
        }
        let node = self.load(store, key)?;
        for child in [node.left, node.right] {
            if child == EMPTY_KEY {
                continue;
            }
            let child_node = self.load(store, &child)?;
            if child_node.parent != *key {
                return Err(self.violation("broken parent link"));
            }
            if node.color == NodeColor::Red && child_node.color == NodeColor::Red {
                return Err(self.violation("red node with red child"));
            }
        }
        let (ln, lh, lc) = self.verify_subtree(store, &node.left, low, Some(*key))?;
        let (rn, rh, rc) = self.verify_subtree(store, &node.right, Some(*key), high)?;
        if lh != rh {
            return Err(self.violation("unequal black height"));
        }
        let expected = node_commitment(key, &node, &lc, &rc);
        if self.commitment(store, key)? != expected {
            return Err(self.violation("stale node commitment"));
        }
        let own = usize::from(node.color == NodeColor::Black);
        Ok((ln + rn + 1, lh + own, expected))
    }

    // =====================================================================
    // Mutations
    // =====================================================================

    /// Insert `key`, or overwrite its value if present.
    pub fn insert<S: StoreWriter + ?Sized>(
        &self,
        store: &mut S,
        key: H256,
        value: Vec<u8>,
    ) -> Result<()> {
        if key == EMPTY_KEY {
            return Err(DexError::ReservedKey);
        }
        let mut txn = Txn::open(self.namespace, store)?;
        txn.insert(key, value)?;
        txn.finish()
    }

    /// Remove `key`. Returns `false` if it was absent.
    pub fn delete<S: StoreWriter + ?Sized>(&self, store: &mut S, key: &H256) -> Result<bool> {
        if *key == EMPTY_KEY {
            return Ok(false);
        }
        let mut txn = Txn::open(self.namespace, store)?;
        let removed = txn.delete(key)?;
        if removed {
            txn.finish()?;
        }
        Ok(removed)
    }

    // =====================================================================
    // Internals
    // =====================================================================

    fn extreme<S: StoreReader + ?Sized>(
        &self,
        store: &S,
        leftmost: bool,
    ) -> Result<Option<(H256, Vec<u8>)>> {
        let mut cursor = self.root_key(store)?;
        if cursor == EMPTY_KEY {
            return Ok(None);
        }
        loop {
            let node = self.load(store, &cursor)?;
            let next = if leftmost { node.left } else { node.right };
            if next == EMPTY_KEY {
                return Ok(Some((cursor, node.value)));
            }
            cursor = next;
        }
    }

    fn load<S: StoreReader + ?Sized>(&self, store: &S, key: &H256) -> Result<IndexNode> {
        load_node(store, &self.namespace, key)
    }

    fn commitment<S: StoreReader + ?Sized>(&self, store: &S, key: &H256) -> Result<H256> {
        load_commitment(store, &self.namespace, key)
    }

    fn violation(&self, what: &str) -> DexError {
        DexError::CorruptRecord {
            kind: "index",
            reason: format!("{what} in namespace {}", hex::encode(self.namespace.as_bytes())),
        }
    }
}

fn load_node<S: StoreReader + ?Sized>(store: &S, namespace: &H256, key: &H256) -> Result<IndexNode> {
    match store.get(&index_node_key(namespace, key))? {
        Some(raw) => IndexNode::decode(&raw),
        None => {
            tracing::debug!(
                namespace = hex::encode(namespace.as_bytes()),
                key = hex::encode(key.as_bytes()),
                "Index node missing from store"
            );
            Err(DexError::MissingNode {
                namespace: *namespace,
                key: *key,
            })
        }
    }
}

fn load_commitment<S: StoreReader + ?Sized>(
    store: &S,
    namespace: &H256,
    key: &H256,
) -> Result<H256> {
    if *key == EMPTY_KEY {
        return Ok(H256::zero());
    }
    match store.get(&node_hash_key(namespace, key))? {
        Some(raw) if raw.len() == 32 => Ok(H256::from_slice(&raw)),
        Some(raw) => Err(DexError::CorruptRecord {
            kind: "node commitment",
            reason: format!("{} bytes", raw.len()),
        }),
        None => Err(DexError::MissingNode {
            namespace: *namespace,
            key: *key,
        }),
    }
}

fn node_commitment(key: &H256, node: &IndexNode, left: &H256, right: &H256) -> H256 {
    let mut hasher = Sha256::new();
    hasher.update(NODE_DOMAIN);
    hasher.update(key.as_bytes());
    hasher.update([node.color.as_byte()]);
    hasher.update((node.value.len() as u64).to_be_bytes());
    hasher.update(&node.value);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    H256::from_slice(&hasher.finalize())
}

// =========================================================================
// Txn: one mutation over a working set of nodes
// =========================================================================

/// Working set for a single insert or delete. Nodes are loaded lazily,
/// mutated in memory and written back by [`Txn::finish`].
struct Txn<'s, S: StoreWriter + ?Sized> {
    namespace: H256,
    store: &'s mut S,
    root: H256,
    original_root: H256,
    nodes: HashMap<H256, IndexNode>,
    dirty: BTreeSet<H256>,
    removed: BTreeSet<H256>,
}

impl<'s, S: StoreWriter + ?Sized> Txn<'s, S> {
    fn open(namespace: H256, store: &'s mut S) -> Result<Self> {
        let root = OrderedIndex::new(namespace).root_key(&*store)?;
        Ok(Self {
            namespace,
            store,
            root,
            original_root: root,
            nodes: HashMap::new(),
            dirty: BTreeSet::new(),
            removed: BTreeSet::new(),
        })
    }

    fn node(&mut self, key: &H256) -> Result<&mut IndexNode> {
        if !self.nodes.contains_key(key) {
            let node = load_node(&*self.store, &self.namespace, key)?;
            self.nodes.insert(*key, node);
        }
        self.nodes
            .get_mut(key)
            .ok_or_else(|| DexError::Internal("index working set lost a node".into()))
    }

    // --- accessors; the empty sentinel is a black leaf ---

    fn left(&mut self, key: &H256) -> Result<H256> {
        if *key == EMPTY_KEY {
            return Ok(EMPTY_KEY);
        }
        Ok(self.node(key)?.left)
    }

    fn right(&mut self, key: &H256) -> Result<H256> {
        if *key == EMPTY_KEY {
            return Ok(EMPTY_KEY);
        }
        Ok(self.node(key)?.right)
    }

    fn parent(&mut self, key: &H256) -> Result<H256> {
        if *key == EMPTY_KEY {
            return Ok(EMPTY_KEY);
        }
        Ok(self.node(key)?.parent)
    }

    fn color(&mut self, key: &H256) -> Result<NodeColor> {
        if *key == EMPTY_KEY {
            return Ok(NodeColor::Black);
        }
        Ok(self.node(key)?.color)
    }

    fn set_left(&mut self, key: &H256, child: H256) -> Result<()> {
        self.node(key)?.left = child;
        self.dirty.insert(*key);
        Ok(())
    }

    fn set_right(&mut self, key: &H256, child: H256) -> Result<()> {
        self.node(key)?.right = child;
        self.dirty.insert(*key);
        Ok(())
    }

    fn set_parent(&mut self, key: &H256, parent: H256) -> Result<()> {
        if *key == EMPTY_KEY {
            return Ok(());
        }
        self.node(key)?.parent = parent;
        self.dirty.insert(*key);
        Ok(())
    }

    fn set_color(&mut self, key: &H256, color: NodeColor) -> Result<()> {
        if *key == EMPTY_KEY {
            return Ok(());
        }
        let node = self.node(key)?;
        if node.color != color {
            node.color = color;
            self.dirty.insert(*key);
        }
        Ok(())
    }

    // --- rotations ---

    fn rotate_left(&mut self, x: H256) -> Result<()> {
        let y = self.right(&x)?;
        let y_left = self.left(&y)?;
        self.set_right(&x, y_left)?;
        self.set_parent(&y_left, x)?;
        let xp = self.parent(&x)?;
        self.set_parent(&y, xp)?;
        self.replace_child(xp, x, y)?;
        self.set_left(&y, x)?;
        self.set_parent(&x, y)
    }

    fn rotate_right(&mut self, x: H256) -> Result<()> {
        let y = self.left(&x)?;
        let y_right = self.right(&y)?;
        self.set_left(&x, y_right)?;
        self.set_parent(&y_right, x)?;
        let xp = self.parent(&x)?;
        self.set_parent(&y, xp)?;
        self.replace_child(xp, x, y)?;
        self.set_right(&y, x)?;
        self.set_parent(&x, y)
    }

    /// Point `parent`'s link from `old` to `new`; the root if `parent` is empty.
    fn replace_child(&mut self, parent: H256, old: H256, new: H256) -> Result<()> {
        if parent == EMPTY_KEY {
            self.root = new;
        } else if self.left(&parent)? == old {
            self.set_left(&parent, new)?;
        } else {
            self.set_right(&parent, new)?;
        }
        Ok(())
    }

    // --- insert ---

    fn insert(&mut self, key: H256, value: Vec<u8>) -> Result<()> {
        let mut parent = EMPTY_KEY;
        let mut cursor = self.root;
        while cursor != EMPTY_KEY {
            if cursor == key {
                let node = self.node(&key)?;
                if node.value != value {
                    node.value = value;
                    self.dirty.insert(key);
                }
                return Ok(());
            }
            parent = cursor;
            cursor = if key < cursor {
                self.left(&cursor)?
            } else {
                self.right(&cursor)?
            };
        }

        self.nodes.insert(
            key,
            IndexNode {
                left: EMPTY_KEY,
                right: EMPTY_KEY,
                parent,
                color: NodeColor::Red,
                value,
            },
        );
        self.dirty.insert(key);
        if parent == EMPTY_KEY {
            self.root = key;
        } else if key < parent {
            self.set_left(&parent, key)?;
        } else {
            self.set_right(&parent, key)?;
        }
        self.insert_fixup(key)
    }

    fn insert_fixup(&mut self, mut z: H256) -> Result<()> {
        loop {
            let p = self.parent(&z)?;
            if self.color(&p)? != NodeColor::Red {
                break;
            }
            // A red node is never the root, so the grandparent exists.
            let g = self.parent(&p)?;
            if p == self.left(&g)? {
                let uncle = self.right(&g)?;
                if self.color(&uncle)? == NodeColor::Red {
                    self.set_color(&p, NodeColor::Black)?;
                    self.set_color(&uncle, NodeColor::Black)?;
                    self.set_color(&g, NodeColor::Red)?;
                    z = g;
                    continue;
                }
                let mut p = p;
                if z == self.right(&p)? {
                    z = p;
                    self.rotate_left(z)?;
                    p = self.parent(&z)?;
                }
                self.set_color(&p, NodeColor::Black)?;
                self.set_color(&g, NodeColor::Red)?;
                self.rotate_right(g)?;
            } else {
                let uncle = self.left(&g)?;
                if self.color(&uncle)? == NodeColor::Red {
                    self.set_color(&p, NodeColor::Black)?;
                    self.set_color(&uncle, NodeColor::Black)?;
                    self.set_color(&g, NodeColor::Red)?;
                    z = g;
                    continue;
                }
                let mut p = p;
                if z == self.left(&p)? {
                    z = p;
                    self.rotate_right(z)?;
                    p = self.parent(&z)?;
                }
                self.set_color(&p, NodeColor::Black)?;
                self.set_color(&g, NodeColor::Red)?;
                self.rotate_left(g)?;
            }
        }
        let root = self.root;
        self.set_color(&root, NodeColor::Black)
    }

    // --- delete ---

    fn find(&mut self, key: &H256) -> Result<bool> {
        let mut cursor = self.root;
        while cursor != EMPTY_KEY {
            if cursor == *key {
                return Ok(true);
            }
            cursor = if *key < cursor {
                self.left(&cursor)?
            } else {
                self.right(&cursor)?
            };
        }
        Ok(false)
    }

    fn transplant(&mut self, u: H256, v: H256) -> Result<()> {
        let up = self.parent(&u)?;
        self.replace_child(up, u, v)?;
        self.set_parent(&v, up)
    }

    fn minimum(&mut self, mut key: H256) -> Result<H256> {
        loop {
            let left = self.left(&key)?;
            if left == EMPTY_KEY {
                return Ok(key);
            }
            key = left;
        }
    }

    fn delete(&mut self, key: &H256) -> Result<bool> {
        if !self.find(key)? {
            return Ok(false);
        }
        let z = *key;
        let z_left = self.left(&z)?;
        let z_right = self.right(&z)?;
        let mut removed_color = self.color(&z)?;
        let x;
        let x_parent;

        if z_left == EMPTY_KEY {
            x = z_right;
            x_parent = self.parent(&z)?;
            self.transplant(z, z_right)?;
        } else if z_right == EMPTY_KEY {
            x = z_left;
            x_parent = self.parent(&z)?;
            self.transplant(z, z_left)?;
        } else {
            let y = self.minimum(z_right)?;
            removed_color = self.color(&y)?;
            x = self.right(&y)?;
            if self.parent(&y)? == z {
                x_parent = y;
                self.set_parent(&x, y)?;
            } else {
                x_parent = self.parent(&y)?;
                self.transplant(y, x)?;
                self.set_right(&y, z_right)?;
                self.set_parent(&z_right, y)?;
            }
            self.transplant(z, y)?;
            self.set_left(&y, z_left)?;
            self.set_parent(&z_left, y)?;
            let z_color = self.color(&z)?;
            self.set_color(&y, z_color)?;
        }

        self.nodes.remove(&z);
        self.dirty.remove(&z);
        self.removed.insert(z);

        if removed_color == NodeColor::Black {
            self.delete_fixup(x, x_parent)?;
        }
        Ok(true)
    }

    fn delete_fixup(&mut self, mut x: H256, mut xp: H256) -> Result<()> {
        while x != self.root && self.color(&x)? == NodeColor::Black {
            if x == self.left(&xp)? {
                let mut w = self.right(&xp)?;
                if self.color(&w)? == NodeColor::Red {
                    self.set_color(&w, NodeColor::Black)?;
                    self.set_color(&xp, NodeColor::Red)?;
                    self.rotate_left(xp)?;
                    w = self.right(&xp)?;
                }
                let wl = self.left(&w)?;
                let wr = self.right(&w)?;
                if self.color(&wl)? == NodeColor::Black && self.color(&wr)? == NodeColor::Black {
                    self.set_color(&w, NodeColor::Red)?;
                    x = xp;
                    xp = self.parent(&x)?;
                } else {
                    if self.color(&wr)? == NodeColor::Black {
                        self.set_color(&wl, NodeColor::Black)?;
                        self.set_color(&w, NodeColor::Red)?;
                        self.rotate_right(w)?;
                        w = self.right(&xp)?;
                    }
                    let xp_color = self.color(&xp)?;
                    self.set_color(&w, xp_color)?;
                    self.set_color(&xp, NodeColor::Black)?;
                    let wr = self.right(&w)?;
                    self.set_color(&wr, NodeColor::Black)?;
                    self.rotate_left(xp)?;
                    x = self.root;
                    xp = EMPTY_KEY;
                }
            } else {
                let mut w = self.left(&xp)?;
                if self.color(&w)? == NodeColor::Red {
                    self.set_color(&w, NodeColor::Black)?;
                    self.set_color(&xp, NodeColor::Red)?;
                    self.rotate_right(xp)?;
                    w = self.left(&xp)?;
                }
                let wl = self.left(&w)?;
                let wr = self.right(&w)?;
                if self.color(&wl)? == NodeColor::Black && self.color(&wr)? == NodeColor::Black {
                    self.set_color(&w, NodeColor::Red)?;
                    x = xp;
                    xp = self.parent(&x)?;
                } else {
                    if self.color(&wl)? == NodeColor::Black {
                        self.set_color(&wr, NodeColor::Black)?;
                        self.set_color(&w, NodeColor::Red)?;
                        self.rotate_left(w)?;
                        w = self.left(&xp)?;
                    }
                    let xp_color = self.color(&xp)?;
                    self.set_color(&w, xp_color)?;
                    self.set_color(&xp, NodeColor::Black)?;
                    let wl = self.left(&w)?;
                    self.set_color(&wl, NodeColor::Black)?;
                    self.rotate_right(xp)?;
                    x = self.root;
                    xp = EMPTY_KEY;
                }
            }
        }
        self.set_color(&x, NodeColor::Black)
    }

    // --- write-back ---

    /// Re-hash touched nodes and their ancestors, then persist nodes,
    /// commitments and the root pointer.
    fn finish(mut self) -> Result<()> {
        let mut stale: BTreeSet<H256> = BTreeSet::new();
        let dirty: Vec<H256> = self.dirty.iter().copied().collect();
        for key in dirty {
            let mut cursor = key;
            while cursor != EMPTY_KEY && stale.insert(cursor) {
                cursor = self.parent(&cursor)?;
            }
        }

        let root = self.root;
        let mut fresh: HashMap<H256, H256> = HashMap::new();
        self.rehash(&root, &stale, &mut fresh)?;

        for key in &self.removed {
            self.store.delete(&index_node_key(&self.namespace, key))?;
            self.store.delete(&node_hash_key(&self.namespace, key))?;
        }
        for key in &self.dirty {
            if let Some(node) = self.nodes.get(key) {
                self.store
                    .put(&index_node_key(&self.namespace, key), node.encode())?;
            }
        }
        for (key, hash) in &fresh {
            self.store
                .put(&node_hash_key(&self.namespace, key), hash.as_bytes().to_vec())?;
        }
        if self.root != self.original_root {
            let root_key = index_root_key(&self.namespace);
            if self.root == EMPTY_KEY {
                self.store.delete(&root_key)?;
            } else {
                self.store.put(&root_key, self.root.as_bytes().to_vec())?;
            }
        }
        Ok(())
    }

    fn rehash(
        &mut self,
        key: &H256,
        stale: &BTreeSet<H256>,
        fresh: &mut HashMap<H256, H256>,
    ) -> Result<H256> {
        if *key == EMPTY_KEY {
            return Ok(H256::zero());
        }
        if !stale.contains(key) {
            return load_commitment(&*self.store, &self.namespace, key);
        }
        let (left, right) = {
            let node = self.node(key)?;
            (node.left, node.right)
        };
        let left_hash = self.rehash(&left, stale, fresh)?;
        let right_hash = self.rehash(&right, stale, fresh)?;
        let hash = node_commitment(key, self.node(key)?, &left_hash, &right_hash);
        fresh.insert(*key, hash);
        Ok(hash)
    }
}
