//! B+tree engine over a page store.
//!
//! A tree is a metadata page plus a fixed root page. The root page id never
//! changes: when the root splits its halves move to fresh pages and the root
//! is rewritten as their parent, and when it is left with a single child that
//! child is copied into it.
//!
//! # Concurrency
//!
//! Each tree admits one writer at a time (`writer` mutex) and any number of
//! concurrent readers. Pages are latched through the tree's [`LatchTable`]:
//!
//! - Readers descend with shared latches, holding at most a parent and a child.
//! - The writer descends with exclusive latches and releases the ancestors
//!   once it reaches a node that cannot split (insert) or underflow (remove).
//! - Every page is rewritten as a whole while exclusively latched.
//!
//! Structural changes (split, borrow, merge, root collapse, clear) bump
//! `structure_version` before the first page write and again after the last.
//! Cursors use it to detect that a sibling link they are about to follow may
//! be stale.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::TreeConfig;
use crate::storage::btree::codec::KeyCodec;
use crate::storage::btree::meta::TreeMeta;
use crate::storage::btree::node::{
    InternalNode, LeafNode, Node, NodeError, internal_capacity, leaf_capacity,
};
use crate::storage::btree::value::{FixedValue, RecordId};
use crate::storage::io::{PageStore, StorageError};
use crate::storage::latch::{ExclusiveLatch, LatchTable};
use crate::storage::page::{NO_PAGE, Page, PageId};
use crate::storage::superblock::{MAX_TREE_NAME_LEN, SuperblockError};

/// Persisted shape of a tree: key and value widths and fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    key_len: u32,
    value_size: u16,
    max_leaf: u16,
    max_internal: u16,
}

impl Layout {
    /// Derive the layout for a new tree.
    fn derive<C: KeyCodec, V: FixedValue>(codec: &C, config: &TreeConfig) -> Result<Self, TreeError> {
        config
            .validate()
            .map_err(|e| TreeError::InvalidConfig(e.to_string()))?;

        let key_len = codec.max_encoded_len();
        let leaf_cap = leaf_capacity(key_len, V::SIZE).min(usize::from(u16::MAX));
        let internal_cap = internal_capacity(key_len).min(usize::from(u16::MAX));
        if leaf_cap < TreeConfig::MIN_FAN_OUT || internal_cap < TreeConfig::MIN_FAN_OUT {
            return Err(TreeError::InvalidConfig(format!(
                "keys of up to {key_len} bytes leave room for {leaf_cap} leaf entries and \
                 {internal_cap} separators per page, need at least {}",
                TreeConfig::MIN_FAN_OUT
            )));
        }

        let too_wide = |what: &str| TreeError::InvalidConfig(format!("{what} does not fit the metadata page"));
        Ok(Self {
            key_len: u32::try_from(key_len).map_err(|_| too_wide("key length"))?,
            value_size: u16::try_from(V::SIZE).map_err(|_| too_wide("value size"))?,
            max_leaf: u16::try_from(config.max_leaf_entries.map_or(leaf_cap, |n| n.min(leaf_cap)))
                .map_err(|_| too_wide("leaf fan-out"))?,
            max_internal: u16::try_from(
                config
                    .max_internal_entries
                    .map_or(internal_cap, |n| n.min(internal_cap)),
            )
            .map_err(|_| too_wide("internal fan-out"))?,
        })
    }

    fn max_leaf(self) -> usize {
        usize::from(self.max_leaf)
    }

    fn min_leaf(self) -> usize {
        self.max_leaf() / 2
    }

    fn max_internal(self) -> usize {
        usize::from(self.max_internal)
    }

    fn min_internal(self) -> usize {
        self.max_internal() / 2
    }

    /// Whether a persisted fan-out is usable with the codec's key width.
    fn fits_pages(self) -> bool {
        let key_len = self.key_len as usize;
        let value_size = usize::from(self.value_size);
        (TreeConfig::MIN_FAN_OUT..=leaf_capacity(key_len, value_size)).contains(&self.max_leaf())
            && (TreeConfig::MIN_FAN_OUT..=internal_capacity(key_len)).contains(&self.max_internal())
    }
}

/// How an underfull node was repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rebalance {
    /// An entry moved over from a sibling; the parent keeps its key count.
    Borrowed,
    /// Two siblings became one; the parent lost a separator.
    Merged,
}

/// Where a read-only descent is heading.
#[derive(Debug)]
pub(super) enum Seek<'k, K> {
    First,
    Last,
    Key(&'k K),
}

/// An internal node on the writer's path, with the child slot it descended
/// through. Holding the step keeps the node latched.
struct PathStep<'t, K> {
    page_id: PageId,
    node: InternalNode<K>,
    index: usize,
    latch: ExclusiveLatch<'t>,
}

/// Result of a writer descent: the latched leaf and the ancestors that may
/// still need to change.
struct WritePath<'t, K, V> {
    path: Vec<PathStep<'t, K>>,
    leaf_id: PageId,
    leaf: LeafNode<K, V>,
    latch: ExclusiveLatch<'t>,
}

/// Marks a structural change in progress for its lifetime.
///
/// The version is odd while the change is running and moves to a new even
/// value when the guard drops, whether or not the change succeeded.
struct StructureChange<'a>(&'a AtomicU64);

impl<'a> StructureChange<'a> {
    fn begin(version: &'a AtomicU64) -> Self {
        version.fetch_add(1, Ordering::SeqCst);
        Self(version)
    }
}

impl Drop for StructureChange<'_> {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A step that runs after a structural change is installed.
#[derive(Debug)]
enum Shrink<K, V> {
    /// Rewrite a page that gave up entries or children.
    Write(PageId, Node<K, V>),
    /// Point a leaf's previous-leaf link at `prev`.
    Relink { page_id: PageId, prev: PageId },
    /// Return a page that left the tree.
    Free(PageId),
}

/// The page writes of one split or rebalance, collected before any of them
/// is issued.
///
/// `grow` holds new pages and pages that gain entries. They are written
/// first, then a single install write makes the change reachable from the
/// root, then the `shrink` steps drop what moved elsewhere. Until the install
/// lands every key is still routed to a page that holds it.
///
/// Pages for the change are allocated up front. Dropping the reshape
/// releases the ones the tree never came to reference.
struct Reshape<'t, S: PageStore, K, V> {
    store: &'t S,
    fresh: Vec<PageId>,
    used: usize,
    installed: bool,
    grow: Vec<(PageId, Node<K, V>)>,
    shrink: Vec<Shrink<K, V>>,
    latches: Vec<ExclusiveLatch<'t>>,
}

impl<'t, S: PageStore, K, V> Reshape<'t, S, K, V> {
    const fn new(store: &'t S) -> Self {
        Self {
            store,
            fresh: Vec::new(),
            used: 0,
            installed: false,
            grow: Vec::new(),
            shrink: Vec::new(),
            latches: Vec::new(),
        }
    }

    fn take_page(&mut self) -> Option<PageId> {
        let page_id = self.fresh.get(self.used).copied()?;
        self.used += 1;
        Some(page_id)
    }

    /// Queue the shrink steps of one level. Levels are queued bottom-up and
    /// run top-down.
    fn push_level(&mut self, level: Vec<Shrink<K, V>>) {
        self.shrink.splice(0..0, level);
    }
}

impl<S: PageStore, K, V> Drop for Reshape<'_, S, K, V> {
    fn drop(&mut self) {
        let unused = if self.installed {
            &self.fresh[self.used..]
        } else {
            &self.fresh[..]
        };
        release_pages(self.store, unused);
    }
}

/// A B+tree mapping codec-ordered keys to fixed-width values.
///
/// Nodes are never cached: every operation reads the pages it needs by id
/// and writes back whole pages.
pub struct SBTree<C, S, V = RecordId>
where
    C: KeyCodec,
    S: PageStore,
    V: FixedValue,
{
    name: String,
    pub(super) codec: C,
    pub(super) store: Arc<S>,
    pub(super) meta_page: PageId,
    root: PageId,
    layout: Layout,
    pub(super) latches: LatchTable,
    writer: Mutex<()>,
    count: AtomicU64,
    version: AtomicU64,
    _values: PhantomData<fn() -> V>,
}

impl<C, S, V> SBTree<C, S, V>
where
    C: KeyCodec,
    S: PageStore,
    V: FixedValue,
{
    /// Create a new empty tree and register it under `name`.
    ///
    /// Allocates the metadata page and an empty root leaf. Fails with
    /// [`TreeError::AlreadyExists`] if the store already has a tree of that
    /// name.
    pub fn create(name: &str, codec: C, store: Arc<S>, config: &TreeConfig) -> Result<Self, TreeError> {
        if name.is_empty() || name.len() > MAX_TREE_NAME_LEN {
            return Err(TreeError::InvalidName(name.to_string()));
        }
        let layout = Layout::derive::<C, V>(&codec, config)?;
        if store.catalog_lookup(name)?.is_some() {
            return Err(TreeError::AlreadyExists(name.to_string()));
        }

        let meta_page = store.allocate_page()?;
        let root = store
            .allocate_page()
            .inspect_err(|_| release_pages(&*store, &[meta_page]))?;

        let tree = Self::assemble(name, codec, store, meta_page, root, layout, 0);
        tree.initialize()
            .inspect_err(|_| release_pages(&*tree.store, &[root, meta_page]))?;

        tracing::info!(
            tree = %tree.name,
            meta_page,
            root,
            max_leaf = layout.max_leaf,
            max_internal = layout.max_internal,
            "created tree"
        );
        Ok(tree)
    }

    /// Open an existing tree by name.
    ///
    /// The codec must be the one the tree was created with.
    pub fn open(name: &str, codec: C, store: Arc<S>) -> Result<Self, TreeError> {
        let meta_page = store
            .catalog_lookup(name)?
            .ok_or_else(|| TreeError::TreeNotFound(name.to_string()))?;
        let page = store.read_page(meta_page)?;
        let meta = TreeMeta::decode(&page).map_err(|e| corruption(name, meta_page, e))?;

        if meta.codec_id != codec.id() {
            return Err(TreeError::CodecMismatch {
                expected: meta.codec_id,
                found: codec.id(),
            });
        }
        let key_len = codec.max_encoded_len();
        if meta.max_key_len as usize != key_len {
            return Err(TreeError::KeyLengthMismatch {
                expected: meta.max_key_len as usize,
                found: key_len,
            });
        }
        if usize::from(meta.value_size) != V::SIZE {
            return Err(TreeError::ValueSizeMismatch {
                expected: usize::from(meta.value_size),
                found: V::SIZE,
            });
        }

        let layout = Layout {
            key_len: meta.max_key_len,
            value_size: meta.value_size,
            max_leaf: meta.max_leaf_entries,
            max_internal: meta.max_internal_entries,
        };
        if !layout.fits_pages() {
            return Err(corruption(name, meta_page, "fan-out does not fit a page"));
        }
        if meta.name != name {
            return Err(corruption(
                name,
                meta_page,
                format!("metadata belongs to tree '{}'", meta.name),
            ));
        }
        if meta.root == NO_PAGE || meta.root == meta_page {
            return Err(corruption(name, meta_page, format!("invalid root page {}", meta.root)));
        }

        let tree = Self::assemble(name, codec, store, meta_page, meta.root, layout, meta.count);
        tracing::info!(tree = %tree.name, meta_page, root = meta.root, count = meta.count, "opened tree");
        Ok(tree)
    }

    fn assemble(
        name: &str,
        codec: C,
        store: Arc<S>,
        meta_page: PageId,
        root: PageId,
        layout: Layout,
        count: u64,
    ) -> Self {
        Self {
            name: name.to_string(),
            codec,
            store,
            meta_page,
            root,
            layout,
            latches: LatchTable::new(),
            writer: Mutex::new(()),
            count: AtomicU64::new(count),
            version: AtomicU64::new(0),
            _values: PhantomData,
        }
    }

    /// Write the empty root and metadata, then register the name.
    fn initialize(&self) -> Result<(), TreeError> {
        self.write_leaf(self.root, &LeafNode::new(self.meta_page))?;
        self.write_meta()?;
        self.store
            .catalog_insert(&self.name, self.meta_page)
            .map_err(|e| match e {
                StorageError::Superblock(SuperblockError::DuplicateTree(name)) => {
                    TreeError::AlreadyExists(name)
                }
                StorageError::Superblock(SuperblockError::CatalogFull) => TreeError::CatalogFull,
                StorageError::Superblock(SuperblockError::InvalidTreeName(name)) => {
                    TreeError::InvalidName(name)
                }
                other => TreeError::Storage(other),
            })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of entries in the tree.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub const fn codec(&self) -> &C {
        &self.codec
    }

    /// Effective leaf and internal fan-out.
    #[must_use]
    pub fn fan_out(&self) -> (usize, usize) {
        (self.layout.max_leaf(), self.layout.max_internal())
    }

    /// Look up the value stored for `key`.
    pub fn get(&self, key: &C::Key) -> Result<Option<V>, TreeError> {
        let (_, leaf) = self.find_leaf(Seek::Key(key))?;
        Ok(leaf.get(&self.codec, key))
    }

    /// Smallest key in the tree.
    pub fn first_key(&self) -> Result<Option<C::Key>, TreeError> {
        let (_, mut leaf) = self.find_leaf(Seek::First)?;
        Ok((!leaf.entries.is_empty()).then(|| leaf.entries.swap_remove(0).key))
    }

    /// Largest key in the tree.
    pub fn last_key(&self) -> Result<Option<C::Key>, TreeError> {
        let (_, mut leaf) = self.find_leaf(Seek::Last)?;
        Ok(leaf.entries.pop().map(|entry| entry.key))
    }

    /// Number of levels from the root to the leaves.
    pub fn height(&self) -> Result<usize, TreeError> {
        let mut height = 1;
        let mut page_id = self.root;
        let mut _latch = self.latches.shared(page_id);
        while let Node::Internal(node) = self.read_node(page_id)? {
            page_id = node.children[0];
            _latch = self.latches.shared(page_id);
            height += 1;
        }
        Ok(height)
    }

    /// Insert or overwrite an entry, returning the previous value.
    pub fn put(&self, key: C::Key, value: V) -> Result<Option<V>, TreeError> {
        self.check_key(&key)?;
        let _writer = self.lock_writer();

        let WritePath {
            path,
            leaf_id,
            mut leaf,
            latch: _latch,
        } = self.descend_for_write(&key, |node| self.has_room(node))?;

        if let Some(old) = leaf.insert(&self.codec, key, value) {
            self.write_leaf(leaf_id, &leaf)?;
            return Ok(Some(old));
        }

        if leaf.entries.len() > self.layout.max_leaf() {
            self.split_upward(path, leaf_id, leaf)?;
        } else {
            self.write_leaf(leaf_id, &leaf)?;
        }

        self.count.fetch_add(1, Ordering::SeqCst);
        self.write_meta()?;
        Ok(None)
    }

    /// Remove an entry, returning its value. Absent keys change nothing.
    pub fn remove(&self, key: &C::Key) -> Result<Option<V>, TreeError> {
        let _writer = self.lock_writer();

        let WritePath {
            path,
            leaf_id,
            mut leaf,
            latch,
        } = self.descend_for_write(key, |node| self.has_surplus(node))?;

        let Some(removed) = leaf.remove(&self.codec, key) else {
            return Ok(None);
        };

        if leaf_id == self.root || leaf.entries.len() >= self.layout.min_leaf() {
            self.write_leaf(leaf_id, &leaf)?;
        } else {
            self.rebalance_upward(path, leaf_id, Node::Leaf(leaf), latch)?;
        }

        self.count.fetch_sub(1, Ordering::SeqCst);
        self.write_meta()?;
        Ok(Some(removed))
    }

    /// Remove every entry, leaving an empty root leaf.
    ///
    /// All other node pages go back to the store.
    pub fn clear(&mut self) -> Result<(), TreeError> {
        let _change = StructureChange::begin(&self.version);
        let pages = self.node_pages()?;

        self.write_leaf(self.root, &LeafNode::new(self.meta_page))?;
        self.count.store(0, Ordering::SeqCst);
        self.write_meta()?;

        let mut freed = 0usize;
        for page_id in pages.into_iter().filter(|&page_id| page_id != self.root) {
            self.store.free_page(page_id)?;
            freed += 1;
        }

        tracing::info!(tree = %self.name, freed, "cleared tree");
        Ok(())
    }

    /// Drop the tree: unregister its name and free all of its pages.
    pub fn delete(self) -> Result<(), TreeError> {
        let pages = self.node_pages()?;
        self.store.catalog_remove(&self.name)?;

        for &page_id in &pages {
            self.store.free_page(page_id)?;
        }
        self.store.free_page(self.meta_page)?;

        tracing::info!(tree = %self.name, freed = pages.len() + 1, "deleted tree");
        Ok(())
    }

    /// Descend to the leaf for `seek` with shared latch coupling.
    ///
    /// The returned leaf is a copy; its latch is released on return.
    pub(super) fn find_leaf(&self, seek: Seek<'_, C::Key>) -> Result<(PageId, LeafNode<C::Key, V>), TreeError> {
        let mut page_id = self.root;
        let mut _latch = self.latches.shared(page_id);
        loop {
            match self.read_node(page_id)? {
                Node::Leaf(leaf) => return Ok((page_id, leaf)),
                Node::Internal(node) => {
                    let index = match seek {
                        Seek::First => 0,
                        Seek::Last => node.children.len() - 1,
                        Seek::Key(key) => node.find_child_index(&self.codec, key),
                    };
                    let child = node.children[index];
                    let child_latch = self.latches.shared(child);
                    _latch = child_latch;
                    page_id = child;
                }
            }
        }
    }

    /// Descend to the leaf for `key` with exclusive latches, releasing
    /// ancestors above every child for which `safe` holds.
    fn descend_for_write(
        &self,
        key: &C::Key,
        safe: impl Fn(&Node<C::Key, V>) -> bool,
    ) -> Result<WritePath<'_, C::Key, V>, TreeError> {
        let mut path = Vec::new();
        let mut page_id = self.root;
        let mut latch = self.latches.exclusive(page_id);
        let mut node = self.read_node(page_id)?;

        loop {
            match node {
                Node::Leaf(leaf) => {
                    return Ok(WritePath {
                        path,
                        leaf_id: page_id,
                        leaf,
                        latch,
                    });
                }
                Node::Internal(internal) => {
                    let index = internal.find_child_index(&self.codec, key);
                    let child_id = internal.children[index];
                    let child_latch = self.latches.exclusive(child_id);
                    let child = self.read_node(child_id)?;

                    let child_is_safe = safe(&child);
                    path.push(PathStep {
                        page_id,
                        node: internal,
                        index,
                        latch,
                    });
                    if child_is_safe {
                        path.clear();
                    }

                    page_id = child_id;
                    latch = child_latch;
                    node = child;
                }
            }
        }
    }

    fn has_room(&self, node: &Node<C::Key, V>) -> bool {
        match node {
            Node::Leaf(leaf) => leaf.entries.len() < self.layout.max_leaf(),
            Node::Internal(internal) => internal.keys.len() < self.layout.max_internal(),
        }
    }

    fn has_surplus(&self, node: &Node<C::Key, V>) -> bool {
        match node {
            Node::Leaf(leaf) => leaf.entries.len() > self.layout.min_leaf(),
            Node::Internal(internal) => internal.keys.len() > self.layout.min_internal(),
        }
    }

    /// Split an overfull leaf and carry separators up the path.
    fn split_upward<'t>(
        &'t self,
        mut path: Vec<PathStep<'t, C::Key>>,
        leaf_id: PageId,
        mut leaf: LeafNode<C::Key, V>,
    ) -> Result<(), TreeError> {
        let mut reshape = self.reserve_pages(self.pages_for_split(&path, leaf_id))?;
        let _change = StructureChange::begin(&self.version);

        let mut right = leaf.split();
        let mut separator = right.entries[0].key.clone();

        if leaf_id == self.root {
            let left_id = self.fresh_page(&mut reshape)?;
            let right_id = self.fresh_page(&mut reshape)?;
            leaf.prev_leaf = NO_PAGE;
            leaf.next_leaf = right_id;
            right.prev_leaf = left_id;
            right.next_leaf = NO_PAGE;
            reshape.grow.push((left_id, Node::Leaf(leaf)));
            reshape.grow.push((right_id, Node::Leaf(right)));

            let root = InternalNode::with_children(self.meta_page, left_id, separator, right_id);
            self.apply(reshape, self.root, Node::Internal(root))?;
            tracing::debug!(tree = %self.name, left_id, right_id, "root leaf split, tree grew to height 2");
            return Ok(());
        }

        let mut right_id = self.fresh_page(&mut reshape)?;
        right.prev_leaf = leaf_id;
        right.next_leaf = leaf.next_leaf;
        leaf.next_leaf = right_id;
        tracing::debug!(
            tree = %self.name,
            leaf_id,
            right_id,
            left_entries = leaf.entries.len(),
            right_entries = right.entries.len(),
            "split leaf"
        );

        let mut level = Vec::with_capacity(2);
        if right.next_leaf != NO_PAGE {
            level.push(Shrink::Relink {
                page_id: right.next_leaf,
                prev: right_id,
            });
        }
        level.push(Shrink::Write(leaf_id, Node::Leaf(leaf)));
        reshape.grow.push((right_id, Node::Leaf(right)));
        reshape.push_level(level);

        while let Some(PathStep {
            page_id,
            mut node,
            index,
            latch,
        }) = path.pop()
        {
            reshape.latches.push(latch);
            node.insert_at(index, separator, right_id);
            if node.keys.len() <= self.layout.max_internal() {
                return self.apply(reshape, page_id, Node::Internal(node));
            }

            let (median, upper) = node.split();
            if page_id == self.root {
                let left_id = self.fresh_page(&mut reshape)?;
                let upper_id = self.fresh_page(&mut reshape)?;
                reshape.grow.push((left_id, Node::Internal(node)));
                reshape.grow.push((upper_id, Node::Internal(upper)));

                let root = InternalNode::with_children(self.meta_page, left_id, median, upper_id);
                self.apply(reshape, self.root, Node::Internal(root))?;
                tracing::debug!(tree = %self.name, left_id, right_id = upper_id, "root split, tree grew a level");
                return Ok(());
            }

            let upper_id = self.fresh_page(&mut reshape)?;
            tracing::debug!(tree = %self.name, page_id, right_id = upper_id, "split internal node");
            reshape.grow.push((upper_id, Node::Internal(upper)));
            reshape.push_level(vec![Shrink::Write(page_id, Node::Internal(node))]);
            separator = median;
            right_id = upper_id;
        }

        Err(self.corrupt(self.root, "split reached past the root"))
    }

    /// Fresh pages a split of `leaf_id` consumes: one per splitting node, two
    /// when the root splits.
    fn pages_for_split(&self, path: &[PathStep<'_, C::Key>], leaf_id: PageId) -> usize {
        let pages_for = |page_id| if page_id == self.root { 2 } else { 1 };
        let mut needed = pages_for(leaf_id);
        for step in path.iter().rev() {
            if step.node.keys.len() < self.layout.max_internal() {
                break;
            }
            needed += pages_for(step.page_id);
        }
        needed
    }

    /// Allocate `count` pages for a structural change.
    fn reserve_pages(&self, count: usize) -> Result<Reshape<'_, S, C::Key, V>, TreeError> {
        let mut reshape = Reshape::new(&*self.store);
        for _ in 0..count {
            reshape.fresh.push(self.store.allocate_page()?);
        }
        Ok(reshape)
    }

    fn fresh_page(&self, reshape: &mut Reshape<'_, S, C::Key, V>) -> Result<PageId, TreeError> {
        reshape
            .take_page()
            .ok_or_else(|| self.corrupt(self.root, "split needs more pages than were reserved"))
    }

    /// Write a collected change: grown pages, then `install`, then the
    /// shrink steps.
    fn apply(
        &self,
        mut reshape: Reshape<'_, S, C::Key, V>,
        install_id: PageId,
        install: Node<C::Key, V>,
    ) -> Result<(), TreeError> {
        for (page_id, node) in &reshape.grow {
            self.write_node(*page_id, node)?;
        }
        self.write_node(install_id, &install)?;
        reshape.installed = true;

        for step in std::mem::take(&mut reshape.shrink) {
            match step {
                Shrink::Write(page_id, node) => self.write_node(page_id, &node)?,
                Shrink::Relink { page_id, prev } => self.relink_prev(page_id, prev)?,
                Shrink::Free(page_id) => self.store.free_page(page_id)?,
            }
        }
        Ok(())
    }

    /// Point `page_id`'s previous-leaf link at `prev`.
    fn relink_prev(&self, page_id: PageId, prev: PageId) -> Result<(), TreeError> {
        let _latch = self.latches.exclusive(page_id);
        let mut leaf = self.read_leaf(page_id)?;
        leaf.prev_leaf = prev;
        self.write_leaf(page_id, &leaf)
    }

    /// Repair an underfull node and every ancestor that underflows in turn.
    fn rebalance_upward<'t>(
        &'t self,
        mut path: Vec<PathStep<'t, C::Key>>,
        child_id: PageId,
        child: Node<C::Key, V>,
        child_latch: ExclusiveLatch<'t>,
    ) -> Result<(), TreeError> {
        let _change = StructureChange::begin(&self.version);
        let mut reshape = Reshape::new(&*self.store);
        let (mut child_id, mut child, mut child_latch) = (child_id, child, child_latch);

        while let Some(PathStep {
            page_id: parent_id,
            node: mut parent,
            index,
            latch: parent_latch,
        }) = path.pop()
        {
            // Siblings are latched left to right, the child among them.
            drop(child_latch);
            let outcome = self.rebalance(&mut reshape, &mut parent, index, child_id, child)?;

            let settled = match outcome {
                Rebalance::Borrowed => true,
                Rebalance::Merged => {
                    parent_id == self.root || parent.keys.len() >= self.layout.min_internal()
                }
            };
            if settled {
                reshape.latches.push(parent_latch);
                if parent_id == self.root && parent.keys.is_empty() {
                    return self.collapse_root(reshape, &parent);
                }
                return self.apply(reshape, parent_id, Node::Internal(parent));
            }

            child_id = parent_id;
            child = Node::Internal(parent);
            child_latch = parent_latch;
        }

        Err(self.corrupt(child_id, "underfull node has no parent on the path"))
    }

    /// Fix the underfull child at `parent.children[index]` by borrowing from
    /// or merging with an adjacent sibling. The parent is only updated in
    /// memory; every page write goes into `reshape`.
    fn rebalance<'t>(
        &'t self,
        reshape: &mut Reshape<'t, S, C::Key, V>,
        parent: &mut InternalNode<C::Key>,
        index: usize,
        child_id: PageId,
        child: Node<C::Key, V>,
    ) -> Result<Rebalance, TreeError> {
        let left_id = index.checked_sub(1).map(|i| parent.children[i]);
        let right_id = parent.children.get(index + 1).copied();

        reshape.latches.extend(left_id.map(|id| self.latches.exclusive(id)));
        reshape.latches.push(self.latches.exclusive(child_id));
        reshape.latches.extend(right_id.map(|id| self.latches.exclusive(id)));

        let left = left_id.map(|id| self.read_node(id).map(|n| (id, n))).transpose()?;
        let right = right_id.map(|id| self.read_node(id).map(|n| (id, n))).transpose()?;

        let outcome = match child {
            Node::Leaf(leaf) => {
                let left = left.map(|(id, n)| self.expect_leaf(id, n)).transpose()?;
                let right = right.map(|(id, n)| self.expect_leaf(id, n)).transpose()?;
                self.rebalance_leaf(reshape, parent, index, (child_id, leaf), left, right)?
            }
            Node::Internal(node) => {
                let left = left.map(|(id, n)| self.expect_internal(id, n)).transpose()?;
                let right = right.map(|(id, n)| self.expect_internal(id, n)).transpose()?;
                self.rebalance_internal(reshape, parent, index, (child_id, node), left, right)?
            }
        };

        tracing::debug!(tree = %self.name, child_id, ?outcome, "rebalanced underfull node");
        Ok(outcome)
    }

    fn rebalance_leaf(
        &self,
        reshape: &mut Reshape<'_, S, C::Key, V>,
        parent: &mut InternalNode<C::Key>,
        index: usize,
        child: (PageId, LeafNode<C::Key, V>),
        left: Option<(PageId, LeafNode<C::Key, V>)>,
        right: Option<(PageId, LeafNode<C::Key, V>)>,
    ) -> Result<Rebalance, TreeError> {
        let min = self.layout.min_leaf();
        let (child_id, mut child) = child;

        match (left, right) {
            (Some((left_id, mut left)), right)
                if left.entries.len() > min
                    && right
                        .as_ref()
                        .is_none_or(|(_, r)| left.entries.len() >= r.entries.len()) =>
            {
                let Some(entry) = left.entries.pop() else {
                    return Err(self.corrupt(left_id, "leaf sibling emptied during borrow"));
                };
                child.entries.insert(0, entry);
                parent.keys[index - 1] = child.entries[0].key.clone();
                reshape.grow.push((child_id, Node::Leaf(child)));
                reshape.push_level(vec![Shrink::Write(left_id, Node::Leaf(left))]);
                Ok(Rebalance::Borrowed)
            }
            (_, Some((right_id, mut right))) if right.entries.len() > min => {
                child.entries.push(right.entries.remove(0));
                parent.keys[index] = right.entries[0].key.clone();
                reshape.grow.push((child_id, Node::Leaf(child)));
                reshape.push_level(vec![Shrink::Write(right_id, Node::Leaf(right))]);
                Ok(Rebalance::Borrowed)
            }
            (Some(left), right) => {
                self.merge_leaves(reshape, left, (child_id, child), right)?;
                parent.keys.remove(index - 1);
                parent.children.remove(index);
                Ok(Rebalance::Merged)
            }
            (None, Some(right)) => {
                self.merge_leaves(reshape, (child_id, child), right, None)?;
                parent.keys.remove(index);
                parent.children.remove(index + 1);
                Ok(Rebalance::Merged)
            }
            (None, None) => Err(self.corrupt(child_id, "leaf has no siblings under its parent")),
        }
    }

    /// Move every entry of `right` into `left` and retire `right`.
    ///
    /// `held_next` is `right`'s successor when the caller already holds its
    /// latch.
    fn merge_leaves(
        &self,
        reshape: &mut Reshape<'_, S, C::Key, V>,
        left: (PageId, LeafNode<C::Key, V>),
        right: (PageId, LeafNode<C::Key, V>),
        held_next: Option<(PageId, LeafNode<C::Key, V>)>,
    ) -> Result<(), TreeError> {
        let (left_id, mut left) = left;
        let (right_id, mut right) = right;

        if left.next_leaf != right_id {
            return Err(self.corrupt(
                left_id,
                format!("leaf links to {} but its right sibling is {right_id}", left.next_leaf),
            ));
        }
        left.entries.append(&mut right.entries);
        left.next_leaf = right.next_leaf;

        let mut level = Vec::with_capacity(2);
        match held_next {
            Some((next_id, mut next)) => {
                if right.next_leaf != next_id {
                    return Err(self.corrupt(
                        right_id,
                        format!("leaf links to {} but its right sibling is {next_id}", right.next_leaf),
                    ));
                }
                next.prev_leaf = left_id;
                level.push(Shrink::Write(next_id, Node::Leaf(next)));
            }
            None if right.next_leaf != NO_PAGE => level.push(Shrink::Relink {
                page_id: right.next_leaf,
                prev: left_id,
            }),
            None => {}
        }
        level.push(Shrink::Free(right_id));

        reshape.grow.push((left_id, Node::Leaf(left)));
        reshape.push_level(level);
        Ok(())
    }

    fn rebalance_internal(
        &self,
        reshape: &mut Reshape<'_, S, C::Key, V>,
        parent: &mut InternalNode<C::Key>,
        index: usize,
        child: (PageId, InternalNode<C::Key>),
        left: Option<(PageId, InternalNode<C::Key>)>,
        right: Option<(PageId, InternalNode<C::Key>)>,
    ) -> Result<Rebalance, TreeError> {
        let min = self.layout.min_internal();
        let (child_id, mut child) = child;

        match (left, right) {
            (Some((left_id, mut left)), right)
                if left.keys.len() > min
                    && right
                        .as_ref()
                        .is_none_or(|(_, r)| left.keys.len() >= r.keys.len()) =>
            {
                let (Some(key), Some(grandchild)) = (left.keys.pop(), left.children.pop()) else {
                    return Err(self.corrupt(left_id, "internal sibling emptied during borrow"));
                };
                let separator = std::mem::replace(&mut parent.keys[index - 1], key);
                child.keys.insert(0, separator);
                child.children.insert(0, grandchild);
                reshape.grow.push((child_id, Node::Internal(child)));
                reshape.push_level(vec![Shrink::Write(left_id, Node::Internal(left))]);
                Ok(Rebalance::Borrowed)
            }
            (_, Some((right_id, mut right))) if right.keys.len() > min => {
                let key = right.keys.remove(0);
                let grandchild = right.children.remove(0);
                let separator = std::mem::replace(&mut parent.keys[index], key);
                child.keys.push(separator);
                child.children.push(grandchild);
                reshape.grow.push((child_id, Node::Internal(child)));
                reshape.push_level(vec![Shrink::Write(right_id, Node::Internal(right))]);
                Ok(Rebalance::Borrowed)
            }
            (Some((left_id, mut left)), _) => {
                let separator = parent.keys.remove(index - 1);
                parent.children.remove(index);
                left.keys.push(separator);
                left.keys.append(&mut child.keys);
                left.children.append(&mut child.children);
                reshape.grow.push((left_id, Node::Internal(left)));
                reshape.push_level(vec![Shrink::Free(child_id)]);
                Ok(Rebalance::Merged)
            }
            (None, Some((right_id, mut right))) => {
                let separator = parent.keys.remove(index);
                parent.children.remove(index + 1);
                child.keys.push(separator);
                child.keys.append(&mut right.keys);
                child.children.append(&mut right.children);
                reshape.grow.push((child_id, Node::Internal(child)));
                reshape.push_level(vec![Shrink::Free(right_id)]);
                Ok(Rebalance::Merged)
            }
            (None, None) => Err(self.corrupt(child_id, "internal node has no siblings under its parent")),
        }
    }

    /// Replace the root with its only child, shrinking the tree by a level.
    ///
    /// The child is the node the last merge produced, so its content is
    /// taken from the pending writes and installed straight into the root.
    fn collapse_root(
        &self,
        mut reshape: Reshape<'_, S, C::Key, V>,
        root: &InternalNode<C::Key>,
    ) -> Result<(), TreeError> {
        let child_id = root.children[0];
        let Some(position) = reshape.grow.iter().position(|(page_id, _)| *page_id == child_id) else {
            return Err(self.corrupt(self.root, format!("only child {child_id} was not produced by a merge")));
        };
        let (_, mut child) = reshape.grow.remove(position);
        if let Node::Leaf(leaf) = &mut child {
            leaf.prev_leaf = NO_PAGE;
            leaf.next_leaf = NO_PAGE;
        }

        reshape.push_level(vec![Shrink::Free(child_id)]);
        self.apply(reshape, self.root, child)?;
        tracing::debug!(tree = %self.name, child_id, "root collapsed, tree shrank a level");
        Ok(())
    }

    /// Every node page of the tree, root first.
    fn node_pages(&self) -> Result<Vec<PageId>, TreeError> {
        let mut pages = Vec::new();
        let mut pending = vec![self.root];
        while let Some(page_id) = pending.pop() {
            pages.push(page_id);
            if let Node::Internal(node) = self.read_node(page_id)? {
                pending.extend(node.children);
            }
        }
        Ok(pages)
    }

    fn read_node(&self, page_id: PageId) -> Result<Node<C::Key, V>, TreeError> {
        let page = self.store.read_page(page_id)?;
        Node::decode(&page, page_id, &self.codec, self.meta_page).map_err(|e| self.corrupt(page_id, e))
    }

    fn read_leaf(&self, page_id: PageId) -> Result<LeafNode<C::Key, V>, TreeError> {
        let node = self.read_node(page_id)?;
        self.expect_leaf(page_id, node).map(|(_, leaf)| leaf)
    }

    /// Decode a leaf from a page that was already read.
    pub(super) fn decode_leaf(&self, page_id: PageId, page: &Page) -> Result<LeafNode<C::Key, V>, TreeError> {
        LeafNode::decode(page, page_id, &self.codec, self.meta_page).map_err(|e| self.corrupt(page_id, e))
    }

    fn expect_leaf(
        &self,
        page_id: PageId,
        node: Node<C::Key, V>,
    ) -> Result<(PageId, LeafNode<C::Key, V>), TreeError> {
        match node {
            Node::Leaf(leaf) => Ok((page_id, leaf)),
            Node::Internal(_) => Err(self.corrupt(page_id, "expected a leaf, found an internal node")),
        }
    }

    fn expect_internal(
        &self,
        page_id: PageId,
        node: Node<C::Key, V>,
    ) -> Result<(PageId, InternalNode<C::Key>), TreeError> {
        match node {
            Node::Internal(internal) => Ok((page_id, internal)),
            Node::Leaf(_) => Err(self.corrupt(page_id, "expected an internal node, found a leaf")),
        }
    }

    fn write_node(&self, page_id: PageId, node: &Node<C::Key, V>) -> Result<(), TreeError> {
        self.write_encoded(page_id, node.encode(&self.codec))
    }

    fn write_leaf(&self, page_id: PageId, leaf: &LeafNode<C::Key, V>) -> Result<(), TreeError> {
        self.write_encoded(page_id, leaf.encode(&self.codec))
    }

    fn write_encoded(&self, page_id: PageId, encoded: Result<Page, NodeError>) -> Result<(), TreeError> {
        let page = encoded.map_err(|e| self.corrupt(page_id, e))?;
        self.store.write_page(page_id, &page)?;
        Ok(())
    }

    fn write_meta(&self) -> Result<(), TreeError> {
        let meta = TreeMeta {
            name: self.name.clone(),
            root: self.root,
            count: self.size(),
            codec_id: self.codec.id(),
            max_key_len: self.layout.key_len,
            value_size: self.layout.value_size,
            max_leaf_entries: self.layout.max_leaf,
            max_internal_entries: self.layout.max_internal,
        };
        self.store.write_page(self.meta_page, &meta.encode())?;
        Ok(())
    }

    /// Current structure version. Odd while a structural change is running.
    pub(super) fn structure_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn check_key(&self, key: &C::Key) -> Result<(), TreeError> {
        let size = self.codec.encoded_len(key);
        let max = self.codec.max_encoded_len();
        if size > max {
            return Err(TreeError::KeyTooLarge { size, max });
        }
        Ok(())
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().expect("lock poisoned")
    }

    fn corrupt(&self, page_id: PageId, reason: impl std::fmt::Display) -> TreeError {
        corruption(&self.name, page_id, reason)
    }
}

#[cfg(test)]
impl<C, S, V> SBTree<C, S, V>
where
    C: KeyCodec,
    S: PageStore,
    V: FixedValue,
{
    /// Walk the whole tree and check ordering, fill, depth, leaf links and
    /// the entry count. Returns the number of entries.
    pub(crate) fn check_structure(&self) -> Result<u64, String> {
        let mut leaves = Vec::new();
        let mut leaf_depth = None;
        self.check_subtree(self.root, None, None, 1, &mut leaf_depth, &mut leaves)?;

        let mut total = 0u64;
        for (i, (page_id, leaf)) in leaves.iter().enumerate() {
            let expected_prev = if i == 0 { NO_PAGE } else { leaves[i - 1].0 };
            let expected_next = leaves.get(i + 1).map_or(NO_PAGE, |(id, _)| *id);
            if leaf.prev_leaf != expected_prev || leaf.next_leaf != expected_next {
                return Err(format!(
                    "leaf {page_id} links ({}, {}), expected ({expected_prev}, {expected_next})",
                    leaf.prev_leaf, leaf.next_leaf
                ));
            }
            total += leaf.entries.len() as u64;
        }

        if total != self.size() {
            return Err(format!("leaves hold {total} entries, metadata says {}", self.size()));
        }
        Ok(total)
    }

    fn check_subtree(
        &self,
        page_id: PageId,
        lower: Option<&C::Key>,
        upper: Option<&C::Key>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        leaves: &mut Vec<(PageId, LeafNode<C::Key, V>)>,
    ) -> Result<(), String> {
        use std::cmp::Ordering as Cmp;

        let in_range = |key: &C::Key| {
            lower.is_none_or(|l| self.codec.compare(key, l) != Cmp::Less)
                && upper.is_none_or(|u| self.codec.compare(key, u) == Cmp::Less)
        };
        let is_root = page_id == self.root;

        match self.read_node(page_id).map_err(|e| e.to_string())? {
            Node::Leaf(leaf) => {
                if *leaf_depth.get_or_insert(depth) != depth {
                    return Err(format!("leaf {page_id} at depth {depth}, others at {leaf_depth:?}"));
                }
                let len = leaf.entries.len();
                if !is_root && !(self.layout.min_leaf()..=self.layout.max_leaf()).contains(&len) {
                    return Err(format!("leaf {page_id} holds {len} entries"));
                }
                if let Some(entry) = leaf.entries.iter().find(|e| !in_range(&e.key)) {
                    return Err(format!("leaf {page_id} key {:?} outside its range", entry.key));
                }
                leaves.push((page_id, leaf));
            }
            Node::Internal(node) => {
                let len = node.keys.len();
                let min = if is_root { 1 } else { self.layout.min_internal() };
                if !(min..=self.layout.max_internal()).contains(&len) {
                    return Err(format!("internal node {page_id} holds {len} keys"));
                }
                if let Some(key) = node.keys.iter().find(|&k| !in_range(k)) {
                    return Err(format!("internal node {page_id} key {key:?} outside its range"));
                }
                for (i, &child) in node.children.iter().enumerate() {
                    let child_lower = if i == 0 { lower } else { Some(&node.keys[i - 1]) };
                    let child_upper = node.keys.get(i).or(upper);
                    self.check_subtree(child, child_lower, child_upper, depth + 1, leaf_depth, leaves)?;
                }
            }
        }
        Ok(())
    }
}

impl<C, S, V> std::fmt::Debug for SBTree<C, S, V>
where
    C: KeyCodec,
    S: PageStore,
    V: FixedValue,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SBTree")
            .field("name", &self.name)
            .field("meta_page", &self.meta_page)
            .field("root", &self.root)
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

/// Free pages that never became part of a tree.
fn release_pages<S: PageStore>(store: &S, pages: &[PageId]) {
    for &page_id in pages {
        if let Err(e) = store.free_page(page_id) {
            tracing::warn!(page_id, error = %e, "failed to release unused page");
        }
    }
}

fn corruption(tree: &str, page_id: PageId, reason: impl std::fmt::Display) -> TreeError {
    let reason = reason.to_string();
    tracing::warn!(tree, page_id, %reason, "corrupt page");
    TreeError::CorruptNode { page_id, reason }
}

/// Errors that can occur during tree operations.
#[derive(Debug)]
pub enum TreeError {
    /// A tree with this name already exists.
    AlreadyExists(String),
    /// No tree with this name exists.
    TreeNotFound(String),
    /// A page failed validation.
    CorruptNode { page_id: PageId, reason: String },
    /// The page store failed.
    Storage(StorageError),
    /// Key encodes to more bytes than the codec allows.
    KeyTooLarge { size: usize, max: usize },
    /// Tree was created with a different key codec.
    CodecMismatch { expected: u8, found: u8 },
    /// Tree was created with a different maximum key length.
    KeyLengthMismatch { expected: usize, found: usize },
    /// Tree was created with a different value type.
    ValueSizeMismatch { expected: usize, found: usize },
    /// Tree name is empty or too long.
    InvalidName(String),
    /// Fan-out or key width cannot be used.
    InvalidConfig(String),
    /// The store has no room for another tree.
    CatalogFull,
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyExists(name) => write!(f, "tree '{name}' already exists"),
            Self::TreeNotFound(name) => write!(f, "tree '{name}' not found"),
            Self::CorruptNode { page_id, reason } => {
                write!(f, "corrupt node at page {page_id}: {reason}")
            }
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::KeyTooLarge { size, max } => {
                write!(f, "key encodes to {size} bytes, maximum is {max}")
            }
            Self::CodecMismatch { expected, found } => {
                write!(f, "tree uses key codec {expected}, opened with codec {found}")
            }
            Self::KeyLengthMismatch { expected, found } => write!(
                f,
                "tree stores keys of up to {expected} bytes, codec allows {found}"
            ),
            Self::ValueSizeMismatch { expected, found } => {
                write!(f, "tree stores {expected}-byte values, opened with {found}-byte values")
            }
            Self::InvalidName(name) => write!(
                f,
                "invalid tree name '{name}' (must be 1-{MAX_TREE_NAME_LEN} bytes)"
            ),
            Self::InvalidConfig(msg) => write!(f, "invalid tree configuration: {msg}"),
            Self::CatalogFull => write!(f, "tree catalog is full"),
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for TreeError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::codec::{IntegerCodec, LongCodec, StringCodec};
    use crate::storage::file::FileStore;
    use crate::storage::memory::MemoryStore;
    use tempfile::tempdir;

    type IntTree = SBTree<IntegerCodec, MemoryStore>;

    fn memory_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    fn small_tree(store: &Arc<MemoryStore>) -> IntTree {
        SBTree::create(
            "small",
            IntegerCodec,
            Arc::clone(store),
            &TreeConfig::default().with_fan_out(4),
        )
        .expect("create tree")
    }

    fn rid(key: i32) -> RecordId {
        let position = u64::from(key.unsigned_abs());
        RecordId::new(u16::try_from(position % 32_000).expect("fits"), position)
    }

    #[test]
    fn test_tree_basic_operations() {
        let store = memory_store();
        let tree: IntTree = SBTree::create("basic", IntegerCodec, store, &TreeConfig::default())
            .expect("create tree");

        assert_eq!(tree.put(1, rid(1)).expect("put 1"), None);
        assert_eq!(tree.put(3, rid(3)).expect("put 3"), None);
        assert_eq!(tree.put(2, rid(2)).expect("put 2"), None);

        assert_eq!(tree.get(&1).expect("get 1"), Some(rid(1)));
        assert_eq!(tree.get(&2).expect("get 2"), Some(rid(2)));
        assert_eq!(tree.get(&3).expect("get 3"), Some(rid(3)));
        assert_eq!(tree.get(&4).expect("get 4"), None);
        assert_eq!(tree.size(), 3);
        assert_eq!(tree.height().expect("height"), 1);
    }

    #[test]
    fn test_tree_overwrite_keeps_count() {
        let store = memory_store();
        let tree = small_tree(&store);

        assert_eq!(tree.put(7, RecordId::new(1, 1)).expect("put"), None);
        assert_eq!(
            tree.put(7, RecordId::new(2, 2)).expect("overwrite"),
            Some(RecordId::new(1, 1))
        );
        assert_eq!(tree.get(&7).expect("get"), Some(RecordId::new(2, 2)));
        assert_eq!(tree.size(), 1);
    }

    #[test]
    fn test_tree_remove_absent_is_none() {
        let store = memory_store();
        let tree = small_tree(&store);
        tree.put(1, rid(1)).expect("put");

        assert_eq!(tree.remove(&2).expect("remove absent"), None);
        assert_eq!(tree.remove(&1).expect("remove"), Some(rid(1)));
        assert_eq!(tree.remove(&1).expect("remove again"), None);
        assert_eq!(tree.size(), 0);
    }

    #[test]
    fn test_tree_grows_and_stays_balanced() {
        let store = memory_store();
        let tree = small_tree(&store);

        for key in 0..500 {
            tree.put(key, rid(key)).expect("put");
        }
        assert_eq!(tree.check_structure().expect("structure"), 500);
        assert!(tree.height().expect("height") >= 4);

        for key in 0..500 {
            assert_eq!(tree.get(&key).expect("get"), Some(rid(key)));
        }
        assert_eq!(tree.first_key().expect("first"), Some(0));
        assert_eq!(tree.last_key().expect("last"), Some(499));
    }

    #[test]
    fn test_tree_descending_inserts() {
        let store = memory_store();
        let tree = small_tree(&store);

        for key in (0..300).rev() {
            tree.put(key, rid(key)).expect("put");
        }
        assert_eq!(tree.check_structure().expect("structure"), 300);
    }

    #[test]
    fn test_tree_remove_shrinks_to_root_leaf() {
        let store = memory_store();
        let tree = small_tree(&store);

        for key in 0..400 {
            tree.put(key, rid(key)).expect("put");
        }
        let pages_when_full = store.total_pages() - store.free_pages();

        for key in 0..400 {
            assert_eq!(tree.remove(&key).expect("remove"), Some(rid(key)));
            if key % 37 == 0 {
                tree.check_structure().expect("structure during removal");
            }
        }

        assert_eq!(tree.size(), 0);
        assert_eq!(tree.height().expect("height"), 1);
        assert_eq!(tree.first_key().expect("first"), None);
        tree.check_structure().expect("structure after removal");

        // Superblock, metadata and root remain in use.
        assert!(pages_when_full > 3);
        assert_eq!(store.total_pages() - store.free_pages(), 3);
    }

    #[test]
    fn test_tree_remove_from_the_right() {
        let store = memory_store();
        let tree = small_tree(&store);

        for key in 0..250 {
            tree.put(key, rid(key)).expect("put");
        }
        for key in (100..250).rev() {
            tree.remove(&key).expect("remove");
        }
        assert_eq!(tree.check_structure().expect("structure"), 100);
        assert_eq!(tree.last_key().expect("last"), Some(99));
    }

    #[test]
    fn test_tree_create_duplicate_name() {
        let store = memory_store();
        let _tree = small_tree(&store);

        let err = IntTree::create("small", IntegerCodec, Arc::clone(&store), &TreeConfig::default())
            .expect_err("duplicate");
        assert!(matches!(err, TreeError::AlreadyExists(name) if name == "small"));
    }

    #[test]
    fn test_tree_create_rejects_bad_input() {
        let store = memory_store();

        let err = IntTree::create("", IntegerCodec, Arc::clone(&store), &TreeConfig::default())
            .expect_err("empty name");
        assert!(matches!(err, TreeError::InvalidName(_)));

        let err = IntTree::create(
            "tiny",
            IntegerCodec,
            Arc::clone(&store),
            &TreeConfig::default().with_max_leaf_entries(3),
        )
        .expect_err("fan-out too small");
        assert!(matches!(err, TreeError::InvalidConfig(_)));

        let err = SBTree::<StringCodec, MemoryStore>::create(
            "huge_keys",
            StringCodec::new(5000),
            Arc::clone(&store),
            &TreeConfig::default(),
        )
        .expect_err("keys too wide");
        assert!(matches!(err, TreeError::InvalidConfig(_)));

        // Nothing was allocated for the failed attempts.
        assert_eq!(store.total_pages(), 1);
    }

    #[test]
    fn test_tree_key_too_large() {
        let store = memory_store();
        let tree: SBTree<StringCodec, MemoryStore> =
            SBTree::create("names", StringCodec::new(8), store, &TreeConfig::default()).expect("create");

        tree.put("short".to_string(), RecordId::new(1, 1)).expect("put short");
        let err = tree
            .put("much too long".to_string(), RecordId::new(1, 2))
            .expect_err("long key");
        assert!(matches!(err, TreeError::KeyTooLarge { size: 15, max: 10 }));
        assert_eq!(tree.size(), 1);
    }

    #[test]
    fn test_tree_clear_releases_pages() {
        let store = memory_store();
        let mut tree = small_tree(&store);

        for key in 0..200 {
            tree.put(key, rid(key)).expect("put");
        }
        tree.clear().expect("clear");

        assert_eq!(tree.size(), 0);
        assert_eq!(tree.get(&10).expect("get"), None);
        assert_eq!(store.total_pages() - store.free_pages(), 3);

        tree.put(5, rid(5)).expect("put after clear");
        assert_eq!(tree.check_structure().expect("structure"), 1);
    }

    #[test]
    fn test_tree_delete_unregisters() {
        let store = memory_store();
        let tree = small_tree(&store);
        for key in 0..100 {
            tree.put(key, rid(key)).expect("put");
        }

        tree.delete().expect("delete");
        assert_eq!(store.catalog_lookup("small").expect("lookup"), None);
        assert_eq!(store.free_pages(), store.total_pages() - 1);

        let err = IntTree::open("small", IntegerCodec, Arc::clone(&store)).expect_err("open deleted");
        assert!(matches!(err, TreeError::TreeNotFound(_)));

        // The name can be reused.
        let again = small_tree(&store);
        assert_eq!(again.size(), 0);
    }

    #[test]
    fn test_tree_open_checks_codec() {
        let store = memory_store();
        let tree = small_tree(&store);
        tree.put(1, rid(1)).expect("put");
        drop(tree);

        let err = SBTree::<LongCodec, MemoryStore>::open("small", LongCodec, Arc::clone(&store))
            .expect_err("wrong codec");
        assert!(matches!(
            err,
            TreeError::CodecMismatch {
                expected: IntegerCodec::ID,
                found: LongCodec::ID
            }
        ));

        let err = SBTree::<IntegerCodec, MemoryStore, u64>::open("small", IntegerCodec, Arc::clone(&store))
            .expect_err("wrong value type");
        assert!(matches!(err, TreeError::ValueSizeMismatch { expected: 10, found: 8 }));

        let reopened = IntTree::open("small", IntegerCodec, store).expect("open");
        assert_eq!(reopened.size(), 1);
        assert_eq!(reopened.fan_out(), (4, 4));
    }

    #[test]
    fn test_tree_persists_across_reopen() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("tree.db");

        {
            let store = Arc::new(FileStore::create(&path).expect("create store"));
            let tree: SBTree<IntegerCodec, FileStore> = SBTree::create(
                "persisted",
                IntegerCodec,
                Arc::clone(&store),
                &TreeConfig::default().with_fan_out(8),
            )
            .expect("create tree");
            for key in 0..1000 {
                tree.put(key, rid(key)).expect("put");
            }
            for key in (0..1000).step_by(3) {
                tree.remove(&key).expect("remove");
            }
            store.sync().expect("sync");
        }

        let store = Arc::new(FileStore::open(&path).expect("open store"));
        let tree: SBTree<IntegerCodec, FileStore> =
            SBTree::open("persisted", IntegerCodec, store).expect("open tree");

        assert_eq!(tree.size(), 666);
        assert_eq!(tree.check_structure().expect("structure"), 666);
        for key in 0..1000 {
            let expected = (key % 3 != 0).then(|| rid(key));
            assert_eq!(tree.get(&key).expect("get"), expected);
        }
    }

    #[test]
    fn test_tree_detects_corrupt_node() {
        let store = memory_store();
        let tree = small_tree(&store);
        for key in 0..50 {
            tree.put(key, rid(key)).expect("put");
        }

        // Overwrite the first leaf with garbage.
        let (leaf_id, _) = tree.find_leaf(Seek::First).expect("find leaf");
        let mut page = Page::new();
        page.write_bytes(0, &[0xAB; 64]);
        store.write_page(leaf_id, &page).expect("write garbage");

        let err = tree.get(&0).expect_err("corrupt leaf");
        assert!(matches!(err, TreeError::CorruptNode { page_id, .. } if page_id == leaf_id));
    }

    #[test]
    fn test_tree_merge_rejects_broken_leaf_link() {
        let store = memory_store();
        let tree = small_tree(&store);
        for key in 0..20 {
            tree.put(key, rid(key)).expect("put");
        }

        // Leaves hold [0, 1], [2, 3], ... Unlink the first from the second.
        let (first_id, mut first) = tree.find_leaf(Seek::First).expect("find leaf");
        assert_eq!(first.entries.len(), 2);
        first.next_leaf = NO_PAGE;
        tree.write_leaf(first_id, &first).expect("write leaf");

        // Removing 2 underflows the second leaf, which then merges left.
        let err = tree.remove(&2).expect_err("broken link");
        assert!(matches!(err, TreeError::CorruptNode { page_id, .. } if page_id == first_id));
        assert_eq!(tree.get(&2).expect("get"), Some(rid(2)));
        assert_eq!(tree.size(), 20);
    }

    #[test]
    fn test_tree_two_trees_share_a_store() {
        let store = memory_store();
        let a = small_tree(&store);
        let b: IntTree = SBTree::create(
            "other",
            IntegerCodec,
            Arc::clone(&store),
            &TreeConfig::default().with_fan_out(4),
        )
        .expect("create second tree");

        for key in 0..100 {
            a.put(key, rid(key)).expect("put a");
            b.put(-key, rid(key)).expect("put b");
        }
        assert_eq!(a.get(&-5).expect("get a"), None);
        assert_eq!(b.get(&-5).expect("get b"), Some(rid(5)));
        a.check_structure().expect("structure a");
        b.check_structure().expect("structure b");
    }

    #[test]
    fn test_tree_error_display() {
        let err = TreeError::CorruptNode {
            page_id: 9,
            reason: "key 2 out of order".to_string(),
        };
        assert_eq!(err.to_string(), "corrupt node at page 9: key 2 out of order");

        let err = TreeError::from(StorageError::InjectedFault("disk gone".to_string()));
        assert!(std::error::Error::source(&err).is_some());
    }
}
