use std::collections::VecDeque;
use std::fmt::Write as _;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{HiveError, PageId, Result, INVALID_PAGE_ID};

use super::btree_iterator::BTreeIterator;
use super::btree_page::{inner_capacity, leaf_capacity, BTreeNode, InnerPage, LeafPage};
use super::key::{IndexKey, IndexValue};

/// Smallest fan-out a node may be configured with.
const MIN_NODE_SIZE: usize = 3;

/// A disk-backed B+Tree mapping unique keys to values.
///
/// Nodes split eagerly: a node is split as soon as an insertion fills it, so
/// every node on disk has at least one free slot.
pub struct BPlusTree<K, V> {
    bpm: Arc<BufferPoolManager>,
    root_page_id: PageId,
    leaf_max_size: usize,
    inner_max_size: usize,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: IndexKey, V: IndexValue> BPlusTree<K, V> {
    /// Creates an empty tree whose nodes use the full page.
    pub fn new(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            root_page_id: INVALID_PAGE_ID,
            leaf_max_size: leaf_capacity::<K, V>(),
            inner_max_size: inner_capacity::<K>(),
            _marker: PhantomData,
        }
    }

    /// Creates an empty tree with custom node fan-out.
    pub fn with_max_sizes(
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        inner_max_size: usize,
    ) -> Result<Self> {
        let leaf_cap = leaf_capacity::<K, V>();
        let inner_cap = inner_capacity::<K>();

        if !(MIN_NODE_SIZE..=leaf_cap).contains(&leaf_max_size) {
            return Err(HiveError::InvalidArgument(format!(
                "leaf max size {} must be between {} and {}",
                leaf_max_size, MIN_NODE_SIZE, leaf_cap
            )));
        }
        if !(MIN_NODE_SIZE..=inner_cap).contains(&inner_max_size) {
            return Err(HiveError::InvalidArgument(format!(
                "inner max size {} must be between {} and {}",
                inner_max_size, MIN_NODE_SIZE, inner_cap
            )));
        }

        Ok(Self {
            leaf_max_size,
            inner_max_size,
            ..Self::new(bpm)
        })
    }

    /// Opens a tree rooted at an existing page. New nodes use the full page.
    pub fn open(root_page_id: PageId, bpm: Arc<BufferPoolManager>) -> Result<Self> {
        if root_page_id.is_valid() {
            let guard = bpm.fetch_page_read(root_page_id)?;
            BTreeNode::<_, K, V>::decode(guard.data())?;
        }

        Ok(Self {
            root_page_id,
            ..Self::new(bpm)
        })
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    pub fn is_empty(&self) -> bool {
        !self.root_page_id.is_valid()
    }

    pub fn leaf_max_size(&self) -> usize {
        self.leaf_max_size
    }

    pub fn inner_max_size(&self) -> usize {
        self.inner_max_size
    }

    fn check_not_empty(&self) -> Result<()> {
        if self.is_empty() {
            return Err(HiveError::InvalidArgument("tree is empty".to_string()));
        }
        Ok(())
    }

    /// Looks up the value stored under `key`.
    pub fn find(&self, key: &K) -> Result<Option<V>> {
        self.check_not_empty()?;

        let mut page_id = self.root_page_id;
        loop {
            let guard = self.bpm.fetch_page_read(page_id)?;
            match BTreeNode::<_, K, V>::decode(guard.data())? {
                BTreeNode::Leaf(leaf) => return leaf.lookup(key),
                BTreeNode::Inner(inner) => {
                    let index = inner.child_index_for(key)?;
                    page_id = inner.child_at(index)?;
                }
            }
        }
    }

    /// Returns the leaf that covers `key` (the leftmost leaf for `None`) and
    /// the first slot in it not below `key`.
    fn find_leaf(&self, key: Option<&K>) -> Result<(PageId, usize)> {
        let mut page_id = self.root_page_id;
        loop {
            let guard = self.bpm.fetch_page_read(page_id)?;
            match BTreeNode::<_, K, V>::decode(guard.data())? {
                BTreeNode::Leaf(leaf) => {
                    let index = match key {
                        Some(key) => leaf.search(key)?.unwrap_or_else(|pos| pos),
                        None => 0,
                    };
                    return Ok((page_id, index));
                }
                BTreeNode::Inner(inner) => {
                    let index = match key {
                        Some(key) => inner.child_index_for(key)?,
                        None => 0,
                    };
                    page_id = inner.child_at(index)?;
                }
            }
        }
    }

    /// Inserts `key`, replacing the value if the key is already present.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        if self.is_empty() {
            return self.start_new_tree(key, value);
        }

        // Write guards on every inner node of the path, with the child taken
        let mut path: Vec<(WritePageGuard, usize)> = Vec::new();
        let mut guard = self.bpm.fetch_page_write(self.root_page_id)?;
        loop {
            let next = match BTreeNode::<_, K, V>::decode(guard.data())? {
                BTreeNode::Leaf(_) => None,
                BTreeNode::Inner(inner) => {
                    let index = inner.child_index_for(&key)?;
                    Some((index, inner.child_at(index)?))
                }
            };

            match next {
                None => break,
                Some((index, child_page_id)) => {
                    path.push((guard, index));
                    guard = self.bpm.fetch_page_write(child_page_id)?;
                }
            }
        }

        // Every page a split will need is pinned before any node changes, so
        // running out of frames leaves the tree untouched
        let new_pages = Self::plan_splits(&guard, &key, &mut path)?;
        let mut reserved = Vec::with_capacity(new_pages);
        for _ in 0..new_pages {
            let page_id = self.bpm.allocate_page();
            reserved.push(self.bpm.fetch_page_write(page_id)?);
        }
        let mut reserved = reserved.into_iter();

        let leaf_page_id = guard.page_id();
        let mut split = {
            let mut leaf = LeafPage::<_, K, V>::new(guard.data_mut());
            leaf.insert(key, value)?;
            if leaf.size() < leaf.max_size() {
                None
            } else {
                let right_guard = take_reserved(&mut reserved)?;
                Some(self.split_leaf(&mut leaf, leaf_page_id, right_guard)?)
            }
        };
        drop(guard);

        while let Some((separator, right_page_id)) = split.take() {
            match path.pop() {
                Some((mut parent_guard, child_index)) => {
                    let parent_page_id = parent_guard.page_id();
                    let mut parent = InnerPage::<_, K>::new(parent_guard.data_mut());
                    parent.insert_after(child_index, separator, right_page_id)?;
                    if parent.size() >= parent.max_size() {
                        let right_guard = take_reserved(&mut reserved)?;
                        split = Some(self.split_inner(&mut parent, parent_page_id, right_guard)?);
                    }
                }
                None => {
                    let root_guard = take_reserved(&mut reserved)?;
                    self.grow_root(separator, right_page_id, root_guard)?;
                }
            }
        }
        drop(path);
        drop(reserved);

        self.bpm.flush_pages()?;
        Ok(())
    }

    /// Deleting keys is not supported.
    pub fn remove(&mut self, _key: &K) -> Result<()> {
        Err(HiveError::NotImplemented("B+Tree deletion"))
    }

    /// Iterates over every entry in key order.
    pub fn iter(&self) -> Result<BTreeIterator<K, V>> {
        if self.is_empty() {
            return Ok(BTreeIterator::empty(Arc::clone(&self.bpm)));
        }
        let (page_id, index) = self.find_leaf(None)?;
        Ok(BTreeIterator::new(Arc::clone(&self.bpm), page_id, index, None))
    }

    /// Returns the entries with `start <= key <= end` in key order.
    pub fn range_scan(&self, start: &K, end: &K) -> Result<Vec<(K, V)>> {
        if self.is_empty() || start > end {
            return Ok(Vec::new());
        }
        let (page_id, index) = self.find_leaf(Some(start))?;
        BTreeIterator::new(Arc::clone(&self.bpm), page_id, index, Some(*end)).collect()
    }

    /// Renders every node breadth-first, one line per node.
    pub fn dump_contents(&self) -> Result<String> {
        self.check_not_empty()?;

        let mut out = String::new();
        let mut queue = VecDeque::from([(self.root_page_id, 0usize)]);

        while let Some((page_id, depth)) = queue.pop_front() {
            let guard = self.bpm.fetch_page_read(page_id)?;
            let node = BTreeNode::<_, K, V>::decode(guard.data())?;

            if let BTreeNode::Inner(inner) = &node {
                for i in 0..inner.size() {
                    queue.push_back((inner.child_at(i)?, depth + 1));
                }
            }

            let line = format!("[level {}] page {}: {:?}", depth, page_id.as_i64(), node);
            tracing::debug!("{}", line);
            let _ = writeln!(out, "{}", line);
        }

        Ok(out)
    }

    fn start_new_tree(&mut self, key: K, value: V) -> Result<()> {
        let root_page_id = self.bpm.allocate_page();
        {
            let mut guard = self.bpm.fetch_page_write(root_page_id)?;
            let mut leaf = LeafPage::<_, K, V>::new(guard.data_mut());
            leaf.init(self.leaf_max_size)?;
            leaf.insert(key, value)?;
        }
        self.bpm.flush_page(root_page_id)?;

        tracing::debug!(page_id = root_page_id.as_i64(), "started new tree");
        self.root_page_id = root_page_id;
        Ok(())
    }

    /// Counts the pages inserting `key` will allocate and releases the
    /// ancestors in `path` that the insert cannot modify.
    fn plan_splits(
        leaf_guard: &WritePageGuard,
        key: &K,
        path: &mut Vec<(WritePageGuard, usize)>,
    ) -> Result<usize> {
        let leaf_splits = {
            let leaf = LeafPage::<_, K, V>::new(leaf_guard.data());
            leaf.search(key)?.is_err() && leaf.size() + 1 >= leaf.max_size()
        };
        if !leaf_splits {
            path.clear();
            return Ok(0);
        }

        let mut new_pages = 1;
        for depth in (0..path.len()).rev() {
            let absorbs_split = {
                let parent = InnerPage::<_, K>::new(path[depth].0.data());
                parent.size() + 1 < parent.max_size()
            };
            if absorbs_split {
                path.drain(..depth);
                return Ok(new_pages);
            }
            new_pages += 1;
        }

        // The split reaches the root, which needs a new parent
        Ok(new_pages + 1)
    }

    fn split_leaf(
        &self,
        leaf: &mut LeafPage<&mut [u8], K, V>,
        leaf_page_id: PageId,
        mut right_guard: WritePageGuard,
    ) -> Result<(K, PageId)> {
        let right_page_id = right_guard.page_id();
        let mut right = LeafPage::<_, K, V>::new(right_guard.data_mut());
        right.init(self.leaf_max_size)?;

        let separator = leaf.split_into(&mut right, right_page_id)?;
        tracing::debug!(
            left = leaf_page_id.as_i64(),
            right = right_page_id.as_i64(),
            separator = ?separator,
            "split leaf"
        );
        Ok((separator, right_page_id))
    }

    fn split_inner(
        &self,
        inner: &mut InnerPage<&mut [u8], K>,
        inner_page_id: PageId,
        mut right_guard: WritePageGuard,
    ) -> Result<(K, PageId)> {
        let right_page_id = right_guard.page_id();
        let mut right = InnerPage::<_, K>::new(right_guard.data_mut());
        right.init(self.inner_max_size, inner_page_id)?;

        let promoted = inner.split_into(&mut right, inner_page_id)?;
        tracing::debug!(
            left = inner_page_id.as_i64(),
            right = right_page_id.as_i64(),
            promoted = ?promoted,
            "split inner node"
        );
        Ok((promoted, right_page_id))
    }

    fn grow_root(
        &mut self,
        separator: K,
        right_page_id: PageId,
        mut guard: WritePageGuard,
    ) -> Result<()> {
        let new_root_id = guard.page_id();
        {
            let mut root = InnerPage::<_, K>::new(guard.data_mut());
            root.init(self.inner_max_size, INVALID_PAGE_ID)?;
            root.populate_new_root(self.root_page_id, separator, right_page_id)?;
        }
        drop(guard);

        tracing::debug!(
            old_root = self.root_page_id.as_i64(),
            new_root = new_root_id.as_i64(),
            "grew tree"
        );
        self.root_page_id = new_root_id;
        Ok(())
    }
}

fn take_reserved(reserved: &mut impl Iterator<Item = WritePageGuard>) -> Result<WritePageGuard> {
    reserved
        .next()
        .ok_or_else(|| HiveError::InvariantViolation("no page reserved for split".to_string()))
}
