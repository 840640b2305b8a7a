//! Typed views over the bytes of a B+Tree node page.
//!
//! Both node kinds share a 32-byte header:
//!
//! ```text
//! [kind 8B][current_size 8B][max_size 8B][link 8B]
//! ```
//!
//! followed by `max_size` key slots and `max_size` value slots. For leaves the
//! link is the next sibling and values are `V`; for inner nodes the link is
//! the left sibling the node was split from and values are child page ids.
//! All integers are little-endian.

use std::fmt;
use std::marker::PhantomData;

use bytes::{Buf, BufMut};

use crate::common::{HiveError, PageId, Result, INVALID_PAGE_ID, NODE_HEADER_SIZE, PAGE_SIZE};

use super::key::{IndexKey, IndexValue, PageCodec};

const KIND_OFFSET: usize = 0;
const SIZE_OFFSET: usize = 8;
const MAX_SIZE_OFFSET: usize = 16;
const LINK_OFFSET: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Inner,
}

impl NodeKind {
    fn tag(self) -> u64 {
        match self {
            NodeKind::Leaf => 0,
            NodeKind::Inner => 1,
        }
    }
}

/// Most entries a leaf with these key and value types can hold.
pub fn leaf_capacity<K: PageCodec, V: PageCodec>() -> usize {
    (PAGE_SIZE - NODE_HEADER_SIZE) / (K::ENCODED_SIZE + V::ENCODED_SIZE)
}

/// Most children an inner node with this key type can hold.
pub fn inner_capacity<K: PageCodec>() -> usize {
    (PAGE_SIZE - NODE_HEADER_SIZE) / (K::ENCODED_SIZE + PageId::ENCODED_SIZE)
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut buf = &data[offset..offset + 8];
    buf.get_u64_le()
}

fn write_u64(data: &mut [u8], offset: usize, value: u64) {
    let mut buf = &mut data[offset..offset + 8];
    buf.put_u64_le(value);
}

fn read_kind(data: &[u8]) -> Result<NodeKind> {
    match read_u64(data, KIND_OFFSET) {
        0 => Ok(NodeKind::Leaf),
        1 => Ok(NodeKind::Inner),
        tag => Err(HiveError::InvariantViolation(format!(
            "unknown node kind tag {}",
            tag
        ))),
    }
}

fn check_max_size(max_size: usize, capacity: usize) -> Result<()> {
    if max_size == 0 || max_size > capacity {
        return Err(HiveError::InvalidArgument(format!(
            "node max size {} must be between 1 and {}",
            max_size, capacity
        )));
    }
    Ok(())
}

/// Slot accessors shared by both node kinds: keys of type `K` and values of
/// type `W`, each array `max_size` slots long.
struct Slots<K, W> {
    capacity: usize,
    _marker: PhantomData<fn() -> (K, W)>,
}

impl<K: PageCodec, W: PageCodec> Slots<K, W> {
    fn new() -> Self {
        Self {
            capacity: (PAGE_SIZE - NODE_HEADER_SIZE) / (K::ENCODED_SIZE + W::ENCODED_SIZE),
            _marker: PhantomData,
        }
    }

    fn max_size(&self, data: &[u8]) -> usize {
        read_u64(data, MAX_SIZE_OFFSET) as usize
    }

    fn check(&self, data: &[u8], index: usize) -> Result<usize> {
        let max = self.max_size(data);
        if index >= max || index >= self.capacity {
            return Err(HiveError::SlotOutOfBounds { index, max });
        }
        Ok(max)
    }

    fn key_offset(index: usize) -> usize {
        NODE_HEADER_SIZE + index * K::ENCODED_SIZE
    }

    fn value_offset(max: usize, index: usize) -> usize {
        NODE_HEADER_SIZE + max * K::ENCODED_SIZE + index * W::ENCODED_SIZE
    }

    fn key_at(&self, data: &[u8], index: usize) -> Result<K> {
        self.check(data, index)?;
        Ok(K::decode(&data[Self::key_offset(index)..]))
    }

    fn value_at(&self, data: &[u8], index: usize) -> Result<W> {
        let max = self.check(data, index)?;
        Ok(W::decode(&data[Self::value_offset(max, index)..]))
    }

    fn set_key_at(&self, data: &mut [u8], index: usize, key: &K) -> Result<()> {
        self.check(data, index)?;
        key.encode(&mut data[Self::key_offset(index)..]);
        Ok(())
    }

    fn set_value_at(&self, data: &mut [u8], index: usize, value: &W) -> Result<()> {
        let max = self.check(data, index)?;
        value.encode(&mut data[Self::value_offset(max, index)..]);
        Ok(())
    }

    /// Writes a fresh header and fills every slot with sentinels.
    fn init(&self, data: &mut [u8], kind: NodeKind, max_size: usize, link: PageId) -> Result<()> {
        check_max_size(max_size, self.capacity)?;

        write_u64(data, KIND_OFFSET, kind.tag());
        write_u64(data, SIZE_OFFSET, 0);
        write_u64(data, MAX_SIZE_OFFSET, max_size as u64);
        write_u64(data, LINK_OFFSET, link.as_i64() as u64);

        for i in 0..max_size {
            self.set_key_at(data, i, &K::invalid_sentinel())?;
            self.set_value_at(data, i, &W::invalid_sentinel())?;
        }
        Ok(())
    }

    /// Copies slot `from` to slot `to`, keys and values together.
    fn move_slot(&self, data: &mut [u8], from: usize, to: usize) -> Result<()> {
        let key = self.key_at(data, from)?;
        let value = self.value_at(data, from)?;
        self.set_key_at(data, to, &key)?;
        self.set_value_at(data, to, &value)
    }

    fn clear_slot(&self, data: &mut [u8], index: usize) -> Result<()> {
        self.set_key_at(data, index, &K::invalid_sentinel())?;
        self.set_value_at(data, index, &W::invalid_sentinel())
    }
}

/// A leaf node: sorted keys with their values and a link to the next leaf.
pub struct LeafPage<B, K, V> {
    data: B,
    slots: Slots<K, V>,
}

impl<B: AsRef<[u8]>, K: IndexKey, V: IndexValue> LeafPage<B, K, V> {
    pub fn new(data: B) -> Self {
        Self {
            data,
            slots: Slots::new(),
        }
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn size(&self) -> usize {
        read_u64(self.bytes(), SIZE_OFFSET) as usize
    }

    pub fn max_size(&self) -> usize {
        self.slots.max_size(self.bytes())
    }

    pub fn next_page_id(&self) -> PageId {
        PageId::new(read_u64(self.bytes(), LINK_OFFSET) as i64)
    }

    pub fn key_at(&self, index: usize) -> Result<K> {
        self.slots.key_at(self.bytes(), index)
    }

    pub fn value_at(&self, index: usize) -> Result<V> {
        self.slots.value_at(self.bytes(), index)
    }

    /// Binary search over the occupied slots. `Ok` holds the index of an
    /// exact match, `Err` the position where `key` would be inserted.
    pub fn search(&self, key: &K) -> Result<std::result::Result<usize, usize>> {
        let mut low = 0;
        let mut high = self.size();

        while low < high {
            let mid = low + (high - low) / 2;
            match self.key_at(mid)?.cmp(key) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(low))
    }

    /// Returns the value stored under `key`, if any.
    pub fn lookup(&self, key: &K) -> Result<Option<V>> {
        match self.search(key)? {
            Ok(index) => Ok(Some(self.value_at(index)?)),
            Err(_) => Ok(None),
        }
    }

    /// Returns the occupied entries in key order.
    pub fn entries(&self) -> Result<Vec<(K, V)>> {
        (0..self.size())
            .map(|i| Ok((self.key_at(i)?, self.value_at(i)?)))
            .collect()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>, K: IndexKey, V: IndexValue> LeafPage<B, K, V> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    /// Formats the page as an empty leaf holding up to `max_size` entries.
    pub fn init(&mut self, max_size: usize) -> Result<()> {
        let slots = Slots::<K, V>::new();
        slots.init(self.bytes_mut(), NodeKind::Leaf, max_size, INVALID_PAGE_ID)
    }

    fn set_size(&mut self, size: usize) {
        write_u64(self.bytes_mut(), SIZE_OFFSET, size as u64);
    }

    pub fn set_next_page_id(&mut self, page_id: PageId) {
        write_u64(self.bytes_mut(), LINK_OFFSET, page_id.as_i64() as u64);
    }

    pub fn set_key_at(&mut self, index: usize, key: &K) -> Result<()> {
        let slots = Slots::<K, V>::new();
        slots.set_key_at(self.bytes_mut(), index, key)
    }

    pub fn set_value_at(&mut self, index: usize, value: &V) -> Result<()> {
        let slots = Slots::<K, V>::new();
        slots.set_value_at(self.bytes_mut(), index, value)
    }

    /// Inserts `key` in sorted position, or replaces the value of an existing
    /// equal key. Returns true if a new entry was added.
    pub fn insert(&mut self, key: K, value: V) -> Result<bool> {
        let size = self.size();

        let pos = match self.search(&key)? {
            Ok(index) => {
                self.set_value_at(index, &value)?;
                return Ok(false);
            }
            Err(pos) => pos,
        };

        if size >= self.max_size() {
            return Err(HiveError::InvariantViolation(format!(
                "leaf is full ({} entries)",
                size
            )));
        }

        let slots = Slots::<K, V>::new();
        for i in (pos..size).rev() {
            slots.move_slot(self.bytes_mut(), i, i + 1)?;
        }
        self.set_key_at(pos, &key)?;
        self.set_value_at(pos, &value)?;
        self.set_size(size + 1);
        Ok(true)
    }

    /// Moves the upper half of the entries into `right`, which must be a
    /// freshly initialized leaf living at `right_page_id`, and links it in
    /// after this leaf. Returns the first key of `right`.
    pub fn split_into<R>(&mut self, right: &mut LeafPage<R, K, V>, right_page_id: PageId) -> Result<K>
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size();
        if size < 2 {
            return Err(HiveError::InvariantViolation(format!(
                "cannot split a leaf of {} entries",
                size
            )));
        }
        if right.size() != 0 || right.max_size() < size - size.div_ceil(2) {
            return Err(HiveError::InvariantViolation(
                "leaf split target must be empty and large enough".to_string(),
            ));
        }

        let keep = size.div_ceil(2);
        let slots = Slots::<K, V>::new();

        for (to, from) in (keep..size).enumerate() {
            right.set_key_at(to, &self.key_at(from)?)?;
            right.set_value_at(to, &self.value_at(from)?)?;
            slots.clear_slot(self.bytes_mut(), from)?;
        }
        right.set_size(size - keep);
        self.set_size(keep);

        right.set_next_page_id(self.next_page_id());
        self.set_next_page_id(right_page_id);

        right.key_at(0)
    }
}

impl<B: AsRef<[u8]>, K: IndexKey, V: IndexValue> fmt::Debug for LeafPage<B, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "leaf size={}/{} next={}",
            self.size(),
            self.max_size(),
            self.next_page_id().as_i64()
        )?;
        match self.entries() {
            Ok(entries) => {
                f.write_str(" [")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{:?}: {:?}", key, value)?;
                }
                f.write_str("]")
            }
            Err(e) => write!(f, " <{}>", e),
        }
    }
}

/// An inner node: `size` children separated by `size - 1` keys. The key slot
/// paired with the last child holds the sentinel.
///
/// Every key reachable through child `i` is below key `i`, and at or above
/// key `i - 1`.
pub struct InnerPage<B, K> {
    data: B,
    slots: Slots<K, PageId>,
}

impl<B: AsRef<[u8]>, K: IndexKey> InnerPage<B, K> {
    pub fn new(data: B) -> Self {
        Self {
            data,
            slots: Slots::new(),
        }
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Number of children.
    pub fn size(&self) -> usize {
        read_u64(self.bytes(), SIZE_OFFSET) as usize
    }

    pub fn max_size(&self) -> usize {
        self.slots.max_size(self.bytes())
    }

    pub fn previous_page_id(&self) -> PageId {
        PageId::new(read_u64(self.bytes(), LINK_OFFSET) as i64)
    }

    pub fn key_at(&self, index: usize) -> Result<K> {
        self.slots.key_at(self.bytes(), index)
    }

    pub fn child_at(&self, index: usize) -> Result<PageId> {
        self.slots.value_at(self.bytes(), index)
    }

    /// Index of the child whose subtree covers `key`: the first slot whose
    /// key is strictly greater, or the last child.
    pub fn child_index_for(&self, key: &K) -> Result<usize> {
        let size = self.size();
        if size == 0 {
            return Err(HiveError::InvariantViolation(
                "inner node has no children".to_string(),
            ));
        }

        // Only the first size - 1 keys are real
        let mut low = 0;
        let mut high = size - 1;
        while low < high {
            let mid = low + (high - low) / 2;
            if self.key_at(mid)? > *key {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        Ok(low)
    }

    /// Returns the separator keys (without the sentinel) and the children.
    pub fn entries(&self) -> Result<(Vec<K>, Vec<PageId>)> {
        let size = self.size();
        let keys = (0..size.saturating_sub(1))
            .map(|i| self.key_at(i))
            .collect::<Result<Vec<_>>>()?;
        let children = (0..size)
            .map(|i| self.child_at(i))
            .collect::<Result<Vec<_>>>()?;
        Ok((keys, children))
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>, K: IndexKey> InnerPage<B, K> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    /// Formats the page as an inner node with no children.
    pub fn init(&mut self, max_size: usize, previous_page_id: PageId) -> Result<()> {
        let slots = Slots::<K, PageId>::new();
        slots.init(self.bytes_mut(), NodeKind::Inner, max_size, previous_page_id)
    }

    /// Makes this freshly initialized node the root above a split: `left`
    /// holds keys below `separator`, `right` the rest.
    pub fn populate_new_root(&mut self, left: PageId, separator: K, right: PageId) -> Result<()> {
        if self.max_size() < 2 {
            return Err(HiveError::InvariantViolation(
                "root needs room for two children".to_string(),
            ));
        }
        self.set_key_at(0, &separator)?;
        self.set_child_at(0, left)?;
        self.set_key_at(1, &K::invalid_sentinel())?;
        self.set_child_at(1, right)?;
        self.set_size(2);
        Ok(())
    }

    fn set_size(&mut self, size: usize) {
        write_u64(self.bytes_mut(), SIZE_OFFSET, size as u64);
    }

    pub fn set_previous_page_id(&mut self, page_id: PageId) {
        write_u64(self.bytes_mut(), LINK_OFFSET, page_id.as_i64() as u64);
    }

    pub fn set_key_at(&mut self, index: usize, key: &K) -> Result<()> {
        let slots = Slots::<K, PageId>::new();
        slots.set_key_at(self.bytes_mut(), index, key)
    }

    pub fn set_child_at(&mut self, index: usize, child: PageId) -> Result<()> {
        let slots = Slots::<K, PageId>::new();
        slots.set_value_at(self.bytes_mut(), index, &child)
    }

    /// Records that child `index` split: its keys from `separator` upwards
    /// now live in `right`, which is placed immediately after it.
    pub fn insert_after(&mut self, index: usize, separator: K, right: PageId) -> Result<()> {
        let size = self.size();
        if index >= size {
            return Err(HiveError::SlotOutOfBounds { index, max: size });
        }
        if size >= self.max_size() {
            return Err(HiveError::InvariantViolation(format!(
                "inner node is full ({} children)",
                size
            )));
        }

        let slots = Slots::<K, PageId>::new();
        for i in (index + 1..size).rev() {
            slots.move_slot(self.bytes_mut(), i, i + 1)?;
        }

        // The old upper bound of the split child now bounds `right`
        let upper = self.key_at(index)?;
        self.set_key_at(index + 1, &upper)?;
        self.set_child_at(index + 1, right)?;
        self.set_key_at(index, &separator)?;
        self.set_size(size + 1);
        Ok(())
    }

    /// Moves the upper half of the children into `right`, which must be a
    /// freshly initialized inner node, and returns the key to push up to
    /// the parent. `left_page_id` is this node's own page id.
    pub fn split_into<R>(&mut self, right: &mut InnerPage<R, K>, left_page_id: PageId) -> Result<K>
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size();
        if size < 2 {
            return Err(HiveError::InvariantViolation(format!(
                "cannot split an inner node of {} children",
                size
            )));
        }
        let keep = size.div_ceil(2);
        if right.size() != 0 || right.max_size() < size - keep {
            return Err(HiveError::InvariantViolation(
                "inner split target must be empty and large enough".to_string(),
            ));
        }

        let promoted = self.key_at(keep - 1)?;
        let slots = Slots::<K, PageId>::new();

        for (to, from) in (keep..size).enumerate() {
            right.set_key_at(to, &self.key_at(from)?)?;
            right.set_child_at(to, self.child_at(from)?)?;
            slots.clear_slot(self.bytes_mut(), from)?;
        }
        self.set_key_at(keep - 1, &K::invalid_sentinel())?;

        right.set_size(size - keep);
        right.set_previous_page_id(left_page_id);
        self.set_size(keep);

        Ok(promoted)
    }
}

impl<B: AsRef<[u8]>, K: IndexKey> fmt::Debug for InnerPage<B, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inner size={}/{} prev={}",
            self.size(),
            self.max_size(),
            self.previous_page_id().as_i64()
        )?;
        match self.entries() {
            Ok((keys, children)) => {
                f.write_str(" [")?;
                for (i, child) in children.iter().enumerate() {
                    write!(f, "({})", child.as_i64())?;
                    if let Some(key) = keys.get(i) {
                        write!(f, " {:?} ", key)?;
                    }
                }
                f.write_str("]")
            }
            Err(e) => write!(f, " <{}>", e),
        }
    }
}

/// A node page, decoded once from its kind tag.
pub enum BTreeNode<B, K, V> {
    Leaf(LeafPage<B, K, V>),
    Inner(InnerPage<B, K>),
}

impl<B: AsRef<[u8]>, K: IndexKey, V: IndexValue> BTreeNode<B, K, V> {
    /// Interprets `data` according to its kind tag, rejecting headers that
    /// could not have been written by `init`.
    pub fn decode(data: B) -> Result<Self> {
        let bytes = data.as_ref();
        if bytes.len() != PAGE_SIZE {
            return Err(HiveError::InvalidArgument(format!(
                "node page must be {} bytes, got {}",
                PAGE_SIZE,
                bytes.len()
            )));
        }

        let kind = read_kind(bytes)?;
        let size = read_u64(bytes, SIZE_OFFSET) as usize;
        let max_size = read_u64(bytes, MAX_SIZE_OFFSET) as usize;
        let capacity = match kind {
            NodeKind::Leaf => leaf_capacity::<K, V>(),
            NodeKind::Inner => inner_capacity::<K>(),
        };
        if max_size == 0 || max_size > capacity || size > max_size {
            return Err(HiveError::InvariantViolation(format!(
                "corrupt {:?} node header: size {} max {}",
                kind, size, max_size
            )));
        }

        Ok(match kind {
            NodeKind::Leaf => BTreeNode::Leaf(LeafPage::new(data)),
            NodeKind::Inner => BTreeNode::Inner(InnerPage::new(data)),
        })
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            BTreeNode::Leaf(_) => NodeKind::Leaf,
            BTreeNode::Inner(_) => NodeKind::Inner,
        }
    }
}

impl<B: AsRef<[u8]>, K: IndexKey, V: IndexValue> fmt::Debug for BTreeNode<B, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BTreeNode::Leaf(leaf) => fmt::Debug::fmt(leaf, f),
            BTreeNode::Inner(inner) => fmt::Debug::fmt(inner, f),
        }
    }
}
