use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{HiveError, PageId, Result, INVALID_PAGE_ID};

use super::btree_page::BTreeNode;
use super::key::{IndexKey, IndexValue};

/// Walks leaf entries in key order by following the sibling links.
///
/// No page stays pinned between calls; each step takes a read guard on the
/// current leaf and drops it before returning.
pub struct BTreeIterator<K, V> {
    bpm: Arc<BufferPoolManager>,
    current_page_id: PageId,
    current_index: usize,
    /// Inclusive upper bound
    end_key: Option<K>,
    _marker: PhantomData<fn() -> V>,
}

impl<K: IndexKey, V: IndexValue> BTreeIterator<K, V> {
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        start_page_id: PageId,
        start_index: usize,
        end_key: Option<K>,
    ) -> Self {
        Self {
            bpm,
            current_page_id: start_page_id,
            current_index: start_index,
            end_key,
            _marker: PhantomData,
        }
    }

    /// An iterator that yields nothing.
    pub(crate) fn empty(bpm: Arc<BufferPoolManager>) -> Self {
        Self::new(bpm, INVALID_PAGE_ID, 0, None)
    }

    pub fn next_entry(&mut self) -> Result<Option<(K, V)>> {
        while self.current_page_id.is_valid() {
            let next_page = {
                let guard = self.bpm.fetch_page_read(self.current_page_id)?;
                let leaf = match BTreeNode::<_, K, V>::decode(guard.data())? {
                    BTreeNode::Leaf(leaf) => leaf,
                    BTreeNode::Inner(_) => {
                        return Err(HiveError::InvariantViolation(format!(
                            "leaf chain reached inner node {}",
                            self.current_page_id
                        )))
                    }
                };

                if self.current_index < leaf.size() {
                    let key = leaf.key_at(self.current_index)?;

                    if self.end_key.is_some_and(|end| key > end) {
                        self.current_page_id = INVALID_PAGE_ID;
                        return Ok(None);
                    }

                    let value = leaf.value_at(self.current_index)?;
                    self.current_index += 1;
                    return Ok(Some((key, value)));
                }

                leaf.next_page_id()
            };

            self.current_page_id = next_page;
            self.current_index = 0;
        }

        Ok(None)
    }
}

impl<K: IndexKey, V: IndexValue> Iterator for BTreeIterator<K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.current_page_id = INVALID_PAGE_ID;
                Some(Err(e))
            }
        }
    }
}
