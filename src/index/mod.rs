pub mod btree_index;
pub mod btree_iterator;
pub mod btree_page;
pub mod key;

pub use btree_index::BPlusTree;
pub use btree_iterator::BTreeIterator;
pub use btree_page::{inner_capacity, leaf_capacity, BTreeNode, InnerPage, LeafPage, NodeKind};
pub use key::{IndexKey, IndexValue, PageCodec};
