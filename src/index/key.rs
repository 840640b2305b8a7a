use std::fmt::Debug;

use bytes::{Buf, BufMut};

use crate::common::{PageId, INVALID_PAGE_ID};

/// Fixed-width little-endian encoding of a value inside a node page.
pub trait PageCodec: Sized {
    /// Number of bytes one encoded value occupies.
    const ENCODED_SIZE: usize;

    /// Filler for unused slots and the trailing key of inner nodes. Never
    /// compared against real keys.
    fn invalid_sentinel() -> Self;

    /// Writes the value into the first `ENCODED_SIZE` bytes of `out`.
    fn encode(&self, out: &mut [u8]);

    /// Reads a value from the first `ENCODED_SIZE` bytes of `bytes`.
    fn decode(bytes: &[u8]) -> Self;
}

/// Keys stored in a B+Tree.
pub trait IndexKey: PageCodec + Ord + Copy + Debug {}

/// Values stored in B+Tree leaves.
pub trait IndexValue: PageCodec + Copy + Debug {}

impl<T: PageCodec + Ord + Copy + Debug> IndexKey for T {}
impl<T: PageCodec + Copy + Debug> IndexValue for T {}

macro_rules! impl_page_codec {
    ($($ty:ty => $sentinel:expr, $put:ident, $get:ident;)*) => {
        $(
            impl PageCodec for $ty {
                const ENCODED_SIZE: usize = std::mem::size_of::<$ty>();

                fn invalid_sentinel() -> Self {
                    $sentinel
                }

                fn encode(&self, out: &mut [u8]) {
                    let mut buf = out;
                    buf.$put(*self);
                }

                fn decode(bytes: &[u8]) -> Self {
                    let mut buf = bytes;
                    buf.$get()
                }
            }
        )*
    };
}

impl_page_codec! {
    i32 => i32::MIN, put_i32_le, get_i32_le;
    i64 => i64::MIN, put_i64_le, get_i64_le;
    u32 => u32::MAX, put_u32_le, get_u32_le;
    u64 => u64::MAX, put_u64_le, get_u64_le;
}

impl PageCodec for PageId {
    const ENCODED_SIZE: usize = 8;

    fn invalid_sentinel() -> Self {
        INVALID_PAGE_ID
    }

    fn encode(&self, out: &mut [u8]) {
        self.as_i64().encode(out)
    }

    fn decode(bytes: &[u8]) -> Self {
        PageId::new(i64::decode(bytes))
    }
}
