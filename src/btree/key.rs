//! # Index Keys
//!
//! The tree is generic over its key type. A key must be a fixed-size,
//! totally ordered `Copy` value that zerocopy can move in and out of page
//! bytes - integers and fixed byte arrays qualify. Comparison happens on
//! the decoded value, so native integers order numerically regardless of
//! their byte encoding.

use std::fmt::Debug;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub trait IndexKey:
    Copy
    + Ord
    + Default
    + Debug
    + Send
    + Sync
    + FromBytes
    + IntoBytes
    + Immutable
    + KnownLayout
    + 'static
{
}

impl<T> IndexKey for T where
    T: Copy
        + Ord
        + Default
        + Debug
        + Send
        + Sync
        + FromBytes
        + IntoBytes
        + Immutable
        + KnownLayout
        + 'static
{
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_index_key<K: IndexKey>() {}

    #[test]
    fn integer_keys_qualify() {
        assert_index_key::<i32>();
        assert_index_key::<i64>();
        assert_index_key::<u32>();
        assert_index_key::<u64>();
        assert_index_key::<[u8; 16]>();
    }
}
