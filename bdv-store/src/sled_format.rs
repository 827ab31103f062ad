//! The `SledSerialize`/`SledDeserialize` trait trio and `sled::Tree`
//! extension methods, generalizing the byte-exact encode/decode every
//! record type in [`crate::records`] needs.
//!
//! Grounded on the teacher's `sled_state.rs` `zs_insert`/`zs_get` pattern:
//! a thin typed wrapper around `sled::Tree::insert`/`sled::Tree::get` so
//! call sites never touch raw bytes directly.

use bdv_chain::block;

use crate::error::Result;

/// Converts a record into the bytes stored at its key.
pub trait SledSerialize {
    fn sled_serialize(&self) -> Vec<u8>;
}

/// Recovers a record from the bytes read back from its key.
///
/// `height` is the record's `heightX`'s height component when the caller
/// has it on hand (recovered from the key rather than re-encoded into the
/// value, since [`crate::records::StoredHeader`] doesn't carry its own
/// height in its persisted bytes); records that don't need it ignore the
/// parameter.
pub trait SledDeserialize: Sized {
    fn sled_deserialize(height: block::Height, bytes: &[u8]) -> Result<Self>;
}

/// Blanket helper for records whose deserialization never needs the height
/// supplied by the key, letting call sites that don't have one on hand pass
/// a placeholder.
pub trait FromSled: SledDeserialize {
    fn from_sled(bytes: &[u8]) -> Result<Self> {
        Self::sled_deserialize(block::Height(0), bytes)
    }
}

impl<T: SledDeserialize> FromSled for T {}

/// Typed `sled::Tree` access, mirroring the teacher's `zs_insert`/`zs_get`
/// naming.
pub trait TreeExt {
    fn zs_insert<K, V>(&self, key: K, value: &V) -> Result<Option<sled::IVec>>
    where
        K: AsRef<[u8]>,
        V: SledSerialize;

    fn zs_get<V>(&self, key: impl AsRef<[u8]>, height: block::Height) -> Result<Option<V>>
    where
        V: SledDeserialize;

    fn zs_get_untyped<V>(&self, key: impl AsRef<[u8]>) -> Result<Option<V>>
    where
        V: FromSled;
}

impl TreeExt for sled::Tree {
    fn zs_insert<K, V>(&self, key: K, value: &V) -> Result<Option<sled::IVec>>
    where
        K: AsRef<[u8]>,
        V: SledSerialize,
    {
        Ok(self.insert(key, value.sled_serialize())?)
    }

    fn zs_get<V>(&self, key: impl AsRef<[u8]>, height: block::Height) -> Result<Option<V>>
    where
        V: SledDeserialize,
    {
        match self.get(key)? {
            Some(bytes) => Ok(Some(V::sled_deserialize(height, &bytes)?)),
            None => Ok(None),
        }
    }

    fn zs_get_untyped<V>(&self, key: impl AsRef<[u8]>) -> Result<Option<V>>
    where
        V: FromSled,
    {
        match self.get(key)? {
            Some(bytes) => Ok(Some(V::from_sled(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::SshRecord;

    #[test]
    fn round_trips_through_a_real_tree() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let tree = db.open_tree(b"TEST").unwrap();

        let record = SshRecord {
            txio_count: 3,
            total_unspent: 5_000,
            scanned_up_to: 100,
        };
        tree.zs_insert(b"k", &record).unwrap();
        let got: SshRecord = tree.zs_get_untyped(b"k").unwrap().unwrap();
        assert_eq!(got, record);
    }

    #[test]
    fn missing_key_returns_none() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let tree = db.open_tree(b"TEST").unwrap();
        let got: Option<SshRecord> = tree.zs_get_untyped(b"nope").unwrap();
        assert_eq!(got, None);
    }
}
