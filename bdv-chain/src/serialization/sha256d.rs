//! Double SHA-256 ("sha256d"), Bitcoin's block and transaction hash function.

use sha2::{Digest, Sha256};

/// A `std::io::Write` sink that accumulates a running sha256d digest,
/// so headers and transactions can be hashed while they're serialized
/// instead of re-reading the serialized bytes afterwards.
#[derive(Default)]
pub struct Writer(Sha256);

impl Writer {
    /// Consume the writer, returning the double-SHA256 digest of everything
    /// written to it.
    pub fn finish(self) -> [u8; 32] {
        let first = self.0.finalize();
        let second = Sha256::digest(&first[..]);
        let mut out = [0u8; 32];
        out.copy_from_slice(&second[..]);
        out
    }
}

impl std::io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// One-shot sha256d over a byte slice.
pub fn hash(bytes: &[u8]) -> [u8; 32] {
    let mut w = Writer::default();
    std::io::Write::write_all(&mut w, bytes).expect("writing to a Writer is infallible");
    w.finish()
}

/// The first four bytes of a sha256d digest, used as a P2P message checksum.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Checksum(pub [u8; 4]);

impl<'a> From<&'a [u8]> for Checksum {
    fn from(bytes: &'a [u8]) -> Self {
        let digest = hash(bytes);
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&digest[0..4]);
        Self(checksum)
    }
}
