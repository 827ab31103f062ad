//! Reads numbered `blkNNNNN.dat` files from the configured blocks
//! directory, validating the network magic ahead of every record and
//! exposing lazy [`block::BlockData`] deserialization by `(file_id, offset)`
//! (spec §4.3, §6).

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::BytesMut;

use bdv_chain::{block, parameters::Network};

use crate::error::{Error, Result};

/// One `blkNNNNN.dat` file's path and numeric id, in ascending order.
#[derive(Clone, Debug)]
pub struct BlockFile {
    pub file_id: u32,
    pub path: PathBuf,
}

/// Lists every `blk*.dat` file under `blocks_dir`, ordered by numeric
/// suffix (spec §4.3 step 1 "enumerate files").
pub fn enumerate_block_files(blocks_dir: &Path) -> Result<Vec<BlockFile>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(blocks_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(digits) = name.strip_prefix("blk").and_then(|s| s.strip_suffix(".dat")) {
            if let Ok(file_id) = digits.parse::<u32>() {
                files.push(BlockFile {
                    file_id,
                    path: entry.path(),
                });
            }
        }
    }
    files.sort_by_key(|f| f.file_id);
    Ok(files)
}

/// A single parsed record: the magic-validated, length-prefixed block plus
/// where it was found on disk.
pub struct ParsedRecord {
    pub block_data: block::BlockData,
}

/// Reads every well-formed `magic ‖ length(4B LE) ‖ block` record out of a
/// single block file.
///
/// A short, magic-less tail is a truncated file: parsing stops there and
/// what was already parsed is returned (spec §4.3 "truncated file").
/// A corrupted magic mid-file triggers a forward byte-scan to the next
/// magic occurrence before resuming, rather than aborting the whole file.
pub struct BlockFileReader {
    file_id: u32,
    network: Network,
    data: Vec<u8>,
}

impl BlockFileReader {
    pub fn open(file: &BlockFile, network: Network) -> Result<Self> {
        let mut handle = fs::File::open(&file.path)?;
        let mut data = Vec::new();
        handle.seek(SeekFrom::Start(0))?;
        handle.read_to_end(&mut data)?;
        Ok(BlockFileReader {
            file_id: file.file_id,
            network,
            data,
        })
    }

    /// Parses every block record in this file, in file order.
    pub fn parse_all(&self) -> Vec<ParsedRecord> {
        let magic = self.network.magic();
        let mut records = Vec::new();
        let mut offset = 0usize;

        while offset < self.data.len() {
            if offset + magic.len() > self.data.len() {
                tracing::debug!(file_id = self.file_id, offset, "truncated tail, stopping");
                break;
            }

            if self.data[offset..offset + magic.len()] != magic {
                match self.find_next_magic(offset + 1, &magic) {
                    Some(next) => {
                        tracing::warn!(
                            file_id = self.file_id,
                            from = offset,
                            to = next,
                            "missing magic mid-file, scanning forward"
                        );
                        offset = next;
                        continue;
                    }
                    None => break,
                }
            }

            let header_len = magic.len() + 4;
            if offset + header_len > self.data.len() {
                break;
            }
            let len_bytes = &self.data[offset + magic.len()..offset + header_len];
            let record_len =
                u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;

            let body_start = offset + header_len;
            let body_end = body_start + record_len;
            if body_end > self.data.len() {
                tracing::debug!(file_id = self.file_id, offset, "truncated final record");
                break;
            }

            let mut body = BytesMut::from(&self.data[body_start..body_end]);
            match block::Block::deserialize_from_buf(&mut body) {
                Ok(parsed) => records.push(ParsedRecord {
                    block_data: block::BlockData {
                        block: Arc::new(parsed),
                        file_id: self.file_id,
                        offset: body_start as u64,
                        size: record_len as u32,
                    },
                }),
                Err(error) => {
                    tracing::warn!(file_id = self.file_id, offset, %error, "failed to parse block record");
                }
            }

            offset = body_end;
        }

        records
    }

    /// Re-reads a single block from its recorded `(file_id, offset)`
    /// without re-scanning the whole file.
    pub fn read_at(&self, offset: u64, size: u32) -> Result<block::Block> {
        let start = offset as usize;
        let end = start + size as usize;
        if end > self.data.len() {
            return Err(Error::MissingBlockFile(self.file_id));
        }
        let mut body = BytesMut::from(&self.data[start..end]);
        block::Block::deserialize_from_buf(&mut body).map_err(|_| Error::MissingBlockFile(self.file_id))
    }

    fn find_next_magic(&self, from: usize, magic: &[u8; 4]) -> Option<usize> {
        if from >= self.data.len() {
            return None;
        }
        self.data[from..]
            .windows(magic.len())
            .position(|window| window == magic)
            .map(|pos| from + pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_block_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn enumerate_orders_by_numeric_suffix() {
        let dir = tempdir::TempDir::new("bdv-blocks").unwrap();
        write_block_file(dir.path(), "blk00010.dat", b"");
        write_block_file(dir.path(), "blk00002.dat", b"");
        write_block_file(dir.path(), "not-a-block-file.txt", b"");

        let files = enumerate_block_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].file_id, 2);
        assert_eq!(files[1].file_id, 10);
    }

    #[test]
    fn stops_cleanly_on_truncated_tail() {
        let dir = tempdir::TempDir::new("bdv-blocks").unwrap();
        let magic = Network::Regtest.magic();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&magic);
        bytes.push(0xff); // truncated length field
        write_block_file(dir.path(), "blk00000.dat", &bytes);

        let files = enumerate_block_files(dir.path()).unwrap();
        let reader = BlockFileReader::open(&files[0], Network::Regtest).unwrap();
        let records = reader.parse_all();
        assert!(records.is_empty());
    }
}
