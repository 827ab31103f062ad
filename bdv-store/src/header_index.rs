//! The in-memory blockchain header index (spec §4.2, §9 design note):
//! every header ever seen, organized into a main chain plus side branches,
//! queryable by hash, height, or a monotonic internal id.

use std::collections::{BTreeMap, HashMap};

use bdv_chain::block;

use crate::error::{Error, Result};

/// The result of re-running [`HeaderIndex::organize`]: which branch is now
/// the main chain, and how far back it diverges from the previous main
/// chain (spec §4.2, §4.4 "reorg").
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReorganizationState {
    /// Whether the previously-recorded main-chain tip is still on the main
    /// chain after this `organize` call.
    pub prev_top_still_valid: bool,
    /// The highest height shared by the old and new main chains. Reorg
    /// consumers rescan/undo everything above this height.
    pub branch_point: block::Height,
    /// The new main-chain tip.
    pub new_top: u32,
}

struct Entry {
    header: block::Header,
    height: block::Height,
    dup_id: u8,
    cumulative_work: u128,
    on_main_chain: bool,
}

/// Every header ever admitted, with O(1) lookup by hash, height+dupId, or
/// internal id, and an ordered `(height, dupId)` index for branch queries
/// (spec §9 design note).
#[derive(Default)]
pub struct HeaderIndex {
    by_id: HashMap<u32, Entry>,
    id_by_hash: HashMap<block::Hash, u32>,
    id_by_height: BTreeMap<(block::Height, u8), u32>,
    next_id: u32,
    main_chain_top: Option<u32>,
}

impl HeaderIndex {
    pub fn new() -> Self {
        HeaderIndex::default()
    }

    /// Adds a batch of headers, most-common case being a contiguous run
    /// received from a peer's `headers` message (spec §4.2, §4.3 step 2).
    /// Headers whose parent isn't yet indexed are rejected as out of order;
    /// `dupId` is assigned by how many siblings already occupy that height.
    pub fn add_headers_bulk(&mut self, headers: &[block::Header]) -> Result<Vec<u32>> {
        let mut ids = Vec::with_capacity(headers.len());
        for header in headers {
            ids.push(self.add_header(*header)?);
        }
        Ok(ids)
    }

    fn add_header(&mut self, header: block::Header) -> Result<u32> {
        let hash = block::Hash::from(&header);
        if let Some(&existing) = self.id_by_hash.get(&hash) {
            return Ok(existing);
        }

        let height = if self.by_id.is_empty() {
            block::Height::MIN
        } else {
            let parent_id = *self
                .id_by_hash
                .get(&header.previous_block_hash)
                .ok_or(Error::MissingHeader(header.previous_block_hash))?;
            let parent = &self.by_id[&parent_id];
            block::Height(parent.height.0 + 1)
        };

        let dup_id = self
            .id_by_height
            .range((height, 0)..=(height, u8::MAX))
            .count() as u8;

        let cumulative_work = self.cumulative_work_for(&header, height);

        let id = self.next_id;
        self.next_id += 1;
        self.by_id.insert(
            id,
            Entry {
                header,
                height,
                dup_id,
                cumulative_work,
                on_main_chain: false,
            },
        );
        self.id_by_hash.insert(hash, id);
        self.id_by_height.insert((height, dup_id), id);
        Ok(id)
    }

    /// Re-admits a header that was already assigned `uid`/`dupId` by a
    /// previous process (spec §4.2, §4.3 step 2 "stream-load all
    /// HEADERS-table entries"). Unlike [`HeaderIndex::add_header`], this
    /// never recomputes either value, and does not require the parent to
    /// already be indexed — callers are expected to restore in ascending
    /// `uid` order, but the secondary indexes are consistent regardless of
    /// order since every field is taken from the persisted record.
    pub fn restore_header(&mut self, header: block::Header, height: block::Height, dup_id: u8, uid: u32) {
        let hash = block::Hash::from(&header);
        let cumulative_work = self.cumulative_work_for(&header, height);
        self.by_id.insert(
            uid,
            Entry {
                header,
                height,
                dup_id,
                cumulative_work,
                on_main_chain: false,
            },
        );
        self.id_by_hash.insert(hash, uid);
        self.id_by_height.insert((height, dup_id), uid);
        self.next_id = self.next_id.max(uid + 1);
    }

    fn cumulative_work_for(&self, header: &block::Header, height: block::Height) -> u128 {
        let this_work = header.difficulty_threshold.approx_work();
        if height == block::Height::MIN {
            return this_work;
        }
        let parent_id = self.id_by_hash[&header.previous_block_hash];
        self.by_id[&parent_id].cumulative_work + this_work
    }

    /// Recomputes which branch is the main chain by maximum cumulative
    /// difficulty, tiebreaking by hash ordering (spec §4.2). Returns the
    /// reorg state describing what changed relative to the previous call.
    pub fn organize(&mut self) -> ReorganizationState {
        let prev_top = self.main_chain_top;

        let new_top_id = self
            .by_id
            .iter()
            .max_by(|(a_id, a), (b_id, b)| {
                a.cumulative_work
                    .cmp(&b.cumulative_work)
                    .then_with(|| self.hash_of(**a_id).cmp(&self.hash_of(**b_id)))
            })
            .map(|(id, _)| *id);

        let branch_point = match (prev_top, new_top_id) {
            (Some(prev), Some(new)) if prev != new => self.common_ancestor_height(prev, new),
            _ => self
                .main_chain_top
                .map(|id| self.by_id[&id].height)
                .unwrap_or(block::Height::MIN),
        };

        for entry in self.by_id.values_mut() {
            entry.on_main_chain = false;
        }
        if let Some(top) = new_top_id {
            let mut cursor = Some(top);
            while let Some(id) = cursor {
                let hash = {
                    let entry = self.by_id.get_mut(&id).expect("id from by_id");
                    entry.on_main_chain = true;
                    entry.header.previous_block_hash
                };
                cursor = self.id_by_hash.get(&hash).copied();
            }
        }

        self.main_chain_top = new_top_id;

        ReorganizationState {
            prev_top_still_valid: prev_top.is_none() || prev_top == new_top_id,
            branch_point,
            new_top: new_top_id.unwrap_or(0),
        }
    }

    fn common_ancestor_height(&self, a: u32, b: u32) -> block::Height {
        let mut a_chain: HashMap<block::Hash, block::Height> = HashMap::new();
        let mut cursor = Some(a);
        while let Some(id) = cursor {
            let entry = &self.by_id[&id];
            let hash = self.hash_of(id);
            a_chain.insert(hash, entry.height);
            cursor = self.id_by_hash.get(&entry.header.previous_block_hash).copied();
        }

        let mut cursor = Some(b);
        while let Some(id) = cursor {
            let entry = &self.by_id[&id];
            let hash = self.hash_of(id);
            if let Some(height) = a_chain.get(&hash) {
                return *height;
            }
            cursor = self.id_by_hash.get(&entry.header.previous_block_hash).copied();
        }
        block::Height::MIN
    }

    fn hash_of(&self, id: u32) -> block::Hash {
        block::Hash::from(&self.by_id[&id].header)
    }

    pub fn header_by_hash(&self, hash: &block::Hash) -> Option<&block::Header> {
        self.id_by_hash.get(hash).map(|id| &self.by_id[id].header)
    }

    /// The internal id a header was assigned at first encounter, or
    /// restored with by [`HeaderIndex::restore_header`] (spec §4.2).
    pub fn uid_by_hash(&self, hash: &block::Hash) -> Option<u32> {
        self.id_by_hash.get(hash).copied()
    }

    /// The main-chain header at `height`, if the main chain reaches that
    /// far, alongside its internal id.
    pub fn main_chain_header_at(&self, height: block::Height) -> Option<(u32, &block::Header)> {
        self.id_by_height
            .range((height, 0)..=(height, u8::MAX))
            .map(|(_, id)| *id)
            .find(|id| self.by_id[id].on_main_chain)
            .map(|id| (id, &self.by_id[&id].header))
    }

    pub fn header_by_height(&self, height: block::Height, dup_id: u8) -> Option<&block::Header> {
        self.id_by_height
            .get(&(height, dup_id))
            .map(|id| &self.by_id[id].header)
    }

    pub fn header_by_id(&self, id: u32) -> Option<&block::Header> {
        self.by_id.get(&id).map(|e| &e.header)
    }

    pub fn is_on_main_chain(&self, id: u32) -> bool {
        self.by_id.get(&id).map(|e| e.on_main_chain).unwrap_or(false)
    }

    pub fn dup_id_of(&self, id: u32) -> Option<u8> {
        self.by_id.get(&id).map(|e| e.dup_id)
    }

    pub fn height_of(&self, id: u32) -> Option<block::Height> {
        self.by_id.get(&id).map(|e| e.height)
    }

    pub fn main_chain_tip(&self) -> Option<(u32, block::Height)> {
        self.main_chain_top.map(|id| (id, self.by_id[&id].height))
    }

    /// The valid `dupId` for each height on the current main chain, and the
    /// corresponding internal id, persisted to the HEADERS table's
    /// DB-info-adjacent rows by the caller (spec §4.2
    /// `update_branching_maps`).
    pub fn update_branching_maps(&self) -> Vec<(block::Height, u8, u32)> {
        self.by_id
            .iter()
            .filter(|(_, entry)| entry.on_main_chain)
            .map(|(id, entry)| (entry.height, entry.dup_id, *id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn header(prev: block::Hash, nonce: u32) -> block::Header {
        block::Header::new(
            1,
            prev,
            bdv_chain::block::merkle::Root([0u8; 32]),
            Utc.timestamp(1_600_000_000, 0),
            bdv_chain::work::difficulty::CompactDifficulty(0x1d00ffff),
            nonce,
        )
    }

    #[test]
    fn builds_a_linear_chain_and_reports_the_tip() {
        let mut index = HeaderIndex::new();
        let genesis = header(block::Hash([0u8; 32]), 0);
        let genesis_hash = block::Hash::from(&genesis);
        let child = header(genesis_hash, 1);
        let child_hash = block::Hash::from(&child);

        let ids = index.add_headers_bulk(&[genesis, child]).unwrap();
        let state = index.organize();

        assert_eq!(state.new_top, ids[1]);
        assert_eq!(index.header_by_hash(&child_hash).unwrap(), &child);
        assert_eq!(index.height_of(ids[1]), Some(block::Height(1)));
        assert!(index.is_on_main_chain(ids[1]));
        assert!(index.is_on_main_chain(ids[0]));
    }

    #[test]
    fn rejects_a_header_whose_parent_is_unknown() {
        let mut index = HeaderIndex::new();
        let genesis = header(block::Hash([0u8; 32]), 0);
        index.add_headers_bulk(&[genesis]).unwrap();

        let orphan = header(block::Hash([9u8; 32]), 0);
        let result = index.add_headers_bulk(&[orphan]);
        assert!(result.is_err());
    }
}
