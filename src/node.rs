//! Decoded representation of a single page.
//!
//! A `Node` is the in-memory form of a page: a header (type tag, used
//! length, next-page pointer) plus a typed list of entries. `LonelyRoot`
//! and `Leaf` hold `Record`s; `Root` and `Internal` hold `Reference`s;
//! `Overflow` holds one `OpaqueData` chunk; `Freelist` holds nothing but
//! the header's `next_page` link.

use crate::entry::{OpaqueData, Record, Reference, RecordValue};
use crate::error::{IndexError, LookupError, Result};
use crate::serializer::Serializer;
use crate::types::{NodeType, PageId, TreeConfig, NODE_HEADER_BYTES, NODE_TYPE_BYTES,
    PAGE_REFERENCE_BYTES, USED_PAGE_LENGTH_BYTES};
use crate::util::pairwise;

fn read_uint(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn write_uint(out: &mut Vec<u8>, value: u64, width: usize) {
    let bytes = value.to_le_bytes();
    out.extend_from_slice(&bytes[..width]);
}

/// The typed payload carried by a node, dispatched on `NodeType`.
#[derive(Debug, Clone)]
pub enum Entries<K> {
    Records(Vec<Record<K>>),
    References(Vec<Reference<K>>),
    Overflow(OpaqueData),
    Empty,
}

/// A decoded page.
#[derive(Debug, Clone)]
pub struct Node<K> {
    pub kind: NodeType,
    pub page: PageId,
    pub next_page: Option<PageId>,
    pub entries: Entries<K>,
}

impl<K: Ord + Clone> Node<K> {
    fn new(kind: NodeType, page: PageId) -> Self {
        let entries = match kind {
            NodeType::LonelyRoot | NodeType::Leaf => Entries::Records(Vec::new()),
            NodeType::Root | NodeType::Internal => Entries::References(Vec::new()),
            NodeType::Overflow => Entries::Overflow(OpaqueData::default()),
            NodeType::Freelist => Entries::Empty,
        };
        Self {
            kind,
            page,
            next_page: None,
            entries,
        }
    }

    pub fn new_lonely_root(page: PageId) -> Self {
        Self::new(NodeType::LonelyRoot, page)
    }

    pub fn new_leaf(page: PageId) -> Self {
        Self::new(NodeType::Leaf, page)
    }

    pub fn new_root(page: PageId) -> Self {
        Self::new(NodeType::Root, page)
    }

    pub fn new_internal(page: PageId) -> Self {
        Self::new(NodeType::Internal, page)
    }

    pub fn new_overflow(page: PageId) -> Self {
        Self::new(NodeType::Overflow, page)
    }

    pub fn new_freelist(page: PageId) -> Self {
        Self::new(NodeType::Freelist, page)
    }

    /// Convert a LonelyRoot that outgrew its single page into a Leaf on the
    /// same page, keeping its entries. Used when the first split happens.
    pub fn convert_lonely_root_to_leaf(&mut self) {
        assert_eq!(self.kind, NodeType::LonelyRoot);
        self.kind = NodeType::Leaf;
    }

    /// Convert a Root that outgrew its single page into an Internal node on
    /// the same page, keeping its references.
    pub fn convert_root_to_internal(&mut self) {
        assert_eq!(self.kind, NodeType::Root);
        self.kind = NodeType::Internal;
    }

    pub fn from_page_data(
        conf: &TreeConfig,
        serializer: &dyn Serializer<K>,
        data: &[u8],
        page: PageId,
    ) -> Result<Self> {
        if data.len() != conf.page_size {
            return Err(IndexError::corrupt(format!(
                "page is {} bytes, expected {}",
                data.len(),
                conf.page_size
            )));
        }

        let kind = NodeType::from_byte(data[0])
            .ok_or_else(|| IndexError::corrupt(format!("unknown node type tag {}", data[0])))?;

        let end_used_length = NODE_TYPE_BYTES + USED_PAGE_LENGTH_BYTES;
        let used_page_length = read_uint(&data[NODE_TYPE_BYTES..end_used_length]) as usize;

        let end_header = end_used_length + PAGE_REFERENCE_BYTES;
        let next_page_raw = read_uint(&data[end_used_length..end_header]) as u32;
        let next_page = if next_page_raw == 0 {
            None
        } else {
            Some(PageId::new(next_page_raw))
        };

        if used_page_length < NODE_HEADER_BYTES || used_page_length > conf.page_size {
            return Err(IndexError::corrupt(format!(
                "page {page} has implausible used length {used_page_length}"
            )));
        }

        let entries = match kind {
            NodeType::LonelyRoot | NodeType::Leaf => {
                let entry_len = Record::<K>::encoded_len(conf);
                let mut records = Vec::new();
                let mut offset = end_header;
                while offset < used_page_length {
                    let end = offset + entry_len;
                    if end > used_page_length {
                        return Err(IndexError::corrupt(format!(
                            "page {page} has a used length not aligned to a whole entry"
                        )));
                    }
                    records.push(Record::load(conf, serializer, &data[offset..end])?);
                    offset = end;
                }
                Entries::Records(records)
            }
            NodeType::Root | NodeType::Internal => {
                let entry_len = Reference::<K>::encoded_len(conf);
                let mut references = Vec::new();
                let mut offset = end_header;
                while offset < used_page_length {
                    let end = offset + entry_len;
                    if end > used_page_length {
                        return Err(IndexError::corrupt(format!(
                            "page {page} has a used length not aligned to a whole entry"
                        )));
                    }
                    references.push(Reference::load(conf, serializer, &data[offset..end])?);
                    offset = end;
                }
                Entries::References(references)
            }
            NodeType::Overflow => {
                Entries::Overflow(OpaqueData::load(&data[end_header..used_page_length]))
            }
            NodeType::Freelist => Entries::Empty,
        };

        Ok(Self {
            kind,
            page,
            next_page,
            entries,
        })
    }

    pub fn dump(&self, conf: &TreeConfig, serializer: &dyn Serializer<K>) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        match &self.entries {
            Entries::Records(records) => {
                for r in records {
                    body.extend(r.dump(conf, serializer)?);
                }
            }
            Entries::References(references) => {
                for r in references {
                    body.extend(r.dump(conf, serializer)?);
                }
            }
            Entries::Overflow(data) => body.extend(data.dump()),
            Entries::Empty => {}
        }

        let used_page_length = body.len() + NODE_HEADER_BYTES;
        if used_page_length > conf.page_size {
            return Err(IndexError::corrupt(format!(
                "node page {} overflowed its page: {} > {}",
                self.page, used_page_length, conf.page_size
            )));
        }

        let mut out = Vec::with_capacity(conf.page_size);
        write_uint(&mut out, self.kind as u64, NODE_TYPE_BYTES);
        write_uint(&mut out, used_page_length as u64, USED_PAGE_LENGTH_BYTES);
        write_uint(
            &mut out,
            self.next_page.map(|p| p.value()).unwrap_or(0) as u64,
            PAGE_REFERENCE_BYTES,
        );
        out.extend(body);
        out.resize(conf.page_size, 0);
        Ok(out)
    }

    /// Number of children reachable through this node: entry count for
    /// Record nodes, `entries.len() + 1` for non-empty Reference nodes.
    pub fn num_children(&self) -> usize {
        match &self.entries {
            Entries::Records(v) => v.len(),
            Entries::References(v) => {
                if v.is_empty() {
                    0
                } else {
                    v.len() + 1
                }
            }
            Entries::Overflow(_) => 1,
            Entries::Empty => 0,
        }
    }

    /// Number of entries this node holds: unlike `num_children`, a
    /// Reference node reports its separator count directly rather than
    /// `+ 1`, matching the entries-count units `TreeConfig::max_entries`
    /// and `min_entries` are expressed in.
    fn entry_count(&self) -> usize {
        match &self.entries {
            Entries::Records(v) => v.len(),
            Entries::References(v) => v.len(),
            Entries::Overflow(_) => 1,
            Entries::Empty => 0,
        }
    }

    pub fn can_add_entry(&self, conf: &TreeConfig) -> bool {
        self.entry_count() < conf.max_entries(self.kind)
    }

    pub fn can_delete_entry(&self, conf: &TreeConfig) -> bool {
        self.entry_count() > conf.min_entries(self.kind)
    }

    fn records_mut(&mut self) -> &mut Vec<Record<K>> {
        match &mut self.entries {
            Entries::Records(v) => v,
            _ => panic!("node {} does not hold Records", self.page),
        }
    }

    pub fn records(&self) -> &[Record<K>] {
        match &self.entries {
            Entries::Records(v) => v,
            _ => panic!("node {} does not hold Records", self.page),
        }
    }

    fn references_mut(&mut self) -> &mut Vec<Reference<K>> {
        match &mut self.entries {
            Entries::References(v) => v,
            _ => panic!("node {} does not hold References", self.page),
        }
    }

    pub fn references(&self) -> &[Reference<K>] {
        match &self.entries {
            Entries::References(v) => v,
            _ => panic!("node {} does not hold References", self.page),
        }
    }

    pub fn smallest_key(&self) -> &K {
        match &self.entries {
            Entries::Records(v) => &v.first().expect("node has no entries").key,
            Entries::References(v) => &v.first().expect("node has no entries").key,
            _ => panic!("node {} does not hold ordered entries", self.page),
        }
    }

    pub fn biggest_key(&self) -> &K {
        match &self.entries {
            Entries::Records(v) => &v.last().expect("node has no entries").key,
            Entries::References(v) => &v.last().expect("node has no entries").key,
            _ => panic!("node {} does not hold ordered entries", self.page),
        }
    }

    /// Sorted insertion of a Record, only valid on Leaf/LonelyRoot nodes.
    pub fn insert_record(&mut self, record: Record<K>) {
        let records = self.records_mut();
        let idx = records.partition_point(|r| r.key < record.key);
        records.insert(idx, record);
    }

    /// Unchecked append, valid only when `record.key` exceeds every existing
    /// key. Used by batch insert to skip the binary-search cost.
    pub fn insert_record_at_the_end(&mut self, record: Record<K>) {
        self.records_mut().push(record);
    }

    /// Looks up a Record by key. The absence of a matching key is a
    /// tree-local condition (`LookupError::NotFound`), not a user-visible
    /// error: callers collapse it into `Option`/`bool` or treat it as "the
    /// key doesn't exist yet" in insert.
    pub fn get_record(&self, key: &K) -> std::result::Result<&Record<K>, LookupError> {
        let records = self.records();
        let idx = records.partition_point(|r| &r.key < key);
        records
            .get(idx)
            .filter(|r| &r.key == key)
            .ok_or(LookupError::NotFound)
    }

    pub fn remove_record(&mut self, key: &K) -> std::result::Result<Record<K>, LookupError> {
        let records = self.records_mut();
        let idx = records.partition_point(|r| &r.key < key);
        if idx < records.len() && &records[idx].key == key {
            Ok(records.remove(idx))
        } else {
            Err(LookupError::NotFound)
        }
    }

    /// Sorted insertion of a Reference, fixing up the neighboring
    /// references' `before`/`after` so adjacency is preserved.
    pub fn insert_reference(&mut self, reference: Reference<K>) {
        let references = self.references_mut();
        let idx = references.partition_point(|r| r.key < reference.key);
        let before = reference.before;
        let after = reference.after;
        references.insert(idx, reference);
        if idx > 0 {
            references[idx - 1].set_after(before);
        }
        if idx + 1 < references.len() {
            references[idx + 1].set_before(after);
        }
    }

    /// Installs `records` as this node's full entry list, bypassing sorted
    /// insertion. Used when the caller already holds a sorted slice (e.g.
    /// the upper half produced by `split_records`).
    pub fn set_records(&mut self, records: Vec<Record<K>>) {
        self.entries = Entries::Records(records);
    }

    /// Installs `references` as this node's full entry list, bypassing
    /// sorted insertion and neighbor fixup.
    pub fn set_references(&mut self, references: Vec<Reference<K>>) {
        self.entries = Entries::References(references);
    }

    /// Removes and returns the smallest reference. Used when a freshly
    /// split Internal/Root node gives up its first entry to become the
    /// separator propagated to the parent.
    pub fn take_smallest_reference(&mut self) -> Reference<K> {
        self.references_mut().remove(0)
    }

    pub fn split_records(&mut self) -> Vec<Record<K>> {
        let records = self.records_mut();
        let mid = records.len() / 2;
        let upper = records.split_off(mid);
        upper
    }

    pub fn split_references(&mut self) -> Vec<Reference<K>> {
        let references = self.references_mut();
        let mid = references.len() / 2;
        let upper = references.split_off(mid);
        upper
    }

    /// Follows the descent rule in the search algorithm: the child page a
    /// key routes to among this node's references.
    pub fn child_for_key(&self, key: &K) -> PageId {
        let references = self.references();
        assert!(!references.is_empty(), "reference node has no children");
        if key < &references[0].key {
            return references[0].before;
        }
        if key >= &references[references.len() - 1].key {
            return references[references.len() - 1].after;
        }
        for (ref_a, ref_b) in pairwise(references) {
            if ref_a.key <= *key && *key < ref_b.key {
                return ref_a.after;
            }
        }
        unreachable!("child_for_key: no matching reference window")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::IntSerializer;

    fn conf() -> TreeConfig {
        TreeConfig::new(256, 4, 16, 16)
    }

    #[test]
    fn leaf_round_trips_through_page_bytes() {
        let conf = conf();
        let ser = IntSerializer;
        let mut leaf = Node::<u64>::new_leaf(PageId::new(1));
        leaf.insert_record(Record::new(3u64, RecordValue::Inline(b"c".to_vec())));
        leaf.insert_record(Record::new(1u64, RecordValue::Inline(b"a".to_vec())));
        leaf.insert_record(Record::new(2u64, RecordValue::Inline(b"b".to_vec())));

        let bytes = leaf.dump(&conf, &ser).unwrap();
        assert_eq!(bytes.len(), conf.page_size);

        let back = Node::<u64>::from_page_data(&conf, &ser, &bytes, PageId::new(1)).unwrap();
        let keys: Vec<u64> = back.records().iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[test]
    fn from_page_data_rejects_misaligned_used_length_instead_of_panicking() {
        let conf = conf();
        let ser = IntSerializer;
        let mut leaf = Node::<u64>::new_leaf(PageId::new(1));
        leaf.insert_record(Record::new(1u64, RecordValue::Inline(b"a".to_vec())));
        let mut bytes = leaf.dump(&conf, &ser).unwrap();

        // Bump the used-length field by one byte so it no longer lands on an
        // entry boundary, the way a truncated or bit-flipped file might.
        let field = NODE_TYPE_BYTES..NODE_TYPE_BYTES + USED_PAGE_LENGTH_BYTES;
        let used_length = read_uint(&bytes[field.clone()]) as u64;
        bytes[field].copy_from_slice(&(used_length + 1).to_le_bytes()[..USED_PAGE_LENGTH_BYTES]);

        let result = Node::<u64>::from_page_data(&conf, &ser, &bytes, PageId::new(1));
        assert!(matches!(result, Err(IndexError::CorruptFile(_))));
    }

    #[test]
    fn insert_reference_fixes_up_neighbors() {
        let mut root = Node::<u64>::new_root(PageId::new(1));
        root.insert_reference(Reference::new(10u64, PageId::new(2), PageId::new(3)));
        root.insert_reference(Reference::new(20u64, PageId::new(3), PageId::new(4)));
        root.insert_reference(Reference::new(15u64, PageId::new(3), PageId::new(3)));

        let refs = root.references();
        assert_eq!(refs[0].after, refs[1].before);
        assert_eq!(refs[1].after, refs[2].before);
    }

    #[test]
    fn split_records_keeps_lower_half_returns_upper() {
        let mut leaf = Node::<u64>::new_leaf(PageId::new(1));
        for k in 0..6u64 {
            leaf.insert_record(Record::new(k, RecordValue::Inline(vec![])));
        }
        let upper = leaf.split_records();
        assert_eq!(leaf.records().len(), 3);
        assert_eq!(upper.len(), 3);
        assert_eq!(leaf.records()[0].key, 0);
        assert_eq!(upper[0].key, 3);
    }

    #[test]
    fn child_for_key_routes_through_references() {
        let mut root = Node::<u64>::new_root(PageId::new(1));
        root.insert_reference(Reference::new(10u64, PageId::new(1), PageId::new(2)));
        root.insert_reference(Reference::new(20u64, PageId::new(2), PageId::new(3)));

        assert_eq!(root.child_for_key(&5), PageId::new(1));
        assert_eq!(root.child_for_key(&15), PageId::new(2));
        assert_eq!(root.child_for_key(&25), PageId::new(3));
    }

    #[test]
    fn can_add_entry_respects_order() {
        let conf = TreeConfig::new(4096, 4, 16, 16);
        let mut leaf = Node::<u64>::new_leaf(PageId::new(1));
        for k in 0..3u64 {
            leaf.insert_record(Record::new(k, RecordValue::Inline(vec![])));
        }
        assert!(!leaf.can_add_entry(&conf));
    }

    #[test]
    fn can_add_entry_on_reference_node_counts_separators_not_children() {
        // order 4: Root/Internal max_entries is 4 separators (5 children).
        // A node holding 3 separators (4 children) still has room for one
        // more separator before it needs to split.
        let conf = TreeConfig::new(4096, 4, 16, 16);
        let mut root = Node::<u64>::new_root(PageId::new(1));
        root.insert_reference(Reference::new(10u64, PageId::new(2), PageId::new(3)));
        root.insert_reference(Reference::new(20u64, PageId::new(3), PageId::new(4)));
        root.insert_reference(Reference::new(30u64, PageId::new(4), PageId::new(5)));
        assert_eq!(root.num_children(), 4);
        assert!(root.can_add_entry(&conf));

        root.insert_reference(Reference::new(40u64, PageId::new(5), PageId::new(6)));
        assert_eq!(root.num_children(), 5);
        assert!(!root.can_add_entry(&conf));
    }
}
