//! The slotted page layout: a slot-occupancy bitmap followed by
//! fixed-width tuple slots, all within one `page_size()` buffer.

use std::fmt;
use std::sync::Arc;

use crate::error::StorageError;
use crate::page_size;
use crate::schema::TupleDesc;
use crate::transaction::TransactionId;
use crate::tuple::{RecordId, Tuple};

/// Identifies a page as a table plus an index within that table's file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    pub table: u32,
    pub index: usize,
}

impl PageId {
    pub fn new(table: u32, index: usize) -> Self {
        PageId { table, index }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.index)
    }
}

/// One fixed-size page of a heap file.
///
/// On disk the page is `header ++ slots ++ padding`: bit *i* of the
/// header (LSB-first within each byte) says whether slot *i* holds a
/// tuple, and each slot is `TupleDesc::byte_len()` bytes wide. In memory
/// the slots are kept decoded. The dirty marker is in-memory state only
/// and never serialized.
pub struct HeapPage {
    id: PageId,
    desc: Arc<TupleDesc>,
    slots: Vec<Option<Tuple>>,
    dirtied_by: Option<TransactionId>,
}

impl HeapPage {
    /// Tuples that fit on one page: `floor(page_bits / (tuple_bits + 1))`,
    /// the extra bit being the slot's entry in the occupancy bitmap.
    pub fn slot_count(desc: &TupleDesc) -> usize {
        (page_size() * 8) / (desc.byte_len() * 8 + 1)
    }

    fn header_len(desc: &TupleDesc) -> usize {
        Self::slot_count(desc).div_ceil(8)
    }

    /// A page-sized buffer of zeroes: the on-disk form of an empty page.
    pub fn empty_data() -> Vec<u8> {
        vec![0; page_size()]
    }

    /// Decodes a page from its on-disk form.
    pub fn from_bytes(id: PageId, data: &[u8], desc: Arc<TupleDesc>) -> Result<Self, StorageError> {
        if data.len() != page_size() {
            return Err(StorageError::PageCorrupt(format!(
                "page {id} buffer is {} bytes, expected {}",
                data.len(),
                page_size()
            )));
        }

        let slot_count = Self::slot_count(&desc);
        let header_len = Self::header_len(&desc);
        let tuple_len = desc.byte_len();

        let mut slots = Vec::with_capacity(slot_count);
        for slot in 0..slot_count {
            if data[slot / 8] & (1 << (slot % 8)) == 0 {
                slots.push(None);
                continue;
            }
            let offset = header_len + slot * tuple_len;
            let mut tuple = Tuple::read_from(Arc::clone(&desc), &data[offset..offset + tuple_len])?;
            tuple.set_record_id(Some(RecordId { page: id, slot }));
            slots.push(Some(tuple));
        }

        Ok(HeapPage {
            id,
            desc,
            slots,
            dirtied_by: None,
        })
    }

    /// Encodes the page back to its on-disk form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header_len = Self::header_len(&self.desc);
        let tuple_len = self.desc.byte_len();

        let mut data = vec![0u8; page_size()];
        for (slot, tuple) in self.slots.iter().enumerate() {
            let Some(tuple) = tuple else { continue };
            data[slot / 8] |= 1 << (slot % 8);
            let mut encoded = Vec::with_capacity(tuple_len);
            tuple.write_to(&mut encoded);
            data[header_len + slot * tuple_len..header_len + slot * tuple_len + tuple_len]
                .copy_from_slice(&encoded);
        }
        data
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn free_slots(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    pub fn tuple_count(&self) -> usize {
        self.slots.len() - self.free_slots()
    }

    /// Stores the tuple in the first free slot and stamps its record id.
    pub fn insert_tuple(&mut self, mut tuple: Tuple) -> Result<RecordId, StorageError> {
        if !tuple.desc().compatible(&self.desc) {
            return Err(StorageError::SchemaMismatch(format!(
                "tuple {} does not fit table schema {}",
                tuple.desc(),
                self.desc
            )));
        }
        let Some(slot) = self.slots.iter().position(|slot| slot.is_none()) else {
            return Err(StorageError::PageFull(self.id));
        };
        let rid = RecordId {
            page: self.id,
            slot,
        };
        tuple.set_record_id(Some(rid));
        self.slots[slot] = Some(tuple);
        Ok(rid)
    }

    /// Clears the slot named by `rid`.
    pub fn delete_tuple(&mut self, rid: &RecordId) -> Result<(), StorageError> {
        if rid.page != self.id {
            return Err(StorageError::NoSuchTuple(format!(
                "record {} slot {} is not on page {}",
                rid.page, rid.slot, self.id
            )));
        }
        match self.slots.get_mut(rid.slot) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                Ok(())
            }
            _ => Err(StorageError::NoSuchTuple(format!(
                "page {} slot {} holds no tuple",
                self.id, rid.slot
            ))),
        }
    }

    /// Occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.slots.iter().flatten()
    }

    pub fn mark_dirty(&mut self, tid: TransactionId) {
        self.dirtied_by = Some(tid);
    }

    pub fn mark_clean(&mut self) {
        self.dirtied_by = None;
    }

    /// The transaction that dirtied this page, if any.
    pub fn dirtier(&self) -> Option<TransactionId> {
        self.dirtied_by
    }
}
