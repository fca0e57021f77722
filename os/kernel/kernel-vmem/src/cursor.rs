//! # Page-Table Cursor
//!
//! An exclusively borrowed page table together with the next slot to fill.
//! Entries are appended front to back; slots are never revisited.

use crate::page_table::{PageTable, PageTableEntry, TableIndex};
use kernel_info::memory::PAGE_TABLE_ENTRIES;

/// Where the next entry write lands in a page table.
pub struct PageTableCursor<'t> {
    table: &'t mut PageTable,
    pos: usize,
}

/// Every slot of the table has been written.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("page table is full")]
pub struct TableFull;

impl<'t> PageTableCursor<'t> {
    /// Cursor at slot 0 of `table`.
    #[inline]
    pub const fn new(table: &'t mut PageTable) -> Self {
        Self { table, pos: 0 }
    }

    /// Cursor at slot `pos` of `table`; slots before `pos` count as written.
    #[inline]
    pub const fn starting_at(table: &'t mut PageTable, pos: usize) -> Self {
        debug_assert!(pos <= PAGE_TABLE_ENTRIES);
        Self { table, pos }
    }

    /// Index of the next slot to be written.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.pos >= PAGE_TABLE_ENTRIES
    }

    /// Write `entry` at the cursor and advance.
    ///
    /// Returns the new position (the number of slots consumed).
    ///
    /// # Errors
    /// [`TableFull`] if all 512 slots are already written; nothing is changed.
    pub fn push(&mut self, entry: PageTableEntry) -> Result<usize, TableFull> {
        if self.is_full() {
            return Err(TableFull);
        }
        #[allow(clippy::cast_possible_truncation)]
        self.table.set(TableIndex::new(self.pos as u16), entry);
        self.pos += 1;
        Ok(self.pos)
    }

    /// Point the cursor at slot 0 of another table.
    #[inline]
    pub fn reset(&mut self, table: &'t mut PageTable) {
        self.table = table;
        self.pos = 0;
    }

    #[inline]
    #[must_use]
    pub fn table(&self) -> &PageTable {
        self.table
    }
}
