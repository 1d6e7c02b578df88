// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Page walking and row materialization for collection database files.
//!
//! [`DbFile`] wraps a [`ByteSource`] and the parsed file header. Tables are walked page by page
//! along their `next_page` chains, and rows are materialized from the per-page row groups in the
//! canonical order (page-chain order, then row-group order, then slot order) that consumers can
//! rely on.

use crate::pdb::{
    DatabaseType, ExtPageType, Header, Page, PageIndex, PageType, PlainPageType, Row, RowGroup,
    Table,
};
use crate::source::ByteSource;
use crate::util::{Error, Result};
use binrw::io::{Seek, SeekFrom};
use binrw::{BinRead, Endian};
use std::collections::HashSet;

/// A collection database file opened for reading.
#[derive(Debug)]
pub struct DbFile {
    source: ByteSource,
    header: Header,
    db_type: DatabaseType,
}

impl DbFile {
    /// Open a database over the given byte source.
    ///
    /// This parses the file header and the table directory. Rows are decoded on demand when the
    /// tables are walked.
    pub fn open(source: ByteSource, db_type: DatabaseType) -> Result<Self> {
        let mut cursor = source.cursor();
        let header = Header::read_args(&mut cursor, (db_type,)).map_err(|err| match err {
            binrw::Error::BadMagic { pos, .. } => Error::BadMagic {
                at: pos,
                found: "expected zero magic word at start of database".to_string(),
            },
            err => err.into(),
        })?;

        let mut seen = HashSet::new();
        for table in &header.tables {
            let unstudied = matches!(
                table.page_type,
                PageType::Plain(PlainPageType::Unknown(_)) | PageType::Ext(ExtPageType::Unknown(_))
            );
            if !unstudied && !seen.insert(table.page_type) {
                return Err(Error::DuplicateTable {
                    page_type: table.page_type.to_string(),
                });
            }
        }

        Ok(Self {
            source,
            header,
            db_type,
        })
    }

    /// The parsed file header.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The table directory of this database.
    #[must_use]
    pub fn tables(&self) -> &[Table] {
        &self.header.tables
    }

    /// Find the table with the given page type.
    #[must_use]
    pub fn find_table(&self, page_type: PageType) -> Option<&Table> {
        self.header
            .tables
            .iter()
            .find(|table| table.page_type == page_type)
    }

    /// Read a single page by index.
    pub fn read_page(&self, index: PageIndex) -> Result<Page> {
        let page_size = self.header.page_size;
        let offset = index.offset(page_size);
        let view = self
            .source
            .sub(offset, u64::from(page_size))
            .map_err(|_| Error::malformed_page(index.0, offset, "page extends past end of file"))?;
        let mut cursor = view.cursor();
        let page = Page::read_args(&mut cursor, (self.db_type,))
            .map_err(|err| Error::malformed_page(index.0, offset, err))?;
        if page.page_index != index {
            tracing::warn!(
                expected = index.0,
                found = page.page_index.0,
                "page index mismatch, following chain anyway"
            );
        }
        Ok(page)
    }

    /// Walk the pages of a table along its `next_page` chain.
    ///
    /// The chain ends when the page with the table's `last_page` index has been read. A chain
    /// that revisits a page is cyclic and fatal.
    pub fn pages(&self, table: &Table) -> Result<Vec<Page>> {
        let mut pages = Vec::new();
        let mut seen = HashSet::new();
        let mut page_index = table.first_page;
        loop {
            if !seen.insert(page_index) {
                return Err(Error::malformed_page(
                    page_index.0,
                    page_index.offset(self.header.page_size),
                    "page chain contains a cycle",
                ));
            }
            let page = self.read_page(page_index)?;
            let is_last_page = page_index == table.last_page;
            let next_page = page.next_page;
            pages.push(page);

            if is_last_page {
                break;
            }
            page_index = next_page;
        }
        Ok(pages)
    }

    /// Decode the row groups at the tail of a data page.
    ///
    /// Non-data pages yield no groups. Groups are returned in ascending group order (the group
    /// nearest the page end is group 0).
    pub fn row_groups(&self, page: &Page) -> Result<Vec<RowGroup>> {
        if !page.has_data() {
            return Ok(Vec::new());
        }
        let page_size = u64::from(self.header.page_size);
        let page_offset = page.page_index.offset(self.header.page_size);
        let num_rows = u64::from(page.num_rows());
        let num_groups = u64::from(page.num_row_groups());
        if num_groups == 0 {
            return Ok(Vec::new());
        }

        let view = self.source.sub(page_offset, page_size).map_err(|_| {
            Error::malformed_page(
                page.page_index.0,
                page_offset,
                "page extends past end of file",
            )
        })?;
        let area_size = num_rows * 2 + num_groups * 4;
        if area_size + u64::from(Page::HEADER_SIZE) > page_size {
            return Err(Error::malformed_page(
                page.page_index.0,
                page_offset,
                format!("row group area of {area_size} bytes does not fit into the page"),
            ));
        }

        let rows_in_last_group = num_rows - (num_groups - 1) * u64::from(RowGroup::MAX_ROW_COUNT);
        let mut groups = Vec::with_capacity(num_groups as usize);
        for group_index in 0..num_groups {
            let (group_base, rows_in_group) = if group_index == num_groups - 1 {
                (page_size - area_size, rows_in_last_group)
            } else {
                // Full groups occupy 36 bytes each, backwards from the page end.
                (
                    page_size - (group_index + 1) * 36,
                    u64::from(RowGroup::MAX_ROW_COUNT),
                )
            };

            // Offsets are stored in descending slot order, followed by the presence bitmap.
            let mut offsets = Vec::with_capacity(rows_in_group as usize);
            for slot in 0..rows_in_group {
                let offset_pos = group_base + (rows_in_group - 1 - slot) * 2;
                let offset = view.read_u16_le(offset_pos).map_err(|_| {
                    Error::malformed_page(page.page_index.0, page_offset, "truncated row group")
                })?;
                offsets.push(offset);
            }
            let presence = view
                .read_bits(group_base + rows_in_group * 2, 0, rows_in_group as u32)
                .map_err(|_| {
                    Error::malformed_page(
                        page.page_index.0,
                        page_offset,
                        "truncated row presence bitmap",
                    )
                })?;
            groups.push(RowGroup::new(offsets, presence));
        }
        Ok(groups)
    }

    /// Materialize the present rows of a data page, in canonical order (ascending group index,
    /// then ascending slot index). Absent rows are skipped and contribute nothing.
    pub fn page_rows(&self, page: &Page) -> Result<Vec<Row>> {
        let groups = self.row_groups(page)?;
        if groups.is_empty() {
            return Ok(Vec::new());
        }
        let page_size = u64::from(self.header.page_size);
        let page_offset = page.page_index.offset(self.header.page_size);
        let heap_start = page_offset + u64::from(Page::HEADER_SIZE);
        let page_end = page_offset + page_size;

        let mut rows = Vec::new();
        let mut cursor = self.source.cursor();
        for group in &groups {
            for offset in group.present_offsets() {
                let row_offset = heap_start + u64::from(offset);
                if row_offset >= page_end {
                    return Err(Error::malformed_row(
                        row_offset,
                        "row offset points outside its page",
                    ));
                }
                cursor
                    .seek(SeekFrom::Start(row_offset))
                    .map_err(binrw::Error::Io)
                    .map_err(Error::from)?;
                let row = Row::read_options(&mut cursor, Endian::Little, (page.page_type,))
                    .map_err(|err| Error::malformed_row(row_offset, err))?;
                if cursor.position() > page_end {
                    return Err(Error::malformed_row(
                        row_offset,
                        "row data overruns the page end",
                    ));
                }
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Materialize all rows of a table, in canonical order (page-chain order, then row-group
    /// order, then slot order).
    pub fn table_rows(&self, table: &Table) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for page in self.pages(table)? {
            if page.has_data() {
                rows.extend(self.page_rows(&page)?);
            }
        }
        Ok(rows)
    }

    /// Materialize all rows of the table with the given page type, if present.
    pub fn rows_by_type(&self, page_type: PageType) -> Result<Vec<Row>> {
        match self.find_table(page_type) {
            Some(table) => self.table_rows(table),
            None => Ok(Vec::new()),
        }
    }
}
