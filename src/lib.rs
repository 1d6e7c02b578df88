// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! This library provides access to device libraries exported from DJ software to removable media.
//!
//! An export consists of two file families that are decoded independently:
//!
//! - the collection database (`export.pdb`, plus the `exportExt.pdb` extension variant), a
//!   paginated embedded database holding tracks, artists, albums, playlists and tags
//!   (see the [`pdb`] module),
//! - per-track analysis bundles (`ANLZnnnn.DAT`/`.EXT`/`.2EX`) holding beat grids, cue points,
//!   waveform renditions and song structure data (see the [`anlz`] module).
//!
//! The [`collection`] module ties both together: it walks every table of a database, decodes all
//! rows and builds the primary and secondary indexes that make the export browsable.
//!
//! ```no_run
//! use deckcrate::collection::open_database;
//!
//! let collection = open_database("/mnt/usb/PIONEER/rekordbox/export.pdb")?;
//! for track in collection.tracks() {
//!     println!("{}", track.title);
//! }
//! # Ok::<(), deckcrate::Error>(())
//! ```

#![warn(unsafe_code)]
#![warn(missing_docs)]
#![deny(rust_2018_idioms)]
#![deny(rust_2021_compatibility)]
#![deny(missing_debug_implementations)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(clippy::all)]
#![deny(clippy::explicit_deref_methods)]
#![deny(clippy::explicit_into_iter_loop)]
#![deny(clippy::explicit_iter_loop)]
#![cfg_attr(not(test), deny(clippy::panic_in_result_fn))]

pub mod anlz;
pub mod collection;
pub mod device;
pub mod index;
pub mod pdb;
pub mod source;
pub mod util;
pub(crate) mod xor;

pub use crate::collection::{open_analysis, open_analysis_with, open_database, Collection};
pub use crate::source::ByteSource;
pub use crate::util::{Error, Result};
