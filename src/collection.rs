// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! High-level entry points for working with decoded exports.
//!
//! [`open_database`] decodes a collection database eagerly: every table is walked, every row is
//! decoded and all indexes are built before the call returns, so the [`Collection`] owns no view
//! into the underlying file and can be shared freely across threads.

use crate::anlz::{Anlz, AnlzOptions};
use crate::index::CollectionIndex;
use crate::pdb::io::DbFile;
use crate::pdb::{
    Album, Artist, Artwork, Genre, Key, Label, PlaylistTreeNodeId, Track, TrackId,
};
use crate::source::ByteSource;
use crate::util::Result;
use std::path::Path;

/// A fully decoded and indexed collection.
#[derive(Debug)]
pub struct Collection {
    index: CollectionIndex,
}

impl Collection {
    /// Open and index the collection database (`export.pdb`) at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let source = ByteSource::open(path)?;
        let db = DbFile::open(source, crate::pdb::DatabaseType::Plain)?;
        let index = CollectionIndex::build(&db)?;
        Ok(Self { index })
    }

    /// Merge the extension database (`exportExt.pdb`) at the given path into this collection.
    ///
    /// This adds the tag tables and rebuilds the derived indexes.
    pub fn load_ext(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let source = ByteSource::open(path)?;
        let db = DbFile::open(source, crate::pdb::DatabaseType::Ext)?;
        self.index.add_database(&db)?;
        self.index.finalize();
        Ok(())
    }

    /// All indexes over the collection.
    #[must_use]
    pub fn index(&self) -> &CollectionIndex {
        &self.index
    }

    /// Look up a track by ID.
    #[must_use]
    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.index.tracks.get(&id)
    }

    /// Iterate over all tracks in ID order.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.index.tracks.values()
    }

    /// Track IDs whose title equals `title`, compared case-insensitively.
    pub fn tracks_by_title(&self, title: &str) -> impl Iterator<Item = TrackId> + '_ {
        self.index
            .tracks_by_title
            .get(&title.to_lowercase())
            .into_iter()
            .flatten()
            .copied()
    }

    /// Resolve the main artist of a track.
    #[must_use]
    pub fn artist_of(&self, track: &Track) -> Option<&Artist> {
        self.index.artists.get(&track.artist_id)
    }

    /// Resolve the composer of a track.
    #[must_use]
    pub fn composer_of(&self, track: &Track) -> Option<&Artist> {
        self.index.artists.get(&track.composer_id)
    }

    /// Resolve the original artist of a track.
    #[must_use]
    pub fn original_artist_of(&self, track: &Track) -> Option<&Artist> {
        self.index.artists.get(&track.orig_artist_id)
    }

    /// Resolve the remixer of a track.
    #[must_use]
    pub fn remixer_of(&self, track: &Track) -> Option<&Artist> {
        self.index.artists.get(&track.remixer_id)
    }

    /// Resolve the album of a track.
    #[must_use]
    pub fn album_of(&self, track: &Track) -> Option<&Album> {
        self.index.albums.get(&track.album_id)
    }

    /// Resolve the genre of a track.
    #[must_use]
    pub fn genre_of(&self, track: &Track) -> Option<&Genre> {
        self.index.genres.get(&track.genre_id)
    }

    /// Resolve the record label of a track.
    #[must_use]
    pub fn label_of(&self, track: &Track) -> Option<&Label> {
        self.index.labels.get(&track.label_id)
    }

    /// Resolve the musical key of a track.
    #[must_use]
    pub fn key_of(&self, track: &Track) -> Option<&Key> {
        self.index.keys.get(&track.key_id)
    }

    /// Resolve the artwork of a track.
    #[must_use]
    pub fn artwork_of(&self, track: &Track) -> Option<&Artwork> {
        self.index.artwork.get(&track.artwork_id)
    }

    /// The dense track list of a playlist.
    ///
    /// Slots without an entry hold `TrackId(0)`.
    #[must_use]
    pub fn playlist_tracks(&self, id: PlaylistTreeNodeId) -> &[TrackId] {
        self.index
            .playlists
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Open and index the collection database at the given path.
pub fn open_database(path: impl AsRef<Path>) -> Result<Collection> {
    Collection::open(path)
}

/// Decode the analysis file at the given path.
pub fn open_analysis(path: impl AsRef<Path>) -> Result<Anlz> {
    open_analysis_with(path, AnlzOptions::default())
}

/// Decode the analysis file at the given path with the given options.
pub fn open_analysis_with(path: impl AsRef<Path>, options: AnlzOptions) -> Result<Anlz> {
    let source = ByteSource::open(path)?;
    Anlz::open_with(&source, options)
}
