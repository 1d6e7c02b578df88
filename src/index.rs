// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Index construction over decoded database rows.
//!
//! The [`CollectionIndex`] scans every table of a database once, builds one primary map per row
//! type and the secondary lookups (case-insensitive names and titles, foreign-key reverse
//! indexes, dense playlists, tag orderings). Duplicate row IDs are logged and the last
//! occurrence wins; dangling foreign keys are collected into a ledger instead of failing the
//! build. After construction the index is immutable.

use crate::pdb::io::DbFile;
use crate::pdb::{
    Album, AlbumId, Artist, ArtistId, Artwork, ArtworkId, Color, ColumnEntry, Genre, GenreId,
    HistoryEntry, HistoryPlaylist, HistoryPlaylistId, Key, KeyId, Label, LabelId, PlaylistEntry,
    PlaylistTreeNode, PlaylistTreeNodeId, Row, Tag, TagId, TagTrack, Track, TrackId,
};
use crate::util::{ColorIndex, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The role in which an artist row is referenced by a track.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub enum ArtistRole {
    /// The main performer.
    Artist,
    /// The composer.
    Composer,
    /// The original performer (for cover versions).
    OriginalArtist,
    /// The remixer.
    Remixer,
}

/// A foreign key that did not resolve during index construction.
///
/// Dangling references are never fatal; they are collected here (and logged) so that consumers
/// can inspect them.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct DanglingRef {
    /// Name of the table holding the referencing row.
    pub source_table: &'static str,
    /// ID of the referencing row.
    pub source_id: u32,
    /// Name of the referenced table.
    pub target_table: &'static str,
    /// ID that failed to resolve.
    pub target_id: u32,
}

impl fmt::Display for DanglingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} references missing {} {}",
            self.source_table, self.source_id, self.target_table, self.target_id
        )
    }
}

/// All indexes over a decoded collection database (plus, optionally, its extension database).
///
/// Primary indexes map row IDs to rows; secondary indexes are ordered: string keys are
/// lowercased, ID sets sort ascending, playlists are dense track lists.
#[derive(Debug, Default)]
pub struct CollectionIndex {
    /// Tracks by ID.
    pub tracks: BTreeMap<TrackId, Track>,
    /// Artists by ID.
    pub artists: BTreeMap<ArtistId, Artist>,
    /// Albums by ID.
    pub albums: BTreeMap<AlbumId, Album>,
    /// Record labels by ID.
    pub labels: BTreeMap<LabelId, Label>,
    /// Musical keys by ID.
    pub keys: BTreeMap<KeyId, Key>,
    /// Genres by ID.
    pub genres: BTreeMap<GenreId, Genre>,
    /// Color labels by color index.
    pub colors: BTreeMap<ColorIndex, Color>,
    /// Artwork rows by ID.
    pub artwork: BTreeMap<ArtworkId, Artwork>,
    /// Playlist tree nodes by ID.
    pub playlist_tree: BTreeMap<PlaylistTreeNodeId, PlaylistTreeNode>,
    /// History playlists by ID.
    pub history_playlists: BTreeMap<HistoryPlaylistId, HistoryPlaylist>,
    /// Browse categories by ID.
    pub columns: BTreeMap<u16, ColumnEntry>,
    /// Tags and tag categories by ID (from the extension database).
    pub tags: BTreeMap<TagId, Tag>,

    /// Raw playlist entry rows, in canonical row order.
    pub playlist_entries: Vec<PlaylistEntry>,
    /// Raw history entry rows, in canonical row order.
    pub history_entries: Vec<HistoryEntry>,
    /// Raw tag-track link rows, in canonical row order.
    pub tag_tracks: Vec<TagTrack>,

    /// Track IDs by lowercased title.
    pub tracks_by_title: BTreeMap<String, BTreeSet<TrackId>>,
    /// Track IDs by artist reference, per role.
    pub tracks_by_artist: BTreeMap<(ArtistRole, ArtistId), BTreeSet<TrackId>>,
    /// Track IDs by album.
    pub tracks_by_album: BTreeMap<AlbumId, BTreeSet<TrackId>>,
    /// Track IDs by genre.
    pub tracks_by_genre: BTreeMap<GenreId, BTreeSet<TrackId>>,
    /// Artist IDs by lowercased name.
    pub artists_by_name: BTreeMap<String, BTreeSet<ArtistId>>,
    /// Album IDs by lowercased name.
    pub albums_by_name: BTreeMap<String, BTreeSet<AlbumId>>,
    /// Label IDs by lowercased name.
    pub labels_by_name: BTreeMap<String, BTreeSet<LabelId>>,
    /// Key IDs by lowercased name.
    pub keys_by_name: BTreeMap<String, BTreeSet<KeyId>>,
    /// Genre IDs by lowercased name.
    pub genres_by_name: BTreeMap<String, BTreeSet<GenreId>>,
    /// Color indexes by lowercased name.
    pub colors_by_name: BTreeMap<String, BTreeSet<ColorIndex>>,
    /// Album IDs by album artist.
    pub albums_by_artist: BTreeMap<ArtistId, BTreeSet<AlbumId>>,

    /// Dense track list per playlist: the length is `max(entry_index) + 1` and slots without an
    /// entry hold `TrackId(0)`.
    pub playlists: BTreeMap<PlaylistTreeNodeId, Vec<TrackId>>,
    /// Child nodes per playlist folder, ordered by `sort_order`. The root folder has ID 0.
    pub playlist_children: BTreeMap<PlaylistTreeNodeId, Vec<PlaylistTreeNodeId>>,
    /// Dense track list per history playlist, parallel to [`CollectionIndex::playlists`].
    pub history: BTreeMap<HistoryPlaylistId, Vec<TrackId>>,

    /// Track IDs per tag.
    pub tracks_by_tag: BTreeMap<TagId, BTreeSet<TrackId>>,
    /// Tag IDs per track.
    pub tags_by_track: BTreeMap<TrackId, BTreeSet<TagId>>,
    /// Tag category IDs, ordered by their position.
    pub tag_categories: Vec<TagId>,
    /// Tag IDs per category, ordered by their position within the category.
    pub tags_by_category: BTreeMap<TagId, Vec<TagId>>,

    /// Foreign keys that failed to resolve.
    pub dangling: Vec<DanglingRef>,
}

fn name_key(name: &str) -> String {
    name.to_lowercase()
}

fn insert_primary<K, V>(map: &mut BTreeMap<K, V>, table: &'static str, id: K, row: V)
where
    K: Ord + Copy + fmt::Debug,
{
    if map.insert(id, row).is_some() {
        tracing::warn!(?id, table, "duplicate row id, keeping the last occurrence");
    }
}

impl CollectionIndex {
    /// Build the index over a single database file.
    pub fn build(db: &DbFile) -> Result<Self> {
        let mut index = Self::default();
        index.add_database(db)?;
        index.finalize();
        Ok(index)
    }

    /// Scan all tables of a database into the primary indexes.
    ///
    /// Call [`CollectionIndex::finalize`] after the last database has been added.
    pub fn add_database(&mut self, db: &DbFile) -> Result<()> {
        for table in db.tables() {
            for row in db.table_rows(table)? {
                self.insert_row(row);
            }
        }
        Ok(())
    }

    fn insert_row(&mut self, row: Row) {
        match row {
            Row::Track(track) => {
                insert_primary(&mut self.tracks, "track", track.id, track);
            }
            Row::Artist(artist) => {
                insert_primary(&mut self.artists, "artist", artist.id, artist);
            }
            Row::Album(album) => {
                insert_primary(&mut self.albums, "album", album.id, album);
            }
            Row::Label(label) => {
                insert_primary(&mut self.labels, "label", label.id, label);
            }
            Row::Key(key) => {
                insert_primary(&mut self.keys, "key", key.id, key);
            }
            Row::Genre(genre) => {
                insert_primary(&mut self.genres, "genre", genre.id, genre);
            }
            Row::Color(color) => {
                insert_primary(&mut self.colors, "color", color.color, color);
            }
            Row::Artwork(artwork) => {
                insert_primary(&mut self.artwork, "artwork", artwork.id, artwork);
            }
            Row::PlaylistTreeNode(node) => {
                insert_primary(&mut self.playlist_tree, "playlist tree node", node.id, node);
            }
            Row::HistoryPlaylist(playlist) => {
                insert_primary(
                    &mut self.history_playlists,
                    "history playlist",
                    playlist.id,
                    playlist,
                );
            }
            Row::ColumnEntry(column) => {
                insert_primary(&mut self.columns, "column", column.id, column);
            }
            Row::Tag(tag) => {
                insert_primary(&mut self.tags, "tag", tag.id, tag);
            }
            Row::PlaylistEntry(entry) => self.playlist_entries.push(entry),
            Row::HistoryEntry(entry) => self.history_entries.push(entry),
            Row::TagTrack(link) => self.tag_tracks.push(link),
            Row::Unknown => {}
        }
    }

    /// Build the secondary indexes and the dangling-reference ledger.
    ///
    /// Safe to call again after more databases have been added; all derived structures are
    /// rebuilt from scratch.
    pub fn finalize(&mut self) {
        self.build_name_indexes();
        self.build_track_indexes();
        self.build_playlists();
        self.build_tree();
        self.build_history();
        self.build_tags();
        self.check_references();
    }

    fn build_name_indexes(&mut self) {
        self.tracks_by_title.clear();
        for (id, track) in &self.tracks {
            self.tracks_by_title
                .entry(name_key(&track.title.as_string()))
                .or_default()
                .insert(*id);
        }
        self.artists_by_name.clear();
        for (id, artist) in &self.artists {
            self.artists_by_name
                .entry(name_key(&artist.name.as_string()))
                .or_default()
                .insert(*id);
        }
        self.albums_by_name.clear();
        for (id, album) in &self.albums {
            self.albums_by_name
                .entry(name_key(&album.name.as_string()))
                .or_default()
                .insert(*id);
        }
        self.labels_by_name.clear();
        for (id, label) in &self.labels {
            self.labels_by_name
                .entry(name_key(&label.name.as_string()))
                .or_default()
                .insert(*id);
        }
        self.keys_by_name.clear();
        for (id, key) in &self.keys {
            self.keys_by_name
                .entry(name_key(&key.name.as_string()))
                .or_default()
                .insert(*id);
        }
        self.genres_by_name.clear();
        for (id, genre) in &self.genres {
            self.genres_by_name
                .entry(name_key(&genre.name.as_string()))
                .or_default()
                .insert(*id);
        }
        self.colors_by_name.clear();
        for (id, color) in &self.colors {
            self.colors_by_name
                .entry(name_key(&color.name.as_string()))
                .or_default()
                .insert(*id);
        }
    }

    fn build_track_indexes(&mut self) {
        self.tracks_by_artist.clear();
        self.tracks_by_album.clear();
        self.tracks_by_genre.clear();
        self.albums_by_artist.clear();
        for (id, track) in &self.tracks {
            let roles = [
                (ArtistRole::Artist, track.artist_id),
                (ArtistRole::Composer, track.composer_id),
                (ArtistRole::OriginalArtist, track.orig_artist_id),
                (ArtistRole::Remixer, track.remixer_id),
            ];
            for (role, artist_id) in roles {
                if artist_id.0 != 0 {
                    self.tracks_by_artist
                        .entry((role, artist_id))
                        .or_default()
                        .insert(*id);
                }
            }
            if track.album_id.0 != 0 {
                self.tracks_by_album
                    .entry(track.album_id)
                    .or_default()
                    .insert(*id);
            }
            if track.genre_id.0 != 0 {
                self.tracks_by_genre
                    .entry(track.genre_id)
                    .or_default()
                    .insert(*id);
            }
        }
        for (id, album) in &self.albums {
            if album.artist_id.0 != 0 {
                self.albums_by_artist
                    .entry(album.artist_id)
                    .or_default()
                    .insert(*id);
            }
        }
    }

    fn build_playlists(&mut self) {
        self.playlists = Self::dense_lists(
            self.playlist_entries
                .iter()
                .map(|entry| (entry.playlist_id, entry.entry_index, entry.track_id)),
        );
    }

    fn build_history(&mut self) {
        self.history = Self::dense_lists(
            self.history_entries
                .iter()
                .map(|entry| (entry.playlist_id, entry.entry_index, entry.track_id)),
        );
    }

    /// Build one dense, `entry_index`-ordered track list per playlist.
    ///
    /// The list length is `max(entry_index) + 1`; indices without an entry stay `TrackId(0)`.
    fn dense_lists<P: Ord + Copy>(
        entries: impl Iterator<Item = (P, u32, TrackId)>,
    ) -> BTreeMap<P, Vec<TrackId>> {
        let mut grouped: BTreeMap<P, Vec<(u32, TrackId)>> = BTreeMap::new();
        for (playlist_id, entry_index, track_id) in entries {
            grouped
                .entry(playlist_id)
                .or_default()
                .push((entry_index, track_id));
        }
        grouped
            .into_iter()
            .map(|(playlist_id, entries)| {
                let len = entries
                    .iter()
                    .map(|(index, _)| *index as usize + 1)
                    .max()
                    .unwrap_or(0);
                let mut list = vec![TrackId(0); len];
                for (index, track_id) in entries {
                    list[index as usize] = track_id;
                }
                (playlist_id, list)
            })
            .collect()
    }

    fn build_tree(&mut self) {
        self.playlist_children.clear();
        let mut children: BTreeMap<PlaylistTreeNodeId, Vec<(u32, PlaylistTreeNodeId)>> =
            BTreeMap::new();
        for (id, node) in &self.playlist_tree {
            children
                .entry(node.parent_id)
                .or_default()
                .push((node.sort_order, *id));
        }
        for (parent, mut nodes) in children {
            nodes.sort();
            self.playlist_children
                .insert(parent, nodes.into_iter().map(|(_, id)| id).collect());
        }
    }

    fn build_tags(&mut self) {
        self.tracks_by_tag.clear();
        self.tags_by_track.clear();
        for link in &self.tag_tracks {
            self.tracks_by_tag
                .entry(link.tag_id)
                .or_default()
                .insert(link.track_id);
            self.tags_by_track
                .entry(link.track_id)
                .or_default()
                .insert(link.tag_id);
        }

        let mut categories: Vec<(u32, TagId)> = Vec::new();
        let mut by_category: BTreeMap<TagId, Vec<(u32, TagId)>> = BTreeMap::new();
        for (id, tag) in &self.tags {
            if tag.is_category() {
                categories.push((tag.position, *id));
            } else {
                by_category
                    .entry(tag.category_id)
                    .or_default()
                    .push((tag.position, *id));
            }
        }
        categories.sort();
        self.tag_categories = categories.into_iter().map(|(_, id)| id).collect();
        self.tags_by_category = by_category
            .into_iter()
            .map(|(category, mut tags)| {
                tags.sort();
                (category, tags.into_iter().map(|(_, id)| id).collect())
            })
            .collect();
    }

    fn check_references(&mut self) {
        self.dangling.clear();
        let mut dangling = Vec::new();
        {
            let mut check = |source_table: &'static str,
                             source_id: u32,
                             target_table: &'static str,
                             target_id: u32,
                             resolves: bool| {
                if target_id != 0 && !resolves {
                    let reference = DanglingRef {
                        source_table,
                        source_id,
                        target_table,
                        target_id,
                    };
                    tracing::warn!(%reference, "dangling foreign key");
                    dangling.push(reference);
                }
            };

            for (id, track) in &self.tracks {
                for artist_id in [
                    track.artist_id,
                    track.composer_id,
                    track.orig_artist_id,
                    track.remixer_id,
                ] {
                    check(
                        "track",
                        id.0,
                        "artist",
                        artist_id.0,
                        self.artists.contains_key(&artist_id),
                    );
                }
                check(
                    "track",
                    id.0,
                    "album",
                    track.album_id.0,
                    self.albums.contains_key(&track.album_id),
                );
                check(
                    "track",
                    id.0,
                    "genre",
                    track.genre_id.0,
                    self.genres.contains_key(&track.genre_id),
                );
                check(
                    "track",
                    id.0,
                    "label",
                    track.label_id.0,
                    self.labels.contains_key(&track.label_id),
                );
                check(
                    "track",
                    id.0,
                    "key",
                    track.key_id.0,
                    self.keys.contains_key(&track.key_id),
                );
                check(
                    "track",
                    id.0,
                    "artwork",
                    track.artwork_id.0,
                    self.artwork.contains_key(&track.artwork_id),
                );
            }
            for (id, album) in &self.albums {
                check(
                    "album",
                    id.0,
                    "artist",
                    album.artist_id.0,
                    self.artists.contains_key(&album.artist_id),
                );
            }
            for (id, node) in &self.playlist_tree {
                check(
                    "playlist tree node",
                    id.0,
                    "playlist tree node",
                    node.parent_id.0,
                    self.playlist_tree.contains_key(&node.parent_id),
                );
            }
            for entry in &self.playlist_entries {
                check(
                    "playlist entry",
                    entry.playlist_id.0,
                    "track",
                    entry.track_id.0,
                    self.tracks.contains_key(&entry.track_id),
                );
                check(
                    "playlist entry",
                    entry.playlist_id.0,
                    "playlist tree node",
                    entry.playlist_id.0,
                    self.playlist_tree.contains_key(&entry.playlist_id),
                );
            }
            for entry in &self.history_entries {
                check(
                    "history entry",
                    entry.playlist_id.0,
                    "track",
                    entry.track_id.0,
                    self.tracks.contains_key(&entry.track_id),
                );
                check(
                    "history entry",
                    entry.playlist_id.0,
                    "history playlist",
                    entry.playlist_id.0,
                    self.history_playlists.contains_key(&entry.playlist_id),
                );
            }
            for (id, tag) in &self.tags {
                if !tag.is_category() {
                    check(
                        "tag",
                        id.0,
                        "tag category",
                        tag.category_id.0,
                        self.tags.contains_key(&tag.category_id),
                    );
                }
            }
            for link in &self.tag_tracks {
                check(
                    "tag-track link",
                    link.tag_id.0,
                    "track",
                    link.track_id.0,
                    self.tracks.contains_key(&link.track_id),
                );
                check(
                    "tag-track link",
                    link.track_id.0,
                    "tag",
                    link.tag_id.0,
                    self.tags.contains_key(&link.tag_id),
                );
            }
        }
        self.dangling = dangling;
    }
}
