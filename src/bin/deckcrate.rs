// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

use clap::{Parser, Subcommand};
use deckcrate::anlz::{AnlzOptions, Content};
use deckcrate::collection::{open_analysis_with, open_database};
use deckcrate::pdb::io::DbFile;
use deckcrate::pdb::{DatabaseType, PlaylistTreeNodeId};
use deckcrate::source::ByteSource;
use deckcrate::Collection;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about = "Inspect DJ device library exports")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all tracks of a collection database.
    ListTracks {
        /// Path of the `export.pdb` file.
        path: PathBuf,
    },
    /// Display the playlist tree of a collection database.
    ListPlaylists {
        /// Path of the `export.pdb` file.
        path: PathBuf,
    },
    /// List the tags of an extension database.
    ListTags {
        /// Path of the `export.pdb` file.
        path: PathBuf,
        /// Path of the `exportExt.pdb` file.
        ext_path: PathBuf,
    },
    /// Parse a database file and dump its raw structure.
    DumpPdb {
        /// Path of the `export.pdb` or `exportExt.pdb` file.
        path: PathBuf,
        /// Interpret the file as an extension database.
        #[arg(long)]
        ext: bool,
    },
    /// Parse an analysis file (`.DAT`/`.EXT`/`.2EX`) and dump its sections.
    DumpAnlz {
        /// Path of the analysis file.
        path: PathBuf,
        /// Do not unmask song structure data (for files from the "shared" library folder).
        #[arg(long)]
        unmasked: bool,
    },
}

fn list_tracks(collection: &Collection) {
    for track in collection.tracks() {
        let artist = collection
            .artist_of(track)
            .map(|artist| artist.name.as_string())
            .unwrap_or_default();
        println!(
            "{:>6}  {} - {} ({:.2} BPM)",
            track.id.0,
            artist,
            track.title,
            track.bpm()
        );
    }
}

fn list_playlists(collection: &Collection, parent: PlaylistTreeNodeId, level: usize) {
    let children = collection
        .index()
        .playlist_children
        .get(&parent)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for id in children {
        let Some(node) = collection.index().playlist_tree.get(id) else {
            continue;
        };
        let indent = "    ".repeat(level);
        if node.is_folder() {
            println!("{indent}📁 {}", node.name);
            list_playlists(collection, *id, level + 1);
        } else {
            let num_tracks = collection.playlist_tracks(*id).len();
            println!("{indent}🗎 {} ({num_tracks} tracks)", node.name);
        }
    }
}

fn list_tags(collection: &Collection) {
    let index = collection.index();
    for category_id in &index.tag_categories {
        let Some(category) = index.tags.get(category_id) else {
            continue;
        };
        println!("{}", category.name);
        for tag_id in index
            .tags_by_category
            .get(category_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            let Some(tag) = index.tags.get(tag_id) else {
                continue;
            };
            let num_tracks = index
                .tracks_by_tag
                .get(tag_id)
                .map(|tracks| tracks.len())
                .unwrap_or(0);
            println!("    {} ({num_tracks} tracks)", tag.name);
        }
    }
}

fn dump_pdb(path: &Path, db_type: DatabaseType) -> deckcrate::Result<()> {
    let source = ByteSource::open(path)?;
    let db = DbFile::open(source, db_type)?;
    println!("{:#?}", db.header());
    for table in db.tables() {
        println!("Table {}", table.page_type);
        for page in db.pages(table)? {
            println!("  {page:?}");
            for row in db.page_rows(&page)? {
                println!("    {row:?}");
            }
        }
    }
    Ok(())
}

fn dump_anlz(path: &Path, options: AnlzOptions) -> deckcrate::Result<()> {
    let anlz = open_analysis_with(path, options)?;
    for section in anlz.sections() {
        match &section.content {
            Content::Unknown { .. } => println!("{:?} (not studied)", section.header),
            content => println!("{content:#?}"),
        }
    }
    Ok(())
}

fn main() -> deckcrate::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::ListTracks { path } => {
            let collection = open_database(path)?;
            list_tracks(&collection);
        }
        Commands::ListPlaylists { path } => {
            let collection = open_database(path)?;
            list_playlists(&collection, PlaylistTreeNodeId(0), 0);
        }
        Commands::ListTags { path, ext_path } => {
            let mut collection = open_database(path)?;
            collection.load_ext(ext_path)?;
            list_tags(&collection);
        }
        Commands::DumpPdb { path, ext } => {
            let db_type = if *ext {
                DatabaseType::Ext
            } else {
                DatabaseType::Plain
            };
            dump_pdb(path, db_type)?;
        }
        Commands::DumpAnlz { path, unmasked } => {
            dump_anlz(
                path,
                AnlzOptions {
                    unmasked: *unmasked,
                },
            )?;
        }
    }
    Ok(())
}
