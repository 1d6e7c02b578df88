// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! High-level API for working with mounted device exports.
//!
//! A device export is a directory tree (usually the root of an SD card or USB drive) containing
//! a `PIONEER` directory with the collection database and the per-track analysis files. This
//! module only resolves paths on an already-mounted filesystem; fetching files off players over
//! the network is out of scope.

use crate::collection::Collection;
use crate::pdb::Track;
use crate::util::Result;
use std::path::{Path, PathBuf};

/// Represents a device export rooted at a mount point.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DeviceExport {
    path: PathBuf,
}

impl DeviceExport {
    /// Create a device export for the given mount root.
    ///
    /// The path should contain a `PIONEER` directory.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Get the device path.
    #[must_use]
    pub fn get_path(&self) -> &Path {
        &self.path
    }

    /// Path of the collection database on this device.
    #[must_use]
    pub fn pdb_path(&self) -> PathBuf {
        self.path
            .join("PIONEER")
            .join("rekordbox")
            .join("export.pdb")
    }

    /// Path of the extension database on this device.
    #[must_use]
    pub fn ext_pdb_path(&self) -> PathBuf {
        self.path
            .join("PIONEER")
            .join("rekordbox")
            .join("exportExt.pdb")
    }

    /// Open and index the collection database, merging the extension database if present.
    pub fn load_collection(&self) -> Result<Collection> {
        let mut collection = Collection::open(self.pdb_path())?;
        let ext_path = self.ext_pdb_path();
        if ext_path.is_file() {
            collection.load_ext(ext_path)?;
        }
        Ok(collection)
    }

    /// Resolve a database-relative path (e.g. a track's `analyze_path`) against the mount root.
    #[must_use]
    pub fn resolve(&self, device_path: &str) -> PathBuf {
        let mut path = self.path.clone();
        for component in device_path.split('/').filter(|c| !c.is_empty()) {
            path.push(component);
        }
        path
    }

    /// Path of the analysis file (`.DAT`) of the given track, if the track has one.
    #[must_use]
    pub fn anlz_path(&self, track: &Track) -> Option<PathBuf> {
        let device_path = track.analyze_path.as_string();
        if device_path.is_empty() {
            return None;
        }
        Some(self.resolve(&device_path))
    }

    /// Path of the extended analysis file (`.EXT`) of the given track, if the track has one.
    ///
    /// The extended file is a sibling of the `.DAT` file; whether it actually exists depends on
    /// the exporting software version.
    #[must_use]
    pub fn anlz_ext_path(&self, track: &Track) -> Option<PathBuf> {
        self.anlz_path(track)
            .map(|path| path.with_extension("EXT"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolves_device_paths() {
        let export = DeviceExport::new(PathBuf::from("/mnt/usb"));
        assert_eq!(
            export.pdb_path(),
            PathBuf::from("/mnt/usb/PIONEER/rekordbox/export.pdb")
        );
        assert_eq!(
            export.resolve("/PIONEER/USBANLZ/P016/0000875E/ANLZ0000.DAT"),
            PathBuf::from("/mnt/usb/PIONEER/USBANLZ/P016/0000875E/ANLZ0000.DAT")
        );
    }
}
