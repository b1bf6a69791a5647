// # Preferences
//
// Small pieces of client state kept as JSON files under fixed keys in the
// data directory. Reads never fail: a missing or malformed file yields the
// caller's default.

use crate::models::ImageId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const FAVORITES_KEY: &str = "favorites";
pub const TAGS_KEY: &str = "tags";
pub const VIEW_MODE_KEY: &str = "view_mode";

#[derive(Error, Debug)]
pub enum PrefsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How the library is presented
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    #[default]
    Grid,
    List,
    Map,
}

pub struct PreferenceStore {
    dir: PathBuf,
}

impl PreferenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Value under `key`, or `default` when absent or unreadable
    pub fn load<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let path = self.path(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(_) => return default,
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!("Ignoring malformed preference {}: {}", path.display(), e);
                default
            }
        }
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), PrefsError> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_vec_pretty(value)?;
        write_atomic(&self.path(key), &json)?;
        debug!("Saved preference {}", key);
        Ok(())
    }

    pub fn favorites(&self) -> BTreeSet<ImageId> {
        self.load(FAVORITES_KEY, BTreeSet::new())
    }

    /// Flip favorite state; returns whether the image is now a favorite
    pub fn toggle_favorite(&self, image_id: &ImageId) -> Result<bool, PrefsError> {
        let mut favorites = self.favorites();
        let now_favorite = if favorites.remove(image_id) {
            false
        } else {
            favorites.insert(image_id.clone());
            true
        };
        self.save(FAVORITES_KEY, &favorites)?;
        Ok(now_favorite)
    }

    pub fn tags(&self) -> BTreeMap<ImageId, BTreeSet<String>> {
        self.load(TAGS_KEY, BTreeMap::new())
    }

    /// Replace an image's tags; an empty list removes the entry
    pub fn set_tags(&self, image_id: &ImageId, tags: &[String]) -> Result<(), PrefsError> {
        let mut all = self.tags();
        let cleaned: BTreeSet<String> = tags
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        if cleaned.is_empty() {
            all.remove(image_id);
        } else {
            all.insert(image_id.clone(), cleaned);
        }
        self.save(TAGS_KEY, &all)
    }

    pub fn view_mode(&self) -> ViewMode {
        self.load(VIEW_MODE_KEY, ViewMode::default())
    }

    pub fn set_view_mode(&self, mode: ViewMode) -> Result<(), PrefsError> {
        self.save(VIEW_MODE_KEY, &mode)
    }

    /// Drop favorites and tags that point at deleted images
    pub fn forget(&self, image_ids: &[ImageId]) -> Result<(), PrefsError> {
        let mut favorites = self.favorites();
        let mut tags = self.tags();
        for id in image_ids {
            favorites.remove(id);
            tags.remove(id);
        }
        self.save(FAVORITES_KEY, &favorites)?;
        self.save(TAGS_KEY, &tags)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(seed: &[u8]) -> ImageId {
        ImageId::for_bytes(seed)
    }

    #[test]
    fn test_missing_and_malformed_fall_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::new(dir.path());
        assert_eq!(store.view_mode(), ViewMode::Grid);

        std::fs::write(dir.path().join("view_mode.json"), b"{not json").unwrap();
        assert_eq!(store.view_mode(), ViewMode::Grid);
        assert!(store.favorites().is_empty());
    }

    #[test]
    fn test_favorites_toggle_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::new(dir.path().join("prefs"));

        assert!(store.toggle_favorite(&id(b"a")).unwrap());
        assert!(store.toggle_favorite(&id(b"b")).unwrap());
        assert!(!store.toggle_favorite(&id(b"a")).unwrap());

        let reopened = PreferenceStore::new(dir.path().join("prefs"));
        let favorites = reopened.favorites();
        assert_eq!(favorites.len(), 1);
        assert!(favorites.contains(&id(b"b")));
    }

    #[test]
    fn test_tags_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::new(dir.path());
        let image = id(b"tagged");

        store
            .set_tags(&image, &["Beach".into(), " beach ".into(), "Sunset".into(), "".into()])
            .unwrap();
        let tags = store.tags();
        let expected: BTreeSet<String> = ["beach", "sunset"].iter().map(|s| s.to_string()).collect();
        assert_eq!(tags.get(&image), Some(&expected));

        store.set_tags(&image, &[]).unwrap();
        assert!(store.tags().is_empty());
    }

    #[test]
    fn test_view_mode_round_trip_and_forget() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::new(dir.path());
        store.set_view_mode(ViewMode::Map).unwrap();
        assert_eq!(store.view_mode(), ViewMode::Map);

        let image = id(b"gone");
        store.toggle_favorite(&image).unwrap();
        store.set_tags(&image, &["x".into()]).unwrap();
        store.forget(&[image.clone()]).unwrap();
        assert!(store.favorites().is_empty());
        assert!(store.tags().is_empty());
    }
}
