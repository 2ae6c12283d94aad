//! Process-wide cache of parsed books
//!
//! Entries are keyed by the canonical path of the publication and stay valid
//! while the file keeps the length and modification time it had when parsing
//! started.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
    time::SystemTime,
};

use dashmap::DashMap;
use log::debug;

use crate::{book::EpubBook, error::EpubError};

/// Length and modification time of a publication on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    /// Reads the current stamp of `path`
    ///
    /// Take it before parsing, so a file replaced mid-parse never validates
    /// the stale book.
    pub fn of(path: &Path) -> Result<Self, EpubError> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

struct CacheEntry {
    stamp: FileStamp,
    preloaded: bool,
    book: Arc<EpubBook>,
}

static BOOK_CACHE: LazyLock<DashMap<PathBuf, CacheEntry>> = LazyLock::new(DashMap::new);

fn lookup(path: &Path, need_preloaded: bool) -> Option<Arc<EpubBook>> {
    let canonical = path.canonicalize().ok()?;
    let stamp = FileStamp::of(&canonical).ok()?;

    if BOOK_CACHE
        .remove_if(&canonical, |_, entry| entry.stamp != stamp)
        .is_some()
    {
        debug!("Cache entry for {} is stale", canonical.display());
        return None;
    }

    let entry = BOOK_CACHE.get(&canonical)?;
    if need_preloaded && !entry.preloaded {
        return None;
    }

    debug!("Cache hit for {}", canonical.display());
    Some(Arc::clone(&entry.book))
}

/// The cached book for `path`, if the file has not changed since it was parsed
pub fn get(path: &Path) -> Option<Arc<EpubBook>> {
    lookup(path, false)
}

/// Like [get], but only returns books whose spine documents were all read once
pub fn get_preloaded(path: &Path) -> Option<Arc<EpubBook>> {
    lookup(path, true)
}

/// Stores a parsed book for `path`
///
/// `stamp` is the state of the file before it was parsed.
pub fn insert(
    path: &Path,
    stamp: FileStamp,
    book: Arc<EpubBook>,
    preloaded: bool,
) -> Result<(), EpubError> {
    let canonical = path.canonicalize()?;
    BOOK_CACHE.insert(
        canonical,
        CacheEntry {
            stamp,
            preloaded,
            book,
        },
    );
    Ok(())
}

/// Drops the entry of a single file
pub fn clear_file_cache(path: &Path) {
    let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    BOOK_CACHE.remove(&key);
}

pub fn clear_all_caches() {
    BOOK_CACHE.clear();
}

pub fn len() -> usize {
    BOOK_CACHE.len()
}

pub fn is_empty() -> bool {
    BOOK_CACHE.is_empty()
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc};

    use crate::{
        cache::{self, FileStamp},
        epub::EpubDoc,
        fixtures::EpubFixture,
    };

    // Other tests share the global cache, so only per-file state is asserted.

    #[test]
    fn test_insert_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let path = EpubFixture::epub3().write_to(dir.path(), "cached.epub");
        let stamp = FileStamp::of(&path).unwrap();
        let book = Arc::new(EpubDoc::new(&path).unwrap().to_book());

        assert!(cache::get(&path).is_none());
        cache::insert(&path, stamp, Arc::clone(&book), false).unwrap();

        let cached = cache::get(&path).unwrap();
        assert!(Arc::ptr_eq(&cached, &book));
        assert!(cache::len() >= 1);

        cache::clear_file_cache(&path);
        assert!(cache::get(&path).is_none());
    }

    #[test]
    fn test_preloaded_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = EpubFixture::epub3().write_to(dir.path(), "preload.epub");
        let stamp = FileStamp::of(&path).unwrap();
        let book = Arc::new(EpubDoc::new(&path).unwrap().to_book());

        cache::insert(&path, stamp, Arc::clone(&book), false).unwrap();
        assert!(cache::get(&path).is_some());
        assert!(cache::get_preloaded(&path).is_none());

        cache::insert(&path, stamp, Arc::clone(&book), true).unwrap();
        assert!(Arc::ptr_eq(&cache::get_preloaded(&path).unwrap(), &book));
        cache::clear_file_cache(&path);
    }

    #[test]
    fn test_changed_file_invalidates_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = EpubFixture::epub3().write_to(dir.path(), "changing.epub");
        let stamp = FileStamp::of(&path).unwrap();
        let book = Arc::new(EpubDoc::new(&path).unwrap().to_book());
        cache::insert(&path, stamp, book, true).unwrap();

        fs::write(&path, EpubFixture::epub2().build()).unwrap();
        assert!(cache::get(&path).is_none());
        assert!(cache::get(&path).is_none());
    }

    #[test]
    fn test_file_replaced_during_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = EpubFixture::epub3().write_to(dir.path(), "replaced.epub");
        let stamp = FileStamp::of(&path).unwrap();
        let book = Arc::new(EpubDoc::new(&path).unwrap().to_book());

        // the file changes after the stamp was taken but before insertion
        fs::write(&path, EpubFixture::epub2().build()).unwrap();
        cache::insert(&path, stamp, book, false).unwrap();

        assert!(cache::get(&path).is_none());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.epub");

        assert!(FileStamp::of(&path).is_err());
        assert!(cache::get(&path).is_none());
        cache::clear_file_cache(&path);
    }
}
