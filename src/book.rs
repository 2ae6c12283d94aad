//! Parsed publication detached from its archive
//!
//! [EpubBook] holds everything [EpubDoc] learned about a publication but not
//! the archive handle itself, so it is cheap to share between threads and to
//! keep in the cache. Resource data is read on demand by reopening the file.

use std::{
    fs::File,
    io::{BufReader, Read, Seek},
    path::PathBuf,
};

use indexmap::IndexMap;
use zip::ZipArchive;

use crate::{
    epub::{EpubDoc, decrypt_resource, find_cover, follow_fallback, select_catalog},
    error::EpubError,
    metadata::Metadata,
    options::ParseOptions,
    types::{
        EncryptionData, EpubVersion, ManifestItem, MetadataItem, MetadataLinkItem, NavPoint,
        NavigationKind, SpineItem,
    },
    utils::{DecodeBytes, get_file_in_zip_archive},
};

const JAVASCRIPT_TYPES: [&str; 3] = [
    "application/javascript",
    "text/javascript",
    "application/x-javascript",
];

/// A parsed EPUB publication
#[derive(Debug, Clone)]
pub struct EpubBook {
    /// The file the book was parsed from
    pub path: PathBuf,
    pub package_path: PathBuf,
    pub base_path: PathBuf,
    pub version: EpubVersion,
    pub unique_identifier: String,
    pub metadata: Vec<MetadataItem>,
    pub metadata_link: Vec<MetadataLinkItem>,
    pub manifest: IndexMap<String, ManifestItem>,
    pub spine: Vec<SpineItem>,
    pub encryption: Option<Vec<EncryptionData>>,
    pub ncx: Vec<NavPoint>,
    pub nav: Vec<NavPoint>,
    pub landmarks: Vec<NavPoint>,
    pub page_list: Vec<NavPoint>,
    pub catalog_title: String,

    /// Options the book was parsed with, reused by [EpubBook::open]
    pub options: ParseOptions,
}

impl EpubBook {
    pub fn metadata(&self) -> Metadata {
        Metadata::from_items(&self.metadata, Some(&self.unique_identifier))
    }

    pub fn title(&self) -> Option<&str> {
        self.first_metadata_value("title")
    }

    pub fn creator(&self) -> Option<&str> {
        self.first_metadata_value("creator")
    }

    pub fn language(&self) -> Option<&str> {
        self.first_metadata_value("language")
    }

    fn first_metadata_value(&self, property: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|item| item.property == property)
            .map(|item| item.value.as_str())
    }

    /// The table of contents
    ///
    /// Same selection as [EpubDoc::catalog]: the navigation document when it
    /// has more top-level entries than the NCX, the NCX otherwise.
    pub fn chapters(&self) -> &[NavPoint] {
        select_catalog(&self.nav, &self.ncx)
    }

    pub fn navigation(&self, kind: NavigationKind) -> &[NavPoint] {
        match kind {
            NavigationKind::Ncx => &self.ncx,
            NavigationKind::Nav => &self.nav,
            NavigationKind::Landmarks => &self.landmarks,
            NavigationKind::PageList => &self.page_list,
        }
    }

    /// Number of top-level chapters
    pub fn chapter_count(&self) -> usize {
        self.chapters().len()
    }

    pub fn first_chapter(&self) -> Option<&NavPoint> {
        self.chapters().first()
    }

    pub fn last_chapter(&self) -> Option<&NavPoint> {
        self.chapters().last()
    }

    pub fn chapter(&self, index: usize) -> Option<&NavPoint> {
        self.chapters().get(index)
    }

    /// Every chapter, nested ones included, in reading order
    pub fn flatten_chapters(&self) -> Vec<&NavPoint> {
        self.chapters().iter().flat_map(NavPoint::iter).collect()
    }

    /// Finds a chapter at any depth by its NCX `navPoint` or nav `<a>` id
    pub fn find_chapter_by_id(&self, id: &str) -> Option<&NavPoint> {
        self.chapters()
            .iter()
            .flat_map(NavPoint::iter)
            .find(|point| point.id.as_deref() == Some(id))
    }

    /// Finds a chapter at any depth by its exact label
    pub fn find_chapter_by_title(&self, title: &str) -> Option<&NavPoint> {
        self.chapters()
            .iter()
            .flat_map(NavPoint::iter)
            .find(|point| point.label == title)
    }

    /// Chapters whose content href contains `pattern`
    pub fn find_chapters_by_content(&self, pattern: &str) -> Vec<&NavPoint> {
        self.chapters()
            .iter()
            .flat_map(NavPoint::iter)
            .filter(|point| {
                point
                    .content
                    .as_ref()
                    .is_some_and(|content| content.to_string_lossy().contains(pattern))
            })
            .collect()
    }

    pub fn resource(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.get(id)
    }

    /// The first item of the fallback chain of `id` with a supported type
    pub fn resource_with_fallback(&self, id: &str, supported: &[&str]) -> Option<&ManifestItem> {
        follow_fallback(&self.manifest, id, |item| {
            supported.contains(&item.mime.as_str())
        })
    }

    pub fn resource_by_path(&self, path: &str) -> Option<&ManifestItem> {
        self.manifest
            .values()
            .find(|item| item.entry_name() == path)
    }

    pub fn resources_by_type(&self, mime: &str) -> Vec<&ManifestItem> {
        self.manifest
            .values()
            .filter(|item| item.mime == mime)
            .collect()
    }

    pub fn image_resources(&self) -> Vec<&ManifestItem> {
        self.manifest
            .values()
            .filter(|item| item.is_image())
            .collect()
    }

    pub fn css_resources(&self) -> Vec<&ManifestItem> {
        self.resources_by_type("text/css")
    }

    pub fn js_resources(&self) -> Vec<&ManifestItem> {
        self.manifest
            .values()
            .filter(|item| JAVASCRIPT_TYPES.contains(&item.mime.as_str()))
            .collect()
    }

    /// Manifest items of the spine, in reading order
    ///
    /// Spine entries pointing to unknown ids are left out.
    pub fn reading_order(&self) -> Vec<&ManifestItem> {
        self.spine
            .iter()
            .filter_map(|item| self.manifest.get(&item.idref))
            .collect()
    }

    pub fn cover(&self) -> Option<&ManifestItem> {
        find_cover(&self.manifest, &self.metadata)
    }

    pub fn has_cover(&self) -> bool {
        self.cover().is_some()
    }

    /// Reads and decrypts the data of a manifest item
    pub fn read_resource(&self, id: &str) -> Result<Vec<u8>, EpubError> {
        let item = self
            .manifest
            .get(id)
            .ok_or_else(|| EpubError::ResourceIdNotExist { id: id.to_string() })?;

        self.read_entry(&item.entry_name())
    }

    /// Reads the document a chapter points to as text
    pub fn read_chapter_to_string(&self, chapter: &NavPoint) -> Result<String, EpubError> {
        let path = chapter
            .content_path()
            .ok_or_else(|| EpubError::ChapterNotFound {
                id: chapter.id.clone().unwrap_or_else(|| chapter.label.clone()),
            })?;

        let entry = path.to_string_lossy().replace('\\', "/");
        self.read_entry(&entry)?.decode()
    }

    /// Reads the document of a spine item as text
    pub fn read_chapter_by_id(&self, id: &str) -> Result<String, EpubError> {
        if !self.manifest.contains_key(id) {
            return Err(EpubError::ChapterNotFound { id: id.to_string() });
        }

        self.read_resource(id)?.decode()
    }

    /// Opens the archive of the publication for repeated reads
    pub fn open_archive(&self) -> Result<ZipArchive<BufReader<File>>, EpubError> {
        let file = File::open(&self.path)?;
        Ok(ZipArchive::new(BufReader::new(file))?)
    }

    /// Reads and decrypts a manifest item through an already opened archive
    pub fn read_resource_from<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        id: &str,
    ) -> Result<Vec<u8>, EpubError> {
        let item = self
            .manifest
            .get(id)
            .ok_or_else(|| EpubError::ResourceIdNotExist { id: id.to_string() })?;

        self.read_entry_from(archive, &item.entry_name())
    }

    fn read_entry(&self, entry: &str) -> Result<Vec<u8>, EpubError> {
        let mut archive = self.open_archive()?;
        self.read_entry_from(&mut archive, entry)
    }

    fn read_entry_from<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        entry: &str,
    ) -> Result<Vec<u8>, EpubError> {
        let data = get_file_in_zip_archive(archive, entry)?;

        decrypt_resource(
            self.encryption.as_deref(),
            &self.unique_identifier,
            entry,
            data,
        )
    }

    /// Reopens the publication as a full [EpubDoc]
    pub fn open(&self) -> Result<EpubDoc<BufReader<File>>, EpubError> {
        EpubDoc::with_options(&self.path, &self.options)
    }
}
