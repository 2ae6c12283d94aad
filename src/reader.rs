//! High level entry point
//!
//! [EpubReader] wraps the path of a publication together with a
//! [ReaderConfig] and offers the common operations in one call each: parse
//! the book (through the cache), read metadata or the table of contents,
//! stream chapters, walk resources.
//!
//! ```rust, ignore
//! # use epubime::reader::EpubReader;
//! # fn main() -> Result<(), epubime::error::EpubError> {
//! let reader = EpubReader::from_path("path/to/book.epub").with_cache(false);
//!
//! let info = reader.info()?;
//! println!("{:?} has {} chapters", info.title, info.chapter_count);
//!
//! reader.stream_chapters(|chapter, content| {
//!     let mut text = String::new();
//!     content.read_to_string(&mut text)?;
//!     println!("{}: {} bytes", chapter.label, text.len());
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

use std::{
    fs::{self, File},
    io::{BufReader, Read},
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use log::{debug, info};

use crate::{
    book::EpubBook,
    cache::{self, FileStamp},
    diagnostics::{Diagnostics, ParseResult},
    epub::EpubDoc,
    error::EpubError,
    metadata::Metadata,
    options::{ParseOptions, ReaderConfig},
    types::{ManifestItem, NavPoint},
    utils::is_external_href,
};

/// Basic facts about a publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpubInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub language: Option<String>,

    /// Number of top-level chapters
    pub chapter_count: usize,

    /// Size of the file in bytes
    pub file_size: u64,
}

/// Fluent reader over a single EPUB file
#[derive(Debug, Clone)]
pub struct EpubReader {
    path: PathBuf,
    config: ReaderConfig,
}

impl EpubReader {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config: ReaderConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.config.use_cache = use_cache;
        self
    }

    pub fn with_lazy_loading(mut self, lazy_loading: bool) -> Self {
        self.config.lazy_loading = lazy_loading;
        self
    }

    pub fn with_parallel_processing(mut self, parallel_processing: bool) -> Self {
        self.config.parallel_processing = parallel_processing;
        self
    }

    pub fn with_options(mut self, options: ParseOptions) -> Self {
        self.config.parse_options = options;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Opens a fresh [EpubDoc], bypassing the cache
    pub fn open(&self) -> Result<EpubDoc<BufReader<File>>, EpubError> {
        EpubDoc::with_options(&self.path, &self.config.parse_options)
    }

    /// Parses the publication
    ///
    /// With caching enabled, a book parsed earlier with the same options is
    /// reused as long as the file did not change. Eager readers only reuse
    /// books whose spine was read through once.
    pub fn parse(&self) -> Result<Arc<EpubBook>, EpubError> {
        if let Some(book) = self.cached() {
            return Ok(book);
        }

        let stamp = FileStamp::of(&self.path);
        let mut doc = self.open()?;
        if !self.config.lazy_loading {
            self.preload(&mut doc)?;
        }

        let book = Arc::new(doc.to_book());
        if self.config.use_cache {
            cache::insert(&self.path, stamp?, Arc::clone(&book), !self.config.lazy_loading)?;
        }

        Ok(book)
    }

    fn cached(&self) -> Option<Arc<EpubBook>> {
        if !self.config.use_cache {
            return None;
        }

        let book = match self.config.lazy_loading {
            true => cache::get(&self.path),
            false => cache::get_preloaded(&self.path),
        }?;
        (book.options == self.config.parse_options).then_some(book)
    }

    /// Parses the publication and reports everything noticed on the way
    ///
    /// Never fails: a broken publication gives a [ParseResult] with the
    /// `Failure` status and the error that stopped parsing.
    pub fn parse_with_result(&self) -> ParseResult {
        let start = Instant::now();
        let max_records = self.config.parse_options.max_warnings;

        let stamp = FileStamp::of(&self.path);
        let mut doc = match self.open() {
            Ok(doc) => doc,
            Err(err) => {
                return ParseResult::failure(err, Diagnostics::new(max_records), start.elapsed());
            }
        };

        if !self.config.lazy_loading {
            if let Err(err) = self.preload(&mut doc) {
                return ParseResult::failure(err, doc.diagnostics.clone(), start.elapsed());
            }
        }

        let book = Arc::new(doc.to_book());
        if self.config.use_cache {
            let preloaded = !self.config.lazy_loading;
            let cached = stamp.and_then(|stamp| {
                cache::insert(&self.path, stamp, Arc::clone(&book), preloaded)
            });
            if let Err(err) = cached {
                debug!("Unable to cache {}: {}", self.path.display(), err);
            }
        }

        ParseResult::success(book, doc.diagnostics.clone(), start.elapsed())
    }

    /// Reads every spine document once so broken entries surface at parse time
    fn preload(&self, doc: &mut EpubDoc<BufReader<File>>) -> Result<(), EpubError> {
        let ids = doc
            .spine
            .iter()
            .map(|item| item.idref.clone())
            .collect::<Vec<_>>();

        for id in ids {
            if let Err(err) = doc.get_manifest_item(&id) {
                if !self.config.parse_options.should_continue_on_error(&err) {
                    return Err(err);
                }
                doc.diagnostics.record_recovered(&err, None, "preload");
            }
        }

        Ok(())
    }

    pub fn parse_metadata(&self) -> Result<Metadata, EpubError> {
        Ok(self.parse()?.metadata())
    }

    pub fn parse_table_of_contents(&self) -> Result<Vec<NavPoint>, EpubError> {
        Ok(self.parse()?.chapters().to_vec())
    }

    /// Streams the content of every chapter through `f`
    ///
    /// Chapters are visited depth-first. Chapters without a content target or
    /// pointing outside the publication are skipped. The archive is opened
    /// once and each document is streamed straight from it.
    pub fn stream_chapters<F>(&self, mut f: F) -> Result<(), EpubError>
    where
        F: FnMut(&NavPoint, &mut dyn Read) -> Result<(), EpubError>,
    {
        let book = self.parse()?;
        let mut doc = self.open()?;

        for chapter in book.flatten_chapters() {
            if chapter
                .content
                .as_ref()
                .is_none_or(|content| is_external_href(&content.to_string_lossy()))
            {
                continue;
            }

            stream_chapter_content(&book, &mut doc, chapter, &mut f)?;
        }

        Ok(())
    }

    /// Streams the content of the chapter with the given id through `f`
    ///
    /// # Return
    /// - `Err(EpubError::ChapterNotFound)`: No chapter has this id, or it has no content
    pub fn stream_chapter<F>(&self, id: &str, mut f: F) -> Result<(), EpubError>
    where
        F: FnMut(&mut dyn Read) -> Result<(), EpubError>,
    {
        let book = self.parse()?;
        let chapter = book
            .find_chapter_by_id(id)
            .filter(|chapter| chapter.content.is_some())
            .ok_or_else(|| EpubError::ChapterNotFound { id: id.to_string() })?;

        let mut doc = self.open()?;
        stream_chapter_content(
            &book,
            &mut doc,
            chapter,
            &mut |_: &NavPoint, reader: &mut dyn Read| f(reader),
        )
    }

    /// Hands every manifest item stored in the publication and its data to `f`
    ///
    /// Remote resources are skipped. With parallel processing enabled (and
    /// the `batch` feature), items are spread over the rayon pool and every
    /// worker reads through its own archive handle. Processing stops at the
    /// first error.
    pub fn process_resources<F>(&self, f: F) -> Result<(), EpubError>
    where
        F: Fn(&ManifestItem, Vec<u8>) -> Result<(), EpubError> + Send + Sync,
    {
        let book = self.parse()?;
        let items = book
            .manifest
            .values()
            .filter(|item| !is_external_href(&item.entry_name()))
            .collect::<Vec<_>>();

        if self.config.parallel_processing {
            #[cfg(feature = "batch")]
            {
                use rayon::prelude::*;

                // surfaces open errors once instead of in every worker
                drop(book.open_archive()?);

                return items.into_par_iter().try_for_each_init(
                    || book.open_archive().ok(),
                    |archive, item| {
                        let archive = archive.as_mut().ok_or_else(|| EpubError::FileNotFound {
                            path: book.path.display().to_string(),
                        })?;
                        let data = book.read_resource_from(archive, &item.id)?;
                        f(item, data)
                    },
                );
            }

            #[cfg(not(feature = "batch"))]
            debug!("Parallel processing needs the `batch` feature, processing sequentially");
        }

        let mut archive = book.open_archive()?;
        for item in items {
            let data = book.read_resource_from(&mut archive, &item.id)?;
            f(item, data)?;
        }

        Ok(())
    }

    /// A manifest item together with its data
    pub fn get_resource(&self, id: &str) -> Result<(ManifestItem, Vec<u8>), EpubError> {
        let book = self.parse()?;
        let item = book
            .resource(id)
            .cloned()
            .ok_or_else(|| EpubError::ResourceIdNotExist { id: id.to_string() })?;
        let data = book.read_resource(id)?;

        Ok((item, data))
    }

    /// The cover item and its data, `None` when the publication declares no cover
    pub fn get_cover(&self) -> Result<Option<(ManifestItem, Vec<u8>)>, EpubError> {
        let book = self.parse()?;
        match book.cover() {
            Some(item) => {
                let data = book.read_resource(&item.id)?;
                Ok(Some((item.clone(), data)))
            }
            None => Ok(None),
        }
    }

    pub fn is_valid(&self) -> bool {
        match self.parse_metadata() {
            Ok(_) => true,
            Err(err) => {
                info!("{} is not a valid EPUB: {}", self.path.display(), err);
                false
            }
        }
    }

    pub fn info(&self) -> Result<EpubInfo, EpubError> {
        let book = self.parse()?;
        let file_size = fs::metadata(&self.path)?.len();

        Ok(EpubInfo {
            title: book.title().map(str::to_string),
            author: book.creator().map(str::to_string),
            language: book.language().map(str::to_string),
            chapter_count: book.chapter_count(),
            file_size,
        })
    }
}

/// Streams the document `chapter` points to, decrypting it when needed
fn stream_chapter_content<F>(
    book: &EpubBook,
    doc: &mut EpubDoc<BufReader<File>>,
    chapter: &NavPoint,
    f: &mut F,
) -> Result<(), EpubError>
where
    F: FnMut(&NavPoint, &mut dyn Read) -> Result<(), EpubError>,
{
    let entry = chapter
        .content_path()
        .map(|path| path.to_string_lossy().replace('\\', "/"))
        .ok_or_else(|| EpubError::ChapterNotFound {
            id: chapter.id.clone().unwrap_or_else(|| chapter.label.clone()),
        })?;

    match book.resource_by_path(&entry) {
        Some(item) => doc.read_manifest_item_with(&item.id, |_, reader| f(chapter, reader)),
        None => doc.read_entry_with(&entry, |reader| f(chapter, reader)),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Read,
        sync::{Arc, Mutex},
    };

    use crate::{
        diagnostics::ParseStatus,
        error::EpubError,
        fixtures::{EpubFixture, PNG},
        options::{ParseOptions, ReaderConfig},
        reader::EpubReader,
    };

    fn write(fixture: EpubFixture, name: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture.write_to(dir.path(), name);
        (dir, path)
    }

    #[test]
    fn test_builder_switches() {
        let reader = EpubReader::from_path("book.epub")
            .with_cache(false)
            .with_lazy_loading(false)
            .with_parallel_processing(true)
            .with_options(ParseOptions::lenient());

        let config = reader.config();
        assert!(!config.use_cache);
        assert!(!config.lazy_loading);
        assert!(config.parallel_processing);
        assert!(!config.parse_options.is_strict());

        let reader = reader.with_config(ReaderConfig::default());
        assert!(reader.config().use_cache);
    }

    #[test]
    fn test_parse_uses_cache() {
        let (_dir, path) = write(EpubFixture::epub3(), "cached.epub");
        let reader = EpubReader::from_path(&path);

        let first = reader.parse().unwrap();
        let second = reader.parse().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // different options never share a cached book
        let lenient = reader.clone().with_options(ParseOptions::lenient());
        assert!(!Arc::ptr_eq(&first, &lenient.parse().unwrap()));

        let uncached = EpubReader::from_path(&path).with_cache(false);
        assert!(!Arc::ptr_eq(&uncached.parse().unwrap(), &uncached.parse().unwrap()));
    }

    #[test]
    fn test_eager_loading_surfaces_missing_chapter() {
        let fixture = EpubFixture::epub3().without("OEBPS/text/ch2.xhtml");
        let (_dir, path) = write(fixture, "missing.epub");

        let lazy = EpubReader::from_path(&path).with_cache(false);
        assert!(lazy.parse().is_ok());

        let eager = lazy.clone().with_lazy_loading(false);
        assert_eq!(
            eager.parse().unwrap_err(),
            EpubError::ResourceNotFound {
                resource: "OEBPS/text/ch2.xhtml".to_string()
            }
        );

        let result = eager.with_options(ParseOptions::lenient()).parse_with_result();
        assert_eq!(result.status, ParseStatus::Recovered);
        assert_eq!(result.diagnostics.recovered().count(), 1);
    }

    #[test]
    fn test_eager_reader_skips_lazily_cached_book() {
        let fixture = EpubFixture::epub3().without("OEBPS/text/ch2.xhtml");
        let (_dir, path) = write(fixture, "lazy-cached.epub");

        let lazy = EpubReader::from_path(&path);
        let cached = lazy.parse().unwrap();

        let eager = EpubReader::from_path(&path).with_lazy_loading(false);
        assert!(eager.parse().is_err());

        // the lazily parsed entry is still served to lazy readers
        assert!(Arc::ptr_eq(&cached, &lazy.parse().unwrap()));
    }

    #[test]
    fn test_lazy_reader_reuses_preloaded_book() {
        let (_dir, path) = write(EpubFixture::epub3(), "eager-cached.epub");

        let eager = EpubReader::from_path(&path).with_lazy_loading(false);
        let book = eager.parse().unwrap();

        assert!(Arc::ptr_eq(&book, &eager.parse().unwrap()));
        assert!(Arc::ptr_eq(&book, &EpubReader::from_path(&path).parse().unwrap()));
    }

    #[test]
    fn test_parse_with_result() {
        let (_dir, path) = write(EpubFixture::epub3(), "ok.epub");
        let result = EpubReader::from_path(&path)
            .with_cache(false)
            .parse_with_result();
        assert_eq!(result.status, ParseStatus::Success);
        assert!(result.book.is_some());

        let (_dir, path) = write(EpubFixture::epub3().without("OEBPS/nav.xhtml"), "nav.epub");
        let strict = EpubReader::from_path(&path).with_cache(false);
        let result = strict.parse_with_result();
        assert_eq!(result.status, ParseStatus::Failure);
        assert!(matches!(
            result.error.as_deref(),
            Some(EpubError::InvalidNav { .. })
        ));

        let result = strict
            .with_options(ParseOptions::lenient())
            .parse_with_result();
        assert_eq!(result.status, ParseStatus::Recovered);
        assert_eq!(result.book.unwrap().chapter_count(), 2);
    }

    #[test]
    fn test_metadata_and_toc() {
        let (_dir, path) = write(EpubFixture::epub3(), "toc.epub");
        let reader = EpubReader::from_path(&path);

        assert_eq!(reader.parse_metadata().unwrap().title(), Some("Sample Book"));

        let toc = reader.parse_table_of_contents().unwrap();
        assert_eq!(toc.len(), 3);
        assert_eq!(toc[0].children[0].label, "Section 1.1");
    }

    #[test]
    fn test_stream_chapters() {
        let (_dir, path) = write(EpubFixture::epub3(), "stream.epub");
        let reader = EpubReader::from_path(&path);

        let mut seen = Vec::new();
        reader
            .stream_chapters(|chapter, content| {
                let mut text = String::new();
                content.read_to_string(&mut text)?;
                seen.push((chapter.label.clone(), text.contains("<body>")));
                Ok(())
            })
            .unwrap();

        let labels = seen.iter().map(|(label, _)| label.as_str()).collect::<Vec<_>>();
        // "Part Two" has no content target
        assert_eq!(labels, vec!["Chapter One", "Section 1.1", "Chapter Two", "Notes"]);
        assert!(seen.iter().all(|(_, has_body)| *has_body));
    }

    #[test]
    fn test_stream_chapters_propagates_errors() {
        let (_dir, path) = write(EpubFixture::epub3(), "abort.epub");
        let reader = EpubReader::from_path(&path);

        let mut calls = 0;
        let result = reader.stream_chapters(|_, _| {
            calls += 1;
            Err(EpubError::EmptyDataError)
        });
        assert_eq!(result.unwrap_err(), EpubError::EmptyDataError);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_stream_chapter() {
        let (_dir, path) = write(EpubFixture::epub3(), "single.epub");
        let reader = EpubReader::from_path(&path);

        let mut text = String::new();
        reader
            .stream_chapter("nav-ch1", |content| {
                content.read_to_string(&mut text)?;
                Ok(())
            })
            .unwrap();
        assert!(text.contains("dark and stormy"));

        assert_eq!(
            reader.stream_chapter("missing", |_| Ok(())).unwrap_err(),
            EpubError::ChapterNotFound {
                id: "missing".to_string()
            }
        );
    }

    #[test]
    fn test_process_resources() {
        let (_dir, path) = write(EpubFixture::epub3(), "resources.epub");

        for parallel in [false, true] {
            let reader = EpubReader::from_path(&path).with_parallel_processing(parallel);
            let seen = Mutex::new(Vec::new());
            reader
                .process_resources(|item, data| {
                    seen.lock().unwrap().push((item.id.clone(), data.len()));
                    Ok(())
                })
                .unwrap();

            let mut seen = seen.into_inner().unwrap();
            seen.sort();
            assert_eq!(seen.len(), 8);
            assert!(seen.contains(&("cover-img".to_string(), PNG.len())));
        }
    }

    #[test]
    fn test_process_resources_skips_remote_items() {
        let fixture = EpubFixture::epub3().edit("OEBPS/content.opf", |opf| {
            opf.replace(
                "</manifest>",
                "<item id=\"audio\" href=\"https://example.com/a.mp3\" media-type=\"audio/mpeg\"/></manifest>",
            )
        });
        let (_dir, path) = write(fixture, "remote.epub");

        for parallel in [false, true] {
            let reader = EpubReader::from_path(&path)
                .with_cache(false)
                .with_parallel_processing(parallel);
            let seen = Mutex::new(Vec::new());
            reader
                .process_resources(|item, _| {
                    seen.lock().unwrap().push(item.id.clone());
                    Ok(())
                })
                .unwrap();

            let seen = seen.into_inner().unwrap();
            assert_eq!(seen.len(), 8);
            assert!(!seen.contains(&"audio".to_string()));
        }
    }

    #[test]
    fn test_process_resources_stops_at_first_error() {
        let (_dir, path) = write(EpubFixture::epub3(), "failing.epub");

        for parallel in [false, true] {
            let reader = EpubReader::from_path(&path).with_parallel_processing(parallel);
            let result = reader.process_resources(|item, _| match item.id.as_str() {
                "css" => Err(EpubError::EmptyDataError),
                _ => Ok(()),
            });
            assert_eq!(result.unwrap_err(), EpubError::EmptyDataError);
        }
    }

    #[test]
    fn test_resource_and_cover() {
        let (_dir, path) = write(EpubFixture::epub2(), "legacy.epub");
        let reader = EpubReader::from_path(&path);

        let (item, data) = reader.get_resource("ch1").unwrap();
        assert_eq!(item.mime, "application/xhtml+xml");
        assert!(String::from_utf8(data).unwrap().contains("Legacy content one."));
        assert!(matches!(
            reader.get_resource("nothing"),
            Err(EpubError::ResourceIdNotExist { .. })
        ));

        let (cover, _) = reader.get_cover().unwrap().unwrap();
        assert_eq!(cover.id, "cover");

        let fixture = EpubFixture::epub2().edit("OEBPS/content.opf", |opf| {
            opf.replace("<meta name=\"cover\" content=\"cover\"/>", "")
        });
        let (_dir, path) = write(fixture, "no-cover.epub");
        assert!(EpubReader::from_path(&path).get_cover().unwrap().is_none());
    }

    #[test]
    fn test_is_valid_and_info() {
        let (_dir, path) = write(EpubFixture::epub3(), "info.epub");
        let reader = EpubReader::from_path(&path);

        assert!(reader.is_valid());
        let info = reader.info().unwrap();
        assert_eq!(info.title.as_deref(), Some("Sample Book"));
        assert_eq!(info.author.as_deref(), Some("Jane Doe"));
        assert_eq!(info.language.as_deref(), Some("en"));
        assert_eq!(info.chapter_count, 3);
        assert_eq!(info.file_size, std::fs::metadata(&path).unwrap().len());

        assert!(!EpubReader::from_path("/no/such/book.epub").is_valid());

        let (_dir, path) = write(EpubFixture::epub3().without("OEBPS/content.opf"), "bad.epub");
        assert!(!EpubReader::from_path(&path).is_valid());
    }
}
