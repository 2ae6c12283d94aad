//! Work over many publications at once
//!
//! [BatchProcessor] spreads per-file work over a rayon pool. Every file is
//! handled independently: a broken publication yields an `Err` in its slot
//! and never stops the others. Results come back in input order.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};
use walkdir::WalkDir;

use crate::{
    book::EpubBook,
    error::EpubError,
    options::ParseOptions,
    reader::{EpubInfo, EpubReader},
    validation::{ValidationReport, validate},
};

/// Parallel processing of EPUB files
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    pool: Option<Arc<ThreadPool>>,
    options: ParseOptions,
    use_cache: bool,
}

impl Default for BatchProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchProcessor {
    /// A processor running on the global rayon pool
    pub fn new() -> Self {
        Self {
            pool: None,
            options: ParseOptions::default(),
            use_cache: true,
        }
    }

    /// A processor running on a dedicated pool of `threads` workers
    ///
    /// Falls back to the global pool when the dedicated one cannot be built.
    pub fn with_threads(mut self, threads: usize) -> Self {
        match ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => self.pool = Some(Arc::new(pool)),
            Err(err) => warn!("Unable to build a pool of {} threads: {}", threads, err),
        }
        self
    }

    pub fn with_options(mut self, options: ParseOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    fn install<T, F>(&self, op: F) -> T
    where
        T: Send,
        F: FnOnce() -> T + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    fn reader(&self, path: &Path) -> EpubReader {
        EpubReader::from_path(path)
            .with_options(self.options.clone())
            .with_cache(self.use_cache)
    }

    /// Parses every file
    pub fn parse_all<P>(&self, paths: &[P]) -> Vec<Result<Arc<EpubBook>, EpubError>>
    where
        P: AsRef<Path> + Sync,
    {
        self.process_all(paths, |book| Ok(Arc::clone(book)))
    }

    /// Parses every file and applies `f` to each parsed book
    pub fn process_all<P, T, F>(&self, paths: &[P], f: F) -> Vec<Result<T, EpubError>>
    where
        P: AsRef<Path> + Sync,
        T: Send,
        F: Fn(&Arc<EpubBook>) -> Result<T, EpubError> + Send + Sync,
    {
        let results = self.install(|| {
            paths
                .par_iter()
                .map(|path| {
                    let book = self.reader(path.as_ref()).parse()?;
                    f(&book)
                })
                .collect::<Vec<_>>()
        });

        let failed = results.iter().filter(|result| result.is_err()).count();
        info!(
            "Processed {} publications, {} failed",
            results.len(),
            failed
        );
        results
    }

    /// Runs the structural checks on every file
    pub fn validate_all<P>(&self, paths: &[P]) -> Vec<ValidationReport>
    where
        P: AsRef<Path> + Sync,
    {
        self.install(|| paths.par_iter().map(validate).collect())
    }

    /// Reads the basic facts of every file
    pub fn info_all<P>(&self, paths: &[P]) -> Vec<Result<EpubInfo, EpubError>>
    where
        P: AsRef<Path> + Sync,
    {
        self.install(|| {
            paths
                .par_iter()
                .map(|path| self.reader(path.as_ref()).info())
                .collect()
        })
    }

    /// Every `.epub` file below `dir`, sorted
    ///
    /// The extension is matched case-insensitively.
    pub fn collect_epub_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>, EpubError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let is_epub = entry
                .path()
                .extension()
                .is_some_and(|extension| extension.eq_ignore_ascii_case("epub"));
            if is_epub {
                files.push(entry.into_path());
            }
        }

        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::{
        error::EpubError,
        fixtures::EpubFixture,
        options::ParseOptions,
        processor::BatchProcessor,
    };

    #[test]
    fn test_collect_epub_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        EpubFixture::epub3().write_to(dir.path(), "b.epub");
        EpubFixture::epub2().write_to(&dir.path().join("nested"), "a.EPUB");
        fs::write(dir.path().join("notes.txt"), "not a book").unwrap();
        fs::create_dir(dir.path().join("folder.epub")).unwrap();

        let files = BatchProcessor::collect_epub_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("b.epub"), dir.path().join("nested/a.EPUB")]
        );

        assert!(matches!(
            BatchProcessor::collect_epub_files(dir.path().join("missing")),
            Err(EpubError::WalkDirError { .. })
        ));
    }

    #[test]
    fn test_parse_all_keeps_order_and_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            EpubFixture::epub3().write_to(dir.path(), "one.epub"),
            dir.path().join("missing.epub"),
            EpubFixture::epub2().write_to(dir.path(), "two.epub"),
        ];

        let results = BatchProcessor::new().with_threads(2).parse_all(&paths);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().title(), Some("Sample Book"));
        assert!(matches!(results[1], Err(EpubError::FileNotFound { .. })));
        assert_eq!(results[2].as_ref().unwrap().title(), Some("Legacy Book"));
    }

    #[test]
    fn test_process_all() {
        let dir = tempfile::tempdir().unwrap();
        let broken = EpubFixture::epub3().without("OEBPS/nav.xhtml");
        let paths = vec![
            EpubFixture::epub3().write_to(dir.path(), "one.epub"),
            broken.write_to(dir.path(), "broken.epub"),
        ];

        let strict = BatchProcessor::new().with_cache(false);
        let counts = strict.process_all(&paths, |book| Ok(book.manifest.len()));
        assert_eq!(counts[0].as_ref().unwrap(), &8);
        assert!(counts[1].is_err());

        let lenient = strict.with_options(ParseOptions::lenient());
        let counts = lenient.process_all(&paths, |book| Ok(book.chapter_count()));
        assert_eq!(counts[0].as_ref().unwrap(), &3);
        assert_eq!(counts[1].as_ref().unwrap(), &2);
    }

    #[test]
    fn test_validate_and_info_all() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            EpubFixture::epub3().write_to(dir.path(), "good.epub"),
            EpubFixture::epub3()
                .with_mimetype(None)
                .write_to(dir.path(), "no-mimetype.epub"),
        ];
        let processor = BatchProcessor::new();

        let reports = processor.validate_all(&paths);
        assert!(reports[0].is_valid());
        assert!(!reports[1].is_valid());
        assert_eq!(reports[1].path, paths[1]);

        let infos = processor.info_all(&paths);
        assert_eq!(infos[0].as_ref().unwrap().chapter_count, 3);
        assert_eq!(
            infos[1].as_ref().unwrap().author.as_deref(),
            Some("Jane Doe")
        );
    }
}
