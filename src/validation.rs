//! Structural checks of an EPUB file
//!
//! These checks look at the container layout only: the leading `mimetype`
//! entry, `META-INF/container.xml` and the presence of the required package
//! metadata. They are cheaper than a full parse and report every problem
//! found instead of stopping at the first one.

use std::{
    fs::File,
    io::{BufReader, Read, Seek},
    path::{Path, PathBuf},
};

use log::debug;
use zip::ZipArchive;

use crate::{
    error::EpubError,
    utils::{XmlReader, get_file_in_zip_archive, validate_entry_path},
};

const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";
const MIMETYPE_NAME: &[u8] = b"mimetype";
const EPUB_MIMETYPE: &str = "application/epub+zip";
const CONTAINER_NAMESPACE: &str = "urn:oasis:names:tc:opendocument:xmlns:container";
const PACKAGE_MEDIA_TYPE: &str = "application/oebps-package+xml";

/// The structural checks, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationCheck {
    MagicNumber,
    Mimetype,
    Container,
    Package,
}

/// A failed check and the error it produced
#[derive(Debug)]
pub struct ValidationIssue {
    pub check: ValidationCheck,
    pub error: EpubError,
}

/// Outcome of [validate]
#[derive(Debug)]
pub struct ValidationReport {
    pub path: PathBuf,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn passed(&self, check: ValidationCheck) -> bool {
        !self.issues.iter().any(|issue| issue.check == check)
    }

    /// One line per failed check
    pub fn messages(&self) -> Vec<String> {
        self.issues
            .iter()
            .map(|issue| format!("{:?}: {}", issue.check, issue.error))
            .collect()
    }
}

/// Checks the local file header of the first archive entry
///
/// A conforming EPUB starts with an uncompressed `mimetype` entry, so the
/// zip signature is at offset 0, the entry name at offset 30 and its content
/// at offset 38.
pub fn check_magic_number<R: Read>(reader: &mut R) -> Result<(), EpubError> {
    let mut header = [0u8; 58];
    let mut read = 0;
    while read < header.len() {
        match reader.read(&mut header[read..])? {
            0 => break,
            n => read += n,
        }
    }
    let header = &header[..read];

    if !header.starts_with(ZIP_SIGNATURE) {
        return Err(EpubError::InvalidFileFormat {
            reason: "missing zip signature".to_string(),
        });
    }
    if header.get(30..38) != Some(MIMETYPE_NAME) {
        return Err(EpubError::InvalidFileFormat {
            reason: "the first entry is not \"mimetype\"".to_string(),
        });
    }
    if header.get(38..58) != Some(EPUB_MIMETYPE.as_bytes()) {
        let found = header.get(38..).unwrap_or_default();
        return Err(EpubError::InvalidMimetype {
            found: String::from_utf8_lossy(found).into_owned(),
        });
    }

    Ok(())
}

/// Checks that the `mimetype` entry exists and holds exactly `application/epub+zip`
pub fn check_mimetype<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<(), EpubError> {
    let data = get_file_in_zip_archive(archive, "mimetype").map_err(|err| match err {
        EpubError::ResourceNotFound { .. } => EpubError::NonCanonicalEpub {
            expected_file: "mimetype".to_string(),
        },
        err => err,
    })?;

    if data != EPUB_MIMETYPE.as_bytes() {
        return Err(EpubError::InvalidMimetype {
            found: String::from_utf8_lossy(&data).into_owned(),
        });
    }
    Ok(())
}

/// Checks `META-INF/container.xml` and returns the package path it declares
///
/// The root element must be in the OCF container namespace and the first
/// `rootfile` must be an OPF package with a `full-path`.
pub fn check_container<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String, EpubError> {
    let data = get_file_in_zip_archive(archive, "META-INF/container.xml").map_err(|err| {
        match err {
            EpubError::ResourceNotFound { .. } => EpubError::NonCanonicalEpub {
                expected_file: "META-INF/container.xml".to_string(),
            },
            err => err,
        }
    })?;

    let root = XmlReader::parse_bytes(&data)?;
    if root.name != "container" || root.namespace.as_deref() != Some(CONTAINER_NAMESPACE) {
        return Err(EpubError::NonCanonicalFile {
            tag: "container".to_string(),
        });
    }

    let rootfile = root
        .find_elements_by_name("rootfile")
        .next()
        .ok_or_else(|| EpubError::NonCanonicalFile {
            tag: "rootfile".to_string(),
        })?;

    if rootfile.get_attr("media-type").as_deref() != Some(PACKAGE_MEDIA_TYPE) {
        return Err(EpubError::MissingRequiredAttribute {
            tag: "rootfile".to_string(),
            attribute: "media-type".to_string(),
        });
    }

    let full_path =
        rootfile
            .get_attr("full-path")
            .ok_or_else(|| EpubError::MissingRequiredAttribute {
                tag: "rootfile".to_string(),
                attribute: "full-path".to_string(),
            })?;
    validate_entry_path(&full_path)?;

    Ok(full_path)
}

/// Checks that the package document exists and has a title, a language and an identifier
pub fn check_package<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    package_path: &str,
) -> Result<(), EpubError> {
    let data = get_file_in_zip_archive(archive, package_path).map_err(|err| match err {
        EpubError::ResourceNotFound { .. } => EpubError::NonCanonicalEpub {
            expected_file: package_path.to_string(),
        },
        err => err,
    })?;

    let package = XmlReader::parse_bytes(&data)?;
    let metadata = package
        .first_child("metadata")
        .ok_or_else(|| EpubError::NonCanonicalFile {
            tag: "metadata".to_string(),
        })?;

    for required in ["title", "language", "identifier"] {
        let present = metadata
            .find_children_by_name(required)
            .any(|element| !element.text().is_empty());
        if !present {
            return Err(EpubError::NonCanonicalFile {
                tag: format!("dc:{}", required),
            });
        }
    }

    Ok(())
}

/// Runs every structural check on the file at `path`
///
/// Checks that depend on an earlier one (the package needs the container)
/// are skipped when it failed.
pub fn validate<P: AsRef<Path>>(path: P) -> ValidationReport {
    let path = path.as_ref();
    let mut report = ValidationReport {
        path: path.to_path_buf(),
        issues: Vec::new(),
    };
    let mut fail = |check, error| {
        debug!("{} failed the {:?} check: {}", path.display(), check, error);
        report.issues.push(ValidationIssue { check, error });
    };

    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            fail(ValidationCheck::MagicNumber, EpubError::from(err));
            return report;
        }
    };
    let mut reader = BufReader::new(file);

    if let Err(err) = check_magic_number(&mut reader) {
        fail(ValidationCheck::MagicNumber, err);
    }

    let mut archive = match reader.rewind().map_err(EpubError::from).and_then(|_| {
        ZipArchive::new(reader).map_err(EpubError::from)
    }) {
        Ok(archive) => archive,
        Err(err) => {
            fail(ValidationCheck::Mimetype, err);
            return report;
        }
    };

    if let Err(err) = check_mimetype(&mut archive) {
        fail(ValidationCheck::Mimetype, err);
    }

    match check_container(&mut archive) {
        Ok(package_path) => {
            if let Err(err) = check_package(&mut archive, &package_path) {
                fail(ValidationCheck::Package, err);
            }
        }
        Err(err) => fail(ValidationCheck::Container, err),
    }

    report
}
