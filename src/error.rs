//! Error Type Definition Module
//!
//! This module defines the errors that may be encountered while opening,
//! parsing and reading EPUB publications. All errors are uniformly wrapped in
//! the [EpubError] enumeration. Every error also maps to a stable numeric
//! [ErrorCode], which is what the lenient parsing options and the diagnostics
//! collector reason about.
//!
//! ## Main Types
//!
//! - [EpubError] - Enumeration of errors during EPUB processing
//! - [ErrorCode] - Stable numeric code attached to each error
//! - [ErrorCategory] - Coarse grouping of error codes

use std::fmt;

use thiserror::Error;

/// Types of errors that can occur during EPUB processing
///
/// This enumeration defines the various error cases that can be encountered
/// when parsing and processing EPUB files, including file format errors,
/// missing resources, compression issues, unsafe paths, etc.
#[derive(Debug, Error)]
pub enum EpubError {
    /// ZIP archive related errors
    ///
    /// Errors occur when processing the ZIP structure of EPUB files,
    /// such as file corruption, unreadability, etc.
    #[error("Archive error: {source}")]
    ArchiveError { source: zip::result::ZipError },

    /// Chapter lookup error
    ///
    /// This error occurs when a chapter requested by id or title is not part
    /// of the navigation of the publication.
    #[error("Chapter not found: There is no chapter identified by \"{id}\".")]
    ChapterNotFound { id: String },

    /// Data Decoding Error - Null data
    ///
    /// This error occurs when trying to decode an empty stream.
    #[error("Decode error: The data is empty.")]
    EmptyDataError,

    /// XML parsing failure error
    ///
    /// This error usually only occurs when the XML event stream ends before
    /// the root element was closed, which leaves the document without a root.
    #[error(
        "Failed parsing XML error: Unknown problems occurred during XML parsing, causing parsing failure."
    )]
    FailedParsingXml,

    /// The publication file itself does not exist
    #[error("File not found: \"{path}\" does not exist.")]
    FileNotFound { path: String },

    #[error("IO error: {source}")]
    IOError { source: std::io::Error },

    /// The file is not laid out as an EPUB container
    ///
    /// Raised by the structural checks of the `validation` module, for
    /// example when the archive does not start with the `mimetype` entry.
    #[error("Invalid file format: {reason}")]
    InvalidFileFormat { reason: String },

    /// Invalid mimetype entry
    ///
    /// The `mimetype` entry of the container exists but does not contain
    /// `application/epub+zip`.
    #[error("Invalid mimetype: Expected \"application/epub+zip\" but found \"{found}\".")]
    InvalidMimetype { found: String },

    /// Invalid EPUB 3 navigation document
    ///
    /// Wraps the error raised while reading or interpreting the navigation document.
    #[error("Invalid navigation document: {source}")]
    InvalidNav { source: Box<EpubError> },

    /// Invalid EPUB 2 NCX document
    ///
    /// Wraps the error raised while reading or interpreting the NCX document.
    #[error("Invalid NCX document: {source}")]
    InvalidNcx { source: Box<EpubError> },

    /// Missing required attribute error
    ///
    /// Triggered when an XML element in an EPUB file lacks the required
    /// attributes required by the EPUB specification.
    #[error(
        "Missing required attribute: The \"{attribute}\" attribute is a must attribute for the \"{tag}\" element."
    )]
    MissingRequiredAttribute { tag: String, attribute: String },

    /// Non-canonical EPUB structure error
    ///
    /// This error occurs when an EPUB file lacks some files or directory
    /// structure that is required in EPUB specification.
    #[error("Non-canonical epub: The \"{expected_file}\" file was not found.")]
    NonCanonicalEpub { expected_file: String },

    /// Non-canonical file structure error
    ///
    /// This error is triggered when the required XML elements in the
    /// specification are missing from the EPUB file.
    #[error("Non-canonical file: The \"{tag}\" elements was not found.")]
    NonCanonicalFile { tag: String },

    /// Missing supported file format error
    ///
    /// This error occurs when trying to get a resource but there isn't any supported file format.
    /// It usually happens when there are no supported formats available in the fallback chain.
    #[error(
        "No supported file format: The fallback resource does not contain the file format you support."
    )]
    NoSupportedFileFormat,

    /// Relative link leak error
    ///
    /// This error occurs when a relative path link is outside the scope
    /// of an EPUB container, which is a security protection mechanism.
    #[error("Relative link leakage: Path \"{path}\" is out of container range.")]
    RealtiveLinkLeakage { path: String },

    /// Unable to find the resource id error
    ///
    /// This error occurs when trying to get a resource by id but that id doesn't exist in the manifest.
    #[error("Resource Id Not Exist: There is no resource item with id \"{id}\".")]
    ResourceIdNotExist { id: String },

    /// Unable to find the resource error
    ///
    /// This error occurs when an attempt is made to get a resource
    /// but it does not exist in the EPUB container.
    #[error("Resource not found: Unable to find resource from \"{resource}\".")]
    ResourceNotFound { resource: String },

    /// Unrecognized EPUB version error
    ///
    /// This error occurs when parsing epub files, the library cannot
    /// directly or indirectly identify the epub version number.
    #[error(
        "Unrecognized EPUB version: Unable to identify version number and version characteristics from epub file"
    )]
    UnrecognizedEpubVersion,

    /// Unsafe entry path error
    ///
    /// Raised before any entry of the container is read through a path that
    /// is empty, absolute, climbs out of the container, contains control
    /// characters or is unreasonably long.
    #[error("Unsafe path: \"{path}\" was rejected ({reason}).")]
    UnsafePath { path: String, reason: PathViolation },

    /// Unsupported encryption method error
    ///
    /// This error is triggered when attempting to decrypt a resource that uses
    /// an encryption method not supported by this library.
    ///
    /// Currently, this library only supports:
    /// - IDPF Font Obfuscation
    /// - Adobe Font Obfuscation
    #[error("Unsupported encryption method: The \"{method}\" encryption method is not supported.")]
    UnsupportedEncryptedMethod { method: String },

    /// Unusable compression method error
    ///
    /// This error occurs when an EPUB file uses an unsupported compression method.
    #[error(
        "Unusable compression method: The \"{file}\" file uses the unsupported \"{method}\" compression method."
    )]
    UnusableCompressionMethod { file: String, method: String },

    /// UTF-8 decoding error
    ///
    /// This error occurs when attempting to decode byte data into a UTF-8 string
    /// but the data is not formatted correctly.
    #[error("Decode error: {source}")]
    Utf8DecodeError { source: std::string::FromUtf8Error },

    /// UTF-16 decoding error
    ///
    /// This error occurs when attempting to decode byte data into a UTF-16 string
    /// but the data is not formatted correctly.
    #[error("Decode error: {source}")]
    Utf16DecodeError { source: std::string::FromUtf16Error },

    /// WalkDir error
    ///
    /// This error occurs when using the WalkDir library to traverse a directory of publications.
    #[cfg(feature = "batch")]
    #[error("WalkDir error: {source}")]
    WalkDirError { source: walkdir::Error },

    /// QuickXml error
    ///
    /// This error occurs when parsing XML data using the QuickXml library.
    #[error("QuickXml error: {source}")]
    QuickXmlError { source: quick_xml::Error },
}

/// The rule an entry path broke when it was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathViolation {
    Empty,
    Absolute,
    Traversal,
    InvalidCharacter,
    TooLong,
}

impl fmt::Display for PathViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            PathViolation::Empty => "empty path",
            PathViolation::Absolute => "absolute path",
            PathViolation::Traversal => "escapes the container root",
            PathViolation::InvalidCharacter => "invalid character",
            PathViolation::TooLong => "path too long",
        };
        f.write_str(reason)
    }
}

/// Coarse grouping of [ErrorCode]s, one per thousand block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    File,
    Zip,
    Xml,
    Format,
    Path,
    Resource,
    General,
}

/// Stable numeric error codes
///
/// The numeric values are part of the public contract and never change
/// between releases, so they can be logged, persisted or matched by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    FileNotFound,
    FileAccessDenied,
    FileCorrupted,
    InvalidFileFormat,

    ZipInvalid,
    ZipEntryNotFound,
    ZipDecompressionFailed,

    XmlParseError,
    XmlInvalidStructure,
    XmlMissingRequiredElement,
    XmlInvalidAttribute,

    EpubInvalidContainer,
    EpubMissingMimetype,
    EpubInvalidOpf,
    EpubInvalidNcx,
    EpubInvalidNav,

    PathTraversalAttack,
    PathInvalidCharacter,
    PathTooLong,

    ResourceNotFound,
    ResourceLoadFailed,
    ResourceInvalidType,

    UnknownError,
    OperationNotSupported,
    InternalError,
}

impl ErrorCode {
    /// Returns the numeric value of the code
    pub fn value(&self) -> u16 {
        match self {
            ErrorCode::FileNotFound => 1001,
            ErrorCode::FileAccessDenied => 1002,
            ErrorCode::FileCorrupted => 1003,
            ErrorCode::InvalidFileFormat => 1004,
            ErrorCode::ZipInvalid => 2001,
            ErrorCode::ZipEntryNotFound => 2002,
            ErrorCode::ZipDecompressionFailed => 2003,
            ErrorCode::XmlParseError => 3001,
            ErrorCode::XmlInvalidStructure => 3002,
            ErrorCode::XmlMissingRequiredElement => 3003,
            ErrorCode::XmlInvalidAttribute => 3004,
            ErrorCode::EpubInvalidContainer => 4001,
            ErrorCode::EpubMissingMimetype => 4002,
            ErrorCode::EpubInvalidOpf => 4003,
            ErrorCode::EpubInvalidNcx => 4004,
            ErrorCode::EpubInvalidNav => 4005,
            ErrorCode::PathTraversalAttack => 5001,
            ErrorCode::PathInvalidCharacter => 5002,
            ErrorCode::PathTooLong => 5003,
            ErrorCode::ResourceNotFound => 6001,
            ErrorCode::ResourceLoadFailed => 6002,
            ErrorCode::ResourceInvalidType => 6003,
            ErrorCode::UnknownError => 9001,
            ErrorCode::OperationNotSupported => 9002,
            ErrorCode::InternalError => 9003,
        }
    }

    /// Short human readable description of the code
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::FileNotFound => "File not found",
            ErrorCode::FileAccessDenied => "File access denied",
            ErrorCode::FileCorrupted => "File corrupted",
            ErrorCode::InvalidFileFormat => "Invalid file format",
            ErrorCode::ZipInvalid => "Invalid ZIP file",
            ErrorCode::ZipEntryNotFound => "ZIP entry not found",
            ErrorCode::ZipDecompressionFailed => "ZIP decompression failed",
            ErrorCode::XmlParseError => "XML parse error",
            ErrorCode::XmlInvalidStructure => "Invalid XML structure",
            ErrorCode::XmlMissingRequiredElement => "Missing required XML element",
            ErrorCode::XmlInvalidAttribute => "Invalid XML attribute",
            ErrorCode::EpubInvalidContainer => "Invalid EPUB container",
            ErrorCode::EpubMissingMimetype => "Missing or invalid mimetype",
            ErrorCode::EpubInvalidOpf => "Invalid OPF file",
            ErrorCode::EpubInvalidNcx => "Invalid NCX file",
            ErrorCode::EpubInvalidNav => "Invalid NAV file",
            ErrorCode::PathTraversalAttack => "Path traversal attack detected",
            ErrorCode::PathInvalidCharacter => "Invalid character in path",
            ErrorCode::PathTooLong => "Path too long",
            ErrorCode::ResourceNotFound => "Resource not found",
            ErrorCode::ResourceLoadFailed => "Resource load failed",
            ErrorCode::ResourceInvalidType => "Invalid resource type",
            ErrorCode::UnknownError => "Unknown error",
            ErrorCode::OperationNotSupported => "Operation not supported",
            ErrorCode::InternalError => "Internal error",
        }
    }

    /// Returns the block this code belongs to
    pub fn category(&self) -> ErrorCategory {
        match self.value() / 1000 {
            1 => ErrorCategory::File,
            2 => ErrorCategory::Zip,
            3 => ErrorCategory::Xml,
            4 => ErrorCategory::Format,
            5 => ErrorCategory::Path,
            6 => ErrorCategory::Resource,
            _ => ErrorCategory::General,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.value(), self.description())
    }
}

impl EpubError {
    /// Maps the error to its stable [ErrorCode]
    pub fn code(&self) -> ErrorCode {
        match self {
            EpubError::ArchiveError { source } => match source {
                zip::result::ZipError::FileNotFound => ErrorCode::ZipEntryNotFound,
                zip::result::ZipError::Io(_) => ErrorCode::ZipDecompressionFailed,
                _ => ErrorCode::ZipInvalid,
            },
            EpubError::ChapterNotFound { .. } => ErrorCode::ResourceNotFound,
            EpubError::EmptyDataError => ErrorCode::FileCorrupted,
            EpubError::FailedParsingXml => ErrorCode::XmlParseError,
            EpubError::FileNotFound { .. } => ErrorCode::FileNotFound,
            EpubError::IOError { source } => match source.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::FileNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::FileAccessDenied,
                _ => ErrorCode::FileCorrupted,
            },
            EpubError::InvalidFileFormat { .. } => ErrorCode::InvalidFileFormat,
            EpubError::InvalidMimetype { .. } => ErrorCode::EpubMissingMimetype,
            EpubError::InvalidNav { .. } => ErrorCode::EpubInvalidNav,
            EpubError::InvalidNcx { .. } => ErrorCode::EpubInvalidNcx,
            EpubError::MissingRequiredAttribute { .. } => ErrorCode::XmlInvalidAttribute,
            EpubError::NonCanonicalEpub { .. } => ErrorCode::EpubInvalidContainer,
            EpubError::NonCanonicalFile { .. } => ErrorCode::XmlMissingRequiredElement,
            EpubError::NoSupportedFileFormat => ErrorCode::ResourceInvalidType,
            EpubError::RealtiveLinkLeakage { .. } => ErrorCode::PathTraversalAttack,
            EpubError::ResourceIdNotExist { .. } => ErrorCode::ResourceNotFound,
            EpubError::ResourceNotFound { .. } => ErrorCode::ResourceNotFound,
            EpubError::UnrecognizedEpubVersion => ErrorCode::EpubInvalidOpf,
            EpubError::UnsafePath { reason, .. } => match reason {
                PathViolation::InvalidCharacter => ErrorCode::PathInvalidCharacter,
                PathViolation::TooLong => ErrorCode::PathTooLong,
                _ => ErrorCode::PathTraversalAttack,
            },
            EpubError::UnsupportedEncryptedMethod { .. } => ErrorCode::OperationNotSupported,
            EpubError::UnusableCompressionMethod { .. } => ErrorCode::ZipDecompressionFailed,
            EpubError::Utf8DecodeError { .. } => ErrorCode::FileCorrupted,
            EpubError::Utf16DecodeError { .. } => ErrorCode::FileCorrupted,
            #[cfg(feature = "batch")]
            EpubError::WalkDirError { .. } => ErrorCode::FileAccessDenied,
            EpubError::QuickXmlError { .. } => ErrorCode::XmlParseError,
        }
    }

    /// Whether parsing can sensibly carry on after this error
    ///
    /// XML content, navigation and resource problems only damage part of a
    /// publication. Archive, io and path problems leave nothing to recover.
    pub fn is_recoverable(&self) -> bool {
        let code = self.code();
        matches!(
            code.category(),
            ErrorCategory::Xml | ErrorCategory::Resource
        ) || matches!(code, ErrorCode::EpubInvalidNcx | ErrorCode::EpubInvalidNav)
    }
}

impl From<zip::result::ZipError> for EpubError {
    fn from(value: zip::result::ZipError) -> Self {
        EpubError::ArchiveError { source: value }
    }
}

impl From<quick_xml::Error> for EpubError {
    fn from(value: quick_xml::Error) -> Self {
        EpubError::QuickXmlError { source: value }
    }
}

impl From<std::io::Error> for EpubError {
    fn from(value: std::io::Error) -> Self {
        EpubError::IOError { source: value }
    }
}

impl From<std::string::FromUtf8Error> for EpubError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        EpubError::Utf8DecodeError { source: value }
    }
}

impl From<std::string::FromUtf16Error> for EpubError {
    fn from(value: std::string::FromUtf16Error) -> Self {
        EpubError::Utf16DecodeError { source: value }
    }
}

#[cfg(feature = "batch")]
impl From<walkdir::Error> for EpubError {
    fn from(value: walkdir::Error) -> Self {
        EpubError::WalkDirError { source: value }
    }
}

#[cfg(test)]
impl PartialEq for EpubError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::MissingRequiredAttribute {
                    tag: l_tag,
                    attribute: l_attribute,
                },
                Self::MissingRequiredAttribute {
                    tag: r_tag,
                    attribute: r_attribute,
                },
            ) => l_tag == r_tag && l_attribute == r_attribute,
            (
                Self::NonCanonicalEpub {
                    expected_file: l_expected_file,
                },
                Self::NonCanonicalEpub {
                    expected_file: r_expected_file,
                },
            ) => l_expected_file == r_expected_file,
            (Self::NonCanonicalFile { tag: l_tag }, Self::NonCanonicalFile { tag: r_tag }) => {
                l_tag == r_tag
            }
            (
                Self::RealtiveLinkLeakage { path: l_path },
                Self::RealtiveLinkLeakage { path: r_path },
            ) => l_path == r_path,
            (Self::ResourceIdNotExist { id: l_id }, Self::ResourceIdNotExist { id: r_id }) => {
                l_id == r_id
            }
            (Self::ChapterNotFound { id: l_id }, Self::ChapterNotFound { id: r_id }) => {
                l_id == r_id
            }
            (
                Self::ResourceNotFound {
                    resource: l_resource,
                },
                Self::ResourceNotFound {
                    resource: r_resource,
                },
            ) => l_resource == r_resource,
            (
                Self::UnsafePath {
                    path: l_path,
                    reason: l_reason,
                },
                Self::UnsafePath {
                    path: r_path,
                    reason: r_reason,
                },
            ) => l_path == r_path && l_reason == r_reason,
            (
                Self::UnsupportedEncryptedMethod { method: l_method },
                Self::UnsupportedEncryptedMethod { method: r_method },
            ) => l_method == r_method,
            (
                Self::UnusableCompressionMethod {
                    file: l_file,
                    method: l_method,
                },
                Self::UnusableCompressionMethod {
                    file: r_file,
                    method: r_method,
                },
            ) => l_file == r_file && l_method == r_method,
            (
                Self::Utf8DecodeError { source: l_source },
                Self::Utf8DecodeError { source: r_source },
            ) => l_source == r_source,
            (
                Self::InvalidFileFormat { reason: l_reason },
                Self::InvalidFileFormat { reason: r_reason },
            ) => l_reason == r_reason,
            (Self::InvalidMimetype { found: l_found }, Self::InvalidMimetype { found: r_found }) => {
                l_found == r_found
            }
            (Self::InvalidNcx { source: l_source }, Self::InvalidNcx { source: r_source })
            | (Self::InvalidNav { source: l_source }, Self::InvalidNav { source: r_source }) => {
                l_source == r_source
            }

            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{EpubError, ErrorCategory, ErrorCode, PathViolation};

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::FileNotFound.value(), 1001);
        assert_eq!(ErrorCode::ZipEntryNotFound.value(), 2002);
        assert_eq!(ErrorCode::XmlInvalidAttribute.value(), 3004);
        assert_eq!(ErrorCode::EpubInvalidNav.value(), 4005);
        assert_eq!(ErrorCode::PathTooLong.value(), 5003);
        assert_eq!(ErrorCode::ResourceInvalidType.value(), 6003);
        assert_eq!(ErrorCode::InternalError.value(), 9003);
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::FileCorrupted.category(), ErrorCategory::File);
        assert_eq!(ErrorCode::ZipInvalid.category(), ErrorCategory::Zip);
        assert_eq!(ErrorCode::XmlParseError.category(), ErrorCategory::Xml);
        assert_eq!(ErrorCode::EpubInvalidOpf.category(), ErrorCategory::Format);
        assert_eq!(ErrorCode::PathTraversalAttack.category(), ErrorCategory::Path);
        assert_eq!(ErrorCode::ResourceNotFound.category(), ErrorCategory::Resource);
        assert_eq!(ErrorCode::UnknownError.category(), ErrorCategory::General);
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(
            ErrorCode::ZipEntryNotFound.to_string(),
            "[2002] ZIP entry not found"
        );
    }

    #[test]
    fn test_epub_error_code_mapping() {
        let err = EpubError::from(zip::result::ZipError::FileNotFound);
        assert_eq!(err.code(), ErrorCode::ZipEntryNotFound);

        let err = EpubError::from(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(err.code(), ErrorCode::FileNotFound);

        let err = EpubError::UnsafePath {
            path: "../etc/passwd".to_string(),
            reason: PathViolation::Traversal,
        };
        assert_eq!(err.code(), ErrorCode::PathTraversalAttack);

        let err = EpubError::UnsafePath {
            path: "a\0b".to_string(),
            reason: PathViolation::InvalidCharacter,
        };
        assert_eq!(err.code(), ErrorCode::PathInvalidCharacter);

        let err = EpubError::InvalidNcx {
            source: Box::new(EpubError::NonCanonicalFile {
                tag: "navMap".to_string(),
            }),
        };
        assert_eq!(err.code(), ErrorCode::EpubInvalidNcx);
    }

    #[test]
    fn test_is_recoverable() {
        assert!(
            EpubError::NonCanonicalFile {
                tag: "title".to_string()
            }
            .is_recoverable()
        );
        assert!(
            EpubError::ResourceIdNotExist {
                id: "cover".to_string()
            }
            .is_recoverable()
        );
        assert!(
            EpubError::InvalidNav {
                source: Box::new(EpubError::FailedParsingXml)
            }
            .is_recoverable()
        );
        assert!(!EpubError::from(zip::result::ZipError::FileNotFound).is_recoverable());
        assert!(
            !EpubError::RealtiveLinkLeakage {
                path: "../a".to_string()
            }
            .is_recoverable()
        );
    }

    #[test]
    fn test_nested_error_message() {
        let err = EpubError::InvalidNav {
            source: Box::new(EpubError::NonCanonicalFile {
                tag: "nav".to_string(),
            }),
        };
        assert_eq!(
            err.to_string(),
            "Invalid navigation document: Non-canonical file: The \"nav\" elements was not found."
        );
    }
}
