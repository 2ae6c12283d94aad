use std::{
    cmp::min,
    collections::HashMap,
    io::{Read, Seek},
    path::{Component, Path, PathBuf},
};

use percent_encoding::percent_decode_str;
use quick_xml::{NsReader, events::Event};
use sha1::{Digest, Sha1};
use zip::{CompressionMethod, ZipArchive, result::ZipError};

use crate::error::{EpubError, PathViolation};

/// Longest entry path accepted, in bytes
pub const MAX_ENTRY_PATH_LEN: usize = 4096;

/// Extracts the contents of a specified file from a ZIP archive
///
/// The entry name is validated with [validate_entry_path] before the archive
/// is touched.
///
/// ## Return
/// - `Ok(Vec<u8>)`: The raw bytes of the entry
/// - `Err(EpubError)`: The path is unsafe, the entry does not exist or
///   an error occurred during the read operation
///
/// ## Notes
/// - For text files, further decoding using the `DecodeBytes` trait is usually required.
pub fn get_file_in_zip_archive<R: Read + Seek>(
    zip_file: &mut ZipArchive<R>,
    file_name: &str,
) -> Result<Vec<u8>, EpubError> {
    with_entry_reader(zip_file, file_name, |reader| {
        let mut buffer = Vec::<u8>::new();
        reader.read_to_end(&mut buffer)?;
        Ok(buffer)
    })
}

/// Hands a streaming reader over a single archive entry to `f`
///
/// Nothing is buffered, which makes it suitable for large chapters and media.
pub fn with_entry_reader<R, T, F>(
    zip_file: &mut ZipArchive<R>,
    file_name: &str,
    f: F,
) -> Result<T, EpubError>
where
    R: Read + Seek,
    F: FnOnce(&mut dyn Read) -> Result<T, EpubError>,
{
    validate_entry_path(file_name)?;

    match zip_file.by_name(file_name) {
        Ok(mut file) => f(&mut file),
        Err(ZipError::FileNotFound) => Err(EpubError::ResourceNotFound {
            resource: file_name.to_string(),
        }),
        Err(err) => Err(EpubError::from(err)),
    }
}

/// Checks if the compression method of all entries in the EPUB file
/// conforms to the specification requirements.
///
/// According to the OCF (Open Container Format) specification, EPUB files
/// can only use either Stored (uncompressed) or Deflated (deflate compression).
/// If any other compression method is found, an error will be returned.
pub fn compression_method_check<R: Read + Seek>(
    zip_archive: &mut ZipArchive<R>,
) -> Result<(), EpubError> {
    for index in 0..zip_archive.len() {
        let file = zip_archive.by_index_raw(index)?;

        match file.compression() {
            CompressionMethod::Stored | CompressionMethod::Deflated => continue,
            method => {
                return Err(EpubError::UnusableCompressionMethod {
                    file: file.name().to_string(),
                    method: method.to_string(),
                });
            }
        };
    }

    Ok(())
}

/// Validates a path before it is used to read an entry of the container
///
/// Rejected paths:
/// - empty paths
/// - paths with NUL, control characters or backslashes
/// - absolute paths and Windows drive prefixes
/// - paths whose `..` segments climb above the container root
/// - paths longer than [MAX_ENTRY_PATH_LEN] bytes
pub fn validate_entry_path(path: &str) -> Result<(), EpubError> {
    let reject = |reason| {
        Err(EpubError::UnsafePath {
            path: path.to_string(),
            reason,
        })
    };

    if path.is_empty() {
        return reject(PathViolation::Empty);
    }
    if path.len() > MAX_ENTRY_PATH_LEN {
        return reject(PathViolation::TooLong);
    }
    if path.chars().any(|c| c.is_control() || c == '\\') {
        return reject(PathViolation::InvalidCharacter);
    }

    let bytes = path.as_bytes();
    if bytes[0] == b'/' || (bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic())
    {
        return reject(PathViolation::Absolute);
    }

    let mut depth = 0usize;
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match depth.checked_sub(1) {
                Some(parent) => depth = parent,
                None => return reject(PathViolation::Traversal),
            },
            _ => depth += 1,
        }
    }

    Ok(())
}

/// Resolves an href found in a document located in `base_dir`
///
/// `base_dir` is relative to the root of the container. Hrefs starting with
/// `/` are taken relative to the root. The `#fragment` part is kept,
/// percent-escapes are decoded and `.`/`..` segments are collapsed.
///
/// ## Return
/// - `Some(String)`: The path relative to the container root
/// - `None`: The href climbs out of the container
pub fn resolve_href(base_dir: &Path, href: &str) -> Option<String> {
    let (path, fragment) = match href.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (href, None),
    };
    let path = path.split_once('?').map_or(path, |(path, _)| path);
    let path = percent_decode_str(path).decode_utf8_lossy();

    let mut segments = Vec::<String>::new();
    let joined = match path.strip_prefix('/') {
        Some(absolute) => PathBuf::from(absolute),
        None => base_dir.join(&*path),
    };

    for component in joined.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_string_lossy().into_owned()),
            Component::ParentDir => {
                segments.pop()?;
            }
            _ => {}
        }
    }

    let mut resolved = segments.join("/");
    if let Some(fragment) = fragment {
        resolved.push('#');
        resolved.push_str(fragment);
    }
    Some(resolved)
}

/// Whether the href points outside of the publication (`http:`, `mailto:`, ...)
pub fn is_external_href(href: &str) -> bool {
    match href.split_once(':') {
        Some((scheme, _)) => {
            scheme.len() > 1
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Guesses the media type of a resource from its leading bytes
pub fn sniff_media_type(data: &[u8]) -> Option<&'static str> {
    infer::get(data).map(|kind| kind.mime_type())
}

/// Removes the IDPF font obfuscation from a font file
///
/// The key is the SHA-1 digest of the publication's unique identifier with
/// all whitespace removed. The first 1040 bytes are XORed with that key.
/// XOR is its own inverse, so the same function obfuscates and de-obfuscates.
///
/// ## Notes
/// - Applies to `http://www.idpf.org/2008/embedding`.
pub fn idpf_font_dencryption(data: &[u8], unique_identifier: &str) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }

    let stripped = unique_identifier
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\r' | '\n'))
        .collect::<String>();

    let mut hasher = Sha1::new();
    hasher.update(stripped.as_bytes());
    let hash = hasher.finalize();

    let mut result = data.to_vec();
    for (index, byte) in result.iter_mut().take(1040).enumerate() {
        *byte ^= hash[index % hash.len()];
    }

    result
}

/// Removes the Adobe font obfuscation from a font file
///
/// The 16 byte key is the UUID contained in the unique identifier
/// (`urn:uuid:` prefix and dashes removed, hex decoded). Identifiers that are
/// not UUIDs fall back to their raw bytes repeated to 16 bytes. The first
/// 1024 bytes are XORed with the key.
///
/// ## Notes
/// - Applies to `http://ns.adobe.com/pdf/enc#RC`.
pub fn adobe_font_dencryption(data: &[u8], unique_identifier: &str) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }

    let key = adobe_key(unique_identifier);
    let mut result = data.to_vec();
    for index in 0..min(1024, result.len()) {
        result[index] ^= key[index % 16];
    }

    result
}

fn adobe_key(unique_identifier: &str) -> [u8; 16] {
    let hex = unique_identifier
        .trim()
        .trim_start_matches("urn:uuid:")
        .chars()
        .filter(|c| *c != '-')
        .collect::<String>();

    let mut key = [0u8; 16];
    if hex.len() == 32 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        for (index, byte) in key.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[index * 2..index * 2 + 2], 16).unwrap_or_default();
        }
        return key;
    }

    let raw = unique_identifier.as_bytes();
    if !raw.is_empty() {
        for (index, byte) in key.iter_mut().enumerate() {
            *byte = raw[index % raw.len()];
        }
    }
    key
}

/// Provides functionality to decode byte data into strings
///
/// Supports UTF-8 (with or without BOM), UTF-16 BE and UTF-16 LE with BOM.
/// Data without a BOM is tried as UTF-8 first, then as UTF-16, and finally
/// decoded lossily.
pub trait DecodeBytes {
    fn decode(&self) -> Result<String, EpubError>;
}

impl DecodeBytes for [u8] {
    fn decode(&self) -> Result<String, EpubError> {
        if self.is_empty() {
            return Err(EpubError::EmptyDataError);
        }

        match self {
            [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8(rest.to_vec()).map_err(EpubError::from),
            [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
            [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
            _ => {
                if let Ok(utf8_str) = std::str::from_utf8(self) {
                    return Ok(utf8_str.to_string());
                }

                if self.len() % 2 == 0 {
                    for convert in [u16::from_be_bytes, u16::from_le_bytes] {
                        if let Ok(utf16_str) = decode_utf16(self, convert) {
                            return Ok(utf16_str);
                        }
                    }
                }

                Ok(String::from_utf8_lossy(self).to_string())
            }
        }
    }
}

impl DecodeBytes for Vec<u8> {
    fn decode(&self) -> Result<String, EpubError> {
        self.as_slice().decode()
    }
}

fn decode_utf16(bytes: &[u8], convert: fn([u8; 2]) -> u16) -> Result<String, EpubError> {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| convert([pair[0], pair[1]]))
        .collect::<Vec<u16>>();

    String::from_utf16(&units).map_err(EpubError::from)
}

/// Collapses runs of whitespace into a single space and trims both ends
pub trait NormalizeWhitespace {
    fn normalize_whitespace(&self) -> String;
}

impl NormalizeWhitespace for &str {
    fn normalize_whitespace(&self) -> String {
        self.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl NormalizeWhitespace for String {
    fn normalize_whitespace(&self) -> String {
        self.as_str().normalize_whitespace()
    }
}

/// Represents an element node in an XML document
#[derive(Debug, Clone)]
pub struct XmlElement {
    /// The local name of the element (excluding namespace prefix)
    pub name: String,

    /// The namespace prefix of the element
    pub prefix: Option<String>,

    /// The namespace URI the element is bound to
    pub namespace: Option<String>,

    /// The attributes of the element, keyed by their qualified name
    pub attributes: HashMap<String, String>,

    /// The text content directly inside the element
    pub text: Option<String>,

    /// The CDATA content of the element
    pub cdata: Option<String>,

    /// The children of the element
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: String) -> Self {
        Self {
            name,
            prefix: None,
            namespace: None,
            attributes: HashMap::new(),
            text: None,
            cdata: None,
            children: Vec::new(),
        }
    }

    /// Returns "prefix:name" when the element is prefixed, the bare name otherwise
    pub fn tag_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.name),
            None => self.name.clone(),
        }
    }

    /// Text of the element and all its descendants, trimmed
    pub fn text(&self) -> String {
        let mut result = String::new();
        self.collect_text(&mut result);
        result.trim().to_string()
    }

    fn collect_text(&self, result: &mut String) {
        if let Some(text) = &self.text {
            result.push_str(text);
        }
        if let Some(cdata) = &self.cdata {
            result.push_str(cdata);
        }
        for child in &self.children {
            child.collect_text(result);
        }
    }

    /// Returns the value of the attribute with the given qualified name
    pub fn get_attr(&self, name: &str) -> Option<String> {
        self.attributes.get(name).cloned()
    }

    /// Returns the value of an attribute matching `local` whatever its prefix
    ///
    /// Useful for `epub:type`, which some publications bind to another prefix.
    pub fn get_attr_local(&self, local: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|(key, _)| {
                key.as_str() == local || key.rsplit_once(':').is_some_and(|(_, name)| name == local)
            })
            .map(|(_, value)| value.clone())
    }

    /// `xml:lang`, or a bare `lang` attribute
    pub fn lang(&self) -> Option<String> {
        self.get_attr("xml:lang").or_else(|| self.get_attr("lang"))
    }

    /// All descendants (self included) with the given local name, in document order
    pub fn find_elements_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            while let Some(element) = stack.pop() {
                stack.extend(element.children.iter().rev());
                if element.name == name {
                    return Some(element);
                }
            }
            None
        })
    }

    /// Direct children with the given local name
    pub fn find_children_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Direct children whose local name is in `names`
    pub fn find_children_by_names<'a>(
        &'a self,
        names: &'a [&str],
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children
            .iter()
            .filter(move |child| names.contains(&child.name.as_str()))
    }

    pub fn first_child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn children(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter()
    }
}

/// XML parser used to parse XML content and build an [XmlElement] tree
pub struct XmlReader;

impl XmlReader {
    /// Parses an XML string and builds the root element
    ///
    /// Namespace declarations are scoped: every element sees the declarations of
    /// its ancestors and its own. Entity and character references in text and
    /// attribute values are resolved.
    pub fn parse(content: &str) -> Result<XmlElement, EpubError> {
        if content.trim().is_empty() {
            return Err(EpubError::EmptyDataError);
        }

        let mut reader = NsReader::from_str(content);

        let mut buf = Vec::new();
        let mut stack = Vec::<(XmlElement, HashMap<String, String>)>::new();
        let mut root = None;

        loop {
            let event = reader.read_event_into(&mut buf)?;
            match event {
                Event::Eof => break,

                Event::Start(e) => {
                    let scope = stack.last().map(|(_, scope)| scope);
                    let element = Self::open_element(&e, scope);
                    stack.push(element);
                }

                Event::Empty(e) => {
                    let scope = stack.last().map(|(_, scope)| scope);
                    let (element, _) = Self::open_element(&e, scope);
                    match stack.last_mut() {
                        Some((parent, _)) => parent.children.push(element),
                        None => root = Some(element),
                    }
                }

                Event::End(_) => {
                    if let Some((mut element, _)) = stack.pop() {
                        if element.text.as_ref().is_some_and(|t| t.trim().is_empty()) {
                            element.text = None;
                        }

                        match stack.last_mut() {
                            Some((parent, _)) => parent.children.push(element),
                            None => root = Some(element),
                        }
                    }
                }

                Event::Text(e) => {
                    if let Some((element, _)) = stack.last_mut() {
                        let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                        element.text.get_or_insert_with(String::new).push_str(&text);
                    }
                }

                Event::GeneralRef(e) => {
                    if let Some((element, _)) = stack.last_mut() {
                        let name = String::from_utf8_lossy(&e).into_owned();
                        element
                            .text
                            .get_or_insert_with(String::new)
                            .push_str(&resolve_entity(&name));
                    }
                }

                Event::CData(e) => {
                    if let Some((element, _)) = stack.last_mut() {
                        let cdata = String::from_utf8_lossy(&e.into_inner()).into_owned();
                        element.cdata.get_or_insert_with(String::new).push_str(&cdata);
                    }
                }

                // Comment, PI, Declaration, Doctype
                _ => {}
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(EpubError::FailedParsingXml);
        }

        root.ok_or(EpubError::FailedParsingXml)
    }

    /// Decodes the bytes (BOM aware) and parses them
    pub fn parse_bytes(bytes: &[u8]) -> Result<XmlElement, EpubError> {
        let content = bytes.decode()?;
        Self::parse(&content)
    }

    fn open_element(
        start: &quick_xml::events::BytesStart,
        parent_scope: Option<&HashMap<String, String>>,
    ) -> (XmlElement, HashMap<String, String>) {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut element = XmlElement::new(name);
        let mut scope = parent_scope.cloned().unwrap_or_default();

        if let Some(prefix) = start.name().prefix() {
            element.prefix = Some(String::from_utf8_lossy(prefix.as_ref()).into_owned());
        }

        for attr in start.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let raw = String::from_utf8_lossy(&attr.value).into_owned();
            let value = quick_xml::escape::unescape(&raw)
                .map(|value| value.into_owned())
                .unwrap_or(raw);

            if key == "xmlns" {
                scope.insert(String::new(), value);
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                scope.insert(prefix.to_string(), value);
            } else {
                element.attributes.insert(key, value);
            }
        }

        let prefix = element.prefix.clone().unwrap_or_default();
        element.namespace = scope.get(&prefix).cloned();

        (element, scope)
    }
}

fn resolve_entity(name: &str) -> String {
    if let Some(reference) = name.strip_prefix('#') {
        let code = match reference.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => reference.parse::<u32>().ok(),
        };
        if let Some(c) = code.and_then(char::from_u32) {
            return c.to_string();
        }
    }

    match name {
        "lt" => "<".to_string(),
        "gt" => ">".to_string(),
        "amp" => "&".to_string(),
        "apos" => "'".to_string(),
        "quot" => "\"".to_string(),
        "nbsp" => "\u{a0}".to_string(),
        _ => format!("&{};", name),
    }
}
