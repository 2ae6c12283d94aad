use std::{
    collections::HashMap,
    fs::{File, canonicalize},
    io::{BufReader, Cursor, Read, Seek},
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use log::{debug, warn};
use zip::ZipArchive;

use crate::{
    book::EpubBook,
    diagnostics::Diagnostics,
    error::EpubError,
    metadata::Metadata,
    options::ParseOptions,
    types::{
        EncryptionData, EpubVersion, ManifestItem, MetadataItem, MetadataLinkItem,
        MetadataRefinement, NavPoint, NavigationKind, SpineItem,
    },
    utils::{
        NormalizeWhitespace, XmlElement, XmlReader, adobe_font_dencryption,
        compression_method_check, get_file_in_zip_archive, idpf_font_dencryption,
        is_external_href, resolve_href, sniff_media_type, validate_entry_path, with_entry_reader,
    },
};

const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";
const OPF_NAMESPACE: &str = "http://www.idpf.org/2007/opf";
const CONTAINER_PATH: &str = "META-INF/container.xml";
const ENCRYPTION_PATH: &str = "META-INF/encryption.xml";
const IDPF_OBFUSCATION: &str = "http://www.idpf.org/2008/embedding";
const ADOBE_OBFUSCATION: &str = "http://ns.adobe.com/pdf/enc#RC";

/// EPUB document parser, representing a loaded and parsed EPUB publication
///
/// The `EpubDoc` structure owns the underlying archive and is the core of the
/// library. It parses the container, the package document (metadata,
/// manifest, spine), the encryption declarations and every navigation
/// structure, then provides random access to resources and a cursor over the
/// spine.
///
/// Parsing is strict by default. With lenient [ParseOptions], recoverable
/// problems are recorded in [EpubDoc::diagnostics] and parsing goes on.
///
/// `EpubDoc` is not `Sync` because reading moves the archive's cursor. Use
/// [EpubDoc::to_book] to get a shareable [EpubBook] snapshot.
pub struct EpubDoc<R: Read + Seek> {
    /// The structure of the epub file that actually holds it
    pub(crate) archive: ZipArchive<R>,

    /// The path to the target epub file
    pub(crate) epub_path: PathBuf,

    /// The path to the OPF file
    pub package_path: PathBuf,

    /// The path to the directory where the opf file is located
    pub base_path: PathBuf,

    pub version: EpubVersion,

    /// The value of the identifier the package `unique-identifier` attribute points to
    pub unique_identifier: String,

    /// Epub metadata extracted from OPF
    pub metadata: Vec<MetadataItem>,

    /// Data in metadata that points to external files
    pub metadata_link: Vec<MetadataLinkItem>,

    /// Resources declared in the OPF manifest, in document order
    ///
    /// Undeclared resources should not be stored in the epub file and cannot be obtained from it.
    pub manifest: IndexMap<String, ManifestItem>,

    /// Reading order extracted from the OPF spine
    pub spine: Vec<SpineItem>,

    /// The encryption.xml extracted from the META-INF directory
    pub encryption: Option<Vec<EncryptionData>>,

    /// Table of contents from the NCX document
    pub ncx: Vec<NavPoint>,

    /// Table of contents from the EPUB 3 navigation document
    pub nav: Vec<NavPoint>,

    pub landmarks: Vec<NavPoint>,

    pub page_list: Vec<NavPoint>,

    /// The title of the table of contents
    pub catalog_title: String,

    /// The index of the current reading spine
    pub current_spine_index: usize,

    /// Problems recorded while parsing leniently
    pub diagnostics: Diagnostics,

    options: ParseOptions,
}

impl<R: Read + Seek> EpubDoc<R> {
    /// Creates a new EPUB document instance from a reader with strict parsing
    ///
    /// # Parameters
    /// - `reader`: The data source, usually a file or memory buffer
    /// - `epub_path`: The path of the EPUB file. It is only recorded, so a
    ///   placeholder is fine for in-memory data
    pub fn from_reader(reader: R, epub_path: PathBuf) -> Result<Self, EpubError> {
        Self::from_reader_with_options(reader, epub_path, &ParseOptions::default())
    }

    /// Creates a new EPUB document instance from a reader
    ///
    /// Parsing process:
    /// 1. Verify that the ZIP compression method conforms to the EPUB specification
    /// 2. Parse `META-INF/container.xml` to locate the OPF file
    /// 3. Determine the version and parse metadata, manifest and spine
    /// 4. Parse the encryption declarations
    /// 5. Resolve the unique identifier
    /// 6. Parse the NCX and navigation documents
    pub fn from_reader_with_options(
        reader: R,
        epub_path: PathBuf,
        options: &ParseOptions,
    ) -> Result<Self, EpubError> {
        let mut archive = ZipArchive::new(reader)?;
        compression_method_check(&mut archive)?;

        let container = get_file_in_zip_archive(&mut archive, CONTAINER_PATH).map_err(|err| {
            match err {
                EpubError::ResourceNotFound { .. } => EpubError::NonCanonicalEpub {
                    expected_file: CONTAINER_PATH.to_string(),
                },
                err => err,
            }
        })?;
        let package_path = Self::parse_container(&container)?;
        let base_path = Path::new(&package_path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let opf_file =
            get_file_in_zip_archive(&mut archive, &package_path).map_err(|err| match err {
                EpubError::ResourceNotFound { .. } => EpubError::NonCanonicalEpub {
                    expected_file: package_path.clone(),
                },
                err => err,
            })?;
        let package = XmlReader::parse_bytes(&opf_file)?;
        let version = Self::determine_epub_version(&package)?;
        debug!("Parsing EPUB {} package {}", version, package_path);

        let mut doc = Self {
            archive,
            epub_path,
            package_path: PathBuf::from(&package_path),
            base_path,
            version,
            unique_identifier: String::new(),
            metadata: vec![],
            metadata_link: vec![],
            manifest: IndexMap::new(),
            spine: vec![],
            encryption: None,
            ncx: vec![],
            nav: vec![],
            landmarks: vec![],
            page_list: vec![],
            catalog_title: String::new(),
            current_spine_index: 0,
            diagnostics: Diagnostics::new(options.max_warnings),
            options: options.clone(),
        };

        match package.first_child("metadata") {
            Some(metadata_element) => doc.parse_metadata(metadata_element)?,
            None => doc.recover(
                EpubError::NonCanonicalFile {
                    tag: "metadata".to_string(),
                },
                Some(&package_path),
                "parse_metadata",
            )?,
        }

        let manifest_element =
            package
                .first_child("manifest")
                .ok_or_else(|| EpubError::NonCanonicalFile {
                    tag: "manifest".to_string(),
                })?;
        doc.parse_manifest(manifest_element)?;

        let spine_element =
            package
                .first_child("spine")
                .ok_or_else(|| EpubError::NonCanonicalFile {
                    tag: "spine".to_string(),
                })?;
        doc.parse_spine(spine_element)?;

        if let Err(err) = doc.parse_encryption() {
            doc.recover(err, Some(ENCRYPTION_PATH), "parse_encryption")?;
        }

        doc.resolve_unique_identifier(&package)?;
        doc.apply_fallback_metadata();

        let toc_id = spine_element.get_attr("toc");
        doc.parse_navigation(toc_id)?;

        Ok(doc)
    }

    /// Records `error` and returns `Ok` when the options allow going on
    fn recover(
        &mut self,
        error: EpubError,
        path: Option<&str>,
        operation: &str,
    ) -> Result<(), EpubError> {
        if self.options.should_continue_on_error(&error) {
            self.diagnostics.record_recovered(&error, path, operation);
            Ok(())
        } else {
            Err(error)
        }
    }

    fn note(&mut self, message: String, path: Option<&str>, operation: &str) {
        if self.options.collect_warnings {
            self.diagnostics.warning(message, path, operation);
        } else {
            warn!("{}", message);
        }
    }

    /// Parse the EPUB container file (META-INF/container.xml)
    ///
    /// When multiple `rootfile` elements exist, the first one is used.
    fn parse_container(data: &[u8]) -> Result<String, EpubError> {
        let root = XmlReader::parse_bytes(data)?;
        let rootfile = root
            .find_elements_by_name("rootfile")
            .next()
            .ok_or_else(|| EpubError::NonCanonicalFile {
                tag: "rootfile".to_string(),
            })?;

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

    /// Parse the EPUB metadata section
    ///
    /// Elements in the Dublin Core namespace become metadata items directly.
    /// `<meta>` and `<link>` elements of the OPF namespace become metadata
    /// items, refinements or links. Refinements are attached to their target
    /// once every element has been seen.
    fn parse_metadata(&mut self, metadata_element: &XmlElement) -> Result<(), EpubError> {
        let package_path = self.package_path.to_string_lossy().into_owned();
        let mut metadata = Vec::new();
        let mut metadata_link = Vec::new();
        let mut refinements = HashMap::<String, Vec<MetadataRefinement>>::new();

        for element in metadata_element.children() {
            let is_dc = element.namespace.as_deref() == Some(DC_NAMESPACE)
                || (element.namespace.is_none() && element.prefix.as_deref() == Some("dc"));
            let is_opf = element.namespace.as_deref() == Some(OPF_NAMESPACE)
                || (element.namespace.is_none() && element.prefix.is_none());

            let result = if is_dc {
                self.parse_dc_metadata(element, &mut metadata)
            } else if is_opf {
                match element.name.as_str() {
                    "meta" => self.parse_meta_element(element, &mut metadata, &mut refinements),
                    "link" => Self::parse_link_element(element, &mut metadata_link),
                    _ => Ok(()),
                }
            } else {
                Ok(())
            };

            if let Err(err) = result {
                self.recover(err, Some(&package_path), "parse_metadata")?;
            }
        }

        for item in metadata.iter_mut() {
            if let Some(id) = &item.id {
                if let Some(refined) = refinements.remove(id) {
                    item.refined.extend(refined);
                }
            }
        }

        for id in refinements.keys() {
            let message = format!("Metadata refinement targets unknown id \"{}\"", id);
            self.note(message, Some(&package_path), "parse_metadata");
        }

        self.metadata = metadata;
        self.metadata_link = metadata_link;
        Ok(())
    }

    /// Parse a Dublin Core element
    ///
    /// In EPUB 2.0 the extra attributes of the element (`opf:role`,
    /// `opf:file-as`, ...) are kept as refinements, without their prefix.
    fn parse_dc_metadata(
        &self,
        element: &XmlElement,
        metadata: &mut Vec<MetadataItem>,
    ) -> Result<(), EpubError> {
        let id = element.get_attr("id");
        let lang = element.lang();
        let property = element.name.clone();
        let value = element.text().normalize_whitespace();

        let mut refined = Vec::new();
        if self.version == EpubVersion::Version2_0 {
            let mut attributes = element
                .attributes
                .iter()
                .filter(|(name, _)| !matches!(name.as_str(), "id" | "xml:lang" | "lang"))
                .collect::<Vec<_>>();
            attributes.sort();

            for (name, value) in attributes {
                let property = name.rsplit_once(':').map_or(name.as_str(), |(_, local)| local);
                refined.push(MetadataRefinement {
                    refines: id.clone().unwrap_or_default(),
                    property: property.to_string(),
                    value: value.normalize_whitespace(),
                    lang: None,
                    scheme: None,
                });
            }
        }

        metadata.push(MetadataItem {
            id,
            property,
            value,
            lang,
            refined,
        });

        Ok(())
    }

    /// Parse a `<meta>` element
    ///
    /// `property` meta elements are EPUB 3 style (value in the text, optional
    /// `refines`). `name`/`content` meta elements are EPUB 2 style and are
    /// accepted in both versions since EPUB 3 publications keep them for the
    /// cover declaration.
    fn parse_meta_element(
        &self,
        element: &XmlElement,
        metadata: &mut Vec<MetadataItem>,
        refinements: &mut HashMap<String, Vec<MetadataRefinement>>,
    ) -> Result<(), EpubError> {
        if let Some(property) = element.get_attr("property") {
            let value = element.text().normalize_whitespace();
            let lang = element.lang();

            if let Some(refines) = element.get_attr("refines") {
                let id = refines.strip_prefix('#').unwrap_or(&refines).to_string();
                refinements
                    .entry(id.clone())
                    .or_default()
                    .push(MetadataRefinement {
                        refines: id,
                        property,
                        value,
                        lang,
                        scheme: element.get_attr("scheme"),
                    });
            } else {
                metadata.push(MetadataItem {
                    id: element.get_attr("id"),
                    property,
                    value,
                    lang,
                    refined: vec![],
                });
            }

            return Ok(());
        }

        let property = element.get_attr("name").ok_or_else(|| {
            let attribute = match self.version {
                EpubVersion::Version2_0 => "name",
                EpubVersion::Version3_0 => "property",
            };
            EpubError::MissingRequiredAttribute {
                tag: element.tag_name(),
                attribute: attribute.to_string(),
            }
        })?;
        let value = element
            .get_attr("content")
            .ok_or_else(|| EpubError::MissingRequiredAttribute {
                tag: element.tag_name(),
                attribute: "content".to_string(),
            })?
            .normalize_whitespace();

        metadata.push(MetadataItem {
            id: element.get_attr("id"),
            property,
            value,
            lang: element.lang(),
            refined: vec![],
        });
        Ok(())
    }

    fn parse_link_element(
        element: &XmlElement,
        metadata_link: &mut Vec<MetadataLinkItem>,
    ) -> Result<(), EpubError> {
        let href = element
            .get_attr("href")
            .ok_or_else(|| EpubError::MissingRequiredAttribute {
                tag: element.tag_name(),
                attribute: "href".to_string(),
            })?;
        let rel = element
            .get_attr("rel")
            .ok_or_else(|| EpubError::MissingRequiredAttribute {
                tag: element.tag_name(),
                attribute: "rel".to_string(),
            })?;

        metadata_link.push(MetadataLinkItem {
            href,
            rel,
            hreflang: element.get_attr("hreflang"),
            id: element.get_attr("id"),
            mime: element.get_attr("media-type"),
            properties: element.get_attr("properties"),
            refines: element
                .get_attr("refines")
                .map(|refines| refines.trim_start_matches('#').to_string()),
        });
        Ok(())
    }

    /// Parse the EPUB manifest section
    ///
    /// Item paths are resolved against the directory of the OPF file. An item
    /// whose path leaves the container is always an error. Items missing a
    /// required attribute are skipped when `skip_invalid_resources` is set
    /// and the options allow recovering.
    fn parse_manifest(&mut self, manifest_element: &XmlElement) -> Result<(), EpubError> {
        let package_path = self.package_path.to_string_lossy().into_owned();
        let mut resources = IndexMap::with_capacity(manifest_element.children.len());

        for element in manifest_element.find_children_by_name("item") {
            match self.parse_manifest_item(element) {
                Ok(item) => {
                    if resources.contains_key(&item.id) {
                        let message = format!("Duplicate manifest id \"{}\"", item.id);
                        self.note(message, Some(&package_path), "parse_manifest");
                    }
                    resources.insert(item.id.clone(), item);
                }
                Err(err @ EpubError::MissingRequiredAttribute { .. })
                    if self.options.skip_invalid_resources =>
                {
                    self.recover(err, Some(&package_path), "parse_manifest")?
                }
                Err(err) => return Err(err),
            }
        }

        self.manifest = resources;
        self.validate_fallback_chains();
        Ok(())
    }

    fn parse_manifest_item(&self, element: &XmlElement) -> Result<ManifestItem, EpubError> {
        let required = |attribute: &str| {
            element
                .get_attr(attribute)
                .ok_or_else(|| EpubError::MissingRequiredAttribute {
                    tag: element.tag_name(),
                    attribute: attribute.to_string(),
                })
        };

        let id = required("id")?;
        let href = required("href")?;
        let mime = required("media-type")?;

        Ok(ManifestItem {
            id,
            path: self.normalize_manifest_path(&href)?,
            mime,
            properties: element.get_attr("properties"),
            fallback: element.get_attr("fallback"),
        })
    }

    /// Parse the EPUB spine section
    fn parse_spine(&mut self, spine_element: &XmlElement) -> Result<(), EpubError> {
        let package_path = self.package_path.to_string_lossy().into_owned();
        let mut spine = Vec::new();

        for element in spine_element.find_children_by_name("itemref") {
            let Some(idref) = element.get_attr("idref") else {
                let err = EpubError::MissingRequiredAttribute {
                    tag: element.tag_name(),
                    attribute: "idref".to_string(),
                };
                self.recover(err, Some(&package_path), "parse_spine")?;
                continue;
            };

            if !self.manifest.contains_key(&idref) {
                let message = format!("Spine references unknown manifest id \"{}\"", idref);
                self.note(message, Some(&package_path), "parse_spine");
            }

            spine.push(SpineItem {
                idref,
                id: element.get_attr("id"),
                linear: element
                    .get_attr("linear")
                    .map(|linear| linear.trim() != "no")
                    .unwrap_or(true),
                properties: element.get_attr("properties"),
            });
        }

        self.spine = spine;
        Ok(())
    }

    /// Parse the EPUB encryption file (META-INF/encryption.xml)
    ///
    /// Only `EncryptedData` entries are read. Which of them can actually be
    /// decrypted is decided when the resource is requested.
    fn parse_encryption(&mut self) -> Result<(), EpubError> {
        if !self.has_encryption() {
            return Ok(());
        }

        let encryption_file = get_file_in_zip_archive(&mut self.archive, ENCRYPTION_PATH)?;
        let root = XmlReader::parse_bytes(&encryption_file)?;

        let mut encryption_data = Vec::new();
        for data in root.find_children_by_name("EncryptedData") {
            let method = data
                .find_elements_by_name("EncryptionMethod")
                .next()
                .ok_or_else(|| EpubError::NonCanonicalFile {
                    tag: "EncryptionMethod".to_string(),
                })?;
            let reference = data
                .find_elements_by_name("CipherReference")
                .next()
                .ok_or_else(|| EpubError::NonCanonicalFile {
                    tag: "CipherReference".to_string(),
                })?;

            encryption_data.push(EncryptionData {
                method: method.get_attr("Algorithm").ok_or_else(|| {
                    EpubError::MissingRequiredAttribute {
                        tag: "EncryptionMethod".to_string(),
                        attribute: "Algorithm".to_string(),
                    }
                })?,
                data: reference
                    .get_attr("URI")
                    .map(|uri| resolve_href(Path::new(""), &uri).unwrap_or(uri))
                    .ok_or_else(|| EpubError::MissingRequiredAttribute {
                        tag: "CipherReference".to_string(),
                        attribute: "URI".to_string(),
                    })?,
            });
        }

        if !encryption_data.is_empty() {
            self.encryption = Some(encryption_data);
        }

        Ok(())
    }

    /// Resolve the value of the unique identifier
    ///
    /// The package `unique-identifier` attribute names the id of a
    /// `dc:identifier`. When it is missing or dangling, the first identifier
    /// is used.
    fn resolve_unique_identifier(&mut self, package: &XmlElement) -> Result<(), EpubError> {
        let identifiers = self
            .metadata
            .iter()
            .filter(|item| item.property == "identifier")
            .collect::<Vec<_>>();

        let unique = package
            .get_attr("unique-identifier")
            .and_then(|uid| {
                identifiers
                    .iter()
                    .find(|item| item.id.as_deref() == Some(uid.as_str()))
            })
            .or_else(|| identifiers.first())
            .map(|item| item.value.clone());

        match unique {
            Some(value) => self.unique_identifier = value,
            None if self.options.use_fallback_metadata && !self.options.is_strict() => {
                self.unique_identifier = format!("urn:epubime:{}", self.file_stem());
                let message = "The package has no dc:identifier, a fallback identifier is used";
                self.note(message.to_string(), None, "parse_metadata");
            }
            None => {
                return Err(EpubError::NonCanonicalFile {
                    tag: "dc:identifier".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Fill in a title and a language when the package lacks them
    fn apply_fallback_metadata(&mut self) {
        if !self.options.use_fallback_metadata || self.options.is_strict() {
            return;
        }

        let fallbacks = [("title", self.file_stem()), ("language", "und".to_string())];
        for (property, value) in fallbacks {
            if self.metadata.iter().any(|item| item.property == property) {
                continue;
            }

            let message = format!("The package has no dc:{}, \"{}\" is used", property, value);
            self.note(message, None, "parse_metadata");
            self.metadata.push(MetadataItem {
                id: None,
                property: property.to_string(),
                value,
                lang: None,
                refined: vec![],
            });
        }
    }

    fn file_stem(&self) -> String {
        self.epub_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "untitled".to_string())
    }

    /// Parse the navigation structures
    ///
    /// The NCX is read whenever the spine names one. It is required in EPUB
    /// 2.0 and only informative in EPUB 3.0. The navigation document is read
    /// when a manifest item carries the `nav` property and is required in
    /// EPUB 3.0.
    fn parse_navigation(&mut self, toc_id: Option<String>) -> Result<(), EpubError> {
        let ncx_result = match (&toc_id, self.version) {
            (Some(toc_id), _) => self.parse_ncx(toc_id),
            (None, EpubVersion::Version2_0) => Err(EpubError::MissingRequiredAttribute {
                tag: "spine".to_string(),
                attribute: "toc".to_string(),
            }),
            (None, EpubVersion::Version3_0) => Ok(()),
        };

        if let Err(err) = ncx_result {
            let err = EpubError::InvalidNcx {
                source: Box::new(err),
            };
            match self.version {
                EpubVersion::Version2_0 => self.recover(err, None, "parse_ncx")?,
                EpubVersion::Version3_0 => self.note(err.to_string(), None, "parse_ncx"),
            }
        }

        let nav_path = self
            .manifest
            .values()
            .find(|item| item.has_property("nav"))
            .map(ManifestItem::entry_name);

        let nav_result = match (nav_path, self.version) {
            (Some(nav_path), _) => self.parse_nav(&nav_path),
            (None, EpubVersion::Version3_0) => Err(EpubError::NonCanonicalEpub {
                expected_file: "Navigation Document".to_string(),
            }),
            (None, EpubVersion::Version2_0) => Ok(()),
        };

        if let Err(err) = nav_result {
            let err = EpubError::InvalidNav {
                source: Box::new(err),
            };
            match self.version {
                EpubVersion::Version3_0 => self.recover(err, None, "parse_nav")?,
                EpubVersion::Version2_0 => self.note(err.to_string(), None, "parse_nav"),
            }
        }

        Ok(())
    }

    /// Parse the NCX document referenced by the spine `toc` attribute
    fn parse_ncx(&mut self, toc_id: &str) -> Result<(), EpubError> {
        let toc_path = self
            .manifest
            .get(toc_id)
            .ok_or_else(|| EpubError::ResourceIdNotExist {
                id: toc_id.to_string(),
            })?
            .entry_name();

        let ncx_file = get_file_in_zip_archive(&mut self.archive, &toc_path)?;
        let ncx = XmlReader::parse_bytes(&ncx_file)?;

        match ncx.find_elements_by_name("docTitle").next() {
            Some(element) => {
                if self.catalog_title.is_empty() {
                    self.catalog_title = element.text().normalize_whitespace();
                }
            }
            None => warn!("Expecting to get docTitle information from the ncx file, but it's missing."),
        };

        let nav_map =
            ncx.find_elements_by_name("navMap")
                .next()
                .ok_or_else(|| EpubError::NonCanonicalFile {
                    tag: "navMap".to_string(),
                })?;

        self.ncx = Self::parse_nav_points(nav_map, &toc_path);
        Ok(())
    }

    /// Recursively parse NCX navigation points from navMap or nested navPoint elements
    ///
    /// Siblings are ordered by `playOrder`; points without one keep their
    /// document order ahead of ordered points.
    fn parse_nav_points(parent_element: &XmlElement, ncx_path: &str) -> Vec<NavPoint> {
        let mut nav_points = Vec::new();
        for nav_point in parent_element.find_children_by_name("navPoint") {
            let label = nav_point
                .first_child("navLabel")
                .map(|label| label.text().normalize_whitespace())
                .unwrap_or_default();

            let content = nav_point
                .first_child("content")
                .and_then(|content| content.get_attr("src"))
                .map(|src| resolve_nav_href(ncx_path, &src));

            nav_points.push(NavPoint {
                label,
                content,
                children: Self::parse_nav_points(nav_point, ncx_path),
                play_order: nav_point
                    .get_attr("playOrder")
                    .and_then(|order| order.trim().parse::<usize>().ok()),
                id: nav_point.get_attr("id"),
            });
        }

        nav_points.sort();
        nav_points
    }

    /// Parse the EPUB 3 navigation document
    fn parse_nav(&mut self, nav_path: &str) -> Result<(), EpubError> {
        const HEAD_TAGS: [&str; 6] = ["h1", "h2", "h3", "h4", "h5", "h6"];

        let nav_file = get_file_in_zip_archive(&mut self.archive, nav_path)?;
        let nav_element = XmlReader::parse_bytes(&nav_file)?;

        let navs = nav_element.find_elements_by_name("nav").collect::<Vec<_>>();
        let find_nav = |nav_type: &str| {
            navs.iter().copied().find(|nav| {
                nav.get_attr_local("type")
                    .is_some_and(|types| types.split_whitespace().any(|t| t == nav_type))
            })
        };

        let toc = find_nav("toc")
            .or_else(|| navs.first().copied())
            .ok_or_else(|| EpubError::NonCanonicalFile {
                tag: "nav".to_string(),
            })?;

        self.nav = Self::parse_nav_element(toc, nav_path);
        if let Some(title) = toc.find_children_by_names(&HEAD_TAGS).next() {
            self.catalog_title = title.text().normalize_whitespace();
        }

        self.landmarks = find_nav("landmarks")
            .map(|nav| Self::parse_nav_element(nav, nav_path))
            .unwrap_or_default();
        self.page_list = find_nav("page-list")
            .map(|nav| Self::parse_nav_element(nav, nav_path))
            .unwrap_or_default();

        Ok(())
    }

    fn parse_nav_element(nav: &XmlElement, nav_path: &str) -> Vec<NavPoint> {
        nav.find_children_by_names(&["ol", "ul"])
            .flat_map(|list| Self::parse_catalog_list(list, nav_path))
            .collect()
    }

    /// Recursively parses `<ol>`/`<ul>` navigation lists
    ///
    /// A `<li>` without an `<a>` or `<span>` label contributes its nested
    /// entries to the enclosing list.
    fn parse_catalog_list(list: &XmlElement, nav_path: &str) -> Vec<NavPoint> {
        let mut catalog = Vec::new();
        for item in list.children() {
            if item.name != "li" {
                debug!("Skipping <{}> inside a navigation list", item.tag_name());
                continue;
            }

            let children = item
                .find_children_by_names(&["ol", "ul"])
                .flat_map(|sub_list| Self::parse_catalog_list(sub_list, nav_path))
                .collect::<Vec<_>>();

            match item.find_children_by_names(&["a", "span"]).next() {
                Some(title_element) => catalog.push(NavPoint {
                    label: title_element.text().normalize_whitespace(),
                    content: title_element
                        .get_attr("href")
                        .map(|href| resolve_nav_href(nav_path, &href)),
                    children,
                    play_order: None,
                    id: title_element.get_attr("id"),
                }),
                None => catalog.extend(children),
            }
        }

        catalog
    }

    /// Check if the EPUB file contains `encryption.xml`
    ///
    /// Only the existence of the file is checked, not its validity.
    pub fn has_encryption(&self) -> bool {
        self.archive.index_for_name(ENCRYPTION_PATH).is_some()
    }

    /// Retrieves every metadata item with the given property
    ///
    /// # Return
    /// - `Some(Vec<MetadataItem>)`: All matching items in document order
    /// - `None`: If no matching metadata items are found
    pub fn get_metadata(&self, key: &str) -> Option<Vec<MetadataItem>> {
        let metadatas = self
            .metadata
            .iter()
            .filter(|item| item.property == key)
            .cloned()
            .collect::<Vec<MetadataItem>>();

        (!metadatas.is_empty()).then_some(metadatas)
    }

    /// Retrieves the values of every metadata item with the given property
    pub fn get_metadata_value(&self, key: &str) -> Option<Vec<String>> {
        let values = self
            .metadata
            .iter()
            .filter(|item| item.property == key)
            .map(|item| item.value.clone())
            .collect::<Vec<String>>();

        (!values.is_empty()).then_some(values)
    }

    /// Retrieves the titles of the publication, in document order
    ///
    /// # Return
    /// - `Err(EpubError)`: If and only if the OPF file does not contain `<dc:title>`
    pub fn get_title(&self) -> Result<Vec<String>, EpubError> {
        self.get_metadata_value("title")
            .ok_or_else(|| EpubError::NonCanonicalFile {
                tag: "title".to_string(),
            })
    }

    /// Retrieves the languages of the publication
    ///
    /// # Return
    /// - `Err(EpubError)`: If and only if the OPF file does not contain `<dc:language>`
    pub fn get_language(&self) -> Result<Vec<String>, EpubError> {
        self.get_metadata_value("language")
            .ok_or_else(|| EpubError::NonCanonicalFile {
                tag: "language".to_string(),
            })
    }

    /// Retrieves every identifier of the publication
    ///
    /// The unique identifier is available as [EpubDoc::unique_identifier].
    pub fn get_identifier(&self) -> Result<Vec<String>, EpubError> {
        self.get_metadata_value("identifier")
            .ok_or_else(|| EpubError::NonCanonicalFile {
                tag: "identifier".to_string(),
            })
    }

    /// Typed view of the metadata
    pub fn metadata(&self) -> Metadata {
        Metadata::from_items(&self.metadata, Some(&self.unique_identifier))
    }

    /// The table of contents
    ///
    /// The navigation document wins when it has more top-level entries than
    /// the NCX, the NCX otherwise.
    pub fn catalog(&self) -> &[NavPoint] {
        select_catalog(&self.nav, &self.ncx)
    }

    /// One of the navigation structures
    pub fn navigation(&self, kind: NavigationKind) -> &[NavPoint] {
        match kind {
            NavigationKind::Ncx => &self.ncx,
            NavigationKind::Nav => &self.nav,
            NavigationKind::Landmarks => &self.landmarks,
            NavigationKind::PageList => &self.page_list,
        }
    }

    /// The path the document was opened from
    pub fn epub_path(&self) -> &Path {
        &self.epub_path
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Retrieve resource data by resource ID
    ///
    /// Obfuscated resources are decrypted automatically.
    ///
    /// # Return
    /// - `Ok((Vec<u8>, String))`: The resource data and its MIME type
    /// - `Err(EpubError)`: Unknown id, missing entry or unsupported encryption method
    pub fn get_manifest_item(&mut self, id: &str) -> Result<(Vec<u8>, String), EpubError> {
        let resource_item = self
            .manifest
            .get(id)
            .cloned()
            .ok_or_else(|| EpubError::ResourceIdNotExist { id: id.to_string() })?;

        let path = resource_item.entry_name();
        let data = get_file_in_zip_archive(&mut self.archive, &path)?;
        let data = decrypt_resource(self.encryption.as_deref(), &self.unique_identifier, &path, data)?;

        Ok((data, resource_item.mime))
    }

    /// Retrieves resource item data by resource path
    ///
    /// The path must be relative to the root of the EPUB container.
    pub fn get_manifest_item_by_path(
        &mut self,
        path: &str,
    ) -> Result<(Vec<u8>, String), EpubError> {
        let id = self
            .manifest
            .values()
            .find(|item| item.entry_name() == path)
            .map(|item| item.id.clone())
            .ok_or_else(|| EpubError::ResourceNotFound {
                resource: path.to_string(),
            })?;

        self.get_manifest_item(&id)
    }

    /// Retrieves supported resource items by resource ID, following fallbacks
    ///
    /// If the MIME type of the resource is not in `supported_format`, the
    /// fallback chain is walked until a supported item is found.
    ///
    /// # Return
    /// - `Err(EpubError::NoSupportedFileFormat)`: The chain ends or loops without a supported item
    pub fn get_manifest_item_with_fallback(
        &mut self,
        id: &str,
        supported_format: &[&str],
    ) -> Result<(Vec<u8>, String), EpubError> {
        if !self.manifest.contains_key(id) {
            return Err(EpubError::ResourceIdNotExist { id: id.to_string() });
        }

        let mut current_id = id.to_string();
        let mut visited = vec![current_id.clone()];
        loop {
            let item = self.manifest.get(&current_id).ok_or_else(|| {
                EpubError::ResourceIdNotExist {
                    id: current_id.clone(),
                }
            })?;

            if supported_format.contains(&item.mime.as_str()) {
                return self.get_manifest_item(&current_id);
            }

            match &item.fallback {
                Some(fallback) if !visited.contains(fallback) => {
                    current_id = fallback.clone();
                    visited.push(current_id.clone());
                }
                _ => return Err(EpubError::NoSupportedFileFormat),
            }
        }
    }

    /// Streams the data of a manifest item through `f`
    ///
    /// Plain resources are streamed straight from the archive; obfuscated
    /// ones are read and decrypted first.
    pub fn read_manifest_item_with<T, F>(&mut self, id: &str, f: F) -> Result<T, EpubError>
    where
        F: FnOnce(&ManifestItem, &mut dyn Read) -> Result<T, EpubError>,
    {
        let item = self
            .manifest
            .get(id)
            .cloned()
            .ok_or_else(|| EpubError::ResourceIdNotExist { id: id.to_string() })?;
        let path = item.entry_name();

        if encryption_method(self.encryption.as_deref(), &path).is_some() {
            let (data, _) = self.get_manifest_item(id)?;
            return f(&item, &mut Cursor::new(data));
        }

        with_entry_reader(&mut self.archive, &path, |reader| f(&item, reader))
    }

    /// Streams any entry of the container through `f`
    ///
    /// The path is validated before use.
    pub fn read_entry_with<T, F>(&mut self, path: &str, f: F) -> Result<T, EpubError>
    where
        F: FnOnce(&mut dyn Read) -> Result<T, EpubError>,
    {
        with_entry_reader(&mut self.archive, path, f)
    }

    /// The manifest item holding the cover image
    ///
    /// Looks for the `cover-image` property first, then for the EPUB 2
    /// `<meta name="cover">` id. A cover that is not an image is replaced by
    /// the first image of its fallback chain.
    pub fn cover_item(&self) -> Option<&ManifestItem> {
        find_cover(&self.manifest, &self.metadata)
    }

    /// The cover image data and its MIME type
    ///
    /// A declared type that does not match the data is only logged.
    pub fn get_cover(&mut self) -> Option<(Vec<u8>, String)> {
        let id = self.cover_item()?.id.clone();
        let (data, mime) = self.get_manifest_item(&id).ok()?;

        if let Some(sniffed) = sniff_media_type(&data) {
            if sniffed != mime {
                warn!("Cover \"{}\" is declared as {} but looks like {}", id, mime, sniffed);
            }
        }
        Some((data, mime))
    }

    /// Manifest items with exactly the given MIME type
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

    /// Navigate to a specified chapter using the spine index
    ///
    /// # Return
    /// - `Some((Vec<u8>, String))`: The chapter content data and its MIME type
    /// - `None`: Index out of range or data retrieval error
    ///
    /// # Notes
    /// - It does not check whether the spine item is linear.
    pub fn navigate_by_spine_index(&mut self, index: usize) -> Option<(Vec<u8>, String)> {
        let manifest_id = self.spine.get(index)?.idref.clone();
        self.current_spine_index = index;
        self.get_manifest_item(&manifest_id).ok()
    }

    /// Navigate to the previous linear reading chapter
    ///
    /// # Return
    /// - `None`: Already in the first chapter, the current chapter is not linear,
    ///   or data retrieval failed
    pub fn spine_prev(&mut self) -> Option<(Vec<u8>, String)> {
        let current = self.spine.get(self.current_spine_index)?;
        if self.current_spine_index == 0 || !current.linear {
            return None;
        }

        let prev_index = (0..self.current_spine_index)
            .rev()
            .find(|&index| self.spine[index].linear)?;

        self.current_spine_index = prev_index;
        let manifest_id = self.spine[prev_index].idref.clone();
        self.get_manifest_item(&manifest_id).ok()
    }

    /// Navigate to the next linear reading chapter
    ///
    /// # Return
    /// - `None`: Already in the last chapter, the current chapter is not linear,
    ///   or data retrieval failed
    pub fn spine_next(&mut self) -> Option<(Vec<u8>, String)> {
        let current = self.spine.get(self.current_spine_index)?;
        if !current.linear {
            return None;
        }

        let next_index = (self.current_spine_index + 1..self.spine.len())
            .find(|&index| self.spine[index].linear)?;

        self.current_spine_index = next_index;
        let manifest_id = self.spine[next_index].idref.clone();
        self.get_manifest_item(&manifest_id).ok()
    }

    /// Retrieves the content data of the current chapter
    pub fn spine_current(&mut self) -> Option<(Vec<u8>, String)> {
        let manifest_id = self.spine.get(self.current_spine_index)?.idref.clone();
        self.get_manifest_item(&manifest_id).ok()
    }

    /// Archive-free snapshot of everything that was parsed
    pub fn to_book(&self) -> EpubBook {
        EpubBook {
            path: self.epub_path.clone(),
            package_path: self.package_path.clone(),
            base_path: self.base_path.clone(),
            version: self.version,
            unique_identifier: self.unique_identifier.clone(),
            metadata: self.metadata.clone(),
            metadata_link: self.metadata_link.clone(),
            manifest: self.manifest.clone(),
            spine: self.spine.clone(),
            encryption: self.encryption.clone(),
            ncx: self.ncx.clone(),
            nav: self.nav.clone(),
            landmarks: self.landmarks.clone(),
            page_list: self.page_list.clone(),
            catalog_title: self.catalog_title.clone(),
            options: self.options.clone(),
        }
    }

    /// Determine the EPUB version from the OPF file
    ///
    /// When the version attribute is missing or unknown, the version is
    /// guessed from features: a spine `toc` means 2.0, a `nav` manifest item
    /// means 3.0.
    fn determine_epub_version(opf_element: &XmlElement) -> Result<EpubVersion, EpubError> {
        if let Some(version) = opf_element.get_attr("version") {
            match version.trim().split('.').next() {
                Some("2") => return Ok(EpubVersion::Version2_0),
                Some("3") => return Ok(EpubVersion::Version3_0),
                _ => {}
            }
        }

        let spine_element =
            opf_element
                .first_child("spine")
                .ok_or_else(|| EpubError::NonCanonicalFile {
                    tag: "spine".to_string(),
                })?;

        if spine_element.get_attr("toc").is_some() {
            return Ok(EpubVersion::Version2_0);
        }

        let manifest_element =
            opf_element
                .first_child("manifest")
                .ok_or_else(|| EpubError::NonCanonicalFile {
                    tag: "manifest".to_string(),
                })?;

        manifest_element
            .children()
            .any(|element| {
                element.get_attr("id").as_deref() == Some("nav")
                    || element
                        .get_attr("properties")
                        .is_some_and(|p| p.split_whitespace().any(|p| p == "nav"))
            })
            .then_some(EpubVersion::Version3_0)
            .ok_or(EpubError::UnrecognizedEpubVersion)
    }

    /// Converts a manifest href to a path relative to the container root
    ///
    /// Hrefs starting with `/` are relative to the root, all others to the
    /// directory of the OPF file. Remote resources keep their URL.
    fn normalize_manifest_path(&self, href: &str) -> Result<PathBuf, EpubError> {
        if is_external_href(href) {
            return Ok(PathBuf::from(href));
        }

        let resolved = resolve_href(&self.base_path, href).ok_or_else(|| {
            EpubError::RealtiveLinkLeakage {
                path: href.to_string(),
            }
        })?;

        let path = resolved.split_once('#').map_or(resolved.as_str(), |(path, _)| path);
        Ok(PathBuf::from(path))
    }

    /// Verify the fallback chain of all manifest items
    ///
    /// Circular references and dangling fallback ids are reported but never
    /// interrupt parsing.
    fn validate_fallback_chains(&mut self) {
        let mut problems = Vec::new();
        for (id, item) in &self.manifest {
            if item.fallback.is_none() {
                continue;
            }

            let mut fallback_chain = Vec::new();
            if let Err(msg) = self.validate_fallback_chain(id, &mut fallback_chain) {
                problems.push(format!("Invalid fallback chain for item {}: {}", id, msg));
            }
        }

        for problem in problems {
            self.note(problem, None, "parse_manifest");
        }
    }

    fn validate_fallback_chain(
        &self,
        manifest_id: &str,
        fallback_chain: &mut Vec<String>,
    ) -> Result<(), String> {
        if fallback_chain.iter().any(|id| id == manifest_id) {
            fallback_chain.push(manifest_id.to_string());

            return Err(format!(
                "Circular reference detected in fallback chain for {}",
                fallback_chain.join("->")
            ));
        }

        let Some(item) = self.manifest.get(manifest_id) else {
            return Err(format!(
                "Fallback resource {} does not exist in manifest",
                manifest_id
            ));
        };

        match &item.fallback {
            Some(fallback_id) => {
                fallback_chain.push(manifest_id.to_string());
                self.validate_fallback_chain(fallback_id, fallback_chain)
            }
            None => Ok(()),
        }
    }
}

impl EpubDoc<BufReader<File>> {
    /// Opens and strictly parses the EPUB file at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, EpubError> {
        Self::with_options(path, &ParseOptions::default())
    }

    /// Opens and parses the EPUB file at `path` with the given options
    pub fn with_options<P: AsRef<Path>>(path: P, options: &ParseOptions) -> Result<Self, EpubError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EpubError::FileNotFound {
                path: path.to_string_lossy().into_owned(),
            });
        }

        let file = File::open(path)?;
        let path = canonicalize(path)?;

        Self::from_reader_with_options(BufReader::new(file), path, options)
    }
}

/// The directory part of an entry path
fn parent_dir(entry: &str) -> PathBuf {
    Path::new(entry)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

/// Resolves an href found in the navigation document at `doc_path`
///
/// External links are left untouched. A bare `#fragment` points into the
/// navigation document itself.
fn resolve_nav_href(doc_path: &str, href: &str) -> PathBuf {
    if is_external_href(href) {
        return PathBuf::from(href);
    }

    let path = href.split(['#', '?']).next().unwrap_or_default();
    if path.is_empty() {
        return match href.split_once('#') {
            Some((_, fragment)) => PathBuf::from(format!("{}#{}", doc_path, fragment)),
            None => PathBuf::from(doc_path),
        };
    }

    let base_dir = parent_dir(doc_path);
    PathBuf::from(resolve_href(&base_dir, href).unwrap_or_else(|| href.to_string()))
}

pub(crate) fn select_catalog<'a>(nav: &'a [NavPoint], ncx: &'a [NavPoint]) -> &'a [NavPoint] {
    if nav.len() > ncx.len() { nav } else { ncx }
}

/// Follows the fallback chain of `id` to the first item accepted by `accept`
///
/// Stops on cycles and dangling ids.
pub(crate) fn follow_fallback<'a>(
    manifest: &'a IndexMap<String, ManifestItem>,
    id: &str,
    accept: impl Fn(&ManifestItem) -> bool,
) -> Option<&'a ManifestItem> {
    let mut visited = Vec::<&str>::new();
    let mut current = manifest.get(id)?;
    loop {
        if accept(current) {
            return Some(current);
        }
        visited.push(current.id.as_str());

        let next = current.fallback.as_deref()?;
        if visited.contains(&next) {
            return None;
        }
        current = manifest.get(next)?;
    }
}

pub(crate) fn find_cover<'a>(
    manifest: &'a IndexMap<String, ManifestItem>,
    metadata: &[MetadataItem],
) -> Option<&'a ManifestItem> {
    let item = manifest
        .values()
        .find(|item| item.has_property("cover-image"))
        .or_else(|| {
            metadata
                .iter()
                .find(|item| item.property == "cover")
                .and_then(|cover| manifest.get(&cover.value))
        })?;

    follow_fallback(manifest, &item.id, ManifestItem::is_image).or(Some(item))
}

fn encryption_method<'a>(encryption: Option<&'a [EncryptionData]>, path: &str) -> Option<&'a str> {
    encryption?
        .iter()
        .find(|encryption| encryption.data == path)
        .map(|encryption| encryption.method.as_str())
}

/// Removes the obfuscation of `data` when `path` is declared in encryption.xml
pub(crate) fn decrypt_resource(
    encryption: Option<&[EncryptionData]>,
    unique_identifier: &str,
    path: &str,
    data: Vec<u8>,
) -> Result<Vec<u8>, EpubError> {
    match encryption_method(encryption, path) {
        None => Ok(data),
        Some(IDPF_OBFUSCATION) => Ok(idpf_font_dencryption(&data, unique_identifier)),
        Some(ADOBE_OBFUSCATION) => Ok(adobe_font_dencryption(&data, unique_identifier)),
        Some(method) => Err(EpubError::UnsupportedEncryptedMethod {
            method: method.to_string(),
        }),
    }
}
