use std::{fmt, path::PathBuf};

/// The EPUB major version a publication declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EpubVersion {
    Version2_0,
    Version3_0,
}

impl fmt::Display for EpubVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpubVersion::Version2_0 => f.write_str("2.0"),
            EpubVersion::Version3_0 => f.write_str("3.0"),
        }
    }
}

/// Represents a metadata item in the EPUB publication
///
/// The `MetadataItem` structure represents a single piece of metadata from the EPUB publication.
/// Metadata items contain information about the publication such as title, author, identifier,
/// language, and other descriptive information.
///
/// In EPUB 3.0, metadata items can have refinements that provide additional details about
/// the main metadata item. For example, a title metadata item might have refinements that
/// specify it is the main title of the publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataItem {
    /// Optional unique identifier for this metadata item
    ///
    /// Used to reference this metadata item from refinements (`refines="#id"`).
    pub id: Option<String>,

    /// The metadata property name
    ///
    /// Dublin Core elements use their local name ("title", "creator", ...), EPUB 3
    /// `<meta>` elements use their `property` attribute and EPUB 2 `<meta>` elements
    /// use their `name` attribute.
    pub property: String,

    /// The metadata value, whitespace normalized
    pub value: String,

    /// Optional language code for this metadata item
    pub lang: Option<String>,

    /// Refinements of this metadata item
    ///
    /// In EPUB 3.x these come from `<meta refines="#id">` elements. In EPUB 2.x the
    /// extra attributes of a Dublin Core element (`opf:role`, `opf:file-as`, ...) are
    /// stored as refinements too.
    pub refined: Vec<MetadataRefinement>,
}

impl MetadataItem {
    /// Returns the value of the first refinement with the given property
    pub fn refinement(&self, property: &str) -> Option<&str> {
        self.refined
            .iter()
            .find(|refinement| refinement.property == property)
            .map(|refinement| refinement.value.as_str())
    }
}

/// Represents a refinement of a metadata item
///
/// For example, a creator metadata item might have refinements specifying the creator's role
/// or the scheme used for an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRefinement {
    /// Id of the refined metadata item, without the leading `#`
    pub refines: String,

    /// The refinement property name, e.g. "role", "file-as", "title-type"
    pub property: String,

    /// The refinement value
    pub value: String,

    /// Optional language code for this refinement
    pub lang: Option<String>,

    /// Optional scheme identifier for this refinement
    ///
    /// For example "marc:relators" for MARC relator codes.
    pub scheme: Option<String>,
}

/// Represents a metadata link item in an EPUB publication
///
/// Link metadata items are defined in the OPF file using `<link>` elements in the metadata
/// section and associate the publication with external records or related resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataLinkItem {
    /// The URI of the linked resource
    pub href: String,

    /// The relationship between this publication and the linked resource
    pub rel: String,

    /// Optional language of the linked resource
    pub hreflang: Option<String>,

    /// Optional unique identifier for this link item
    pub id: Option<String>,

    /// Optional MIME type of the linked resource
    pub mime: Option<String>,

    /// Optional space-separated properties of this link
    pub properties: Option<String>,

    /// Optional id of the metadata item this link refines, without the leading `#`
    pub refines: Option<String>,
}

/// Represents a resource item declared in the EPUB manifest
///
/// Every resource that is part of the publication must be declared in the manifest, and
/// resources not listed in the manifest should not be accessed by reading systems.
///
/// Manifest items support the fallback mechanism, allowing alternative versions of a resource
/// to be specified for reading systems that do not support the primary media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    /// The manifest id of the resource
    pub id: String,

    /// The path to the resource file within the EPUB container
    ///
    /// Already normalized relative to the root of the container.
    pub path: PathBuf,

    /// The media type of the resource
    pub mime: String,

    /// Optional space-separated properties ("nav", "cover-image", "scripted", ...)
    pub properties: Option<String>,

    /// Optional id of the fallback manifest item
    pub fallback: Option<String>,
}

impl ManifestItem {
    /// Whether the space-separated `properties` attribute contains `property`
    pub fn has_property(&self, property: &str) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|properties| properties.split_whitespace().any(|p| p == property))
    }

    /// The path as a forward-slash separated zip entry name
    pub fn entry_name(&self) -> String {
        self.path.to_string_lossy().replace('\\', "/")
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

/// Represents an item in the EPUB spine, defining the reading order of the publication
///
/// Items can be marked as linear (part of the main reading flow) or non-linear
/// (supplementary content that may be accessed out of sequence).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    /// The ID reference to a manifest item
    pub idref: String,

    /// Optional identifier for this spine item
    pub id: Option<String>,

    /// Optional space-separated properties of this spine item
    pub properties: Option<String>,

    /// Indicates whether this item is part of the linear reading order
    ///
    /// Non-linear items are typically footnotes, endnotes or other supplementary
    /// documents that readers reach through hyperlinks.
    pub linear: bool,
}

/// Represents encryption information for EPUB resources
///
/// Read from `META-INF/encryption.xml`; describes which resources are
/// encrypted and what encryption method was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionData {
    /// The encryption algorithm URI
    ///
    /// Supported encryption methods:
    /// - IDPF font obfuscation: "http://www.idpf.org/2008/embedding"
    /// - Adobe font obfuscation: "http://ns.adobe.com/pdf/enc#RC"
    pub method: String,

    /// The path of the encrypted resource, relative to the root of the container
    pub data: String,
}

/// Represents a navigation point in an EPUB document's table of contents
///
/// Each navigation point corresponds to a section or chapter in the publication
/// and may contain nested child navigation points to represent sub-sections.
#[derive(Debug, Eq, Clone)]
pub struct NavPoint {
    /// The display label/title of this navigation point
    pub label: String,

    /// The content document path this navigation point references
    ///
    /// Resolved against the navigation document and relative to the root of
    /// the container. The fragment, if any, is kept.
    pub content: Option<PathBuf>,

    /// Child navigation points (sub-sections)
    pub children: Vec<NavPoint>,

    /// The reading order position of this navigation point
    ///
    /// Only NCX navigation provides a play order.
    pub play_order: Option<usize>,

    /// Optional identifier, taken from the NCX `navPoint` or the nav `<a>` element
    pub id: Option<String>,
}

impl NavPoint {
    /// Content path without the `#fragment` part
    pub fn content_path(&self) -> Option<PathBuf> {
        self.content.as_ref().map(|content| {
            let content = content.to_string_lossy();
            match content.split_once('#') {
                Some((path, _)) => PathBuf::from(path),
                None => PathBuf::from(content.as_ref()),
            }
        })
    }

    /// Depth-first iterator over this point and all of its descendants
    pub fn iter(&self) -> impl Iterator<Item = &NavPoint> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let point = stack.pop()?;
            stack.extend(point.children.iter().rev());
            Some(point)
        })
    }
}

impl Ord for NavPoint {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.play_order.cmp(&other.play_order)
    }
}

impl PartialOrd for NavPoint {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NavPoint {
    fn eq(&self, other: &Self) -> bool {
        self.play_order == other.play_order
    }
}

/// The navigation structures a publication can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavigationKind {
    /// EPUB 2 NCX `navMap`
    Ncx,

    /// EPUB 3 `<nav epub:type="toc">`
    Nav,

    /// EPUB 3 `<nav epub:type="landmarks">`
    Landmarks,

    /// EPUB 3 `<nav epub:type="page-list">`
    PageList,
}

#[cfg(test)]
mod tests {
    mod navpoint_tests {
        use std::path::PathBuf;

        use crate::types::NavPoint;

        fn point(label: &str, content: Option<&str>, play_order: Option<usize>) -> NavPoint {
            NavPoint {
                label: label.to_string(),
                content: content.map(PathBuf::from),
                children: vec![],
                play_order,
                id: None,
            }
        }

        /// Equality only looks at the play order
        #[test]
        fn test_navpoint_partial_eq() {
            let nav1 = point("Chapter 1", Some("chapter1.html"), Some(1));
            let nav2 = point("Chapter 1", Some("chapter2.html"), Some(1));
            let nav3 = point("Chapter 2", Some("chapter1.html"), Some(2));

            assert_eq!(nav1, nav2);
            assert_ne!(nav1, nav3);
        }

        #[test]
        fn test_navpoint_sort_by_play_order() {
            let nav1 = point("Chapter 1", Some("chapter1.html"), Some(1));
            let nav2 = point("Chapter 2", Some("chapter2.html"), Some(2));
            let nav3 = point("Chapter 3", Some("chapter3.html"), Some(3));

            assert!(nav1 < nav2);
            assert_eq!(nav2.partial_cmp(&nav1), Some(std::cmp::Ordering::Greater));

            let mut nav_points = vec![nav2.clone(), nav3.clone(), nav1.clone()];
            nav_points.sort();
            assert_eq!(nav_points, vec![nav1, nav2, nav3]);
        }

        /// Points without a play order sort first
        #[test]
        fn test_navpoint_ord_with_none_play_order() {
            let with_order = point("Chapter 1", Some("chapter1.html"), Some(1));
            let without_order = point("Preface", Some("preface.html"), None);

            assert!(without_order < with_order);
            assert!(without_order == point("Introduction", None, None));
        }

        #[test]
        fn test_content_path_strips_fragment() {
            let nav = point("Section", Some("OEBPS/text/ch1.xhtml#sec2"), None);
            assert_eq!(
                nav.content_path(),
                Some(PathBuf::from("OEBPS/text/ch1.xhtml"))
            );

            let nav = point("Chapter", Some("OEBPS/text/ch1.xhtml"), None);
            assert_eq!(
                nav.content_path(),
                Some(PathBuf::from("OEBPS/text/ch1.xhtml"))
            );

            assert_eq!(point("Part", None, None).content_path(), None);
        }

        #[test]
        fn test_iter_is_depth_first() {
            let mut part = point("Part I", None, None);
            let mut chapter = point("Chapter 1", Some("c1.xhtml"), None);
            chapter.children.push(point("Section 1.1", Some("c1.xhtml#s1"), None));
            part.children.push(chapter);
            part.children.push(point("Chapter 2", Some("c2.xhtml"), None));

            let labels = part.iter().map(|p| p.label.as_str()).collect::<Vec<_>>();
            assert_eq!(labels, vec!["Part I", "Chapter 1", "Section 1.1", "Chapter 2"]);
        }
    }

    mod manifest_tests {
        use std::path::PathBuf;

        use crate::types::ManifestItem;

        #[test]
        fn test_has_property() {
            let item = ManifestItem {
                id: "cover".to_string(),
                path: PathBuf::from("OEBPS/images/cover.jpg"),
                mime: "image/jpeg".to_string(),
                properties: Some("cover-image svg".to_string()),
                fallback: None,
            };

            assert!(item.has_property("cover-image"));
            assert!(item.has_property("svg"));
            assert!(!item.has_property("cover"));
            assert!(!item.has_property("nav"));
            assert!(item.is_image());
            assert_eq!(item.entry_name(), "OEBPS/images/cover.jpg");
        }
    }
}
