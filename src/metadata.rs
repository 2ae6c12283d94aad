//! Typed view over the package metadata
//!
//! [EpubDoc](crate::epub::EpubDoc) keeps the metadata as a flat list of
//! [MetadataItem]s, which is faithful to the OPF file but awkward to consume.
//! [Metadata] groups those items by meaning: Dublin Core elements, EPUB 3
//! rendition properties, accessibility properties and a few well known `meta`
//! entries.

use std::fmt::Write;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};

use crate::types::MetadataItem;

/// Publication metadata grouped by meaning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub titles: Vec<String>,
    pub creators: Vec<String>,
    pub contributors: Vec<String>,
    pub publishers: Vec<String>,
    pub identifiers: Vec<String>,
    pub languages: Vec<String>,
    pub dates: Vec<String>,
    pub descriptions: Vec<String>,
    pub subjects: Vec<String>,
    pub types: Vec<String>,
    pub formats: Vec<String>,
    pub sources: Vec<String>,
    pub rights: Vec<String>,

    /// Value of the identifier the package `unique-identifier` attribute points to
    pub unique_identifier: Option<String>,

    /// Manifest id of the cover image declared through `<meta name="cover">`
    pub cover: Option<String>,

    /// `dcterms:modified`
    pub modified: Option<String>,

    /// `dcterms:rightsHolder`
    pub rights_holder: Option<String>,

    pub rendition: Rendition,
    pub accessibility: Accessibility,
}

/// EPUB 3 rendition properties (`rendition:*`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendition {
    pub layout: Option<String>,
    pub orientation: Option<String>,
    pub spread: Option<String>,
    pub viewport: Option<String>,
    pub media: Option<String>,
    pub flow: Option<String>,
    pub align_x_center: bool,
}

/// schema.org accessibility properties
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accessibility {
    pub features: Vec<String>,
    pub hazards: Vec<String>,
    pub summary: Option<String>,
}

impl Metadata {
    /// Builds the typed view from raw metadata items
    ///
    /// `unique_identifier` is the value resolved from the package element,
    /// it is stored as given.
    pub fn from_items(items: &[MetadataItem], unique_identifier: Option<&str>) -> Self {
        let mut metadata = Metadata {
            unique_identifier: unique_identifier.map(str::to_string),
            ..Default::default()
        };

        for item in items {
            let value = item.value.clone();
            match item.property.as_str() {
                "title" => metadata.titles.push(value),
                "creator" => metadata.creators.push(value),
                "contributor" => metadata.contributors.push(value),
                "publisher" => metadata.publishers.push(value),
                "identifier" => metadata.identifiers.push(value),
                "language" => metadata.languages.push(value),
                "date" => metadata.dates.push(value),
                "description" => metadata.descriptions.push(value),
                "subject" => metadata.subjects.push(value),
                "type" => metadata.types.push(value),
                "format" => metadata.formats.push(value),
                "source" => metadata.sources.push(value),
                "rights" => metadata.rights.push(value),

                "cover" => metadata.cover = Some(value),
                "dcterms:modified" => metadata.modified = Some(value),
                "dcterms:rightsHolder" => metadata.rights_holder = Some(value),

                "rendition:layout" => metadata.rendition.layout = Some(value),
                "rendition:orientation" => metadata.rendition.orientation = Some(value),
                "rendition:spread" => metadata.rendition.spread = Some(value),
                "rendition:viewport" => metadata.rendition.viewport = Some(value),
                "rendition:media" => metadata.rendition.media = Some(value),
                "rendition:flow" => metadata.rendition.flow = Some(value),
                "rendition:align-x-center" => {
                    metadata.rendition.align_x_center =
                        matches!(value.to_ascii_lowercase().as_str(), "true" | "yes" | "1")
                }

                "schema:accessibilityFeature" => metadata.accessibility.features.push(value),
                "schema:accessibilityHazard" => metadata.accessibility.hazards.push(value),
                "schema:accessibilitySummary" => metadata.accessibility.summary = Some(value),

                _ => {}
            }
        }

        metadata
    }

    pub fn title(&self) -> Option<&str> {
        self.titles.first().map(String::as_str)
    }

    pub fn creator(&self) -> Option<&str> {
        self.creators.first().map(String::as_str)
    }

    pub fn language(&self) -> Option<&str> {
        self.languages.first().map(String::as_str)
    }

    pub fn publisher(&self) -> Option<&str> {
        self.publishers.first().map(String::as_str)
    }

    pub fn description(&self) -> Option<&str> {
        self.descriptions.first().map(String::as_str)
    }

    pub fn date(&self) -> Option<&str> {
        self.dates.first().map(String::as_str)
    }

    /// The unique identifier, or the first identifier when none was resolved
    pub fn identifier(&self) -> Option<&str> {
        self.unique_identifier
            .as_deref()
            .or_else(|| self.identifiers.first().map(String::as_str))
    }

    /// Publication date as a calendar date
    ///
    /// Accepts `YYYY-MM-DD`, RFC 3339 timestamps, naive timestamps, and the
    /// reduced forms `YYYY-MM` and `YYYY` (resolved to the first day).
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        self.dates.iter().find_map(|date| parse_date(date))
    }

    /// `dcterms:modified` as a timestamp
    pub fn modified_datetime(&self) -> Option<DateTime<FixedOffset>> {
        self.modified
            .as_deref()
            .and_then(|modified| DateTime::parse_from_rfc3339(modified.trim()).ok())
    }

    pub fn is_fixed_layout(&self) -> bool {
        self.rendition.layout.as_deref() == Some("pre-paginated")
    }

    /// Multi-line human readable summary of the main fields
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        let fields = [
            ("Title", self.title()),
            ("Creator", self.creator()),
            ("Language", self.language()),
            ("Publisher", self.publisher()),
            ("Identifier", self.identifier()),
            ("Date", self.date()),
            ("Modified", self.modified.as_deref()),
        ];

        for (name, value) in fields {
            if let Some(value) = value {
                let _ = writeln!(summary, "{}: {}", name, value);
            }
        }
        if !self.subjects.is_empty() {
            let _ = writeln!(summary, "Subjects: {}", self.subjects.join(", "));
        }
        if let Some(layout) = &self.rendition.layout {
            let _ = writeln!(summary, "Layout: {}", layout);
        }

        summary
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Some(datetime.date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(value, format) {
            return Some(datetime.date());
        }
    }

    let mut parts = value.splitn(3, '-');
    let year = parts.next()?.parse::<i32>().ok()?;
    match parts.next() {
        Some(month) if parts.next().is_none() => {
            NaiveDate::from_ymd_opt(year, month.parse().ok()?, 1)
        }
        None if value.len() == 4 => NaiveDate::from_ymd_opt(year, 1, 1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, NaiveDate};

    use crate::{metadata::Metadata, types::MetadataItem};

    fn item(property: &str, value: &str) -> MetadataItem {
        MetadataItem {
            id: None,
            property: property.to_string(),
            value: value.to_string(),
            lang: None,
            refined: vec![],
        }
    }

    #[test]
    fn test_from_items_groups_dublin_core() {
        let items = vec![
            item("title", "Moby Dick"),
            item("title", "The Whale"),
            item("creator", "Herman Melville"),
            item("language", "en"),
            item("identifier", "isbn-1"),
            item("identifier", "urn:uuid:abc"),
            item("subject", "Whaling"),
            item("subject", "Sea stories"),
            item("cover", "cover-img"),
            item("unknown:property", "ignored"),
        ];

        let metadata = Metadata::from_items(&items, Some("urn:uuid:abc"));
        assert_eq!(metadata.titles, vec!["Moby Dick", "The Whale"]);
        assert_eq!(metadata.title(), Some("Moby Dick"));
        assert_eq!(metadata.creator(), Some("Herman Melville"));
        assert_eq!(metadata.language(), Some("en"));
        assert_eq!(metadata.identifier(), Some("urn:uuid:abc"));
        assert_eq!(metadata.identifiers.len(), 2);
        assert_eq!(metadata.subjects.len(), 2);
        assert_eq!(metadata.cover.as_deref(), Some("cover-img"));
        assert_eq!(metadata.publisher(), None);
    }

    #[test]
    fn test_rendition_and_accessibility() {
        let items = vec![
            item("rendition:layout", "pre-paginated"),
            item("rendition:spread", "landscape"),
            item("rendition:align-x-center", "Yes"),
            item("schema:accessibilityFeature", "alternativeText"),
            item("schema:accessibilityFeature", "tableOfContents"),
            item("schema:accessibilityHazard", "none"),
            item("schema:accessibilitySummary", "Fully accessible."),
            item("dcterms:rightsHolder", "Someone"),
        ];

        let metadata = Metadata::from_items(&items, None);
        assert!(metadata.is_fixed_layout());
        assert!(metadata.rendition.align_x_center);
        assert_eq!(metadata.rendition.spread.as_deref(), Some("landscape"));
        assert_eq!(metadata.accessibility.features.len(), 2);
        assert_eq!(metadata.accessibility.hazards, vec!["none"]);
        assert_eq!(
            metadata.accessibility.summary.as_deref(),
            Some("Fully accessible.")
        );
        assert_eq!(metadata.rights_holder.as_deref(), Some("Someone"));

        let metadata = Metadata::from_items(&[item("rendition:align-x-center", "0")], None);
        assert!(!metadata.rendition.align_x_center);
        assert!(!metadata.is_fixed_layout());
    }

    #[test]
    fn test_parsed_date_formats() {
        let cases = [
            ("2020-05-17", NaiveDate::from_ymd_opt(2020, 5, 17)),
            ("2020-05-17T10:20:30Z", NaiveDate::from_ymd_opt(2020, 5, 17)),
            ("2020-05-17T10:20:30+08:00", NaiveDate::from_ymd_opt(2020, 5, 17)),
            ("2020-05-17T10:20:30", NaiveDate::from_ymd_opt(2020, 5, 17)),
            ("2020-05", NaiveDate::from_ymd_opt(2020, 5, 1)),
            ("2020", NaiveDate::from_ymd_opt(2020, 1, 1)),
            ("someday", None),
        ];

        for (value, expected) in cases {
            let metadata = Metadata::from_items(&[item("date", value)], None);
            assert_eq!(metadata.parsed_date(), expected, "date {:?}", value);
        }
    }

    #[test]
    fn test_modified_datetime() {
        let metadata =
            Metadata::from_items(&[item("dcterms:modified", "2023-02-01T12:00:00Z")], None);
        let modified = metadata.modified_datetime().unwrap();
        assert_eq!(modified.year(), 2023);
        assert_eq!(modified.month(), 2);
    }

    #[test]
    fn test_summary() {
        let items = vec![
            item("title", "Moby Dick"),
            item("creator", "Herman Melville"),
            item("subject", "Whaling"),
        ];
        let summary = Metadata::from_items(&items, None).summary();

        assert!(summary.contains("Title: Moby Dick\n"));
        assert!(summary.contains("Creator: Herman Melville\n"));
        assert!(summary.contains("Subjects: Whaling\n"));
        assert!(!summary.contains("Publisher"));
    }
}
