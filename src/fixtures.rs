//! In-memory EPUB archives used by the unit tests

use std::{
    io::{Cursor, Write},
    path::{Path, PathBuf},
};

use zip::{CompressionMethod, ZipWriter, write::FileOptions};

pub const UNIQUE_ID: &str = "urn:uuid:12345678-1234-1234-1234-123456789abc";

pub const CONTAINER: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"##;

pub const OPF_V3: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="pub-id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="isbn">9780000000000</dc:identifier>
    <dc:identifier id="pub-id">urn:uuid:12345678-1234-1234-1234-123456789abc</dc:identifier>
    <dc:title id="title">Sample   Book</dc:title>
    <meta refines="#title" property="title-type">main</meta>
    <dc:creator id="author">Jane Doe</dc:creator>
    <meta refines="#author" property="role" scheme="marc:relators">aut</meta>
    <dc:creator>John Roe</dc:creator>
    <dc:language>en</dc:language>
    <dc:date>2021-03-04</dc:date>
    <dc:subject>Testing</dc:subject>
    <meta property="dcterms:modified">2024-01-02T03:04:05Z</meta>
    <meta property="rendition:layout">reflowable</meta>
    <meta name="cover" content="cover-img"/>
    <link rel="record" href="https://example.com/record" media-type="application/marcxml+xml"/>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="cover-img" href="images/cover.png" media-type="image/png" properties="cover-image"/>
    <item id="css" href="style/main.css" media-type="text/css"/>
    <item id="js" href="scripts/app.js" media-type="application/javascript"/>
    <item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="notes" href="text/notes.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="ch1"/>
    <itemref idref="notes" linear="no"/>
    <itemref idref="ch2"/>
  </spine>
</package>"##;

pub const NAV: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Navigation</title></head>
<body>
  <nav epub:type="toc" id="toc">
    <h1>Contents</h1>
    <ol>
      <li><a id="nav-ch1" href="text/ch1.xhtml">Chapter
          One</a>
        <ol>
          <li><a href="text/ch1.xhtml#s1">Section 1.1</a></li>
        </ol>
      </li>
      <li><span>Part Two</span>
        <ol>
          <li><a href="text/ch2.xhtml">Chapter Two</a></li>
        </ol>
      </li>
      <li>
        <ol>
          <li><a href="text/notes.xhtml">Notes</a></li>
        </ol>
      </li>
    </ol>
  </nav>
  <nav epub:type="landmarks">
    <ol>
      <li><a epub:type="bodymatter" href="text/ch1.xhtml">Start of Content</a></li>
    </ol>
  </nav>
  <nav epub:type="page-list" hidden="">
    <ol>
      <li><a href="text/ch1.xhtml#p1">1</a></li>
      <li><a href="text/ch2.xhtml#p2">2</a></li>
    </ol>
  </nav>
</body>
</html>"##;

pub const NCX: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head><meta name="dtb:uid" content="urn:uuid:12345678-1234-1234-1234-123456789abc"/></head>
  <docTitle><text>Sample Book</text></docTitle>
  <navMap>
    <navPoint id="np-2" playOrder="2">
      <navLabel><text>Chapter Two</text></navLabel>
      <content src="text/ch2.xhtml"/>
    </navPoint>
    <navPoint id="np-1" playOrder="1">
      <navLabel><text>Chapter One</text></navLabel>
      <content src="text/ch1.xhtml"/>
      <navPoint id="np-1-1" playOrder="3">
        <navLabel><text>Section 1.1</text></navLabel>
        <content src="text/ch1.xhtml#s1"/>
      </navPoint>
    </navPoint>
  </navMap>
</ncx>"##;

pub const OPF_V2: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="BookId">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
    <dc:title>Legacy Book</dc:title>
    <dc:creator opf:role="aut" opf:file-as="Roe, Richard">Richard Roe</dc:creator>
    <dc:language>fr</dc:language>
    <dc:identifier id="BookId" opf:scheme="UUID">urn:uuid:00112233-4455-6677-8899-aabbccddeeff</dc:identifier>
    <dc:date>2009</dc:date>
    <meta name="cover" content="cover"/>
  </metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="cover" href="images/cover.svg" media-type="image/svg+xml" fallback="cover-png"/>
    <item id="cover-png" href="images/cover.png" media-type="image/png"/>
    <item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="ch1"/>
    <itemref idref="ch2"/>
  </spine>
</package>"##;

pub const PNG: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D',
    b'R', 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00,
];

pub fn chapter(title: &str, body: &str) -> String {
    format!(
        r##"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>{title}</title></head>
<body><h1 id="s1">{title}</h1><p>{body}</p></body></html>"##
    )
}

/// Ordered list of archive entries, `mimetype` always written first
#[derive(Debug, Clone)]
pub struct EpubFixture {
    mimetype: Option<Vec<u8>>,
    entries: Vec<(String, Vec<u8>)>,
}

impl EpubFixture {
    pub fn empty() -> Self {
        Self {
            mimetype: Some(b"application/epub+zip".to_vec()),
            entries: Vec::new(),
        }
    }

    pub fn epub3() -> Self {
        Self::empty()
            .with("META-INF/container.xml", CONTAINER)
            .with("OEBPS/content.opf", OPF_V3)
            .with("OEBPS/nav.xhtml", NAV)
            .with("OEBPS/toc.ncx", NCX)
            .with("OEBPS/images/cover.png", PNG)
            .with("OEBPS/style/main.css", "body { margin: 0; }")
            .with("OEBPS/scripts/app.js", "console.log('hi');")
            .with(
                "OEBPS/text/ch1.xhtml",
                chapter("Chapter One", "It was a dark and stormy night."),
            )
            .with(
                "OEBPS/text/ch2.xhtml",
                chapter("Chapter Two", "The morning came."),
            )
            .with("OEBPS/text/notes.xhtml", chapter("Notes", "A note."))
    }

    pub fn epub2() -> Self {
        Self::empty()
            .with("META-INF/container.xml", CONTAINER)
            .with("OEBPS/content.opf", OPF_V2)
            .with("OEBPS/toc.ncx", NCX)
            .with("OEBPS/images/cover.svg", "<svg xmlns=\"http://www.w3.org/2000/svg\"/>")
            .with("OEBPS/images/cover.png", PNG)
            .with(
                "OEBPS/text/ch1.xhtml",
                chapter("Chapter One", "Legacy content one."),
            )
            .with(
                "OEBPS/text/ch2.xhtml",
                chapter("Chapter Two", "Legacy content two."),
            )
    }

    /// Adds or replaces an entry
    pub fn with(mut self, name: &str, data: impl AsRef<[u8]>) -> Self {
        let data = data.as_ref().to_vec();
        match self.entries.iter_mut().find(|(entry, _)| entry == name) {
            Some((_, existing)) => *existing = data,
            None => self.entries.push((name.to_string(), data)),
        }
        self
    }

    pub fn without(mut self, name: &str) -> Self {
        self.entries.retain(|(entry, _)| entry != name);
        self
    }

    pub fn with_mimetype(mut self, mimetype: Option<&str>) -> Self {
        self.mimetype = mimetype.map(|m| m.as_bytes().to_vec());
        self
    }

    /// Applies `f` to the text of an existing entry
    pub fn edit(self, name: &str, f: impl FnOnce(String) -> String) -> Self {
        let current = self
            .entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, data)| String::from_utf8_lossy(data).into_owned())
            .unwrap_or_default();
        self.with(name, f(current))
    }

    pub fn build(&self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = FileOptions::<()>::default().compression_method(CompressionMethod::Stored);
        let deflated = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);

        if let Some(mimetype) = &self.mimetype {
            zip.start_file("mimetype", stored).unwrap();
            zip.write_all(mimetype).unwrap();
        }
        for (name, data) in &self.entries {
            zip.start_file(name.as_str(), deflated).unwrap();
            zip.write_all(data).unwrap();
        }

        zip.finish().unwrap().into_inner()
    }

    pub fn cursor(&self) -> Cursor<Vec<u8>> {
        Cursor::new(self.build())
    }

    pub fn write_to(&self, dir: &Path, file_name: &str) -> PathBuf {
        let path = dir.join(file_name);
        std::fs::write(&path, self.build()).unwrap();
        path
    }
}
