use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::MigrationError;
use crate::model::parse_timestamp;

/// Who made a revision, as the dump states it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contributor {
    Username(String),
    Ip(String),
    /// No contributor, or one hidden with `deleted="deleted"`.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub timestamp: DateTime<Utc>,
    pub contributor: Contributor,
    pub comment: Option<String>,
    pub minor: bool,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedPage {
    /// Title in foreign-prefix form.
    pub title: String,
    /// Value of `<ns>`, when present.
    pub namespace_key: Option<i32>,
    /// Revisions in file order.
    pub revisions: Vec<Revision>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteInfo {
    pub site_name: Option<String>,
    /// `(key, name)` pairs from `<namespaces>`.
    pub namespaces: Vec<(i32, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    BeforeRoot,
    InRoot,
    /// The next page's start tag was consumed while reading the site header.
    PageOpen,
    Finished,
}

enum XmlEvent {
    Start { name: String, key: Option<String> },
    End,
    Text(String),
    Eof,
    Other,
}

/// Streaming reader over a MediaWiki XML export. Holds at most one page in memory.
pub struct DumpReader<R: BufRead> {
    reader: Reader<R>,
    buffer: Vec<u8>,
    path: PathBuf,
    site: SiteInfo,
    state: ReaderState,
}

impl DumpReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, MigrationError> {
        let file = File::open(path).map_err(|source| MigrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufReader::new(file), path))
    }
}

impl<R: BufRead> DumpReader<R> {
    pub fn new(source: R, path: &Path) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().expand_empty_elements = true;
        Self {
            reader,
            buffer: Vec::new(),
            path: path.to_path_buf(),
            site: SiteInfo::default(),
            state: ReaderState::BeforeRoot,
        }
    }

    /// Header information. Reads up to the first page on first use.
    pub fn site_info(&mut self) -> Result<&SiteInfo, MigrationError> {
        if self.state == ReaderState::BeforeRoot {
            self.read_header()?;
        }
        Ok(&self.site)
    }

    pub fn next_page(&mut self) -> Result<Option<ImportedPage>, MigrationError> {
        let result = self.advance();
        if result.is_err() {
            self.state = ReaderState::Finished;
        }
        result
    }

    fn advance(&mut self) -> Result<Option<ImportedPage>, MigrationError> {
        if self.state == ReaderState::BeforeRoot {
            self.read_header()?;
        }
        loop {
            match self.state {
                ReaderState::Finished => return Ok(None),
                ReaderState::PageOpen => {
                    self.state = ReaderState::InRoot;
                    return self.read_page().map(Some);
                }
                ReaderState::BeforeRoot | ReaderState::InRoot => {}
            }
            match self.next_event()? {
                XmlEvent::Start { name, .. } if name == "page" => {
                    self.state = ReaderState::PageOpen;
                }
                XmlEvent::Start { .. } => self.skip_element()?,
                XmlEvent::End => self.state = ReaderState::Finished,
                XmlEvent::Eof => return Err(self.malformed("unexpected end of file inside <mediawiki>")),
                XmlEvent::Text(_) | XmlEvent::Other => {}
            }
        }
    }

    fn read_header(&mut self) -> Result<(), MigrationError> {
        loop {
            match self.next_event()? {
                XmlEvent::Start { name, .. } if name == "mediawiki" => break,
                XmlEvent::Start { name, .. } => {
                    return Err(self.malformed(&format!("expected <mediawiki> root, found <{name}>")));
                }
                XmlEvent::Eof => return Err(self.malformed("missing <mediawiki> root element")),
                XmlEvent::End => return Err(self.malformed("unexpected closing tag before root")),
                XmlEvent::Text(_) | XmlEvent::Other => {}
            }
        }
        self.state = ReaderState::InRoot;

        loop {
            match self.next_event()? {
                XmlEvent::Start { name, .. } if name == "siteinfo" => self.read_site_info()?,
                XmlEvent::Start { name, .. } if name == "page" => {
                    self.state = ReaderState::PageOpen;
                    return Ok(());
                }
                XmlEvent::Start { .. } => self.skip_element()?,
                XmlEvent::End => {
                    self.state = ReaderState::Finished;
                    return Ok(());
                }
                XmlEvent::Eof => return Err(self.malformed("unexpected end of file inside <mediawiki>")),
                XmlEvent::Text(_) | XmlEvent::Other => {}
            }
        }
    }

    fn read_site_info(&mut self) -> Result<(), MigrationError> {
        loop {
            match self.next_event()? {
                XmlEvent::Start { name, .. } if name == "sitename" => {
                    let site_name = self.read_text()?;
                    self.site.site_name = Some(site_name);
                }
                XmlEvent::Start { name, .. } if name == "namespaces" => self.read_namespaces()?,
                XmlEvent::Start { .. } => self.skip_element()?,
                XmlEvent::End => return Ok(()),
                XmlEvent::Eof => return Err(self.malformed("unexpected end of file inside <siteinfo>")),
                XmlEvent::Text(_) | XmlEvent::Other => {}
            }
        }
    }

    fn read_namespaces(&mut self) -> Result<(), MigrationError> {
        loop {
            match self.next_event()? {
                XmlEvent::Start { name, key } if name == "namespace" => {
                    let key = key
                        .as_deref()
                        .and_then(|value| value.trim().parse::<i32>().ok())
                        .ok_or_else(|| self.malformed("<namespace> without a numeric key"))?;
                    let declared = self.read_text()?;
                    self.site.namespaces.push((key, declared.trim().to_string()));
                }
                XmlEvent::Start { .. } => self.skip_element()?,
                XmlEvent::End => return Ok(()),
                XmlEvent::Eof => return Err(self.malformed("unexpected end of file inside <namespaces>")),
                XmlEvent::Text(_) | XmlEvent::Other => {}
            }
        }
    }

    fn read_page(&mut self) -> Result<ImportedPage, MigrationError> {
        let mut title = None;
        let mut namespace_key = None;
        let mut revisions = Vec::new();

        loop {
            match self.next_event()? {
                XmlEvent::Start { name, .. } => match name.as_str() {
                    "title" => title = Some(self.read_text()?),
                    "ns" => {
                        let value = self.read_text()?;
                        let key = value
                            .trim()
                            .parse::<i32>()
                            .map_err(|_| self.malformed(&format!("invalid <ns> value {value:?}")))?;
                        namespace_key = Some(key);
                    }
                    "revision" => revisions.push(self.read_revision()?),
                    _ => self.skip_element()?,
                },
                XmlEvent::End => break,
                XmlEvent::Eof => return Err(self.malformed("unexpected end of file inside <page>")),
                XmlEvent::Text(_) | XmlEvent::Other => {}
            }
        }

        let title = title
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| self.malformed("<page> without a <title>"))?;
        Ok(ImportedPage {
            title,
            namespace_key,
            revisions,
        })
    }

    fn read_revision(&mut self) -> Result<Revision, MigrationError> {
        let mut timestamp = None;
        let mut contributor = Contributor::Unknown;
        let mut comment = None;
        let mut minor = false;
        let mut text = None;

        loop {
            match self.next_event()? {
                XmlEvent::Start { name, .. } => match name.as_str() {
                    "timestamp" => {
                        let value = self.read_text()?;
                        let parsed = parse_timestamp(&value).ok_or_else(|| {
                            self.malformed(&format!("invalid revision timestamp {value:?}"))
                        })?;
                        timestamp = Some(parsed);
                    }
                    "contributor" => contributor = self.read_contributor()?,
                    "comment" => {
                        let value = self.read_text()?;
                        comment = Some(value).filter(|value| !value.is_empty());
                    }
                    "minor" => {
                        self.skip_element()?;
                        minor = true;
                    }
                    "text" => text = Some(self.read_text()?),
                    _ => self.skip_element()?,
                },
                XmlEvent::End => break,
                XmlEvent::Eof => return Err(self.malformed("unexpected end of file inside <revision>")),
                XmlEvent::Text(_) | XmlEvent::Other => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| self.malformed("<revision> without a <timestamp>"))?;
        Ok(Revision {
            timestamp,
            contributor,
            comment,
            minor,
            text: text.unwrap_or_default(),
        })
    }

    fn read_contributor(&mut self) -> Result<Contributor, MigrationError> {
        let mut contributor = Contributor::Unknown;
        loop {
            match self.next_event()? {
                XmlEvent::Start { name, .. } => match name.as_str() {
                    "username" => {
                        let value = self.read_text()?;
                        if !value.trim().is_empty() {
                            contributor = Contributor::Username(value.trim().to_string());
                        }
                    }
                    "ip" => {
                        let value = self.read_text()?;
                        if !value.trim().is_empty() {
                            contributor = Contributor::Ip(value.trim().to_string());
                        }
                    }
                    _ => self.skip_element()?,
                },
                XmlEvent::End => return Ok(contributor),
                XmlEvent::Eof => {
                    return Err(self.malformed("unexpected end of file inside <contributor>"));
                }
                XmlEvent::Text(_) | XmlEvent::Other => {}
            }
        }
    }

    /// Text content of the element whose start tag was just read, up to its end tag.
    fn read_text(&mut self) -> Result<String, MigrationError> {
        let mut output = String::new();
        loop {
            match self.next_event()? {
                XmlEvent::Text(text) => output.push_str(&text),
                XmlEvent::Start { .. } => self.skip_element()?,
                XmlEvent::End => return Ok(output),
                XmlEvent::Eof => return Err(self.malformed("unexpected end of file inside element")),
                XmlEvent::Other => {}
            }
        }
    }

    fn skip_element(&mut self) -> Result<(), MigrationError> {
        let mut depth = 1usize;
        while depth > 0 {
            match self.next_event()? {
                XmlEvent::Start { .. } => depth += 1,
                XmlEvent::End => depth -= 1,
                XmlEvent::Eof => return Err(self.malformed("unexpected end of file")),
                XmlEvent::Text(_) | XmlEvent::Other => {}
            }
        }
        Ok(())
    }

    fn next_event(&mut self) -> Result<XmlEvent, MigrationError> {
        self.buffer.clear();
        let decoder = self.reader.decoder();
        let event = match self.reader.read_event_into(&mut self.buffer) {
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                start
                    .try_get_attribute("key")
                    .map(|attribute| {
                        let key = attribute
                            .map(|attribute| String::from_utf8_lossy(&attribute.value).into_owned());
                        XmlEvent::Start { name, key }
                    })
                    .map_err(|error| error.to_string())
            }
            Ok(Event::End(_)) => Ok(XmlEvent::End),
            Ok(Event::Text(text)) => text
                .unescape()
                .map(|value| XmlEvent::Text(value.into_owned()))
                .map_err(|error| error.to_string()),
            Ok(Event::CData(data)) => decoder
                .decode(&data)
                .map(|value| XmlEvent::Text(value.into_owned()))
                .map_err(|error| error.to_string()),
            Ok(Event::Eof) => Ok(XmlEvent::Eof),
            Ok(_) => Ok(XmlEvent::Other),
            Err(error) => Err(error.to_string()),
        };
        event.map_err(|message| self.malformed(&message))
    }

    fn malformed(&self, message: &str) -> MigrationError {
        MigrationError::MalformedInput {
            path: self.path.clone(),
            position: self.reader.buffer_position() as u64,
            message: message.to_string(),
        }
    }
}

impl<R: BufRead> Iterator for DumpReader<R> {
    type Item = Result<ImportedPage, MigrationError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_page().transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{Contributor, DumpReader};
    use crate::error::MigrationError;
    use crate::model::format_timestamp;

    const DUMP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<mediawiki xmlns="http://www.mediawiki.org/xml/export-0.10/" version="0.10" xml:lang="en">
  <siteinfo>
    <sitename>Wikipedia</sitename>
    <namespaces>
      <namespace key="0" case="first-letter" />
      <namespace key="1" case="first-letter">Talk</namespace>
      <namespace key="4" case="first-letter">Wikipedia</namespace>
    </namespaces>
  </siteinfo>
  <page>
    <title>Talk:Alpha</title>
    <ns>1</ns>
    <id>7</id>
    <revision>
      <id>70</id>
      <timestamp>2008-02-01T10:00:00Z</timestamp>
      <contributor><username>Test User</username><id>3</id></contributor>
      <comment>second &amp; last</comment>
      <minor />
      <text xml:space="preserve">Body with &lt;b&gt; and <![CDATA[raw <cdata>]]></text>
    </revision>
    <revision>
      <timestamp>2008-01-01T10:00:00Z</timestamp>
      <contributor><ip>127.0.0.1</ip></contributor>
      <text xml:space="preserve" deleted="deleted" />
    </revision>
  </page>
  <page>
    <title>Who am i?</title>
    <revision>
      <timestamp>2008-03-01T10:00:00Z</timestamp>
      <contributor deleted="deleted" />
      <text>  leading space kept</text>
    </revision>
  </page>
</mediawiki>
"#;

    #[test]
    fn reads_site_info_and_pages_in_order() {
        let mut reader = DumpReader::new(DUMP.as_bytes(), Path::new("dump.xml"));
        let site = reader.site_info().expect("site info").clone();
        assert_eq!(site.site_name.as_deref(), Some("Wikipedia"));
        assert_eq!(
            site.namespaces,
            vec![
                (0, String::new()),
                (1, "Talk".to_string()),
                (4, "Wikipedia".to_string())
            ]
        );

        let pages = reader.collect::<Result<Vec<_>, _>>().expect("pages");
        assert_eq!(pages.len(), 2);

        let first = &pages[0];
        assert_eq!(first.title, "Talk:Alpha");
        assert_eq!(first.namespace_key, Some(1));
        assert_eq!(first.revisions.len(), 2);
        let newest = &first.revisions[0];
        assert_eq!(format_timestamp(&newest.timestamp), "2008-02-01T10:00:00Z");
        assert_eq!(newest.contributor, Contributor::Username("Test User".to_string()));
        assert_eq!(newest.comment.as_deref(), Some("second & last"));
        assert!(newest.minor);
        assert_eq!(newest.text, "Body with <b> and raw <cdata>");
        let oldest = &first.revisions[1];
        assert_eq!(oldest.contributor, Contributor::Ip("127.0.0.1".to_string()));
        assert_eq!(oldest.comment, None);
        assert!(!oldest.minor);
        assert_eq!(oldest.text, "");

        let second = &pages[1];
        assert_eq!(second.title, "Who am i?");
        assert_eq!(second.namespace_key, None);
        assert_eq!(second.revisions[0].contributor, Contributor::Unknown);
        assert_eq!(second.revisions[0].text, "  leading space kept");
    }

    #[test]
    fn pages_are_available_without_reading_site_info_first() {
        let reader = DumpReader::new(DUMP.as_bytes(), Path::new("dump.xml"));
        assert_eq!(reader.count(), 2);
    }

    #[test]
    fn truncated_dump_is_malformed_and_stops_iteration() {
        let truncated = &DUMP[..DUMP.find("<page>\n    <title>Who").expect("second page") + 20];
        let mut reader = DumpReader::new(truncated.as_bytes(), Path::new("cut.xml"));
        assert!(reader.next_page().expect("first page").is_some());
        let error = reader.next_page().expect_err("must fail");
        assert!(matches!(error, MigrationError::MalformedInput { .. }));
        assert!(error.to_string().contains("cut.xml"));
        assert!(reader.next_page().expect("finished").is_none());
    }

    #[test]
    fn revision_without_timestamp_is_rejected() {
        let dump = r#"<mediawiki><page><title>A</title><revision><text>x</text></revision></page></mediawiki>"#;
        let mut reader = DumpReader::new(dump.as_bytes(), Path::new("bad.xml"));
        let error = reader.next_page().expect_err("must fail");
        assert!(error.to_string().contains("without a <timestamp>"));
    }

    #[test]
    fn foreign_root_is_rejected() {
        let mut reader = DumpReader::new("<html><body/></html>".as_bytes(), Path::new("page.html"));
        let error = reader.next_page().expect_err("must fail");
        assert!(error.to_string().contains("expected <mediawiki> root"));
    }

    #[test]
    fn page_without_revisions_is_still_returned() {
        let dump = "<mediawiki><page><title>Empty</title></page></mediawiki>";
        let mut reader = DumpReader::new(dump.as_bytes(), Path::new("empty.xml"));
        let page = reader.next_page().expect("page").expect("some page");
        assert!(page.revisions.is_empty());
        assert!(reader.next_page().expect("end").is_none());
    }

    #[test]
    fn declared_latin1_encoding_is_decoded() {
        let bytes = include_bytes!("../fixtures/latin1_dump.xml");
        assert!(std::str::from_utf8(bytes).is_err());

        let mut reader = DumpReader::new(&bytes[..], Path::new("latin1.xml"));
        let site = reader.site_info().expect("site info").clone();
        assert_eq!(site.site_name.as_deref(), Some("Wiki Français"));

        let page = reader.next_page().expect("page").expect("some page");
        assert_eq!(page.title, "Café");
        let revision = &page.revisions[0];
        assert_eq!(revision.contributor, Contributor::Username("Renée".to_string()));
        assert_eq!(revision.comment.as_deref(), Some("première version"));
        assert!(revision.text.contains("| name = naïve"));
    }
}
