use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::model::format_timestamp;
use crate::xml_reader::{Contributor, SiteInfo};

pub const EXPORT_SCHEMA_NAMESPACE: &str = "http://www.mediawiki.org/xml/export-0.10/";
pub const EXPORT_SCHEMA_VERSION: &str = "0.10";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRevision {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub contributor: Contributor,
    /// Local user id, written only next to a username.
    pub contributor_id: Option<i64>,
    pub comment: Option<String>,
    pub minor: bool,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPage {
    /// Title in foreign-prefix form.
    pub title: String,
    pub namespace_key: i32,
    pub page_id: i64,
    /// Oldest first.
    pub revisions: Vec<ExportRevision>,
}

/// Streams a MediaWiki export document, one page at a time.
pub struct DumpWriter<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> DumpWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: Writer::new_with_indent(inner, b' ', 2),
        }
    }

    /// Write the XML declaration, the root start tag and the site header.
    pub fn begin(&mut self, site: &SiteInfo, language: &str) -> Result<()> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .context("failed to write XML declaration")?;

        let root = BytesStart::new("mediawiki").with_attributes([
            ("xmlns", EXPORT_SCHEMA_NAMESPACE),
            ("version", EXPORT_SCHEMA_VERSION),
            ("xml:lang", language),
        ]);
        self.writer
            .write_event(Event::Start(root))
            .context("failed to open <mediawiki>")?;

        self.start("siteinfo")?;
        if let Some(site_name) = &site.site_name {
            self.text_element("sitename", site_name)?;
        }
        self.start("namespaces")?;
        for (key, name) in &site.namespaces {
            let key = key.to_string();
            let element = self
                .writer
                .create_element("namespace")
                .with_attribute(("key", key.as_str()))
                .with_attribute(("case", "first-letter"));
            if name.is_empty() {
                element.write_empty()
            } else {
                element.write_text_content(BytesText::new(name))
            }
            .with_context(|| format!("failed to write namespace {key}"))?;
        }
        self.end("namespaces")?;
        self.end("siteinfo")
    }

    pub fn write_page(&mut self, page: &ExportPage) -> Result<()> {
        self.start("page")?;
        self.text_element("title", &page.title)?;
        self.text_element("ns", &page.namespace_key.to_string())?;
        self.text_element("id", &page.page_id.to_string())?;
        for revision in &page.revisions {
            self.write_revision(revision)
                .with_context(|| format!("failed to write revision {} of {}", revision.id, page.title))?;
        }
        self.end("page")
    }

    /// Close the root element and hand back the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.end("mediawiki")?;
        let mut inner = self.writer.into_inner();
        inner.flush().context("failed to flush export")?;
        Ok(inner)
    }

    fn write_revision(&mut self, revision: &ExportRevision) -> Result<()> {
        self.start("revision")?;
        self.text_element("id", &revision.id.to_string())?;
        if let Some(parent_id) = revision.parent_id {
            self.text_element("parentid", &parent_id.to_string())?;
        }
        self.text_element("timestamp", &format_timestamp(&revision.timestamp))?;

        match &revision.contributor {
            Contributor::Username(login) => {
                self.start("contributor")?;
                self.text_element("username", login)?;
                if let Some(user_id) = revision.contributor_id {
                    self.text_element("id", &user_id.to_string())?;
                }
                self.end("contributor")?;
            }
            Contributor::Ip(address) => {
                self.start("contributor")?;
                self.text_element("ip", address)?;
                self.end("contributor")?;
            }
            Contributor::Unknown => {
                self.writer
                    .create_element("contributor")
                    .with_attribute(("deleted", "deleted"))
                    .write_empty()
                    .context("failed to write <contributor>")?;
            }
        }

        if let Some(comment) = &revision.comment {
            self.text_element("comment", comment)?;
        }
        if revision.minor {
            self.writer
                .create_element("minor")
                .write_empty()
                .context("failed to write <minor>")?;
        }
        self.writer
            .create_element("text")
            .with_attribute(("xml:space", "preserve"))
            .write_text_content(BytesText::new(&revision.text))
            .context("failed to write <text>")?;
        self.end("revision")
    }

    fn text_element(&mut self, name: &str, value: &str) -> Result<()> {
        self.writer
            .create_element(name)
            .write_text_content(BytesText::new(value))
            .with_context(|| format!("failed to write <{name}>"))?;
        Ok(())
    }

    fn start(&mut self, name: &str) -> Result<()> {
        self.writer
            .write_event(Event::Start(BytesStart::new(name)))
            .with_context(|| format!("failed to open <{name}>"))
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .with_context(|| format!("failed to close <{name}>"))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use chrono::{TimeZone, Utc};

    use super::{DumpWriter, ExportPage, ExportRevision};
    use crate::xml_reader::{Contributor, DumpReader, SiteInfo};

    fn site() -> SiteInfo {
        SiteInfo {
            site_name: Some("Example".to_string()),
            namespaces: vec![(0, String::new()), (1, "Talk".to_string())],
        }
    }

    fn page() -> ExportPage {
        ExportPage {
            title: "Talk:Ünïcode & <Friends>".to_string(),
            namespace_key: 1,
            page_id: 9,
            revisions: vec![
                ExportRevision {
                    id: 11,
                    parent_id: None,
                    timestamp: Utc.with_ymd_and_hms(2008, 1, 1, 0, 0, 0).unwrap(),
                    contributor: Contributor::Ip("10.0.0.1".to_string()),
                    contributor_id: None,
                    comment: Some("first".to_string()),
                    minor: false,
                    text: "  indented\n<b>bold</b> & 漢字".to_string(),
                },
                ExportRevision {
                    id: 12,
                    parent_id: Some(11),
                    timestamp: Utc.with_ymd_and_hms(2008, 1, 2, 0, 0, 0).unwrap(),
                    contributor: Contributor::Username("Test User".to_string()),
                    contributor_id: Some(3),
                    comment: None,
                    minor: true,
                    text: String::new(),
                },
            ],
        }
    }

    #[test]
    fn writes_a_document_the_reader_accepts() {
        let mut writer = DumpWriter::new(Vec::new());
        writer.begin(&site(), "en").expect("begin");
        writer.write_page(&page()).expect("page");
        let bytes = writer.finish().expect("finish");
        let xml = String::from_utf8(bytes).expect("utf-8 output");

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("xmlns=\"http://www.mediawiki.org/xml/export-0.10/\""));
        assert!(xml.contains("<parentid>11</parentid>"));
        assert!(xml.contains("<minor/>"));
        assert!(xml.contains("<username>Test User</username>"));
        assert!(xml.contains("<id>3</id>"));
        assert!(xml.contains("<namespace key=\"0\" case=\"first-letter\"/>"));

        let mut reader = DumpReader::new(xml.as_bytes(), Path::new("written.xml"));
        assert_eq!(reader.site_info().expect("site").namespaces, site().namespaces);
        let pages = reader.collect::<Result<Vec<_>, _>>().expect("pages");
        assert_eq!(pages.len(), 1);
        let read = &pages[0];
        assert_eq!(read.title, "Talk:Ünïcode & <Friends>");
        assert_eq!(read.namespace_key, Some(1));
        assert_eq!(read.revisions[0].text, "  indented\n<b>bold</b> & 漢字");
        assert_eq!(read.revisions[0].comment.as_deref(), Some("first"));
        assert_eq!(read.revisions[1].contributor, Contributor::Username("Test User".to_string()));
        assert!(read.revisions[1].minor);
        assert_eq!(read.revisions[1].text, "");
    }

    #[test]
    fn unknown_contributor_is_marked_deleted() {
        let mut export = page();
        export.revisions.truncate(1);
        export.revisions[0].contributor = Contributor::Unknown;
        let mut writer = DumpWriter::new(Vec::new());
        writer.begin(&site(), "en").expect("begin");
        writer.write_page(&export).expect("page");
        let xml = String::from_utf8(writer.finish().expect("finish")).expect("utf-8");
        assert!(xml.contains("<contributor deleted=\"deleted\"/>"));
    }
}
