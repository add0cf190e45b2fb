use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{BufRead, BufWriter};
use std::net::IpAddr;
use std::path::Path;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::error::{ExportStage, ImportStage, MigrationError};
use crate::model::{
    Author, NewTopicVersion, Pagination, PreviousVersion, Topic, TopicVersion, WikiUser,
};
use crate::namespace::{CATEGORY_NAMESPACE_ID, Direction, NamespaceTranslator};
use crate::repository::TopicRepository;
use crate::sequence::{ExistingHistory, sequence};
use crate::wikitext::extract_page_links;
use crate::xml_reader::{Contributor, DumpReader, Revision, SiteInfo};
use crate::xml_writer::{DumpWriter, ExportPage, ExportRevision};

#[derive(Debug, Clone)]
pub struct MigratorSettings {
    /// Append a version marking the import after each imported page.
    pub record_import_version: bool,
    /// Foreign prefixes added on top of the repository's aliases, as `(namespace_id, alias)`.
    pub extra_aliases: Vec<(i32, String)>,
    /// `<sitename>` written into exports.
    pub site_name: Option<String>,
    /// `xml:lang` written into exports.
    pub export_language: String,
}

impl Default for MigratorSettings {
    fn default() -> Self {
        Self {
            record_import_version: false,
            extra_aliases: Vec::new(),
            site_name: None,
            export_language: "en".to_string(),
        }
    }
}

/// Who is importing and how anonymous revisions are attributed.
#[derive(Debug, Clone)]
pub struct ImportIdentity<'a> {
    pub importing_user: Option<&'a WikiUser>,
    pub author_fallback: &'a str,
    pub locale: &'a str,
}

/// Drives imports and exports against one repository.
pub struct Migrator<'r, R: TopicRepository> {
    repository: &'r mut R,
    settings: MigratorSettings,
}

impl<'r, R: TopicRepository> Migrator<'r, R> {
    pub fn new(repository: &'r mut R, settings: MigratorSettings) -> Self {
        Self {
            repository,
            settings,
        }
    }

    /// Import every page of a MediaWiki export, returning the topic names in file order.
    ///
    /// Each page is committed on its own; when page `n` fails, pages before it stay stored
    /// and the error lists them.
    pub fn import_from_file(
        &mut self,
        path: &Path,
        virtual_wiki: &str,
        identity: &ImportIdentity<'_>,
    ) -> Result<Vec<String>, MigrationError> {
        info!(path = %path.display(), virtual_wiki, "starting import");
        let mut translator = self.translator(virtual_wiki)?;
        let mut reader = DumpReader::open(path)?;
        let site = reader.site_info()?;
        translator.adopt_site_namespaces(&site.namespaces);
        let category_prefix = translator
            .namespace(CATEGORY_NAMESPACE_ID)
            .map(|namespace| namespace.name.clone())
            .unwrap_or_default();

        let mut committed = Vec::new();
        let mut page_number = 0usize;
        loop {
            page_number += 1;
            let mut stage = ImportStage::Parsing;
            let mut title = None;
            let outcome = self.import_next_page(
                &mut reader,
                &translator,
                virtual_wiki,
                identity,
                &category_prefix,
                &mut stage,
                &mut title,
            );
            match outcome {
                Ok(Some(topic_name)) => committed.push(topic_name),
                Ok(None) => break,
                Err(source) => {
                    warn!(
                        path = %path.display(),
                        page_number,
                        %stage,
                        committed = committed.len(),
                        error = %source,
                        "import aborted"
                    );
                    return Err(MigrationError::ImportAborted {
                        path: path.to_path_buf(),
                        page_number,
                        title,
                        stage,
                        committed,
                        source: Box::new(source),
                    });
                }
            }
        }

        info!(path = %path.display(), topics = committed.len(), "import finished");
        Ok(committed)
    }

    /// Write the named topics to `path` as a MediaWiki export.
    ///
    /// All names are resolved before anything is written. The document is built in a
    /// temporary file next to `path` and renamed into place only once complete.
    pub fn export_to_file(
        &self,
        path: &Path,
        virtual_wiki: &str,
        topic_names: &[String],
        exclude_history: bool,
    ) -> Result<(), MigrationError> {
        info!(path = %path.display(), virtual_wiki, topics = topic_names.len(), exclude_history, "starting export");
        let mut stage = ExportStage::Resolving;
        match self.export_topics(path, virtual_wiki, topic_names, exclude_history, &mut stage) {
            Ok(count) => {
                info!(path = %path.display(), topics = count, "export finished");
                Ok(())
            }
            Err(source) => {
                warn!(path = %path.display(), %stage, error = %source, "export aborted, no output written");
                Err(MigrationError::ExportAborted {
                    path: path.to_path_buf(),
                    stage,
                    source: Box::new(source),
                })
            }
        }
    }

    fn translator(&self, virtual_wiki: &str) -> Result<NamespaceTranslator, MigrationError> {
        let namespaces = self
            .repository
            .lookup_namespaces(virtual_wiki)
            .map_err(|source| {
                MigrationError::repository(format!("namespaces of {virtual_wiki}"), source)
            })?;
        let mut translator = NamespaceTranslator::new(namespaces)?;
        for (namespace_id, alias) in &self.settings.extra_aliases {
            translator.add_alias(*namespace_id, alias)?;
        }
        Ok(translator)
    }

    #[allow(clippy::too_many_arguments)]
    fn import_next_page<B: BufRead>(
        &mut self,
        reader: &mut DumpReader<B>,
        translator: &NamespaceTranslator,
        virtual_wiki: &str,
        identity: &ImportIdentity<'_>,
        category_prefix: &str,
        stage: &mut ImportStage,
        title: &mut Option<String>,
    ) -> Result<Option<String>, MigrationError> {
        let Some(page) = reader.next_page()? else {
            return Ok(None);
        };
        *title = Some(page.title.clone());

        *stage = ImportStage::Translating;
        let (namespace, page_name) =
            translator.translate_title_with_hint(&page.title, page.namespace_key);
        let topic_name = namespace.qualify(&page_name);
        debug!(title = %page.title, topic = %topic_name, revisions = page.revisions.len(), "importing page");

        let mut known_users = HashMap::new();
        let mut revisions = page.revisions;
        let mut authors = Vec::with_capacity(revisions.len());
        for revision in &mut revisions {
            revision.text = translator.rewrite_links(&revision.text, Direction::Import);
            authors.push(self.resolve_author(
                &revision.contributor,
                identity.author_fallback,
                &mut known_users,
            )?);
        }

        *stage = ImportStage::Sequencing;
        if revisions.is_empty() {
            return Err(MigrationError::EmptyPage { title: page.title });
        }
        let existing = self
            .repository
            .lookup_topic(virtual_wiki, &topic_name, false)
            .map_err(|source| MigrationError::repository(format!("topic {topic_name}"), source))?;
        let history = match &existing {
            Some(topic) => self.existing_history(topic)?,
            None => None,
        };
        // The sequencer sorts stably by timestamp, so the same ordering finds each author.
        let order = sort_order(&revisions);
        let sequenced = sequence(&topic_name, revisions, history.as_ref())?;

        let mut versions: Vec<NewTopicVersion> = sequenced
            .into_iter()
            .zip(order)
            .map(|(entry, original_index)| NewTopicVersion {
                author: authors[original_index].clone(),
                edited_at: entry.revision.timestamp,
                content: entry.revision.text,
                comment: entry.revision.comment,
                minor: entry.revision.minor,
                previous: entry.previous,
            })
            .collect();

        if self.settings.record_import_version {
            if let Some(marker) = import_marker(&versions, identity) {
                versions.push(marker);
            }
        }

        *stage = ImportStage::Persisting;
        let current_content = versions
            .last()
            .map(|version| version.content.as_str())
            .unwrap_or_default();
        let page_links = extract_page_links(current_content, category_prefix);
        let topic = existing.unwrap_or_else(|| Topic::new(virtual_wiki, namespace, &page_name));
        let stored = self
            .repository
            .write_topic(&topic, &versions, &page_links.categories, &page_links.links)
            .map_err(|source| MigrationError::Persistence {
                topic: topic_name.clone(),
                source,
            })?;

        debug!(topic = %stored.name, versions = versions.len(), "page committed");
        Ok(Some(stored.name))
    }

    fn existing_history(&self, topic: &Topic) -> Result<Option<ExistingHistory>, MigrationError> {
        let Some(current_version_id) = topic.current_version_id else {
            return Ok(None);
        };
        let first = |descending: bool| -> Result<Option<TopicVersion>, MigrationError> {
            let versions = self
                .repository
                .get_topic_history(topic, Pagination::new(1, 0), descending)
                .map_err(|source| {
                    MigrationError::repository(format!("history of {}", topic.name), source)
                })?;
            Ok(versions.into_iter().next())
        };
        let (Some(earliest), Some(latest)) = (first(false)?, first(true)?) else {
            return Ok(None);
        };
        Ok(Some(ExistingHistory {
            current_version_id,
            earliest: earliest.edited_at,
            latest: latest.edited_at,
        }))
    }

    fn resolve_author(
        &self,
        contributor: &Contributor,
        fallback: &str,
        known_users: &mut HashMap<String, Option<WikiUser>>,
    ) -> Result<Author, MigrationError> {
        let author = match contributor {
            Contributor::Username(login) => {
                if !known_users.contains_key(login) {
                    let user = self.repository.lookup_user(login).map_err(|source| {
                        MigrationError::repository(format!("user {login}"), source)
                    })?;
                    known_users.insert(login.clone(), user);
                }
                match known_users.get(login).cloned().flatten() {
                    Some(user) => Author::Resolved(user),
                    None => Author::Display(login.clone()),
                }
            }
            Contributor::Ip(address) => Author::Display(address.clone()),
            Contributor::Unknown => Author::Display(fallback.to_string()),
        };
        Ok(author)
    }

    fn export_topics(
        &self,
        path: &Path,
        virtual_wiki: &str,
        topic_names: &[String],
        exclude_history: bool,
        stage: &mut ExportStage,
    ) -> Result<usize, MigrationError> {
        let translator = self.translator(virtual_wiki)?;

        let mut seen = BTreeSet::new();
        let mut topics = Vec::new();
        let mut missing = Vec::new();
        for name in topic_names {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let topic = self
                .repository
                .lookup_topic(virtual_wiki, name, false)
                .map_err(|source| MigrationError::repository(format!("topic {name}"), source))?;
            match topic {
                Some(topic) => topics.push(topic),
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(MigrationError::UnresolvedTopics {
                virtual_wiki: virtual_wiki.to_string(),
                names: missing,
            });
        }

        *stage = ExportStage::Writing;
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let io_error = |source| MigrationError::Io {
            path: path.to_path_buf(),
            source,
        };
        let write_error = |source| MigrationError::Write {
            path: path.to_path_buf(),
            source,
        };
        fs::create_dir_all(parent).map_err(io_error)?;
        let mut staging = tempfile::Builder::new()
            .prefix(".wikimigrate-export-")
            .suffix(".xml")
            .tempfile_in(parent)
            .map_err(io_error)?;

        {
            let mut writer = DumpWriter::new(BufWriter::new(staging.as_file_mut()));
            let site = SiteInfo {
                site_name: self.settings.site_name.clone(),
                namespaces: translator
                    .namespaces()
                    .iter()
                    .map(|namespace| {
                        let name = if namespace.is_main() {
                            String::new()
                        } else {
                            namespace.primary_alias().to_string()
                        };
                        (namespace.id, name)
                    })
                    .collect(),
            };
            writer
                .begin(&site, &self.settings.export_language)
                .map_err(write_error)?;
            for topic in &topics {
                let page = self.export_page(&translator, topic, exclude_history)?;
                writer.write_page(&page).map_err(write_error)?;
                debug!(topic = %topic.name, revisions = page.revisions.len(), "exported topic");
            }
            writer.finish().map_err(write_error)?;
        }

        *stage = ExportStage::Finalizing;
        staging.as_file().sync_all().map_err(io_error)?;
        staging
            .persist(path)
            .map_err(|persist_error| io_error(persist_error.error))?;
        Ok(topics.len())
    }

    fn export_page(
        &self,
        translator: &NamespaceTranslator,
        topic: &Topic,
        exclude_history: bool,
    ) -> Result<ExportPage, MigrationError> {
        let versions = if exclude_history {
            match topic.current_version_id {
                Some(version_id) => self
                    .repository
                    .lookup_topic_version(version_id)
                    .map_err(|source| {
                        MigrationError::repository(format!("version {version_id}"), source)
                    })?
                    .into_iter()
                    .collect(),
                None => Vec::new(),
            }
        } else {
            self.repository
                .get_topic_history(topic, Pagination::unbounded(), false)
                .map_err(|source| {
                    MigrationError::repository(format!("history of {}", topic.name), source)
                })?
        };

        let revisions = versions
            .into_iter()
            .map(|version| {
                let (contributor, contributor_id) = export_contributor(&version.author);
                ExportRevision {
                    id: version.id,
                    parent_id: version.previous_version_id,
                    timestamp: version.edited_at,
                    contributor,
                    contributor_id,
                    comment: version.comment,
                    minor: version.minor,
                    text: translator.rewrite_links(&version.content, Direction::Export),
                }
            })
            .collect();

        Ok(ExportPage {
            title: translator.export_title(topic.namespace_id, &topic.page_name),
            namespace_key: topic.namespace_id,
            page_id: topic.id.unwrap_or_default(),
            revisions,
        })
    }
}

/// Import `path` into `repository` with default settings.
pub fn import_from_file<R: TopicRepository>(
    repository: &mut R,
    path: &Path,
    virtual_wiki: &str,
    importing_user: Option<&WikiUser>,
    author_fallback: &str,
    locale: &str,
) -> Result<Vec<String>, MigrationError> {
    let identity = ImportIdentity {
        importing_user,
        author_fallback,
        locale,
    };
    Migrator::new(repository, MigratorSettings::default()).import_from_file(
        path,
        virtual_wiki,
        &identity,
    )
}

/// Export topics from `repository` to `path` with default settings.
pub fn export_to_file<R: TopicRepository>(
    repository: &mut R,
    path: &Path,
    virtual_wiki: &str,
    topic_names: &[String],
    exclude_history: bool,
) -> Result<(), MigrationError> {
    Migrator::new(repository, MigratorSettings::default()).export_to_file(
        path,
        virtual_wiki,
        topic_names,
        exclude_history,
    )
}

/// Edit comment of the version recorded after an import.
pub fn import_comment(locale: &str) -> &'static str {
    let language = locale
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match language.as_str() {
        "de" => "Importiert",
        "es" => "Importado",
        "fr" => "Importé",
        _ => "Imported",
    }
}

/// Position each revision held before the stable sort by timestamp.
fn sort_order(revisions: &[Revision]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..revisions.len()).collect();
    order.sort_by_key(|index| revisions[*index].timestamp);
    order
}

fn import_marker(
    versions: &[NewTopicVersion],
    identity: &ImportIdentity<'_>,
) -> Option<NewTopicVersion> {
    let last = versions.last()?;
    let edited_at = Utc::now().max(last.edited_at + Duration::seconds(1));
    let author = match identity.importing_user {
        Some(user) => Author::Resolved(user.clone()),
        None => Author::Display(identity.author_fallback.to_string()),
    };
    Some(NewTopicVersion {
        author,
        edited_at,
        content: last.content.clone(),
        comment: Some(import_comment(identity.locale).to_string()),
        minor: false,
        previous: PreviousVersion::Pending(versions.len() - 1),
    })
}

fn export_contributor(author: &Author) -> (Contributor, Option<i64>) {
    match author {
        Author::Resolved(user) => (Contributor::Username(user.login.clone()), Some(user.id)),
        Author::Display(text) if text.trim().is_empty() => (Contributor::Unknown, None),
        Author::Display(text) if text.trim().parse::<IpAddr>().is_ok() => {
            (Contributor::Ip(text.trim().to_string()), None)
        }
        Author::Display(text) => (Contributor::Username(text.clone()), None),
    }
}
