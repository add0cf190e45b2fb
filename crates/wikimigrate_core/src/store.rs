use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::Serialize;
use tracing::debug;

use crate::model::{
    Author, Namespace, NewTopicVersion, Pagination, PreviousVersion, Topic, TopicVersion,
    WikiUser, format_timestamp, parse_timestamp,
};
use crate::namespace::AliasOutcome;
use crate::repository::TopicRepository;
use crate::schema::{ensure_db_parent, migrate_connection, open_connection};

const TOPIC_COLUMNS: &str = "topic_id, virtual_wiki, namespace_id, page_name, topic_name, content, current_version_id, deleted_at";

const VERSION_SELECT: &str = "SELECT v.topic_version_id, v.topic_id, v.author_user_id, u.login, v.author_display,
        v.edited_at, v.content, v.edit_comment, v.minor, v.previous_topic_version_id
     FROM topic_versions v
     LEFT JOIN wiki_users u ON u.user_id = v.author_user_id";

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub namespaces: usize,
    pub namespace_aliases: usize,
    pub users: usize,
    pub live_topics: usize,
    pub deleted_topics: usize,
    pub topic_versions: usize,
}

/// SQLite-backed topic store.
pub struct SqliteTopicStore {
    connection: Connection,
    db_path: PathBuf,
}

struct VersionRow {
    id: i64,
    topic_id: i64,
    user_id: Option<i64>,
    login: Option<String>,
    author_display: String,
    edited_at: String,
    content: String,
    comment: Option<String>,
    minor: bool,
    previous_version_id: Option<i64>,
}

impl VersionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            topic_id: row.get(1)?,
            user_id: row.get(2)?,
            login: row.get(3)?,
            author_display: row.get(4)?,
            edited_at: row.get(5)?,
            content: row.get(6)?,
            comment: row.get(7)?,
            minor: row.get(8)?,
            previous_version_id: row.get(9)?,
        })
    }

    fn into_version(self) -> Result<TopicVersion> {
        let edited_at = parse_timestamp(&self.edited_at).with_context(|| {
            format!(
                "topic version {} has an invalid timestamp {:?}",
                self.id, self.edited_at
            )
        })?;
        let author = match (self.user_id, self.login) {
            (Some(id), Some(login)) => Author::Resolved(WikiUser { id, login }),
            _ => Author::Display(self.author_display),
        };
        Ok(TopicVersion {
            id: self.id,
            topic_id: self.topic_id,
            author,
            edited_at,
            content: self.content,
            comment: self.comment,
            minor: self.minor,
            previous_version_id: self.previous_version_id,
        })
    }
}

impl SqliteTopicStore {
    /// Open the store at `db_path`, creating it and applying pending migrations.
    pub fn open(db_path: &Path) -> Result<Self> {
        ensure_db_parent(db_path)?;
        let connection = open_connection(db_path)?;
        migrate_connection(&connection)
            .with_context(|| format!("failed to migrate {}", db_path.display()))?;
        Ok(Self {
            connection,
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Create the user if it does not exist yet.
    pub fn register_user(&self, login: &str) -> Result<WikiUser> {
        let login = login.trim();
        if login.is_empty() {
            bail!("user login must not be empty");
        }
        self.connection
            .execute(
                "INSERT OR IGNORE INTO wiki_users (login, created_at) VALUES (?1, ?2)",
                params![login, format_timestamp(&Utc::now())],
            )
            .with_context(|| format!("failed to register user {login}"))?;
        self.lookup_user(login)?
            .with_context(|| format!("user {login} missing after insert"))
    }

    /// Map an additional foreign prefix onto a namespace for one virtual wiki
    /// (or for all of them when `virtual_wiki` is empty).
    pub fn add_namespace_alias(
        &self,
        virtual_wiki: &str,
        namespace_id: i32,
        alias: &str,
    ) -> Result<AliasOutcome> {
        // `_` and space are the same character in a prefix; store the space form.
        let alias = alias.trim().replace('_', " ");
        let alias = alias.as_str();
        if alias.is_empty() || alias.contains(':') {
            bail!("invalid namespace alias {alias:?}");
        }

        let canonical_clash: Option<i32> = self
            .connection
            .query_row(
                "SELECT namespace_id FROM namespaces WHERE namespace_name = ?1 COLLATE NOCASE",
                params![alias],
                |row| row.get(0),
            )
            .optional()
            .context("failed to check namespace names")?;
        if let Some(owner) = canonical_clash {
            bail!("alias {alias} equals the name of namespace {owner}");
        }

        let existing: Option<i32> = self
            .connection
            .query_row(
                "SELECT namespace_id FROM namespace_aliases
                 WHERE alias = ?1 COLLATE NOCASE AND (virtual_wiki = '' OR virtual_wiki = ?2 OR ?2 = '')
                 LIMIT 1",
                params![alias, virtual_wiki],
                |row| row.get(0),
            )
            .optional()
            .context("failed to check namespace aliases")?;
        match existing {
            Some(owner) if owner == namespace_id => return Ok(AliasOutcome::AlreadyKnown),
            Some(owner) => bail!("alias {alias} already maps to namespace {owner}"),
            None => {}
        }

        self.connection
            .execute(
                "INSERT INTO namespace_aliases (virtual_wiki, namespace_id, alias, position)
                 SELECT ?1, ?2, ?3, COALESCE(MAX(position) + 1, 0)
                 FROM namespace_aliases WHERE namespace_id = ?2",
                params![virtual_wiki, namespace_id, alias],
            )
            .with_context(|| format!("failed to add alias {alias} to namespace {namespace_id}"))?;
        Ok(AliasOutcome::Added)
    }

    /// Mark the live topic deleted. Returns false when there is none.
    pub fn delete_topic(&self, virtual_wiki: &str, name: &str) -> Result<bool> {
        let changed = self
            .connection
            .execute(
                "UPDATE topics SET deleted_at = ?3
                 WHERE virtual_wiki = ?1 AND topic_name = ?2 AND deleted_at IS NULL",
                params![virtual_wiki, name, format_timestamp(&Utc::now())],
            )
            .with_context(|| format!("failed to delete topic {name}"))?;
        Ok(changed > 0)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<usize> {
            let value: i64 = self
                .connection
                .query_row(sql, [], |row| row.get(0))
                .with_context(|| format!("failed to run {sql}"))?;
            usize::try_from(value).context("row count does not fit into usize")
        };
        Ok(StoreStats {
            namespaces: count("SELECT COUNT(*) FROM namespaces")?,
            namespace_aliases: count("SELECT COUNT(*) FROM namespace_aliases")?,
            users: count("SELECT COUNT(*) FROM wiki_users")?,
            live_topics: count("SELECT COUNT(*) FROM topics WHERE deleted_at IS NULL")?,
            deleted_topics: count("SELECT COUNT(*) FROM topics WHERE deleted_at IS NOT NULL")?,
            topic_versions: count("SELECT COUNT(*) FROM topic_versions")?,
        })
    }
}

impl TopicRepository for SqliteTopicStore {
    fn lookup_topic(
        &self,
        virtual_wiki: &str,
        name: &str,
        include_deleted: bool,
    ) -> Result<Option<Topic>> {
        let sql = format!(
            "SELECT {TOPIC_COLUMNS} FROM topics
             WHERE virtual_wiki = ?1 AND topic_name = ?2 AND (deleted_at IS NULL OR ?3)
             ORDER BY deleted_at IS NULL DESC, topic_id DESC
             LIMIT 1"
        );
        self.connection
            .query_row(&sql, params![virtual_wiki, name, include_deleted], topic_from_row)
            .optional()
            .with_context(|| format!("failed to look up topic {name}"))
    }

    fn write_topic(
        &mut self,
        topic: &Topic,
        versions: &[NewTopicVersion],
        categories: &BTreeMap<String, String>,
        links: &[String],
    ) -> Result<Topic> {
        let Some(last) = versions.last() else {
            bail!("no versions supplied for topic {}", topic.name);
        };

        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start topic write transaction")?;

        let (topic_id, mut chain_tail) = match topic.id {
            Some(topic_id) => {
                let stored: Option<(Option<i64>, Option<String>)> = tx
                    .query_row(
                        "SELECT current_version_id, deleted_at FROM topics WHERE topic_id = ?1",
                        params![topic_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()
                    .with_context(|| format!("failed to load topic {}", topic.name))?;
                let Some((current_version_id, deleted_at)) = stored else {
                    bail!("topic {} (id {topic_id}) does not exist", topic.name);
                };
                if deleted_at.is_some() {
                    bail!("topic {} is deleted", topic.name);
                }
                if current_version_id != topic.current_version_id {
                    bail!(
                        "topic {} changed concurrently (expected current version {:?}, found {:?})",
                        topic.name,
                        topic.current_version_id,
                        current_version_id
                    );
                }
                (topic_id, current_version_id)
            }
            None => {
                let live: Option<i64> = tx
                    .query_row(
                        "SELECT topic_id FROM topics
                         WHERE virtual_wiki = ?1 AND namespace_id = ?2 AND page_name = ?3
                           AND deleted_at IS NULL",
                        params![topic.virtual_wiki, topic.namespace_id, topic.page_name],
                        |row| row.get(0),
                    )
                    .optional()
                    .with_context(|| format!("failed to check for topic {}", topic.name))?;
                if live.is_some() {
                    bail!("topic {} already exists", topic.name);
                }
                tx.execute(
                    "INSERT INTO topics (virtual_wiki, namespace_id, page_name, topic_name, content)
                     VALUES (?1, ?2, ?3, ?4, '')",
                    params![
                        topic.virtual_wiki,
                        topic.namespace_id,
                        topic.page_name,
                        topic.name
                    ],
                )
                .with_context(|| format!("failed to insert topic {}", topic.name))?;
                (tx.last_insert_rowid(), None)
            }
        };

        let mut inserted: Vec<i64> = Vec::with_capacity(versions.len());
        for (index, version) in versions.iter().enumerate() {
            let previous = match version.previous {
                PreviousVersion::None => None,
                PreviousVersion::Stored(id) => Some(id),
                PreviousVersion::Pending(earlier) => match inserted.get(earlier) {
                    Some(id) => Some(*id),
                    None => bail!(
                        "version {index} of {} refers to pending entry {earlier} that was not written before it",
                        topic.name
                    ),
                },
            };
            if previous != chain_tail {
                bail!(
                    "broken version chain for {}: entry {index} follows {:?}, expected {:?}",
                    topic.name,
                    previous,
                    chain_tail
                );
            }

            tx.execute(
                "INSERT INTO topic_versions (
                    topic_id, author_user_id, author_display, edited_at, content,
                    edit_comment, minor, previous_topic_version_id
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    topic_id,
                    version.author.user_id(),
                    version.author.display_name(),
                    format_timestamp(&version.edited_at),
                    version.content,
                    version.comment,
                    version.minor,
                    previous,
                ],
            )
            .with_context(|| format!("failed to insert version {index} of {}", topic.name))?;
            let version_id = tx.last_insert_rowid();
            inserted.push(version_id);
            chain_tail = Some(version_id);
        }

        tx.execute(
            "UPDATE topics SET content = ?2, current_version_id = ?3 WHERE topic_id = ?1",
            params![topic_id, last.content, chain_tail],
        )
        .with_context(|| format!("failed to update topic {}", topic.name))?;

        tx.execute(
            "DELETE FROM topic_categories WHERE topic_id = ?1",
            params![topic_id],
        )
        .context("failed to clear topic categories")?;
        for (category, sort_key) in categories {
            tx.execute(
                "INSERT INTO topic_categories (topic_id, category_name, sort_key) VALUES (?1, ?2, ?3)",
                params![topic_id, category, sort_key],
            )
            .with_context(|| format!("failed to record category {category}"))?;
        }

        tx.execute("DELETE FROM topic_links WHERE topic_id = ?1", params![topic_id])
            .context("failed to clear topic links")?;
        for link in links {
            tx.execute(
                "INSERT OR IGNORE INTO topic_links (topic_id, link_target) VALUES (?1, ?2)",
                params![topic_id, link],
            )
            .with_context(|| format!("failed to record link {link}"))?;
        }

        let sql = format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE topic_id = ?1");
        let stored = tx
            .query_row(&sql, params![topic_id], topic_from_row)
            .with_context(|| format!("failed to reload topic {}", topic.name))?;
        tx.commit()
            .with_context(|| format!("failed to commit topic {}", topic.name))?;

        debug!(
            topic = %stored.name,
            versions = inserted.len(),
            "stored topic versions"
        );
        Ok(stored)
    }

    fn get_topic_history(
        &self,
        topic: &Topic,
        pagination: Pagination,
        descending: bool,
    ) -> Result<Vec<TopicVersion>> {
        let Some(topic_id) = topic.id else {
            return Ok(Vec::new());
        };
        let direction = if descending { "DESC" } else { "ASC" };
        let sql = format!(
            "{VERSION_SELECT}
             WHERE v.topic_id = ?1
             ORDER BY v.edited_at {direction}, v.topic_version_id {direction}
             LIMIT ?2 OFFSET ?3"
        );
        let limit = i64::try_from(pagination.limit).unwrap_or(-1);
        let offset = i64::try_from(pagination.offset).context("history offset is too large")?;

        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare history query")?;
        let rows = statement
            .query_map(params![topic_id, limit, offset], VersionRow::from_row)
            .with_context(|| format!("failed to read history of {}", topic.name))?;

        let mut versions = Vec::new();
        for row in rows {
            let row = row.with_context(|| format!("failed to decode history of {}", topic.name))?;
            versions.push(row.into_version()?);
        }
        Ok(versions)
    }

    fn lookup_topic_version(&self, topic_version_id: i64) -> Result<Option<TopicVersion>> {
        let sql = format!("{VERSION_SELECT} WHERE v.topic_version_id = ?1");
        let row = self
            .connection
            .query_row(&sql, params![topic_version_id], VersionRow::from_row)
            .optional()
            .with_context(|| format!("failed to look up topic version {topic_version_id}"))?;
        row.map(VersionRow::into_version).transpose()
    }

    fn lookup_namespaces(&self, virtual_wiki: &str) -> Result<Vec<Namespace>> {
        let mut statement = self
            .connection
            .prepare("SELECT namespace_id, namespace_name FROM namespaces ORDER BY namespace_id")
            .context("failed to prepare namespace query")?;
        let mut namespaces = statement
            .query_map([], |row| {
                Ok(Namespace {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    aliases: Vec::new(),
                })
            })
            .context("failed to read namespaces")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to decode namespaces")?;

        let mut statement = self
            .connection
            .prepare(
                "SELECT namespace_id, alias FROM namespace_aliases
                 WHERE virtual_wiki = '' OR virtual_wiki = ?1
                 ORDER BY virtual_wiki <> '', position, alias_id",
            )
            .context("failed to prepare namespace alias query")?;
        let aliases = statement
            .query_map(params![virtual_wiki], |row| {
                Ok((row.get::<_, i32>(0)?, row.get::<_, String>(1)?))
            })
            .context("failed to read namespace aliases")?;
        for alias in aliases {
            let (namespace_id, alias) = alias.context("failed to decode namespace alias")?;
            if let Some(namespace) = namespaces.iter_mut().find(|ns| ns.id == namespace_id) {
                namespace.aliases.push(alias);
            }
        }
        Ok(namespaces)
    }

    fn lookup_user(&self, login: &str) -> Result<Option<WikiUser>> {
        self.connection
            .query_row(
                "SELECT user_id, login FROM wiki_users WHERE login = ?1",
                params![login],
                |row| {
                    Ok(WikiUser {
                        id: row.get(0)?,
                        login: row.get(1)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("failed to look up user {login}"))
    }
}

fn topic_from_row(row: &Row<'_>) -> rusqlite::Result<Topic> {
    Ok(Topic {
        id: Some(row.get(0)?),
        virtual_wiki: row.get(1)?,
        namespace_id: row.get(2)?,
        page_name: row.get(3)?,
        name: row.get(4)?,
        content: row.get(5)?,
        current_version_id: row.get(6)?,
        deleted_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::{TempDir, tempdir};

    use super::SqliteTopicStore;
    use crate::model::{Author, NewTopicVersion, Pagination, PreviousVersion, Topic};
    use crate::namespace::AliasOutcome;
    use crate::repository::TopicRepository;

    fn open_store() -> (TempDir, SqliteTopicStore) {
        let temp = tempdir().expect("tempdir");
        let store =
            SqliteTopicStore::open(&temp.path().join("data/wikimigrate.db")).expect("open store");
        (temp, store)
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2008, 1, day, 12, 0, 0).unwrap()
    }

    fn version(day: u32, content: &str, previous: PreviousVersion) -> NewTopicVersion {
        NewTopicVersion {
            author: Author::Display("127.0.0.1".to_string()),
            edited_at: at(day),
            content: content.to_string(),
            comment: Some(format!("edit {day}")),
            minor: false,
            previous,
        }
    }

    fn new_topic(store: &SqliteTopicStore, name: &str) -> Topic {
        let namespaces = store.lookup_namespaces("en").expect("namespaces");
        let main = namespaces.iter().find(|ns| ns.id == 0).expect("main namespace");
        Topic::new("en", main, name)
    }

    #[test]
    fn writes_new_topic_with_linked_history() {
        let (_temp, mut store) = open_store();
        let topic = new_topic(&store, "Alpha");
        let mut categories = BTreeMap::new();
        categories.insert("Category:Tests".to_string(), String::new());
        let stored = store
            .write_topic(
                &topic,
                &[
                    version(1, "one", PreviousVersion::None),
                    version(2, "two", PreviousVersion::Pending(0)),
                ],
                &categories,
                &["Beta".to_string()],
            )
            .expect("write topic");

        assert_eq!(stored.content, "two");
        let history = store
            .get_topic_history(&stored, Pagination::unbounded(), false)
            .expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].previous_version_id, None);
        assert_eq!(history[1].previous_version_id, Some(history[0].id));
        assert_eq!(stored.current_version_id, Some(history[1].id));
        assert_eq!(history[1].comment.as_deref(), Some("edit 2"));

        let newest_first = store
            .get_topic_history(&stored, Pagination::new(1, 0), true)
            .expect("paged history");
        assert_eq!(newest_first.len(), 1);
        assert_eq!(newest_first[0].content, "two");

        let looked_up = store
            .lookup_topic("en", "Alpha", false)
            .expect("lookup")
            .expect("topic exists");
        assert_eq!(looked_up, stored);
    }

    #[test]
    fn appends_to_existing_chain() {
        let (_temp, mut store) = open_store();
        let topic = new_topic(&store, "Alpha");
        let first = store
            .write_topic(&topic, &[version(1, "one", PreviousVersion::None)], &BTreeMap::new(), &[])
            .expect("first write");
        let current = first.current_version_id.expect("current version");
        let second = store
            .write_topic(
                &first,
                &[version(2, "two", PreviousVersion::Stored(current))],
                &BTreeMap::new(),
                &[],
            )
            .expect("second write");
        let latest = store
            .lookup_topic_version(second.current_version_id.expect("current"))
            .expect("lookup version")
            .expect("version exists");
        assert_eq!(latest.previous_version_id, Some(current));
        assert_eq!(second.content, "two");
    }

    #[test]
    fn rejects_broken_chain_without_writing() {
        let (_temp, mut store) = open_store();
        let topic = new_topic(&store, "Alpha");
        let error = store
            .write_topic(
                &topic,
                &[
                    version(1, "one", PreviousVersion::None),
                    version(2, "two", PreviousVersion::None),
                ],
                &BTreeMap::new(),
                &[],
            )
            .expect_err("broken chain");
        assert!(error.to_string().contains("broken version chain"));
        assert!(store.lookup_topic("en", "Alpha", true).expect("lookup").is_none());
        assert_eq!(store.stats().expect("stats").topic_versions, 0);
    }

    #[test]
    fn rejects_stale_topic_and_duplicate_live_topic() {
        let (_temp, mut store) = open_store();
        let topic = new_topic(&store, "Alpha");
        let stored = store
            .write_topic(&topic, &[version(1, "one", PreviousVersion::None)], &BTreeMap::new(), &[])
            .expect("write");

        let duplicate = store
            .write_topic(&topic, &[version(2, "dup", PreviousVersion::None)], &BTreeMap::new(), &[])
            .expect_err("duplicate");
        assert!(duplicate.to_string().contains("already exists"));

        let mut stale = stored.clone();
        stale.current_version_id = None;
        let error = store
            .write_topic(&stale, &[version(2, "two", PreviousVersion::None)], &BTreeMap::new(), &[])
            .expect_err("stale");
        assert!(error.to_string().contains("changed concurrently"));
    }

    #[test]
    fn deleted_topics_are_hidden_unless_requested() {
        let (_temp, mut store) = open_store();
        let topic = new_topic(&store, "Gone");
        store
            .write_topic(&topic, &[version(1, "x", PreviousVersion::None)], &BTreeMap::new(), &[])
            .expect("write");
        assert!(store.delete_topic("en", "Gone").expect("delete"));
        assert!(store.lookup_topic("en", "Gone", false).expect("lookup").is_none());
        let deleted = store
            .lookup_topic("en", "Gone", true)
            .expect("lookup")
            .expect("deleted topic");
        assert!(deleted.is_deleted());
        assert!(!store.delete_topic("en", "Gone").expect("second delete"));
    }

    #[test]
    fn namespace_aliases_are_scoped_and_validated() {
        let (_temp, store) = open_store();
        assert_eq!(
            store.add_namespace_alias("en", 4, "Wikipedia").expect("add"),
            AliasOutcome::Added
        );
        assert_eq!(
            store.add_namespace_alias("en", 4, "wikipedia").expect("again"),
            AliasOutcome::AlreadyKnown
        );
        assert!(store.add_namespace_alias("en", 2, "Wikipedia").is_err());
        assert!(store.add_namespace_alias("en", 2, "Category").is_err());
        assert!(store.add_namespace_alias("", 2, "Bad:Alias").is_err());
        assert_eq!(
            store.add_namespace_alias("en", 3, "User_talk").expect("underscore form"),
            AliasOutcome::AlreadyKnown
        );
        assert!(store.add_namespace_alias("en", 4, "User_comments").is_err());

        let en = store.lookup_namespaces("en").expect("en namespaces");
        let project = en.iter().find(|ns| ns.id == 4).expect("project");
        assert_eq!(project.aliases, vec!["Wikipedia".to_string()]);
        let user_comments = en.iter().find(|ns| ns.id == 3).expect("user comments");
        assert_eq!(user_comments.name, "User comments");
        assert_eq!(user_comments.aliases, vec!["User talk".to_string()]);

        let fr = store.lookup_namespaces("fr").expect("fr namespaces");
        assert!(fr.iter().find(|ns| ns.id == 4).expect("project").aliases.is_empty());
    }

    #[test]
    fn resolved_authors_round_trip() {
        let (_temp, mut store) = open_store();
        let user = store.register_user("Test User").expect("register");
        assert_eq!(store.register_user("Test User").expect("again"), user);
        assert_eq!(store.lookup_user("Test User").expect("lookup"), Some(user.clone()));
        assert_eq!(store.lookup_user("Nobody").expect("lookup"), None);

        let topic = new_topic(&store, "Authored");
        let mut entry = version(1, "x", PreviousVersion::None);
        entry.author = Author::Resolved(user.clone());
        let stored = store
            .write_topic(&topic, &[entry], &BTreeMap::new(), &[])
            .expect("write");
        let history = store
            .get_topic_history(&stored, Pagination::unbounded(), false)
            .expect("history");
        assert_eq!(history[0].author, Author::Resolved(user));
    }
}
