use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

pub const MAIN_NAMESPACE_ID: i32 = 0;

/// Timestamp layout used by MediaWiki exports (`2008-01-01T00:00:00Z`).
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Namespace {
    pub id: i32,
    /// Internal prefix; empty for the main namespace.
    pub name: String,
    /// Foreign prefixes mapped onto this namespace. The first entry is used when exporting.
    pub aliases: Vec<String>,
}

impl Namespace {
    pub fn is_main(&self) -> bool {
        self.id == MAIN_NAMESPACE_ID
    }

    pub fn primary_alias(&self) -> &str {
        self.aliases
            .first()
            .map(String::as_str)
            .unwrap_or(self.name.as_str())
    }

    /// Join this namespace and a page name into a qualified topic name.
    pub fn qualify(&self, page_name: &str) -> String {
        if self.name.is_empty() {
            page_name.to_string()
        } else {
            format!("{}:{page_name}", self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WikiUser {
    pub id: i64,
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Author {
    Resolved(WikiUser),
    Display(String),
}

impl Author {
    pub fn display_name(&self) -> &str {
        match self {
            Self::Resolved(user) => &user.login,
            Self::Display(text) => text,
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        match self {
            Self::Resolved(user) => Some(user.id),
            Self::Display(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topic {
    /// `None` until the repository has stored the topic.
    pub id: Option<i64>,
    pub virtual_wiki: String,
    pub namespace_id: i32,
    pub page_name: String,
    pub name: String,
    pub content: String,
    pub current_version_id: Option<i64>,
    pub deleted_at: Option<String>,
}

impl Topic {
    pub fn new(virtual_wiki: &str, namespace: &Namespace, page_name: &str) -> Self {
        Self {
            id: None,
            virtual_wiki: virtual_wiki.to_string(),
            namespace_id: namespace.id,
            page_name: page_name.to_string(),
            name: namespace.qualify(page_name),
            content: String::new(),
            current_version_id: None,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicVersion {
    pub id: i64,
    pub topic_id: i64,
    pub author: Author,
    pub edited_at: DateTime<Utc>,
    pub content: String,
    pub comment: Option<String>,
    pub minor: bool,
    pub previous_version_id: Option<i64>,
}

/// Predecessor of a version that has not been stored yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviousVersion {
    None,
    /// A version the repository already holds.
    Stored(i64),
    /// An earlier entry of the same write batch, by index.
    Pending(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTopicVersion {
    pub author: Author,
    pub edited_at: DateTime<Utc>,
    pub content: String,
    pub comment: Option<String>,
    pub minor: bool,
    pub previous: PreviousVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

impl Pagination {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    pub fn unbounded() -> Self {
        Self {
            limit: usize::MAX,
            offset: 0,
        }
    }
}
