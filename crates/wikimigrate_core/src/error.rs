use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Stage of a single page inside an import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStage {
    Parsing,
    Translating,
    Sequencing,
    Persisting,
}

impl ImportStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parsing => "parsing",
            Self::Translating => "translating",
            Self::Sequencing => "sequencing",
            Self::Persisting => "persisting",
        }
    }
}

impl fmt::Display for ImportStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Resolving,
    Writing,
    Finalizing,
}

impl ExportStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resolving => "resolving",
            Self::Writing => "writing",
            Self::Finalizing => "finalizing",
        }
    }
}

impl fmt::Display for ExportStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Why new revisions could not be attached to a stored history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpliceConflict {
    /// A revision predates the first stored version.
    BeforeHistory,
    /// A revision falls at or between the first and the latest stored version.
    Interleaved,
}

impl fmt::Display for SpliceConflict {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeHistory => {
                formatter.write_str("revision is older than the earliest stored version")
            }
            Self::Interleaved => {
                formatter.write_str("revision falls inside the stored history")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("malformed input in {} at byte {position}: {message}", .path.display())]
    MalformedInput {
        path: PathBuf,
        position: u64,
        message: String,
    },

    #[error("topic(s) not found in virtual wiki {virtual_wiki}: {}", .names.join(", "))]
    UnresolvedTopics {
        virtual_wiki: String,
        names: Vec<String>,
    },

    #[error("cannot merge revision {timestamp} into {topic}: {conflict}")]
    HistorySplice {
        topic: String,
        timestamp: String,
        conflict: SpliceConflict,
    },

    #[error("page {title} has no revisions")]
    EmptyPage { title: String },

    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to persist {topic}")]
    Persistence {
        topic: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("repository lookup failed: {context}")]
    Repository {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("i/o failure on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid namespace configuration: {0}")]
    Namespaces(String),

    #[error(
        "import of {} aborted at page {page_number} ({}) while {stage}; {} topic(s) already committed",
        .path.display(),
        .title.as_deref().unwrap_or("<untitled>"),
        .committed.len()
    )]
    ImportAborted {
        path: PathBuf,
        page_number: usize,
        title: Option<String>,
        stage: ImportStage,
        committed: Vec<String>,
        #[source]
        source: Box<MigrationError>,
    },

    #[error("export to {} aborted while {stage}", .path.display())]
    ExportAborted {
        path: PathBuf,
        stage: ExportStage,
        #[source]
        source: Box<MigrationError>,
    },
}

impl MigrationError {
    pub fn repository(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Repository {
            context: context.into(),
            source,
        }
    }

    /// The innermost error, unwrapping abort reports.
    pub fn root(&self) -> &MigrationError {
        match self {
            Self::ImportAborted { source, .. } | Self::ExportAborted { source, .. } => {
                source.root()
            }
            other => other,
        }
    }

    /// Topic names committed before an import aborted.
    pub fn committed_topics(&self) -> &[String] {
        match self {
            Self::ImportAborted { committed, .. } => committed,
            _ => &[],
        }
    }
}
