use chrono::{DateTime, Utc};

use crate::error::{MigrationError, SpliceConflict};
use crate::model::{PreviousVersion, format_timestamp};
use crate::xml_reader::Revision;

/// What the repository already holds for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingHistory {
    pub current_version_id: i64,
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedRevision {
    pub revision: Revision,
    pub previous: PreviousVersion,
}

/// Order revisions by timestamp and link each to its predecessor.
///
/// Revisions sharing a timestamp keep their file order. When the topic already has a
/// stored history, every new revision must be strictly newer than its latest version.
pub fn sequence(
    topic_name: &str,
    mut revisions: Vec<Revision>,
    existing: Option<&ExistingHistory>,
) -> Result<Vec<SequencedRevision>, MigrationError> {
    revisions.sort_by_key(|revision| revision.timestamp);

    if let (Some(history), Some(oldest)) = (existing, revisions.first()) {
        let conflict = if oldest.timestamp < history.earliest {
            Some(SpliceConflict::BeforeHistory)
        } else if oldest.timestamp <= history.latest {
            Some(SpliceConflict::Interleaved)
        } else {
            None
        };
        if let Some(conflict) = conflict {
            return Err(MigrationError::HistorySplice {
                topic: topic_name.to_string(),
                timestamp: format_timestamp(&oldest.timestamp),
                conflict,
            });
        }
    }

    let first_previous = existing
        .map(|history| PreviousVersion::Stored(history.current_version_id))
        .unwrap_or(PreviousVersion::None);

    Ok(revisions
        .into_iter()
        .enumerate()
        .map(|(index, revision)| SequencedRevision {
            revision,
            previous: if index == 0 {
                first_previous
            } else {
                PreviousVersion::Pending(index - 1)
            },
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::{ExistingHistory, sequence};
    use crate::error::{MigrationError, SpliceConflict};
    use crate::model::PreviousVersion;
    use crate::xml_reader::{Contributor, Revision};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2008, 1, day, 0, 0, 0).unwrap()
    }

    fn revision(day: u32, text: &str) -> Revision {
        Revision {
            timestamp: at(day),
            contributor: Contributor::Unknown,
            comment: None,
            minor: false,
            text: text.to_string(),
        }
    }

    #[test]
    fn sorts_unordered_revisions_and_chains_them() {
        let sequenced = sequence(
            "Foo",
            vec![revision(3, "three"), revision(1, "one"), revision(2, "two")],
            None,
        )
        .expect("sequence");

        let texts: Vec<&str> = sequenced
            .iter()
            .map(|entry| entry.revision.text.as_str())
            .collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert_eq!(sequenced[0].previous, PreviousVersion::None);
        assert_eq!(sequenced[1].previous, PreviousVersion::Pending(0));
        assert_eq!(sequenced[2].previous, PreviousVersion::Pending(1));
    }

    #[test]
    fn equal_timestamps_keep_file_order() {
        let sequenced = sequence(
            "Foo",
            vec![revision(2, "first"), revision(1, "zero"), revision(2, "second")],
            None,
        )
        .expect("sequence");
        let texts: Vec<&str> = sequenced
            .iter()
            .map(|entry| entry.revision.text.as_str())
            .collect();
        assert_eq!(texts, vec!["zero", "first", "second"]);
    }

    #[test]
    fn appends_after_stored_history() {
        let history = ExistingHistory {
            current_version_id: 42,
            earliest: at(1),
            latest: at(5),
        };
        let sequenced =
            sequence("Foo", vec![revision(7, "b"), revision(6, "a")], Some(&history))
                .expect("sequence");
        assert_eq!(sequenced[0].revision.text, "a");
        assert_eq!(sequenced[0].previous, PreviousVersion::Stored(42));
        assert_eq!(sequenced[1].previous, PreviousVersion::Pending(0));
    }

    #[test]
    fn rejects_revisions_that_cannot_be_appended() {
        let history = ExistingHistory {
            current_version_id: 42,
            earliest: at(3),
            latest: at(5),
        };

        let before = sequence("Foo", vec![revision(2, "old")], Some(&history))
            .expect_err("older than history");
        assert!(matches!(
            before,
            MigrationError::HistorySplice {
                conflict: SpliceConflict::BeforeHistory,
                ..
            }
        ));

        for day in [3, 4, 5] {
            let inside = sequence("Foo", vec![revision(day, "mid"), revision(9, "new")], Some(&history))
                .expect_err("inside history");
            assert!(matches!(
                inside,
                MigrationError::HistorySplice {
                    conflict: SpliceConflict::Interleaved,
                    ..
                }
            ));
        }
    }

    #[test]
    fn empty_input_produces_nothing() {
        let sequenced = sequence("Foo", Vec::new(), None).expect("sequence");
        assert!(sequenced.is_empty());
    }
}
