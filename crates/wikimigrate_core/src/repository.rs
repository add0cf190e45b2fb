use std::collections::BTreeMap;

use anyhow::Result;

use crate::model::{Namespace, NewTopicVersion, Pagination, Topic, TopicVersion, WikiUser};

/// Persistent store behind the migration engine.
pub trait TopicRepository {
    /// Look up a topic by its qualified name.
    fn lookup_topic(
        &self,
        virtual_wiki: &str,
        name: &str,
        include_deleted: bool,
    ) -> Result<Option<Topic>>;

    /// Store `topic` together with `versions` in one unit.
    ///
    /// The first version links to the topic's current version (or nothing for a new
    /// topic); each later one links to the entry before it. The topic's content and
    /// current version become those of the last entry. Categories and links replace
    /// whatever was recorded for the topic before.
    fn write_topic(
        &mut self,
        topic: &Topic,
        versions: &[NewTopicVersion],
        categories: &BTreeMap<String, String>,
        links: &[String],
    ) -> Result<Topic>;

    fn get_topic_history(
        &self,
        topic: &Topic,
        pagination: Pagination,
        descending: bool,
    ) -> Result<Vec<TopicVersion>>;

    fn lookup_topic_version(&self, topic_version_id: i64) -> Result<Option<TopicVersion>>;

    /// Namespaces with the aliases visible to `virtual_wiki`, ordered by id.
    fn lookup_namespaces(&self, virtual_wiki: &str) -> Result<Vec<Namespace>>;

    fn lookup_user(&self, login: &str) -> Result<Option<WikiUser>>;
}
