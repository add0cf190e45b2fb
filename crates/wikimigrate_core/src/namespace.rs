use std::collections::BTreeSet;

use tracing::warn;

use crate::error::MigrationError;
use crate::model::{MAIN_NAMESPACE_ID, Namespace};
use crate::wikitext::link_targets;

pub const CATEGORY_NAMESPACE_ID: i32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Foreign aliases become internal canonical prefixes.
    Import,
    /// Internal canonical prefixes become each namespace's primary foreign alias.
    Export,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasOutcome {
    Added,
    AlreadyKnown,
}

#[derive(Debug, Clone)]
struct PrefixEntry {
    prefix: String,
    namespace: usize,
    canonical: bool,
}

/// Maps foreign namespace prefixes onto the internal namespace table of one virtual wiki.
#[derive(Debug, Clone)]
pub struct NamespaceTranslator {
    namespaces: Vec<Namespace>,
    /// Every canonical name and alias, longest first.
    prefixes: Vec<PrefixEntry>,
}

impl NamespaceTranslator {
    pub fn new(namespaces: Vec<Namespace>) -> Result<Self, MigrationError> {
        let mut namespaces = namespaces;
        if !namespaces.iter().any(Namespace::is_main) {
            namespaces.push(Namespace {
                id: MAIN_NAMESPACE_ID,
                name: String::new(),
                aliases: Vec::new(),
            });
        }

        let mut seen_ids = BTreeSet::new();
        let mut seen_prefixes = BTreeSet::new();
        for namespace in &namespaces {
            if !seen_ids.insert(namespace.id) {
                return Err(MigrationError::Namespaces(format!(
                    "namespace id {} is declared twice",
                    namespace.id
                )));
            }
            if namespace.is_main() && !namespace.name.is_empty() {
                return Err(MigrationError::Namespaces(
                    "the main namespace cannot carry a prefix".to_string(),
                ));
            }
            if !namespace.is_main() && namespace.name.trim().is_empty() {
                return Err(MigrationError::Namespaces(format!(
                    "namespace {} has an empty name",
                    namespace.id
                )));
            }
            let names = std::iter::once(&namespace.name)
                .filter(|name| !name.is_empty())
                .chain(namespace.aliases.iter());
            for name in names {
                if name.trim().is_empty() || name.contains(':') {
                    return Err(MigrationError::Namespaces(format!(
                        "invalid prefix {name:?} for namespace {}",
                        namespace.id
                    )));
                }
                if !seen_prefixes.insert(fold_prefix(name)) {
                    return Err(MigrationError::Namespaces(format!(
                        "prefix {name:?} is claimed by more than one namespace"
                    )));
                }
            }
        }

        let mut translator = Self {
            namespaces,
            prefixes: Vec::new(),
        };
        translator.rebuild_prefixes();
        Ok(translator)
    }

    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    pub fn namespace(&self, id: i32) -> Option<&Namespace> {
        self.namespaces.iter().find(|namespace| namespace.id == id)
    }

    pub fn main_namespace(&self) -> &Namespace {
        self.namespaces
            .iter()
            .find(|namespace| namespace.is_main())
            .unwrap_or(&self.namespaces[0])
    }

    /// Register one more foreign alias. Fails when the alias belongs to another namespace.
    pub fn add_alias(&mut self, namespace_id: i32, alias: &str) -> Result<AliasOutcome, MigrationError> {
        let alias = alias.trim();
        let Some(index) = self
            .namespaces
            .iter()
            .position(|namespace| namespace.id == namespace_id)
        else {
            return Err(MigrationError::Namespaces(format!(
                "alias {alias:?} refers to unknown namespace {namespace_id}"
            )));
        };
        if alias.contains(':') {
            return Err(MigrationError::Namespaces(format!(
                "alias {alias:?} cannot contain ':'"
            )));
        }
        if alias.is_empty() {
            return if self.namespaces[index].is_main() {
                Ok(AliasOutcome::AlreadyKnown)
            } else {
                Err(MigrationError::Namespaces(format!(
                    "empty alias for namespace {namespace_id}"
                )))
            };
        }

        let folded = fold_prefix(alias);
        if let Some(existing) = self
            .prefixes
            .iter()
            .find(|entry| fold_prefix(&entry.prefix) == folded)
        {
            if existing.namespace == index {
                return Ok(AliasOutcome::AlreadyKnown);
            }
            return Err(MigrationError::Namespaces(format!(
                "alias {alias:?} for namespace {namespace_id} is already claimed by namespace {}",
                self.namespaces[existing.namespace].id
            )));
        }

        self.namespaces[index].aliases.push(alias.to_string());
        self.rebuild_prefixes();
        Ok(AliasOutcome::Added)
    }

    /// Adopt the namespace names a dump declares in its `<siteinfo>`, skipping any that conflict.
    pub fn adopt_site_namespaces(&mut self, declared: &[(i32, String)]) {
        for (key, name) in declared {
            if name.trim().is_empty() || self.namespace(*key).is_none() {
                continue;
            }
            if let Err(error) = self.add_alias(*key, name) {
                warn!(namespace = *key, name = %name, %error, "ignoring declared namespace name");
            }
        }
    }

    /// Split a foreign title into its internal namespace and page name.
    pub fn translate_title(&self, foreign_title: &str) -> (&Namespace, String) {
        self.translate_title_with_hint(foreign_title, None)
    }

    /// Like [`translate_title`](Self::translate_title), but when the prefix is unknown and the
    /// dump declared the page's namespace id, trust that id.
    pub fn translate_title_with_hint(
        &self,
        foreign_title: &str,
        namespace_hint: Option<i32>,
    ) -> (&Namespace, String) {
        let title = foreign_title.trim();
        if let Some((prefix, rest)) = title.split_once(':') {
            let page_name = rest.trim();
            if !page_name.is_empty() {
                if let Some(entry) = self.match_prefix(prefix.trim()) {
                    return (&self.namespaces[entry.namespace], page_name.to_string());
                }
                if let Some(hinted) = namespace_hint
                    .filter(|id| *id != MAIN_NAMESPACE_ID)
                    .and_then(|id| self.namespace(id))
                {
                    return (hinted, page_name.to_string());
                }
            }
        }
        (self.main_namespace(), title.to_string())
    }

    /// Foreign-form title for a stored topic.
    pub fn export_title(&self, namespace_id: i32, page_name: &str) -> String {
        match self.namespace(namespace_id) {
            Some(namespace) if !namespace.is_main() => {
                format!("{}:{page_name}", namespace.primary_alias())
            }
            _ => page_name.to_string(),
        }
    }

    /// Rewrite the namespace prefix of every link and transclusion target in `content`.
    pub fn rewrite_links(&self, content: &str, direction: Direction) -> String {
        let mut output = String::with_capacity(content.len());
        let mut copied_up_to = 0usize;

        for target in link_targets(content) {
            let raw = &content[target.range.clone()];
            let Some((offset, prefix_len, replacement)) = self.link_replacement(raw, direction)
            else {
                continue;
            };
            let prefix_start = target.range.start + offset;
            output.push_str(&content[copied_up_to..prefix_start]);
            output.push_str(replacement);
            copied_up_to = prefix_start + prefix_len;
        }

        output.push_str(&content[copied_up_to..]);
        output
    }

    /// Locate a replaceable prefix inside a raw link target: byte offset, byte length, and the
    /// text to put there.
    fn link_replacement(&self, raw: &str, direction: Direction) -> Option<(usize, usize, &str)> {
        let mut rest = raw.trim_start();
        if let Some(stripped) = rest.strip_prefix(':') {
            rest = stripped.trim_start();
        }
        let offset = raw.len() - rest.len();

        let entry = self
            .prefixes
            .iter()
            .find(|entry| rest.starts_with(&entry.prefix) && colon_follows(rest, entry.prefix.len()))
            .or_else(|| {
                self.prefixes.iter().find(|entry| {
                    rest.get(..entry.prefix.len())
                        .is_some_and(|candidate| fold_prefix(candidate) == fold_prefix(&entry.prefix))
                        && colon_follows(rest, entry.prefix.len())
                })
            })?;

        let namespace = &self.namespaces[entry.namespace];
        let replacement = match direction {
            Direction::Import => namespace.name.as_str(),
            Direction::Export if entry.canonical => namespace.primary_alias(),
            Direction::Export => return None,
        };
        if replacement == &rest[..entry.prefix.len()] {
            return None;
        }
        Some((offset, entry.prefix.len(), replacement))
    }

    fn match_prefix(&self, prefix: &str) -> Option<&PrefixEntry> {
        self.prefixes
            .iter()
            .find(|entry| entry.prefix == prefix)
            .or_else(|| {
                let folded = fold_prefix(prefix);
                self.prefixes
                    .iter()
                    .find(|entry| fold_prefix(&entry.prefix) == folded)
            })
    }

    fn rebuild_prefixes(&mut self) {
        let mut prefixes = Vec::new();
        for (index, namespace) in self.namespaces.iter().enumerate() {
            if !namespace.name.is_empty() {
                prefixes.push(PrefixEntry {
                    prefix: namespace.name.clone(),
                    namespace: index,
                    canonical: true,
                });
            }
            for alias in &namespace.aliases {
                prefixes.push(PrefixEntry {
                    prefix: alias.clone(),
                    namespace: index,
                    canonical: false,
                });
            }
        }
        prefixes.sort_by(|left, right| right.prefix.len().cmp(&left.prefix.len()));
        self.prefixes = prefixes;
    }
}

/// Comparison key for prefixes: case-insensitive, with `_` standing for a space.
fn fold_prefix(value: &str) -> String {
    value.replace('_', " ").to_lowercase()
}

fn colon_follows(value: &str, prefix_len: usize) -> bool {
    value[prefix_len..].trim_start().starts_with(':')
}

#[cfg(test)]
mod tests {
    use super::{AliasOutcome, Direction, NamespaceTranslator};
    use crate::error::MigrationError;
    use crate::model::Namespace;

    fn namespace(id: i32, name: &str, aliases: &[&str]) -> Namespace {
        Namespace {
            id,
            name: name.to_string(),
            aliases: aliases.iter().map(|alias| alias.to_string()).collect(),
        }
    }

    fn translator() -> NamespaceTranslator {
        NamespaceTranslator::new(vec![
            namespace(0, "", &[]),
            namespace(1, "Comments", &["Talk"]),
            namespace(2, "User", &[]),
            namespace(3, "User comments", &["User talk"]),
            namespace(4, "Project", &[]),
            namespace(5, "Project comments", &["Project talk"]),
            namespace(10, "Template", &[]),
            namespace(11, "Template comments", &["Template talk"]),
            namespace(14, "Category", &[]),
        ])
        .expect("translator")
    }

    #[test]
    fn translates_titles_by_prefix() {
        let translator = translator();
        let (namespace, page) = translator.translate_title("Template talk:Test Template");
        assert_eq!(namespace.id, 11);
        assert_eq!(namespace.qualify(&page), "Template comments:Test Template");

        let (namespace, page) = translator.translate_title("talk:Lower");
        assert_eq!(namespace.id, 1);
        assert_eq!(page, "Lower");

        let (namespace, page) = translator.translate_title("Custom talk:Test");
        assert!(namespace.is_main());
        assert_eq!(page, "Custom talk:Test");

        let (namespace, page) = translator.translate_title("Who am i?");
        assert!(namespace.is_main());
        assert_eq!(page, "Who am i?");
    }

    #[test]
    fn translate_title_is_idempotent_on_internal_names() {
        let translator = translator();
        for title in ["Comments:Foo", "User comments:Bar", "Plain", "Template comments:X"] {
            let (namespace, page) = translator.translate_title(title);
            assert_eq!(namespace.qualify(&page), title);
        }
    }

    #[test]
    fn namespace_hint_applies_only_to_unknown_prefixes() {
        let translator = translator();
        let (namespace, page) = translator.translate_title_with_hint("Portail:Accueil", Some(4));
        assert_eq!(namespace.id, 4);
        assert_eq!(page, "Accueil");
        let (namespace, _) = translator.translate_title_with_hint("Talk:Accueil", Some(4));
        assert_eq!(namespace.id, 1);
    }

    #[test]
    fn rewrites_link_prefixes_preserving_layout() {
        let translator = translator();
        let content = "Talk:Test - [[Talk:Test]]\n\
            User talk:Test - [[User talk: Test User]]\n\
            Pattern test - [[  User talk:Test ]]\n\
            Case-sensitive test - [[ user talk:Test]]\n\
            Inclusion test - [[:User talk:Test]]\n\
            Template inclusion test 1 - {{User talk:Test}}\n\
            Template inclusion test 2 - {{:User talk:Test}}\n\
            Custom talk:Test - [[Custom talk:Test]]\n\
            Usertalk - [[Usertalk]] [[User talkative:Test]]";
        let rewritten = translator.rewrite_links(content, Direction::Import);
        assert!(rewritten.contains("Talk:Test - [[Comments:Test]]"));
        assert!(rewritten.contains("User talk:Test - [[User comments: Test User]]"));
        assert!(rewritten.contains("Pattern test - [[  User comments:Test ]]"));
        assert!(rewritten.contains("Case-sensitive test - [[ User comments:Test]]"));
        assert!(rewritten.contains("Inclusion test - [[:User comments:Test]]"));
        assert!(rewritten.contains("Template inclusion test 1 - {{User comments:Test}}"));
        assert!(rewritten.contains("Template inclusion test 2 - {{:User comments:Test}}"));
        assert!(rewritten.contains("Custom talk:Test - [[Custom talk:Test]]"));
        assert!(rewritten.contains("Usertalk - [[Usertalk]] [[User talkative:Test]]"));

        assert_eq!(translator.rewrite_links(&rewritten, Direction::Import), rewritten);
    }

    #[test]
    fn export_direction_restores_foreign_prefixes() {
        let translator = translator();
        let internal = "[[User comments:Test]] {{Template comments:Box|x}} [[User:Test]] [[Comments:A]]";
        let foreign = translator.rewrite_links(internal, Direction::Export);
        assert_eq!(
            foreign,
            "[[User talk:Test]] {{Template talk:Box|x}} [[User:Test]] [[Talk:A]]"
        );
        assert_eq!(translator.rewrite_links(&foreign, Direction::Import), internal);
        assert_eq!(translator.export_title(3, "Test"), "User talk:Test");
        assert_eq!(translator.export_title(0, "Who am i?"), "Who am i?");
    }

    #[test]
    fn underscores_match_spaces_in_prefixes() {
        let mut translator = translator();
        assert_eq!(
            translator.rewrite_links(
                "[[User_talk:Test]] {{Template_talk:Box}} [[user_comments:X]] [[User_talkative:Y]]",
                Direction::Import
            ),
            "[[User comments:Test]] {{Template comments:Box}} [[User comments:X]] [[User_talkative:Y]]"
        );
        assert_eq!(
            translator.rewrite_links("[[User_comments:Test]]", Direction::Export),
            "[[User talk:Test]]"
        );

        let (namespace, page) = translator.translate_title("User_talk:Test");
        assert_eq!(namespace.id, 3);
        assert_eq!(page, "Test");
        assert_eq!(
            translator.add_alias(3, "User_talk").expect("same alias"),
            AliasOutcome::AlreadyKnown
        );
    }

    #[test]
    fn rewrites_multi_line_infobox_prefix() {
        let translator = translator();
        assert_eq!(
            translator.rewrite_links("{{Template talk:Infobox\n| name = x\n}}", Direction::Import),
            "{{Template comments:Infobox\n| name = x\n}}"
        );
    }

    #[test]
    fn longer_alias_wins_over_shorter_prefix() {
        let translator = NamespaceTranslator::new(vec![
            namespace(2, "Person", &["User"]),
            namespace(3, "Person comments", &["User talk"]),
        ])
        .expect("translator");
        assert_eq!(
            translator.rewrite_links("[[User talk:X]] [[User:Y]]", Direction::Import),
            "[[Person comments:X]] [[Person:Y]]"
        );
    }

    #[test]
    fn rejects_duplicate_aliases() {
        let error = NamespaceTranslator::new(vec![
            namespace(1, "Comments", &["Talk"]),
            namespace(3, "User comments", &["talk"]),
        ])
        .expect_err("must fail");
        assert!(matches!(error, MigrationError::Namespaces(_)));
        assert!(error.to_string().contains("claimed by more than one namespace"));
    }

    #[test]
    fn site_namespaces_extend_aliases_without_conflicts() {
        let mut translator = translator();
        translator.adopt_site_namespaces(&[
            (1, "Talk".to_string()),
            (4, "Wikipedia".to_string()),
            (5, "Wikipedia talk".to_string()),
            (2, "Comments".to_string()),
            (100, "Portal".to_string()),
        ]);
        assert_eq!(
            translator.rewrite_links(
                "[[Wikipedia:Test]] [[Wikipedia talk:Test]] [[Comments:Test]]",
                Direction::Import
            ),
            "[[Project:Test]] [[Project comments:Test]] [[Comments:Test]]"
        );
        assert_eq!(
            translator.add_alias(1, "talk").expect("known alias"),
            AliasOutcome::AlreadyKnown
        );
        assert!(translator.add_alias(42, "Nowhere").is_err());
    }
}
