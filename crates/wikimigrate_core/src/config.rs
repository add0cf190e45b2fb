use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use toml::Value;

use crate::orchestrator::MigratorSettings;

pub const DEFAULT_VIRTUAL_WIKI: &str = "en";
pub const DEFAULT_AUTHOR_FALLBACK: &str = "Anonymous";
pub const DEFAULT_LOCALE: &str = "en";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationConfig {
    #[serde(default)]
    pub migration: MigrationSection,
    #[serde(default)]
    pub namespaces: NamespacesSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationSection {
    pub virtual_wiki: Option<String>,
    pub author_fallback: Option<String>,
    pub locale: Option<String>,
    pub importing_user: Option<String>,
    pub site_name: Option<String>,
    #[serde(default)]
    pub record_import_version: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct NamespacesSection {
    #[serde(default)]
    pub aliases: Vec<NamespaceAlias>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct NamespaceAlias {
    pub namespace_id: i32,
    pub alias: String,
}

impl MigrationConfig {
    /// Resolve the virtual wiki: env WIKIMIGRATE_VIRTUAL_WIKI > config > DEFAULT_VIRTUAL_WIKI.
    pub fn virtual_wiki(&self) -> String {
        env_override("WIKIMIGRATE_VIRTUAL_WIKI")
            .or_else(|| self.migration.virtual_wiki.clone())
            .unwrap_or_else(|| DEFAULT_VIRTUAL_WIKI.to_string())
    }

    /// Resolve the display name for revisions without a contributor.
    pub fn author_fallback(&self) -> String {
        env_override("WIKIMIGRATE_AUTHOR_FALLBACK")
            .or_else(|| self.migration.author_fallback.clone())
            .unwrap_or_else(|| DEFAULT_AUTHOR_FALLBACK.to_string())
    }

    pub fn locale(&self) -> String {
        env_override("WIKIMIGRATE_LOCALE")
            .or_else(|| self.migration.locale.clone())
            .unwrap_or_else(|| DEFAULT_LOCALE.to_string())
    }

    pub fn importing_user(&self) -> Option<String> {
        env_override("WIKIMIGRATE_IMPORTING_USER").or_else(|| self.migration.importing_user.clone())
    }

    pub fn migrator_settings(&self) -> MigratorSettings {
        let locale = self.locale();
        let language = locale
            .split(['-', '_'])
            .next()
            .filter(|language| !language.is_empty())
            .unwrap_or(DEFAULT_LOCALE)
            .to_string();
        MigratorSettings {
            record_import_version: self.migration.record_import_version,
            extra_aliases: self
                .namespaces
                .aliases
                .iter()
                .map(|entry| (entry.namespace_id, entry.alias.clone()))
                .collect(),
            site_name: self.migration.site_name.clone(),
            export_language: language,
        }
    }
}

fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Load and parse a MigrationConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MigrationConfig> {
    if !config_path.exists() {
        return Ok(MigrationConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MigrationConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[derive(Debug, Clone, Default)]
pub struct MigrationConfigPatch {
    pub set_virtual_wiki: Option<String>,
    pub set_locale: Option<String>,
    pub add_aliases: Vec<NamespaceAlias>,
}

/// Update selected keys while preserving all other config content.
/// Returns `true` when a write occurred.
pub fn patch_migration_config(config_path: &Path, patch: &MigrationConfigPatch) -> Result<bool> {
    if patch.set_virtual_wiki.is_none() && patch.set_locale.is_none() && patch.add_aliases.is_empty()
    {
        return Ok(false);
    }

    let mut root = if config_path.exists() {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        toml::from_str::<Value>(&content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?
    } else {
        Value::Table(Default::default())
    };
    let original = root.clone();

    let root_table = root.as_table_mut().ok_or_else(|| {
        anyhow::anyhow!(
            "top-level TOML must be a table in {}",
            config_path.display()
        )
    })?;

    {
        let migration_table = root_table
            .entry("migration".to_string())
            .or_insert_with(|| Value::Table(Default::default()))
            .as_table_mut()
            .ok_or_else(|| {
                anyhow::anyhow!("[migration] must be a table in {}", config_path.display())
            })?;
        if let Some(virtual_wiki) = &patch.set_virtual_wiki {
            migration_table.insert(
                "virtual_wiki".to_string(),
                Value::String(virtual_wiki.clone()),
            );
        }
        if let Some(locale) = &patch.set_locale {
            migration_table.insert("locale".to_string(), Value::String(locale.clone()));
        }
    }

    if !patch.add_aliases.is_empty() {
        let namespaces_table = root_table
            .entry("namespaces".to_string())
            .or_insert_with(|| Value::Table(Default::default()))
            .as_table_mut()
            .ok_or_else(|| {
                anyhow::anyhow!("[namespaces] must be a table in {}", config_path.display())
            })?;
        let aliases = namespaces_table
            .entry("aliases".to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "namespaces.aliases must be an array in {}",
                    config_path.display()
                )
            })?;
        for entry in &patch.add_aliases {
            let alias = entry.alias.trim();
            if alias.is_empty() || alias.contains(':') {
                bail!("invalid namespace alias {:?}", entry.alias);
            }
            let already_listed = aliases.iter().any(|value| {
                value.get("alias").and_then(Value::as_str) == Some(alias)
                    && value.get("namespace_id").and_then(Value::as_integer)
                        == Some(i64::from(entry.namespace_id))
            });
            if already_listed {
                continue;
            }
            let mut table = toml::map::Map::new();
            table.insert(
                "namespace_id".to_string(),
                Value::Integer(i64::from(entry.namespace_id)),
            );
            table.insert("alias".to_string(), Value::String(alias.to_string()));
            aliases.push(Value::Table(table));
        }
    }

    if root == original {
        return Ok(false);
    }

    let parent = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", config_path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let rendered = toml::to_string_pretty(&root).context("failed to serialize config TOML")?;
    fs::write(config_path, rendered)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    Ok(true)
}
