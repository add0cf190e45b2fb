use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

pub const MIGRATIONS_POLICY_MESSAGE: &str =
    "Run `wikimigrate db migrate` to apply pending schema migrations.";

pub const STATE_DIR_NAME: &str = ".wikimigrate";
pub const DB_FILENAME: &str = "wikimigrate.db";

/// Where a resolved path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
    pub exports_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub data_source: ValueSource,
    pub config_source: ValueSource,
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub state_dir_exists: bool,
    pub data_dir_exists: bool,
    pub db_exists: bool,
    pub db_size_bytes: Option<u64>,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nstate_dir={}\ndata_dir={} ({})\ndb_path={}\nconfig_path={} ({})\nexports_dir={}\npolicy={}",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.data_dir),
            self.data_source.as_str(),
            normalize_for_display(&self.db_path),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.exports_dir),
            MIGRATIONS_POLICY_MESSAGE
        )
    }
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let project_root_exists = paths.project_root.exists();
    let state_dir_exists = paths.state_dir.exists();
    let data_dir_exists = paths.data_dir.exists();
    let config_exists = paths.config_path.exists();
    let db_exists = paths.db_path.exists();
    let db_size_bytes = if db_exists {
        let metadata = fs::metadata(&paths.db_path)
            .with_context(|| format!("failed to inspect {}", paths.db_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };

    let mut warnings = Vec::new();
    if !state_dir_exists {
        warnings.push(format!(
            "{STATE_DIR_NAME}/ is missing; run `wikimigrate init` first"
        ));
    }
    if !db_exists {
        warnings.push(format!("database is missing; {MIGRATIONS_POLICY_MESSAGE}"));
    }

    Ok(RuntimeStatus {
        project_root_exists,
        state_dir_exists,
        data_dir_exists,
        db_exists,
        db_size_bytes,
        config_exists,
        warnings,
    })
}

/// Fail unless the database exists; commands that read or write topics call this first.
pub fn ensure_runtime_ready(paths: &ResolvedPaths, status: &RuntimeStatus) -> Result<()> {
    if !status.db_exists {
        bail!(
            "Topic store not found at {}.\nRun: wikimigrate init --project-root {}\nThen: wikimigrate db migrate",
            normalize_for_display(&paths.db_path),
            normalize_for_display(&paths.project_root)
        );
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = pick_path(
        overrides.project_root.as_deref(),
        lookup_env("WIKIMIGRATE_PROJECT_ROOT"),
        &context.cwd,
        || context.cwd.clone(),
    );
    let state_dir = project_root.join(STATE_DIR_NAME);
    let (data_dir, data_source) = pick_path(
        overrides.data_dir.as_deref(),
        lookup_env("WIKIMIGRATE_DATA_DIR"),
        &project_root,
        || state_dir.join("data"),
    );
    let (config_path, config_source) = pick_path(
        overrides.config.as_deref(),
        lookup_env("WIKIMIGRATE_CONFIG"),
        &project_root,
        || state_dir.join("config.toml"),
    );

    Ok(ResolvedPaths {
        db_path: data_dir.join(DB_FILENAME),
        exports_dir: state_dir.join("exports"),
        project_root,
        state_dir,
        data_dir,
        config_path,
        root_source,
        data_source,
        config_source,
    })
}

/// Flag beats a non-blank env value beats the fallback; relative values join onto `base`.
fn pick_path(
    flag: Option<&Path>,
    env_value: Option<String>,
    base: &Path,
    fallback: impl FnOnce() -> PathBuf,
) -> (PathBuf, ValueSource) {
    if let Some(path) = flag {
        return (absolutize(path, base), ValueSource::Flag);
    }
    match env_value.filter(|value| !value.trim().is_empty()) {
        Some(value) => (absolutize(Path::new(value.trim()), base), ValueSource::Env),
        None => (fallback(), ValueSource::Default),
    }
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    for dir in [&paths.state_dir, &paths.data_dir, &paths.exports_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config = options.materialize_config
        && (options.force || !paths.config_path.exists());
    if wrote_config {
        if let Some(parent) = paths.config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&paths.config_path, render_materialized_config())
            .with_context(|| format!("failed to write {}", paths.config_path.display()))?;
    }

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

pub fn render_materialized_config() -> String {
    format!(
        "# wikimigrate configuration (materialized by `wikimigrate init`)\n# {MIGRATIONS_POLICY_MESSAGE}\n\n[migration]\nvirtual_wiki = \"{}\"\nauthor_fallback = \"{}\"\nlocale = \"{}\"\n# importing_user = \"Admin\"\n# site_name = \"My Wiki\"\nrecord_import_version = false\n\n# Extra foreign prefixes, merged over the namespace aliases stored in the database:\n# [[namespaces.aliases]]\n# namespace_id = 4\n# alias = \"Wikipedia\"\n",
        crate::config::DEFAULT_VIRTUAL_WIKI,
        crate::config::DEFAULT_AUTHOR_FALLBACK,
        crate::config::DEFAULT_LOCALE,
    )
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
