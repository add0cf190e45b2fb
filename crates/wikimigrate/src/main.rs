use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use wikimigrate_core::config::{
    MigrationConfig, MigrationConfigPatch, load_config, patch_migration_config,
};
use wikimigrate_core::error::MigrationError;
use wikimigrate_core::model::{Pagination, format_timestamp};
use wikimigrate_core::orchestrator::{ImportIdentity, Migrator};
use wikimigrate_core::repository::TopicRepository;
use wikimigrate_core::runtime::{
    InitOptions, MIGRATIONS_POLICY_MESSAGE, PathOverrides, ResolutionContext, ResolvedPaths,
    ensure_runtime_ready, init_layout, inspect_runtime, normalize_for_display, resolve_paths,
};
use wikimigrate_core::schema::{pending_migration_count, run_migrations};
use wikimigrate_core::store::SqliteTopicStore;

#[derive(Debug, Parser)]
#[command(
    name = "wikimigrate",
    version,
    about = "Import and export MediaWiki XML dumps against a versioned topic store"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "NAME", help = "Virtual wiki to operate on")]
    virtual_wiki: Option<String>,
    #[arg(long, global = true, help = "Print machine-readable JSON")]
    json: bool,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    virtual_wiki: Option<String>,
    json: bool,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            virtual_wiki: cli.virtual_wiki.clone(),
            json: cli.json,
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    Status,
    Db(DbArgs),
    Namespaces(NamespacesArgs),
    Users(UsersArgs),
    #[command(about = "Import a MediaWiki XML export")]
    Import(ImportArgs),
    #[command(about = "Export topics as a MediaWiki XML document")]
    Export(ExportArgs),
    History(HistoryArgs),
    Delete(DeleteArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
    #[arg(long, help = "Skip writing .wikimigrate/config.toml")]
    no_config: bool,
    #[arg(long, value_name = "LOCALE", help = "Record the default locale in the config")]
    locale: Option<String>,
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Stats,
    Migrate,
}

#[derive(Debug, Args)]
struct NamespacesArgs {
    #[command(subcommand)]
    command: Option<NamespacesSubcommand>,
}

#[derive(Debug, Subcommand)]
enum NamespacesSubcommand {
    List,
    #[command(name = "add-alias")]
    AddAlias {
        namespace_id: i32,
        alias: String,
        #[arg(long, help = "Apply to every virtual wiki")]
        global: bool,
        #[arg(long, help = "Record the alias in config.toml instead of the database")]
        config_only: bool,
    },
}

#[derive(Debug, Args)]
struct UsersArgs {
    #[command(subcommand)]
    command: UsersSubcommand,
}

#[derive(Debug, Subcommand)]
enum UsersSubcommand {
    Add { login: String },
}

#[derive(Debug, Args)]
struct ImportArgs {
    file: PathBuf,
    #[arg(long, value_name = "LOGIN", help = "Local user performing the import")]
    user: Option<String>,
    #[arg(long, help = "Append a version recording the import to every page")]
    record_import_version: bool,
}

#[derive(Debug, Args)]
struct ExportArgs {
    file: PathBuf,
    #[arg(required = true, value_name = "TOPIC")]
    topics: Vec<String>,
    #[arg(long, help = "Write only the current version of each topic")]
    current_only: bool,
}

#[derive(Debug, Args)]
struct HistoryArgs {
    topic: String,
    #[arg(long, default_value_t = 50)]
    limit: usize,
    #[arg(long, default_value_t = 0)]
    offset: usize,
    #[arg(long, help = "List newest versions first")]
    newest_first: bool,
    #[arg(long, help = "Include deleted topics")]
    include_deleted: bool,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    topic: String,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Stats => run_db_stats(&runtime),
            DbSubcommand::Migrate => run_db_migrate(&runtime),
        },
        Some(Commands::Namespaces(NamespacesArgs { command })) => match command {
            None | Some(NamespacesSubcommand::List) => run_namespaces_list(&runtime),
            Some(NamespacesSubcommand::AddAlias {
                namespace_id,
                alias,
                global,
                config_only,
            }) => run_namespaces_add_alias(&runtime, namespace_id, &alias, global, config_only),
        },
        Some(Commands::Users(UsersArgs { command })) => match command {
            UsersSubcommand::Add { login } => run_users_add(&runtime, &login),
        },
        Some(Commands::Import(args)) => run_import(&runtime, args),
        Some(Commands::Export(args)) => run_export(&runtime, args),
        Some(Commands::History(args)) => run_history(&runtime, args),
        Some(Commands::Delete(DeleteArgs { topic })) => run_delete(&runtime, &topic),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("WIKIMIGRATE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;
    let patched = if args.no_config {
        false
    } else {
        patch_migration_config(
            &paths.config_path,
            &MigrationConfigPatch {
                set_virtual_wiki: runtime.virtual_wiki.clone(),
                set_locale: args.locale.clone(),
                add_aliases: Vec::new(),
            },
        )?
    };

    if runtime.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "project_root": normalize_path(&paths.project_root),
                "db_path": normalize_path(&paths.db_path),
                "config_path": normalize_path(&paths.config_path),
                "created_dirs": report.created_dirs.len(),
                "wrote_config": report.wrote_config,
                "patched_config": patched,
            }))?
        );
    } else {
        println!("Initialized wikimigrate runtime layout");
        println!("project_root: {}", normalize_path(&paths.project_root));
        println!("state_dir: {}", normalize_path(&paths.state_dir));
        println!("data_dir: {}", normalize_path(&paths.data_dir));
        println!("exports_dir: {}", normalize_path(&paths.exports_dir));
        println!("db_path: {}", normalize_path(&paths.db_path));
        println!("config_path: {}", normalize_path(&paths.config_path));
        println!("created_dirs: {}", report.created_dirs.len());
        println!("wrote_config: {}", report.wrote_config);
        println!("patched_config: {patched}");
        println!("policy: {MIGRATIONS_POLICY_MESSAGE}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    let pending = pending_migration_count(&paths.db_path)?;

    if runtime.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "project_root": normalize_path(&paths.project_root),
                "project_root_exists": status.project_root_exists,
                "state_dir_exists": status.state_dir_exists,
                "data_dir_exists": status.data_dir_exists,
                "db_exists": status.db_exists,
                "db_size_bytes": status.db_size_bytes,
                "config_exists": status.config_exists,
                "pending_migrations": pending,
                "warnings": status.warnings,
            }))?
        );
    } else {
        println!("runtime status");
        println!("project_root: {}", normalize_path(&paths.project_root));
        println!(
            "project_root_exists: {}",
            format_flag(status.project_root_exists)
        );
        println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
        println!("data_dir_exists: {}", format_flag(status.data_dir_exists));
        println!("db_exists: {}", format_flag(status.db_exists));
        println!(
            "db_size_bytes: {}",
            status
                .db_size_bytes
                .map(|size| size.to_string())
                .unwrap_or_else(|| "n/a".to_string())
        );
        println!("config_exists: {}", format_flag(status.config_exists));
        println!("pending_migrations: {pending}");
        if !status.warnings.is_empty() {
            println!("warnings:");
            for warning in &status.warnings {
                println!("  - {warning}");
            }
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_migrate(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = run_migrations(&paths.db_path)?;

    if runtime.json {
        let applied: Vec<_> = report
            .applied
            .iter()
            .map(|migration| json!({ "version": migration.version, "name": migration.name }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "db_path": normalize_path(&paths.db_path),
                "applied": applied,
                "current_version": report.current_version,
            }))?
        );
    } else {
        println!("db migrate");
        println!("db_path: {}", normalize_path(&paths.db_path));
        println!("applied: {}", report.applied.len());
        for migration in &report.applied {
            println!(
                "applied.migration: v{:03}_{}",
                migration.version, migration.name
            );
        }
        println!("current_version: {}", report.current_version);
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, store) = open_store(runtime)?;
    let stats = store.stats()?;

    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("db stats");
        println!("db_path: {}", normalize_path(store.db_path()));
        println!("namespaces: {}", stats.namespaces);
        println!("namespace_aliases: {}", stats.namespace_aliases);
        println!("users: {}", stats.users);
        println!("live_topics: {}", stats.live_topics);
        println!("deleted_topics: {}", stats.deleted_topics);
        println!("topic_versions: {}", stats.topic_versions);
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_namespaces_list(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, store) = open_store(runtime)?;
    let config = load_runtime_config(&paths)?;
    let virtual_wiki = virtual_wiki(runtime, &config);
    let namespaces = store.lookup_namespaces(&virtual_wiki)?;

    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&namespaces)?);
    } else {
        println!("namespaces");
        println!("virtual_wiki: {virtual_wiki}");
        for namespace in &namespaces {
            let name = if namespace.is_main() {
                "<main>"
            } else {
                namespace.name.as_str()
            };
            if namespace.aliases.is_empty() {
                println!("namespace.{}: {name}", namespace.id);
            } else {
                println!(
                    "namespace.{}: {name} (aliases: {})",
                    namespace.id,
                    namespace.aliases.join(", ")
                );
            }
        }
        for alias in &config.namespaces.aliases {
            println!(
                "config.alias: {} -> namespace {}",
                alias.alias, alias.namespace_id
            );
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_namespaces_add_alias(
    runtime: &RuntimeOptions,
    namespace_id: i32,
    alias: &str,
    global: bool,
    config_only: bool,
) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    if config_only {
        let wrote = patch_migration_config(
            &paths.config_path,
            &MigrationConfigPatch {
                add_aliases: vec![wikimigrate_core::config::NamespaceAlias {
                    namespace_id,
                    alias: alias.to_string(),
                }],
                ..MigrationConfigPatch::default()
            },
        )?;
        println!("config_path: {}", normalize_path(&paths.config_path));
        println!("wrote_config: {wrote}");
        return Ok(());
    }

    let (_, store) = open_store(runtime)?;
    let config = load_runtime_config(&paths)?;
    let scope = if global {
        String::new()
    } else {
        virtual_wiki(runtime, &config)
    };
    let outcome = store.add_namespace_alias(&scope, namespace_id, alias)?;
    println!("namespace_id: {namespace_id}");
    println!("alias: {alias}");
    println!(
        "scope: {}",
        if scope.is_empty() { "<all virtual wikis>" } else { scope.as_str() }
    );
    println!("outcome: {outcome:?}");
    Ok(())
}

fn run_users_add(runtime: &RuntimeOptions, login: &str) -> Result<()> {
    let (_, store) = open_store(runtime)?;
    let user = store.register_user(login)?;
    if runtime.json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        println!("user_id: {}", user.id);
        println!("login: {}", user.login);
    }
    Ok(())
}

fn run_import(runtime: &RuntimeOptions, args: ImportArgs) -> Result<()> {
    let (paths, mut store) = open_store(runtime)?;
    let config = load_runtime_config(&paths)?;
    let virtual_wiki = virtual_wiki(runtime, &config);
    let mut settings = config.migrator_settings();
    settings.record_import_version |= args.record_import_version;

    let login = args.user.clone().or_else(|| config.importing_user());
    let importing_user = match login.as_deref() {
        Some(login) => Some(store.lookup_user(login)?.with_context(|| {
            format!("unknown importing user {login}; run `wikimigrate users add {login}`")
        })?),
        None => None,
    };
    let author_fallback = config.author_fallback();
    let locale = config.locale();
    let identity = ImportIdentity {
        importing_user: importing_user.as_ref(),
        author_fallback: &author_fallback,
        locale: &locale,
    };

    let result =
        Migrator::new(&mut store, settings).import_from_file(&args.file, &virtual_wiki, &identity);
    let topics = match result {
        Ok(topics) => topics,
        Err(error) => {
            report_partial_import(runtime, &error);
            return Err(error.into());
        }
    };

    if runtime.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "file": normalize_path(&args.file),
                "virtual_wiki": virtual_wiki,
                "topics": topics,
            }))?
        );
    } else {
        println!("import");
        println!("file: {}", normalize_path(&args.file));
        println!("virtual_wiki: {virtual_wiki}");
        println!("topics.count: {}", topics.len());
        for topic in &topics {
            println!("topics.name: {topic}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn report_partial_import(runtime: &RuntimeOptions, error: &MigrationError) {
    let committed = error.committed_topics();
    if committed.is_empty() {
        return;
    }
    if runtime.json {
        if let Ok(rendered) = serde_json::to_string_pretty(&json!({ "committed": committed })) {
            println!("{rendered}");
        }
    } else {
        println!("committed.count: {}", committed.len());
        for topic in committed {
            println!("committed.name: {topic}");
        }
    }
}

fn run_export(runtime: &RuntimeOptions, args: ExportArgs) -> Result<()> {
    let (paths, mut store) = open_store(runtime)?;
    let config = load_runtime_config(&paths)?;
    let virtual_wiki = virtual_wiki(runtime, &config);
    let settings = config.migrator_settings();

    Migrator::new(&mut store, settings).export_to_file(
        &args.file,
        &virtual_wiki,
        &args.topics,
        args.current_only,
    )?;

    if runtime.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "file": normalize_path(&args.file),
                "virtual_wiki": virtual_wiki,
                "topics": args.topics,
                "current_only": args.current_only,
            }))?
        );
    } else {
        println!("export");
        println!("file: {}", normalize_path(&args.file));
        println!("virtual_wiki: {virtual_wiki}");
        println!("topics.count: {}", args.topics.len());
        println!("current_only: {}", args.current_only);
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_history(runtime: &RuntimeOptions, args: HistoryArgs) -> Result<()> {
    let (paths, store) = open_store(runtime)?;
    let config = load_runtime_config(&paths)?;
    let virtual_wiki = virtual_wiki(runtime, &config);
    let topic_name = args.topic.trim();
    if topic_name.is_empty() {
        bail!("history requires a non-empty topic name");
    }

    let Some(topic) = store.lookup_topic(&virtual_wiki, topic_name, args.include_deleted)? else {
        bail!("topic {topic_name} not found in virtual wiki {virtual_wiki}");
    };
    let versions = store.get_topic_history(
        &topic,
        Pagination::new(args.limit, args.offset),
        args.newest_first,
    )?;

    if runtime.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "topic": topic,
                "versions": versions,
            }))?
        );
    } else {
        println!("history");
        println!("topic: {}", topic.name);
        println!("deleted: {}", format_flag(topic.is_deleted()));
        println!(
            "current_version_id: {}",
            topic
                .current_version_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "n/a".to_string())
        );
        println!("versions.count: {}", versions.len());
        for version in &versions {
            println!(
                "version.{}: {} by {}{}{}",
                version.id,
                format_timestamp(&version.edited_at),
                version.author.display_name(),
                if version.minor { " (minor)" } else { "" },
                version
                    .comment
                    .as_deref()
                    .map(|comment| format!(" \"{comment}\""))
                    .unwrap_or_default()
            );
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_delete(runtime: &RuntimeOptions, topic: &str) -> Result<()> {
    let (paths, store) = open_store(runtime)?;
    let config = load_runtime_config(&paths)?;
    let virtual_wiki = virtual_wiki(runtime, &config);
    if !store.delete_topic(&virtual_wiki, topic)? {
        bail!("topic {topic} not found in virtual wiki {virtual_wiki}");
    }
    println!("deleted: {topic}");
    Ok(())
}

fn open_store(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, SqliteTopicStore)> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    ensure_runtime_ready(&paths, &status)?;
    let store = SqliteTopicStore::open(&paths.db_path)?;
    Ok((paths, store))
}

fn load_runtime_config(paths: &ResolvedPaths) -> Result<MigrationConfig> {
    load_config(&paths.config_path)
}

fn virtual_wiki(runtime: &RuntimeOptions, config: &MigrationConfig) -> String {
    runtime
        .virtual_wiki
        .clone()
        .unwrap_or_else(|| config.virtual_wiki())
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics && !runtime.json {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn normalize_path(path: &Path) -> String {
    normalize_for_display(path)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Commands, DbSubcommand, NamespacesSubcommand};

    #[test]
    fn parses_export_with_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "wikimigrate",
            "export",
            "out.xml",
            "Talk:Foo",
            "Bar",
            "--current-only",
            "--json",
            "--virtual-wiki",
            "de",
        ])
        .expect("parse");
        assert!(cli.json);
        assert_eq!(cli.virtual_wiki.as_deref(), Some("de"));
        match cli.command {
            Some(Commands::Export(args)) => {
                assert_eq!(args.topics, vec!["Talk:Foo".to_string(), "Bar".to_string()]);
                assert!(args.current_only);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn export_requires_at_least_one_topic() {
        assert!(Cli::try_parse_from(["wikimigrate", "export", "out.xml"]).is_err());
    }

    #[test]
    fn parses_db_and_namespace_subcommands() {
        let cli = Cli::try_parse_from(["wikimigrate", "db", "migrate"]).expect("parse");
        assert!(matches!(
            cli.command,
            Some(Commands::Db(super::DbArgs {
                command: DbSubcommand::Migrate
            }))
        ));

        let cli = Cli::try_parse_from([
            "wikimigrate",
            "namespaces",
            "add-alias",
            "4",
            "Wikipedia",
            "--global",
        ])
        .expect("parse");
        match cli.command {
            Some(Commands::Namespaces(args)) => match args.command {
                Some(NamespacesSubcommand::AddAlias {
                    namespace_id,
                    alias,
                    global,
                    config_only,
                }) => {
                    assert_eq!(namespace_id, 4);
                    assert_eq!(alias, "Wikipedia");
                    assert!(global);
                    assert!(!config_only);
                }
                other => panic!("unexpected namespaces command {other:?}"),
            },
            other => panic!("unexpected command {other:?}"),
        }
    }
}
