pub mod config;
pub mod error;
pub mod model;
pub mod namespace;
pub mod orchestrator;
pub mod repository;
pub mod runtime;
pub mod schema;
pub mod sequence;
pub mod store;
pub mod wikitext;
pub mod xml_reader;
pub mod xml_writer;

pub use error::MigrationError;
pub use orchestrator::{Migrator, export_to_file, import_from_file};
pub use repository::TopicRepository;
pub use store::SqliteTopicStore;
