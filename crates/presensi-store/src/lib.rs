//! presensi-store: SQLite persistence for the attendance catalogue.

mod sqlite;

pub use sqlite::SqliteStore;
