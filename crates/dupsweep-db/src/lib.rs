//! SQLite persistence for the dupsweep catalog.
//!
//! The catalog is stored relationally: one row per content record (unique
//! digest), per disk (unique UUID) and per tree node, with child rows
//! cascading away when their parent row is deleted. Saving replaces the
//! stored image in one transaction; loading rebuilds the catalog and checks
//! its integrity before handing it out.

mod error;
mod sqlite;

pub use error::{DbError, DbResult};
pub use sqlite::{CatalogDb, SCHEMA_VERSION};
