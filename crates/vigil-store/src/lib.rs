//! vigil-store: concrete persistence behind the `vigil-core` store traits.
//!
//! - [`SqliteStore`]: identities and the recognition log in one SQLite file.
//! - [`FsImageStore`]: training photos under `<root>/<role>/<name>/`.
//! - [`JsonHeightProfiles`]: per-label height samples in a JSON file.

pub mod db;
pub mod images;
pub mod profiles;

pub use db::{HistoryEntry, SqliteStore};
pub use images::FsImageStore;
pub use profiles::JsonHeightProfiles;
