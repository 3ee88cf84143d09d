//! Encrypted record storage partitioned by owner and category.
//!
//! # Directory layout
//!
//! ```text
//! {root}/
//! ├── healthvault.json        optional configuration
//! ├── accounts.json           account registry
//! ├── audit.log               hash-chained audit trail
//! ├── _index.json             partition index
//! └── {owner}/
//!     └── {category}/...
//!         └── {identifier}.json
//! ```
//!
//! Names starting with `.` or `_` are reserved, so vault files and
//! in-flight temp files never collide with an owner or record.
//!
//! # Modules
//!
//! - [`key`] — storage keys and segment validation.
//! - [`record`] — the JSON record envelope.
//! - [`index`] — the persisted partition index.
//! - [`filter`] — advisory query filters.
//! - [`store`] — the encrypted store itself.

pub mod filter;
pub mod fs;
pub mod index;
pub mod key;
pub mod record;
pub mod store;

pub use filter::QueryFilter;
pub use index::PartitionIndex;
pub use key::StorageKey;
pub use record::{Metadata, StoredRecord};
pub use store::{EncryptedStore, RecordEntry};
