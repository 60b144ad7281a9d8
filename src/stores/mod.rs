//! External collaborators of the scheduler.
//!
//! The durable job table, the blob store, the parameter store, and the
//! token service are deployment concerns. Each is expressed as an async
//! trait here, with an in-memory implementation used by the dev server
//! and by tests.

pub mod blob;
pub mod params;
pub mod table;
pub mod tokens;

pub use blob::{BlobStore, MemoryBlobStore};
pub use params::{MemoryParameterStore, ParameterStore};
pub use table::{AttrValue, JobTable, MemoryJobTable, TableItem};
pub use tokens::{MemoryTokenService, TokenInfo, TokenService};
