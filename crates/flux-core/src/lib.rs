pub mod error;
pub mod memory;
pub mod store;
pub mod timeout;

pub use error::{FluxError, Result};
pub use memory::MemoryStore;
pub use store::{
    Collection, Document, DocumentStore, Filter, Page, Query, Repository, Sort, SortDirection,
};
pub use timeout::bounded;
