mod catalog;
mod selectors;
mod table;

pub use catalog::{AdapterCatalog, AdapterSpec};
pub use selectors::{AdapterSelection, AdapterSelector};
pub use table::{AdapterTable, NamedAdapter};
