//! Catalog core - dataset versions, attribute schema and the drug store.
//!
//! Everything here is storage logic over a `SeaORM` connection, independent of how
//! data is imported or searched.

pub mod cache;
pub mod code_system;
pub mod dataset_version;
pub mod drug;
pub mod lookup;
pub mod pagination;
pub mod schema;

pub use cache::SchemaCache;
pub use code_system::CodeSystemDefinition;
pub use dataset_version::VersionFilter;
pub use drug::{
    AttrInput, DrugRecord, DrugScope, GetMultipleOptions, NewCode, NewDrug, ResolvedAttr,
};
pub use lookup::LookupItem;
pub use pagination::{PaginatedResult, Pagination};
pub use schema::{AttrValue, FieldDefinition, SourceSchema};
