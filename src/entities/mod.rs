//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod attr_field_definition;
pub mod code_system;
pub mod dataset_version;
pub mod drug;
pub mod drug_attr;
pub mod drug_code;
pub mod drug_search_text;
pub mod lookup_value;
pub mod search_engine_state;

// Re-export specific types to avoid conflicts
pub use attr_field_definition::{
    Column as AttrFieldDefinitionColumn, Entity as AttrFieldDefinition,
    Model as AttrFieldDefinitionModel, ValueType,
};
pub use code_system::{Column as CodeSystemColumn, Entity as CodeSystem, Model as CodeSystemModel};
pub use dataset_version::{
    Column as DatasetVersionColumn, Entity as DatasetVersion, ImportStatus,
    Model as DatasetVersionModel,
};
pub use drug::{Column as DrugColumn, Entity as Drug, Model as DrugModel};
pub use drug_attr::{AttrKind, Column as DrugAttrColumn, Entity as DrugAttr, Model as DrugAttrModel};
pub use drug_code::{Column as DrugCodeColumn, Entity as DrugCode, Model as DrugCodeModel};
pub use drug_search_text::{
    Column as DrugSearchTextColumn, Entity as DrugSearchText, Model as DrugSearchTextModel,
};
pub use lookup_value::{
    Column as LookupValueColumn, Entity as LookupValue, Model as LookupValueModel,
};
pub use search_engine_state::{
    Column as SearchEngineStateColumn, Entity as SearchEngineState,
    Model as SearchEngineStateModel,
};
