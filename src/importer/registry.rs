//! Static registry of importer plugins, selected by name from configuration.

use super::{DrugImporter, TomlFixtureImporter};
use crate::errors::{Error, Result};
use std::sync::Arc;

type ImporterConstructor = fn() -> Arc<dyn DrugImporter>;

fn toml_fixture() -> Arc<dyn DrugImporter> {
    Arc::new(TomlFixtureImporter::new())
}

const IMPORTERS: &[(&str, ImporterConstructor)] = &[(TomlFixtureImporter::NAME, toml_fixture)];

/// Names of all registered importers.
pub fn importer_names() -> impl Iterator<Item = &'static str> {
    IMPORTERS.iter().map(|(name, _)| *name)
}

/// Instantiates the importer registered as `name`.
pub fn importer_by_name(name: &str) -> Result<Arc<dyn DrugImporter>> {
    IMPORTERS
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, constructor)| constructor())
        .ok_or_else(|| Error::UnknownImporter {
            name: name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_importer_by_name() {
        let importer = importer_by_name("toml_fixture");
        assert!(matches!(importer, Ok(ref i) if i.name() == "toml_fixture"));
        assert!(importer_names().any(|name| name == "toml_fixture"));

        let unknown = importer_by_name("pharmindex");
        assert!(matches!(unknown, Err(Error::UnknownImporter { ref name }) if name == "pharmindex"));
    }
}
