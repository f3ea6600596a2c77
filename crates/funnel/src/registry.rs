//! Name-keyed table of registered operations.
//!
//! Two ways in: [`OperationRegistry::from_operations`] takes descriptors the
//! host built directly, and [`OperationRegistry::load`] walks a directory of
//! `operation.toml` manifests whose `export` keys pick operations out of an
//! [`OperationCatalog`]. Either way the table is built once and read-only
//! afterwards.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::RegistryError;
use crate::operation::{Operation, OperationDescriptor};
use crate::types::FunctionSchema;

/// File that marks a directory as an operation source
pub const MANIFEST_FILE: &str = "operation.toml";

/// Operations compiled into the host, keyed by export symbol.
#[derive(Debug, Default)]
pub struct OperationCatalog {
    exports: BTreeMap<String, OperationDescriptor>,
}

impl OperationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation under its own name as export symbol.
    pub fn register<O: Operation>(&mut self, operation: O) -> Result<(), RegistryError> {
        let descriptor = OperationDescriptor::new(operation)?;
        let symbol = descriptor.name().to_string();
        self.insert(symbol, descriptor)
    }

    /// Register a prebuilt descriptor under an explicit export symbol.
    pub fn insert(
        &mut self,
        symbol: impl Into<String>,
        descriptor: OperationDescriptor,
    ) -> Result<(), RegistryError> {
        match self.exports.entry(symbol.into()) {
            Entry::Occupied(e) => Err(RegistryError::DuplicateOperation(e.key().clone())),
            Entry::Vacant(e) => {
                e.insert(descriptor);
                Ok(())
            }
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&OperationDescriptor> {
        self.exports.get(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.exports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    /// Every cataloged operation, ready for [`OperationRegistry::from_operations`].
    pub fn into_descriptors(self) -> Vec<OperationDescriptor> {
        self.exports.into_values().collect()
    }
}

/// Contents of an `operation.toml`
#[derive(Debug, Deserialize)]
struct Manifest {
    /// Export symbol to look up in the catalog
    export: Option<String>,

    /// Replaces the operation's own description
    description: Option<String>,
}

/// Loaded operations, sorted by name.
#[derive(Debug)]
pub struct OperationRegistry {
    operations: BTreeMap<String, OperationDescriptor>,
}

impl OperationRegistry {
    /// Build from descriptors the host constructed itself.
    pub fn from_operations(
        descriptors: impl IntoIterator<Item = OperationDescriptor>,
    ) -> Result<Self, RegistryError> {
        let mut operations = BTreeMap::new();
        for descriptor in descriptors {
            match operations.entry(descriptor.name().to_string()) {
                Entry::Occupied(e) => {
                    return Err(RegistryError::DuplicateOperation(e.key().clone()));
                }
                Entry::Vacant(e) => {
                    debug!(operation = %descriptor.name(), "registered operation");
                    e.insert(descriptor);
                }
            }
        }

        if operations.is_empty() {
            return Err(RegistryError::NoOperationsFound);
        }

        Ok(Self { operations })
    }

    /// Walk `root` for operation manifests and resolve them against `catalog`.
    ///
    /// Each resolved descriptor is moved out of the catalog into the registry.
    pub fn load(root: &Path, mut catalog: OperationCatalog) -> Result<Self, RegistryError> {
        if !root.is_dir() {
            return Err(RegistryError::SourceRootNotDirectory(root.to_path_buf()));
        }

        let mut descriptors = Vec::new();
        let mut taken = BTreeSet::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() || entry.file_name() != MANIFEST_FILE {
                continue;
            }
            descriptors.push(load_manifest(entry.path(), &mut catalog, &mut taken)?);
        }

        let registry = Self::from_operations(descriptors)?;
        info!(
            root = %root.display(),
            count = registry.len(),
            "loaded operations"
        );
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Operation names in ascending order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &OperationDescriptor> {
        self.operations.values()
    }

    /// Every parameter schema, ordered by operation name
    pub fn schemas(&self) -> Vec<FunctionSchema> {
        self.operations.values().map(|d| d.schema().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

fn load_manifest(
    path: &Path,
    catalog: &mut OperationCatalog,
    taken: &mut BTreeSet<String>,
) -> Result<OperationDescriptor, RegistryError> {
    let source_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let contents = std::fs::read_to_string(path).map_err(|e| RegistryError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let manifest: Manifest = toml::from_str(&contents).map_err(|e| RegistryError::InvalidManifest {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let symbol = manifest
        .export
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| missing_export(&source_dir, None))?;
    let descriptor = match catalog.exports.remove(symbol) {
        Some(descriptor) => descriptor,
        None if taken.contains(symbol) => {
            return Err(RegistryError::DuplicateOperation(symbol.to_string()));
        }
        None => return Err(missing_export(&source_dir, Some(symbol))),
    };
    taken.insert(symbol.to_string());

    debug!(source = %source_dir.display(), export = symbol, "resolved operation manifest");

    Ok(match manifest.description {
        Some(description) => descriptor.described_as(description),
        None => descriptor,
    })
}

fn missing_export(source_dir: &Path, symbol: Option<&str>) -> RegistryError {
    RegistryError::MissingOperationExport {
        path: PathBuf::from(source_dir),
        symbol: symbol.map(str::to_string),
    }
}
