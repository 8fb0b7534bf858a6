//! Static registry of declared services.
//!
//! Everything the runtime can dispatch to is registered here at startup,
//! either in code through [`ServiceRegistry::builder`] or from YAML
//! [`Manifest`]s. The registry is immutable once built.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::descriptor::{InterfaceDecl, ParamDescriptor};
use crate::executor::Implementation;
use crate::macros::{QueryMacros, TextProcessor, QUERY_MACROS, QUERY_MACROS_ALIAS};
use crate::sql::converter::{ColumnsConverter, ConverterRegistry, ResultConverter};

/// Resolves declared interfaces and their plain-method implementations.
pub trait ServiceDiscoverer: Send + Sync {
    /// Every declared interface that carries a service descriptor.
    fn discover_interfaces(&self) -> Vec<&InterfaceDecl>;

    /// The registered implementation of a plain-method interface.
    fn implementation_for(&self, type_name: &str) -> Option<Arc<Implementation>>;
}

/// A YAML service manifest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub interfaces: Vec<InterfaceDecl>,
    /// Named value types usable as `valueType:` on parameters.
    #[serde(default)]
    pub value_types: HashMap<String, ParamDescriptor>,
    /// Row types rendered as one JSON object per row, keyed by column name.
    #[serde(default)]
    pub row_types: Vec<String>,
}

impl Manifest {
    pub fn from_yaml_str(text: &str) -> Result<Self, RegistryError> {
        serde_yaml::from_str(text).map_err(|source| RegistryError::Parse {
            path: None,
            source,
        })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| RegistryError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Type '{0}' is declared more than once")]
    DuplicateType(String),

    #[error("Service descriptor on '{type_name}' has an empty {field}")]
    EmptyIdentity {
        type_name: String,
        field: &'static str,
    },

    #[error("Service {category}/{version}/{name} is declared by both '{first}' and '{second}'")]
    DuplicateService {
        category: String,
        version: String,
        name: String,
        first: String,
        second: String,
    },

    #[error("Implementation registered for undeclared type '{0}'")]
    UnknownImplementation(String),

    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest{}: {source}", .path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default())]
    Parse {
        path: Option<PathBuf>,
        #[source]
        source: serde_yaml::Error,
    },
}

/// The built, immutable registry.
pub struct ServiceRegistry {
    interfaces: Vec<InterfaceDecl>,
    index: HashMap<String, usize>,
    value_types: HashMap<String, ParamDescriptor>,
    implementations: HashMap<String, Arc<Implementation>>,
    converters: ConverterRegistry,
    text_processors: HashMap<String, Arc<dyn TextProcessor>>,
}

impl ServiceRegistry {
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::default()
    }

    /// A registry holding only the given manifests.
    pub fn from_manifests(manifests: Vec<Manifest>) -> Result<Self, RegistryError> {
        manifests
            .into_iter()
            .fold(Self::builder(), |b, m| b.manifest(m))
            .build()
    }

    /// Declared type by exact name.
    pub fn interface(&self, type_name: &str) -> Option<&InterfaceDecl> {
        self.index.get(type_name).map(|&i| &self.interfaces[i])
    }

    /// All declared types, in declaration order.
    pub fn interfaces(&self) -> &[InterfaceDecl] {
        &self.interfaces
    }

    pub fn value_type(&self, name: &str) -> Option<&ParamDescriptor> {
        self.value_types.get(name)
    }

    pub fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    /// Text processor by name, case-insensitive.
    pub fn text_processor(&self, name: &str) -> Option<Arc<dyn TextProcessor>> {
        self.text_processors.get(&name.to_ascii_lowercase()).cloned()
    }
}

impl ServiceDiscoverer for ServiceRegistry {
    fn discover_interfaces(&self) -> Vec<&InterfaceDecl> {
        self.interfaces
            .iter()
            .filter(|decl| !decl.services.is_empty())
            .collect()
    }

    fn implementation_for(&self, type_name: &str) -> Option<Arc<Implementation>> {
        self.implementations.get(type_name).cloned()
    }
}

pub struct ServiceRegistryBuilder {
    interfaces: Vec<InterfaceDecl>,
    value_types: HashMap<String, ParamDescriptor>,
    implementations: Vec<(String, Implementation)>,
    converters: ConverterRegistry,
    text_processors: HashMap<String, Arc<dyn TextProcessor>>,
}

impl Default for ServiceRegistryBuilder {
    fn default() -> Self {
        let macros: Arc<dyn TextProcessor> = Arc::new(QueryMacros::new());
        let mut text_processors = HashMap::new();
        text_processors.insert(QUERY_MACROS.to_string(), macros.clone());
        text_processors.insert(QUERY_MACROS_ALIAS.to_string(), macros);
        Self {
            interfaces: Vec::new(),
            value_types: HashMap::new(),
            implementations: Vec::new(),
            converters: ConverterRegistry::new(),
            text_processors,
        }
    }
}

impl ServiceRegistryBuilder {
    pub fn interface(mut self, decl: InterfaceDecl) -> Self {
        self.interfaces.push(decl);
        self
    }

    pub fn value_type(mut self, name: impl Into<String>, descriptor: ParamDescriptor) -> Self {
        self.value_types.insert(name.into(), descriptor);
        self
    }

    /// Attach the dispatch table for a plain-method interface.
    pub fn implementation(mut self, type_name: impl Into<String>, imp: Implementation) -> Self {
        self.implementations.push((type_name.into(), imp));
        self
    }

    /// Register `converter` as `<row_type>.Converter`.
    pub fn converter(mut self, row_type: &str, converter: Arc<dyn ResultConverter>) -> Self {
        self.converters.register(row_type, converter);
        self
    }

    pub fn text_processor(mut self, name: &str, processor: Arc<dyn TextProcessor>) -> Self {
        self.text_processors
            .insert(name.to_ascii_lowercase(), processor);
        self
    }

    pub fn manifest(mut self, manifest: Manifest) -> Self {
        self.interfaces.extend(manifest.interfaces);
        self.value_types.extend(manifest.value_types);
        for row_type in manifest.row_types {
            if !self.converters.contains(&row_type) {
                self.converters.register(&row_type, Arc::new(ColumnsConverter));
            }
        }
        self
    }

    /// Structural checks only; descriptors are validated on first use.
    pub fn build(self) -> Result<ServiceRegistry, RegistryError> {
        let mut index = HashMap::with_capacity(self.interfaces.len());
        let mut services: HashMap<(String, String, String), String> = HashMap::new();

        for (i, decl) in self.interfaces.iter().enumerate() {
            if index.insert(decl.type_name.clone(), i).is_some() {
                return Err(RegistryError::DuplicateType(decl.type_name.clone()));
            }
            for service in &decl.services {
                let d = &service.descriptor;
                for (field, value) in [
                    ("category", &d.category),
                    ("version", &d.version),
                    ("name", &d.name),
                ] {
                    if value.trim().is_empty() {
                        return Err(RegistryError::EmptyIdentity {
                            type_name: decl.type_name.clone(),
                            field,
                        });
                    }
                }
                let key = (
                    d.category.to_ascii_lowercase(),
                    d.version.to_ascii_lowercase(),
                    d.name.to_ascii_lowercase(),
                );
                if let Some(first) = services.insert(key, decl.type_name.clone()) {
                    return Err(RegistryError::DuplicateService {
                        category: d.category.clone(),
                        version: d.version.clone(),
                        name: d.name.clone(),
                        first,
                        second: decl.type_name.clone(),
                    });
                }
            }
        }

        let mut implementations = HashMap::new();
        for (type_name, imp) in self.implementations {
            if !index.contains_key(&type_name) {
                return Err(RegistryError::UnknownImplementation(type_name));
            }
            implementations.insert(type_name, Arc::new(imp));
        }

        tracing::debug!(
            "Built service registry: {} type(s), {} value type(s), {} implementation(s)",
            self.interfaces.len(),
            self.value_types.len(),
            implementations.len()
        );

        Ok(ServiceRegistry {
            interfaces: self.interfaces,
            index,
            value_types: self.value_types,
            implementations,
            converters: self.converters,
            text_processors: self.text_processors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ServiceDecl, ServiceDescriptor};

    fn service(category: &str, version: &str, name: &str) -> ServiceDecl {
        ServiceDecl::json(ServiceDescriptor::new(category, version, name))
    }

    #[test]
    fn test_manifest_loading() {
        let manifest = Manifest::from_yaml_str(
            r#"
valueTypes:
  UserId: { dbType: int }
rowTypes: [User]
interfaces:
  - type: IUsers
    services:
      - { category: users, version: v1, name: queries, sql: { connection: main } }
  - type: IBase
"#,
        )
        .unwrap();
        let registry = ServiceRegistry::from_manifests(vec![manifest]).unwrap();

        assert!(registry.interface("IUsers").is_some());
        assert!(registry.interface("iusers").is_none());
        assert_eq!(registry.discover_interfaces().len(), 1);
        assert!(registry.value_type("UserId").is_some());
        assert!(registry.converters().contains("User"));
        assert!(registry.text_processor("MiniLisp").is_some());
        assert!(registry.text_processor("query-macros").is_some());
    }

    #[test]
    fn test_structural_checks() {
        let dup = ServiceRegistry::builder()
            .interface(InterfaceDecl::new("IA"))
            .interface(InterfaceDecl::new("IA"))
            .build();
        assert!(matches!(dup, Err(RegistryError::DuplicateType(t)) if t == "IA"));

        let empty = ServiceRegistry::builder()
            .interface(InterfaceDecl::new("IA").service(service("c", " ", "n")))
            .build();
        assert!(matches!(
            empty,
            Err(RegistryError::EmptyIdentity { field: "version", .. })
        ));

        let clash = ServiceRegistry::builder()
            .interface(InterfaceDecl::new("IA").service(service("c", "v1", "n")))
            .interface(InterfaceDecl::new("IB").service(service("C", "V1", "N")))
            .build();
        assert!(matches!(clash, Err(RegistryError::DuplicateService { .. })));

        let orphan = ServiceRegistry::builder()
            .implementation("IMissing", Implementation::new())
            .build();
        assert!(matches!(orphan, Err(RegistryError::UnknownImplementation(_))));
    }

    #[test]
    fn test_manifest_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "interfaces: [ {").unwrap();
        let err = Manifest::from_yaml_file(&path).unwrap_err();
        assert!(err.to_string().contains("bad.yaml"));
    }
}
