//! Descriptor validation with a process-lifetime cache.
//!
//! [`Validator`] checks a declaration once, on first use, and caches the
//! validated form. Every later lookup of the same interface or method gets
//! the same `Arc` without repeating any work, including command compilation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cache::OnceMap;
use crate::config::{ConnectionTarget, Settings};
use crate::descriptor::{
    HttpVerb, InterfaceDecl, MethodDecl, ParamDescriptor, ReturnType, ServiceDescriptor,
    ServiceKind, SqlServiceDecl, TypeKind,
};
use crate::error::DescriptorError;
use crate::locator;
use crate::registry::ServiceRegistry;
use crate::sql::compiler::{CompiledCommand, SqlParameter};
use crate::sql::source::{CommandTextSource, FileCommandSource};

/// A validated interface.
#[derive(Debug)]
pub struct ValidInterface {
    pub type_name: String,
    pub service: ServiceDescriptor,
    /// Database-command defaults; `None` for plain-method interfaces.
    pub sql: Option<SqlServiceDecl>,
    /// Names of methods carrying a transport verb, sorted.
    pub method_names: Vec<String>,
}

impl ValidInterface {
    pub fn is_sql(&self) -> bool {
        self.sql.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ValidParam {
    pub name: String,
    pub descriptor: ParamDescriptor,
    pub optional: bool,
}

/// A validated method, with its compiled command for the SQL family.
#[derive(Debug)]
pub struct ValidMethod {
    pub interface: Arc<ValidInterface>,
    /// Declared (canonical) method name.
    pub name: String,
    pub verb: HttpVerb,
    pub returns: String,
    pub parameters: Vec<ValidParam>,
    pub command: Option<Arc<CompiledCommand>>,
}

impl ValidMethod {
    pub fn has_side_effects(&self) -> bool {
        match &self.command {
            Some(command) => command.has_side_effects(),
            None => self.verb != HttpVerb::Get,
        }
    }
}

pub struct Validator {
    registry: Arc<ServiceRegistry>,
    settings: Arc<Settings>,
    command_source: Option<Arc<dyn CommandTextSource>>,
    interfaces: OnceMap<String, ValidInterface>,
    method_names: OnceMap<(String, String), String>,
    methods: OnceMap<(String, String), ValidMethod>,
    validations: AtomicUsize,
}

impl Validator {
    pub fn new(registry: Arc<ServiceRegistry>, settings: Arc<Settings>) -> Self {
        let command_source = settings
            .command_root
            .as_ref()
            .map(|root| Arc::new(FileCommandSource::new(root)) as Arc<dyn CommandTextSource>);
        Self {
            registry,
            settings,
            command_source,
            interfaces: OnceMap::new(),
            method_names: OnceMap::new(),
            methods: OnceMap::new(),
            validations: AtomicUsize::new(0),
        }
    }

    pub fn with_command_source(mut self, source: Arc<dyn CommandTextSource>) -> Self {
        self.command_source = Some(source);
        self
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// How many times method validation work actually ran.
    pub fn validations(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }

    pub fn validate_interface(&self, type_name: &str) -> Result<Arc<ValidInterface>, DescriptorError> {
        self.interfaces
            .get_or_try_init(&type_name.to_string(), || self.check_interface(type_name))
    }

    pub fn validate_method(
        &self,
        type_name: &str,
        method: &str,
    ) -> Result<Arc<ValidMethod>, DescriptorError> {
        let requested = (type_name.to_string(), method.to_string());
        let canonical = self.method_names.get_or_try_init(&requested, || {
            locator::get_method(&self.registry, type_name, method).map(|m| m.name.clone())
        })?;
        let key = (type_name.to_string(), canonical.as_str().to_string());
        self.methods
            .get_or_try_init(&key, || self.check_method(type_name, &canonical))
    }

    fn check_interface(&self, type_name: &str) -> Result<ValidInterface, DescriptorError> {
        let decl = self
            .registry
            .interface(type_name)
            .ok_or_else(|| DescriptorError::UnknownInterface(type_name.to_string()))?;
        if decl.kind != TypeKind::Interface {
            return Err(DescriptorError::NotAnInterface(type_name.to_string()));
        }
        let service = decl
            .single_service()
            .ok_or_else(|| DescriptorError::MissingServiceDescriptor {
                type_name: type_name.to_string(),
                found: decl.services.len(),
            })?;

        let method_names = locator::locate(&self.registry, type_name)?
            .into_iter()
            .filter(|(_, m)| m.verb().is_some())
            .map(|(name, _)| name.to_string())
            .collect();

        tracing::debug!("Validated interface {} as {}", type_name, service.descriptor);
        Ok(ValidInterface {
            type_name: decl.type_name.clone(),
            service: service.descriptor.clone(),
            sql: service.sql.clone(),
            method_names,
        })
    }

    fn check_method(&self, type_name: &str, name: &str) -> Result<ValidMethod, DescriptorError> {
        self.validations.fetch_add(1, Ordering::SeqCst);

        let interface = self.validate_interface(type_name)?;
        let decl = self.interface_decl(type_name)?;
        let method = locator::get_method(&self.registry, type_name, name)?;
        let service = decl
            .single_service()
            .ok_or_else(|| DescriptorError::MissingServiceDescriptor {
                type_name: type_name.to_string(),
                found: decl.services.len(),
            })?;

        let missing = |expected| DescriptorError::MissingMethodDescriptor {
            type_name: type_name.to_string(),
            method: method.name.clone(),
            expected,
        };
        let verb = match service.kind() {
            ServiceKind::Json => method.http.ok_or_else(|| missing("http"))?,
            ServiceKind::Sql(_) => method
                .command
                .as_ref()
                .map(|c| c.kind.verb())
                .ok_or_else(|| missing("command"))?,
        };

        let parameters = self.resolve_parameters(type_name, method)?;

        let command = match service.kind() {
            ServiceKind::Json => None,
            ServiceKind::Sql(defaults) => Some(Arc::new(self.compile(
                type_name,
                &service.descriptor,
                defaults,
                method,
                &parameters,
            )?)),
        };

        tracing::debug!("Validated method {}.{}", type_name, method.name);
        Ok(ValidMethod {
            interface,
            name: method.name.clone(),
            verb,
            returns: method.returns.clone(),
            parameters,
            command,
        })
    }

    fn interface_decl(&self, type_name: &str) -> Result<&InterfaceDecl, DescriptorError> {
        self.registry
            .interface(type_name)
            .ok_or_else(|| DescriptorError::UnknownInterface(type_name.to_string()))
    }

    fn resolve_parameters(
        &self,
        type_name: &str,
        method: &MethodDecl,
    ) -> Result<Vec<ValidParam>, DescriptorError> {
        for (i, p) in method.parameters.iter().enumerate() {
            let repeated = method.parameters[..i]
                .iter()
                .any(|q| q.name.eq_ignore_ascii_case(&p.name));
            if repeated {
                return Err(DescriptorError::DuplicateParameter {
                    type_name: type_name.to_string(),
                    method: method.name.clone(),
                    parameter: p.name.clone(),
                });
            }
        }

        method
            .parameters
            .iter()
            .map(|p| {
                let descriptor = p
                    .descriptor
                    .clone()
                    .or_else(|| {
                        p.value_type
                            .as_deref()
                            .and_then(|vt| self.registry.value_type(vt))
                            .cloned()
                    })
                    .ok_or_else(|| DescriptorError::MissingParameterDescriptor {
                        type_name: type_name.to_string(),
                        method: method.name.clone(),
                        parameter: p.name.clone(),
                    })?;
                Ok(ValidParam {
                    name: p.name.clone(),
                    descriptor,
                    optional: p.optional,
                })
            })
            .collect()
    }

    fn compile(
        &self,
        type_name: &str,
        service: &ServiceDescriptor,
        defaults: &SqlServiceDecl,
        method: &MethodDecl,
        parameters: &[ValidParam],
    ) -> Result<CompiledCommand, DescriptorError> {
        let command = method
            .command
            .as_ref()
            .ok_or_else(|| DescriptorError::MissingMethodDescriptor {
                type_name: type_name.to_string(),
                method: method.name.clone(),
                expected: "command",
            })?;

        let returns = ReturnType::parse(&method.returns).ok_or_else(|| {
            DescriptorError::UnsupportedResultShape {
                type_name: type_name.to_string(),
                method: method.name.clone(),
                returns: method.returns.clone(),
            }
        })?;

        let connection = command
            .connection
            .as_deref()
            .or(defaults.connection.as_deref())
            .ok_or_else(|| DescriptorError::MissingConnectionName {
                type_name: type_name.to_string(),
                method: method.name.clone(),
            })?;
        let conn_str = self
            .settings
            .connection_string(connection)
            .ok_or_else(|| DescriptorError::UnknownConnection(connection.to_string()))?;
        let target = ConnectionTarget::parse(connection, conn_str, &self.settings).map_err(|e| {
            DescriptorError::InvalidConnectionString {
                connection: connection.to_string(),
                message: e.to_string(),
            }
        })?;

        let raw_text = self
            .command_source
            .as_ref()
            .and_then(|source| source.load(service, &method.name))
            .unwrap_or_else(|| command.text.clone());

        let processor_name = command
            .text_processor
            .as_deref()
            .or(defaults.text_processor.as_deref());
        let text = match processor_name {
            Some(name) => {
                let processor = self
                    .registry
                    .text_processor(name)
                    .ok_or_else(|| DescriptorError::UnknownTextProcessor(name.to_string()))?;
                processor
                    .process(&raw_text)
                    .map_err(|source| DescriptorError::CommandText {
                        type_name: type_name.to_string(),
                        method: method.name.clone(),
                        source,
                    })?
            }
            None => raw_text.clone(),
        };

        let sql_parameters = parameters
            .iter()
            .map(|p| SqlParameter::new(p.name.clone(), p.descriptor.clone()))
            .collect();

        CompiledCommand::compile(
            command.kind,
            &returns,
            self.registry.converters(),
            raw_text,
            text,
            target,
            sql_parameters,
        )
    }
}
