// Archivo: registry.rs
// Propósito: tabla de definiciones registradas con sus handlers.
//
// Una definición es inmutable una vez instalada; registrar otra con el mismo
// nombre la reemplaza por completo.
use dashmap::DashMap;
use flow::{ProcessDefinition, ProcessError, ProcessHandlerSet};
use std::fmt;
use std::sync::Arc;

/// Definición instalada junto con su tabla de handlers.
#[derive(Clone)]
pub struct RegisteredDefinition {
  pub definition: Arc<dyn ProcessDefinition>,
  pub handlers: Arc<ProcessHandlerSet>,
}

impl RegisteredDefinition {
  pub fn new(definition: Arc<dyn ProcessDefinition>, handlers: ProcessHandlerSet) -> Self {
    Self { definition,
           handlers: Arc::new(handlers) }
  }

  pub fn name(&self) -> &str {
    self.definition.name()
  }

  /// Validación síncrona del registro: nombre no vacío y un handler
  /// `$getTimeout` por cada timer declarado.
  pub fn validate(&self) -> Result<(), ProcessError> {
    if self.name().trim().is_empty() {
      return Err(ProcessError::Configuration("la definición no tiene nombre".into()));
    }
    let missing = self.handlers.missing_timeout_handlers(self.definition.as_ref());
    if !missing.is_empty() {
      return Err(ProcessError::Configuration(format!("'{}': faltan handlers {}",
                                                     self.name(),
                                                     missing.join(", "))));
    }
    Ok(())
  }
}

impl fmt::Debug for RegisteredDefinition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RegisteredDefinition")
     .field("name", &self.name())
     .field("handlers", &self.handlers)
     .finish()
  }
}

/// Definiciones instaladas, indexadas por nombre.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
  definitions: DashMap<String, RegisteredDefinition>,
}

impl DefinitionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Instala (o reemplaza) la definición bajo su nombre.
  pub fn install(&self, entry: RegisteredDefinition) {
    let name = entry.name().to_string();
    if self.definitions.insert(name.clone(), entry).is_some() {
      log::info!("definición '{}' reemplazada", name);
    } else {
      log::info!("definición '{}' instalada", name);
    }
  }

  pub fn get(&self, name: &str) -> Option<RegisteredDefinition> {
    self.definitions.get(name).map(|e| e.value().clone())
  }

  /// Como `get`, pero un nombre desconocido es `UnknownDefinition`.
  pub fn require(&self, name: &str) -> Result<RegisteredDefinition, ProcessError> {
    self.get(name).ok_or_else(|| ProcessError::UnknownDefinition(name.to_string()))
  }

  pub fn contains(&self, name: &str) -> bool {
    self.definitions.contains_key(name)
  }

  /// Nombres registrados, ordenados.
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.definitions.iter().map(|e| e.key().clone()).collect();
    names.sort();
    names
  }

  pub fn len(&self) -> usize {
    self.definitions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.definitions.is_empty()
  }
}
