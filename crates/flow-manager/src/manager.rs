// Archivo: manager.rs
// Propósito: fachada pública del gestor de procesos.
//
// `ProcessManager` es dueño de la tabla de definiciones, la caché de
// instancias y la cola de inicialización. La persistencia y la fábrica de
// instancias se inyectan por constructor, de modo que pueden convivir
// varios gestores en el mismo proceso.
use crate::cache::InstanceCache;
use crate::collaboration::{discard, CollaborationBuilder};
use crate::errors::{ManagerError, Result};
use crate::init_queue::{DefinitionLoader, InitializationQueue};
use crate::registry::{DefinitionRegistry, RegisteredDefinition};
use crate::stored::StoredProcessFactory;
use async_trait::async_trait;
use flow::{PersistenceAdapter, ProcessDefinition, ProcessError, ProcessFactory, ProcessHandlerSet, ProcessInstance};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use uuid::Uuid;

/// Petición de creación: definición por nombre y id de proceso.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDescriptor {
  pub name: String,
  pub id: String,
}

impl ProcessDescriptor {
  pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
    Self { name: name.into(),
           id: id.into() }
  }

  /// Descriptor con un id nuevo (UUID v4).
  pub fn with_generated_id(name: impl Into<String>) -> Self {
    Self::new(name, Uuid::new_v4().to_string())
  }
}

/// Configuración del gestor.
#[derive(Clone)]
pub struct ManagerConfig {
  /// Sin persistencia no hay rehidratación ni guardado.
  pub persistence: Option<Arc<dyn PersistenceAdapter>>,
  pub factory: Arc<dyn ProcessFactory>,
}

impl Default for ManagerConfig {
  fn default() -> Self {
    Self { persistence: None,
           factory: Arc::new(StoredProcessFactory::new()) }
  }
}

impl ManagerConfig {
  pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceAdapter>) -> Self {
    self.persistence = Some(persistence);
    self
  }

  pub fn with_factory(mut self, factory: Arc<dyn ProcessFactory>) -> Self {
    self.factory = factory;
    self
  }
}

struct ManagerInner {
  registry: DefinitionRegistry,
  cache: InstanceCache,
  queue: InitializationQueue,
  factory: Arc<dyn ProcessFactory>,
  persistence: Option<Arc<dyn PersistenceAdapter>>,
}

impl ManagerInner {
  /// Confirma un lote en la caché; si falla, las instancias se descartan.
  fn commit(&self, instances: &[Arc<dyn ProcessInstance>]) -> std::result::Result<(), ProcessError> {
    self.cache.commit(instances).inspect_err(|_| discard(instances.iter().cloned()))
  }
}

#[async_trait]
impl DefinitionLoader for ManagerInner {
  /// Rehidrata las instancias persistidas de la definición y sólo entonces
  /// la instala. Una definición ya registrada, o un gestor sin
  /// persistencia, se instala directamente.
  async fn install(&self, entry: RegisteredDefinition) -> Result<()> {
    let name = entry.name().to_string();
    let store = match &self.persistence {
      Some(store) if !self.registry.contains(&name) => store.clone(),
      _ => {
        self.registry.install(entry);
        return Ok(());
      }
    };
    let fail = |source: ProcessError| ManagerError::Initialization { definition: name.clone(),
                                                                     source };

    let documents = store.load_all(&name).await.map_err(fail)?;
    let mut instances: Vec<Arc<dyn ProcessInstance>> = Vec::with_capacity(documents.len());
    for doc in documents {
      let created = self.factory
                        .create_instance(&doc.process_id,
                                         entry.definition.clone(),
                                         entry.handlers.clone(),
                                         Some(store.clone()))
                        .await;
      match created {
        Ok(instance) => instances.push(instance),
        Err(e) => {
          discard(instances);
          return Err(fail(e));
        }
      }
    }
    self.commit(&instances).map_err(fail)?;
    log::info!("definición '{}': {} instancias rehidratadas", name, instances.len());
    self.registry.install(entry);
    Ok(())
  }
}

/// Gestor de procesos: registro de definiciones, creación con ids únicos,
/// rehidratación y consultas sobre las instancias en caché.
///
/// Clonar el gestor comparte el mismo estado.
#[derive(Clone)]
pub struct ProcessManager {
  inner: Arc<ManagerInner>,
}

impl Default for ProcessManager {
  fn default() -> Self {
    Self::new()
  }
}

impl ProcessManager {
  /// Gestor sin persistencia con la fábrica de referencia.
  pub fn new() -> Self {
    Self::from_config(ManagerConfig::default())
  }

  pub fn with_persistence(persistence: Arc<dyn PersistenceAdapter>) -> Self {
    Self::from_config(ManagerConfig::default().with_persistence(persistence))
  }

  pub fn from_config(config: ManagerConfig) -> Self {
    Self { inner: Arc::new(ManagerInner { registry: DefinitionRegistry::new(),
                                          cache: InstanceCache::new(),
                                          queue: InitializationQueue::new(),
                                          factory: config.factory,
                                          persistence: config.persistence }) }
  }

  /// Valida el registro de forma síncrona y lo encola para inicializar.
  ///
  /// Un error de configuración no deja nada registrado. La instalación
  /// efectiva (y la rehidratación) se observa con `after_initialization`.
  pub fn add_definition(&self, definition: Arc<dyn ProcessDefinition>, handlers: ProcessHandlerSet) -> Result<()> {
    let entry = RegisteredDefinition::new(definition, handlers);
    entry.validate()?;
    log::info!("definición '{}' encolada para inicializar", entry.name());
    self.inner.queue.enqueue(entry, self.inner.clone())
  }

  /// Espera a que termine la inicialización en curso y devuelve su resultado.
  pub async fn after_initialization(&self) -> Result<()> {
    self.inner.queue.after_initialization().await
  }

  /// Crea una instancia con id único.
  ///
  /// El id se comprueba antes de construir y otra vez justo antes de
  /// confirmar; ambas comprobaciones devuelven el mismo `DuplicateId`.
  pub async fn create_process(&self, descriptor: ProcessDescriptor) -> Result<Arc<dyn ProcessInstance>> {
    self.after_initialization().await?;
    let entry = self.inner.registry.require(&descriptor.name)?;
    self.inner.cache.ensure_available(&[descriptor.id.as_str()])?;
    let instance = self.inner
                       .factory
                       .create_instance(&descriptor.id,
                                        entry.definition,
                                        entry.handlers,
                                        self.inner.persistence.clone())
                       .await?;
    self.inner.commit(std::slice::from_ref(&instance))?;
    Ok(instance)
  }

  /// Crea un lote de instancias colaboradoras. O se confirman todas o
  /// ninguna.
  pub async fn create_processes(&self, descriptors: Vec<ProcessDescriptor>) -> Result<Vec<Arc<dyn ProcessInstance>>> {
    if descriptors.is_empty() {
      return Err(ProcessError::Configuration("la lista de procesos está vacía".into()).into());
    }
    self.after_initialization().await?;
    let batch = descriptors.into_iter()
                           .map(|d| Ok((self.inner.registry.require(&d.name)?, d.id)))
                           .collect::<std::result::Result<Vec<_>, ProcessError>>()?;
    let ids: Vec<&str> = batch.iter().map(|(_, id)| id.as_str()).collect();
    self.inner.cache.ensure_available(&ids)?;

    let instances = CollaborationBuilder::new(self.inner.factory.as_ref(), self.inner.persistence.clone()).build(batch)
                                                                                                        .await?;
    self.inner.commit(&instances)?;
    Ok(instances)
  }

  pub async fn get(&self, process_id: &str) -> Result<Option<Arc<dyn ProcessInstance>>> {
    self.after_initialization().await?;
    Ok(self.inner.cache.get(process_id))
  }

  /// Todas las instancias en caché, en orden de creación.
  pub async fn get_all_processes(&self) -> Result<Vec<Arc<dyn ProcessInstance>>> {
    self.after_initialization().await?;
    Ok(self.inner.cache.values())
  }

  /// Instancias con algún token en el flow object `state_name`.
  pub async fn find_by_state(&self, state_name: &str) -> Result<Vec<Arc<dyn ProcessInstance>>> {
    self.after_initialization().await?;
    Ok(self.inner.cache.filter(|p| p.is_in_state(state_name)))
  }

  /// Instancias cuyas propiedades contienen todos los pares de `query`.
  pub async fn find_by_property(&self, query: &Map<String, JsonValue>) -> Result<Vec<Arc<dyn ProcessInstance>>> {
    self.after_initialization().await?;
    Ok(self.inner.cache.filter(|p| {
                          let properties = p.properties();
                          query.iter().all(|(k, v)| properties.get(k) == Some(v))
                        }))
  }

  pub async fn find_by_name(&self, name: &str, case_sensitive: bool) -> Result<Vec<Arc<dyn ProcessInstance>>> {
    self.after_initialization().await?;
    let wanted = if case_sensitive { name.to_string() } else { name.to_lowercase() };
    Ok(self.inner.cache.filter(|p| {
                          let process_name = p.process_name();
                          if case_sensitive {
                            process_name == wanted
                          } else {
                            process_name.to_lowercase() == wanted
                          }
                        }))
  }

  /// Nombres de las definiciones instaladas, ordenados.
  pub fn get_definition_names(&self) -> Vec<String> {
    self.inner.registry.names()
  }

  pub fn get_definition(&self, name: &str) -> Option<Arc<dyn ProcessDefinition>> {
    self.inner.registry.get(name).map(|e| e.definition)
  }

  /// Vacía la caché de instancias y cancela sus timers.
  pub fn clear_cache(&self) {
    let removed = self.inner.cache.clear();
    log::info!("caché de instancias vaciada ({} instancias)", removed.len());
    discard(removed);
  }

  /// Vacía la caché y cierra el adaptador de persistencia.
  pub async fn close(&self) -> Result<()> {
    self.clear_cache();
    if let Some(store) = &self.inner.persistence {
      store.close().await?;
    }
    Ok(())
  }

  pub fn persistence(&self) -> Option<Arc<dyn PersistenceAdapter>> {
    self.inner.persistence.clone()
  }
}
