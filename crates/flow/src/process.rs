// Archivo: process.rs
// Propósito: contratos de los colaboradores externos del gestor:
// definición de proceso, instancia de proceso y fábrica de instancias.
//
// La semántica de ejecución (paso de tokens) vive fuera de este crate; aquí
// sólo se fija la interfaz estrecha que el gestor necesita.
use crate::domain::{FlowObject, Participant};
use crate::errors::Result;
use crate::handlers::ProcessHandlerSet;
use crate::repository::PersistenceAdapter;
use crate::timers::PendingTimerEvents;
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::sync::Arc;

/// Definición de proceso inmutable, indexada por nombre.
pub trait ProcessDefinition: Send + Sync {
  /// Nombre único de la definición.
  fn name(&self) -> &str;

  /// Participantes colaboradores declarados.
  fn collaborating_participants(&self) -> Vec<Participant>;

  /// Todos los flow objects de la definición.
  fn flow_objects(&self) -> Vec<FlowObject>;

  /// Busca un flow object por nombre.
  fn flow_object_by_name(&self, name: &str) -> Option<FlowObject> {
    self.flow_objects().into_iter().find(|fo| fo.name == name)
  }
}

/// Instancia de proceso (opaca más allá de este contrato).
#[async_trait]
pub trait ProcessInstance: Send + Sync {
  fn process_id(&self) -> String;

  fn process_name(&self) -> String;

  /// Estado serializado. Por convención `{"tokens": [{"position": ...}]}`.
  fn state(&self) -> JsonValue;

  fn history(&self) -> JsonValue;

  fn properties(&self) -> Map<String, JsonValue>;

  /// `true` si algún token del estado está en el flow object `state_name`.
  fn is_in_state(&self, state_name: &str) -> bool {
    self.state()
        .get("tokens")
        .and_then(|t| t.as_array())
        .map(|tokens| {
          tokens.iter()
                .any(|t| t.get("position").and_then(|p| p.as_str()) == Some(state_name))
        })
        .unwrap_or(false)
  }

  /// Adjunta una referencia viva a otra instancia de la colaboración.
  fn add_participant(&self, name: &str, instance: Arc<dyn ProcessInstance>);

  /// Registra sólo el id de un participante (no resuelto en memoria).
  fn add_participant_id(&self, name: &str, process_id: &str);

  /// Participante resuelto, si existe.
  fn participant(&self, name: &str) -> Option<Arc<dyn ProcessInstance>>;

  /// Timers pendientes de la instancia.
  fn pending_timer_events(&self) -> &PendingTimerEvents;

  /// Dispara un evento con nombre en la instancia.
  async fn trigger_event(&self, event_name: &str, data: JsonValue) -> Result<()>;

  /// Guarda el estado actual a través del adaptador de persistencia (no-op
  /// si la instancia no tiene persistencia configurada).
  async fn persist(&self) -> Result<()>;
}

impl fmt::Debug for dyn ProcessInstance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ProcessInstance")
     .field("process_id", &self.process_id())
     .field("process_name", &self.process_name())
     .finish()
  }
}

/// Fábrica de instancias. Debe cargar el estado persistido (si existe)
/// antes de devolver la instancia, incluidos los timers pendientes.
#[async_trait]
pub trait ProcessFactory: Send + Sync {
  async fn create_instance(&self,
                           process_id: &str,
                           definition: Arc<dyn ProcessDefinition>,
                           handlers: Arc<ProcessHandlerSet>,
                           persistence: Option<Arc<dyn PersistenceAdapter>>)
                           -> Result<Arc<dyn ProcessInstance>>;
}
