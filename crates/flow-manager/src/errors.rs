use flow::ProcessError;
use thiserror::Error;

// Errores del gestor de procesos.
//
// Envuelve los errores de `flow` y añade los fallos propios de la cola de
// inicialización. Es `Clone` porque un mismo resultado de inicialización se
// entrega a todos los llamadores que lo esperan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagerError {
  /// Errores originados en el crate `flow` (configuración, ids duplicados,
  /// almacenamiento, timers).
  #[error(transparent)]
  Process(#[from] ProcessError),

  /// La rehidratación de una definición falló; el resto de la cola se
  /// abandonó.
  #[error("Error de inicialización de '{definition}': {source}")]
  Initialization {
    definition: String,
    #[source]
    source: ProcessError,
  },

  /// La tarea de la cola terminó sin entregar resultado.
  #[error("La cola de inicialización terminó sin resultado")]
  QueueClosed,
}

impl ManagerError {
  /// Error de proceso subyacente, si existe.
  pub fn process_error(&self) -> Option<&ProcessError> {
    match self {
      ManagerError::Process(e) | ManagerError::Initialization { source: e, .. } => Some(e),
      ManagerError::QueueClosed => None,
    }
  }

  /// `true` para "id already used", tanto al crear como al rehidratar.
  pub fn is_duplicate_id(&self) -> bool {
    self.process_error().map(ProcessError::is_duplicate_id).unwrap_or(false)
  }
}

/// Alias de resultado del gestor.
pub type Result<T> = std::result::Result<T, ManagerError>;
