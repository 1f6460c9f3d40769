// Archivo: errors.rs
// Propósito: definir la taxonomía de errores del gestor de procesos y el
// alias Result<T> usado por las APIs del crate.
use thiserror::Error;

/// Errores comunes del dominio de procesos.
///
/// - `Configuration`: registro mal formado o handler ausente. Se devuelve de
///   forma síncrona al registrar, nunca deja un registro a medias.
/// - `DuplicateId`: el id ya está en uso en la caché. No es fatal.
/// - `Storage`: fallo de E/S o corrupción del almacenamiento.
/// - `TimerConfiguration`: un handler `$getTimeout` devolvió algo que no es
///   un número.
///
/// Los errores son `Clone` para poder entregar un mismo resultado a varios
/// llamadores que esperan la inicialización.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
  /// Configuración inválida (handler ausente, descriptor mal formado,
  /// esquema de conexión desconocido).
  #[error("Error de configuración: {0}")]
  Configuration(String),
  /// El id de proceso ya está en uso.
  #[error("id already used: {0}")]
  DuplicateId(String),
  /// No existe una definición registrada con ese nombre.
  #[error("Definición desconocida: {0}")]
  UnknownDefinition(String),
  /// Error de almacenamiento (BD, corrupción de documentos, etc.).
  #[error("Error de almacenamiento: {0}")]
  Storage(String),
  /// Handler de timeout mal escrito.
  #[error("Error de configuración de timer: {0}")]
  TimerConfiguration(String),
  /// Error de serialización/deserialización JSON.
  #[error("Error de serialización: {0}")]
  Serialization(String),
}

impl ProcessError {
  /// Error de corrupción: más de un documento para el mismo id lógico.
  pub fn not_unique(process_id: &str) -> Self {
    ProcessError::Storage(format!("process id is not unique: {}", process_id))
  }

  /// `true` si el error es del tipo "id already used".
  pub fn is_duplicate_id(&self) -> bool {
    matches!(self, ProcessError::DuplicateId(_))
  }
}

impl From<serde_json::Error> for ProcessError {
  fn from(e: serde_json::Error) -> Self {
    ProcessError::Serialization(e.to_string())
  }
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, ProcessError>;
