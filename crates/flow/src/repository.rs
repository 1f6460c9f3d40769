// Archivo: repository.rs
// Propósito: definir el trait `PersistenceAdapter`, el contrato uniforme
// que deben implementar los backends de documentos (en memoria, SQLite
// embebido, Postgres remoto).
use crate::domain::ProcessDocument;
use crate::errors::Result;
use async_trait::async_trait;

/// Contrato de persistencia de documentos de proceso.
///
/// No hay reintentos en esta capa: los errores de E/S del backend se
/// propagan tal cual como `ProcessError::Storage`.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Upsert por id lógico de proceso (acotado por nombre de proceso).
    ///
    /// - Primer insert: asigna `_id` y fija `_saved == _updated`.
    /// - Update: conserva `_id` y `_saved`, avanza `_updated`.
    /// - Más de una coincidencia: error de corrupción
    ///   ("process id is not unique").
    ///
    /// Devuelve el documento tal como quedó almacenado.
    async fn persist(&self, document: ProcessDocument) -> Result<ProcessDocument>;

    /// Carga el documento único de `process_id`/`process_name`. La ausencia
    /// no es un error (`Ok(None)`).
    async fn load(&self, process_id: &str, process_name: &str) -> Result<Option<ProcessDocument>>;

    /// Todos los documentos de `process_name` (lista vacía si no hay).
    async fn load_all(&self, process_name: &str) -> Result<Vec<ProcessDocument>>;

    /// Libera los recursos del backend. Puede llamarse más de una vez.
    async fn close(&self) -> Result<()>;
}
