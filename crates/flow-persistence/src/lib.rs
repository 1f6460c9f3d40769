//! Persistencia de documentos de proceso sobre Diesel.
//!
//! Expone la configuración de backend (`StoreConfig`), el almacén genérico
//! `DocumentStore` con sus alias por backend, y los constructores
//! `open_store` / `new_from_env` que devuelven un `PersistenceAdapter`
//! listo para el gestor de procesos. El backend se elige en tiempo de
//! ejecución a partir de la cadena de conexión.

pub mod config;
mod document_store;
pub mod schema;

use flow::{PersistenceAdapter, Result};
use std::sync::Arc;

pub use config::{StoreConfig, DB_POOL_VAR, DB_URL_VAR, DEFAULT_DB_PATH, DEFAULT_POOL_SIZE};
#[cfg(feature = "pg")]
pub use document_store::PgDocumentStore;
pub use document_store::{DocumentConnection, DocumentRow, DocumentStore, SqliteDocumentStore, MIGRATIONS};

/// Construye el adaptador del backend indicado. No conecta todavía: la
/// conexión y las migraciones ocurren en la primera operación.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn PersistenceAdapter>> {
  match config {
    StoreConfig::Embedded { .. } => {
      log::debug!("backend embebido: {}", config.connection_string());
      Ok(Arc::new(SqliteDocumentStore::new(config.clone())))
    }
    #[cfg(feature = "pg")]
    StoreConfig::Remote { .. } => {
      log::debug!("backend remoto configurado");
      Ok(Arc::new(PgDocumentStore::new(config.clone())))
    }
    #[cfg(not(feature = "pg"))]
    StoreConfig::Remote { .. } => {
      Err(flow::ProcessError::Configuration("backend remoto no disponible: compile con la feature `pg`".into()))
    }
  }
}

/// Lee la configuración del entorno (`.env` incluido) y abre el almacén.
pub fn new_from_env() -> Result<Arc<dyn PersistenceAdapter>> {
  let config = StoreConfig::from_env()?;
  open_store(&config)
}
