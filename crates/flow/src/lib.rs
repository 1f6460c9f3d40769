//! Crate `flow`: contratos y subsistema de timers del gestor de procesos
//!
//! Este crate define los tipos de dominio (`Timeout`, `ProcessDocument`),
//! la taxonomía de errores (`ProcessError`), el contrato de persistencia
//! `PersistenceAdapter` con una implementación en memoria útil para pruebas
//! (`InMemoryPersistence`), la tabla de handlers por definición y el
//! subsistema de timers pendientes (`PendingTimerEvents`).
//!
//! Diseño resumido:
//! - Persistencia por documentos: cada `ProcessDocument` es autocontenido y
//!   permite reconstruir una instancia, incluidos sus timers pendientes.
//! - Upsert por id lógico: el almacenamiento asigna `_id`, `_saved` y
//!   `_updated`; más de un documento por id es corrupción.
//! - Timers restaurables: la fecha límite absoluta se conserva entre
//!   reinicios; un timer vencido se dispara de inmediato al restaurar.
//!
//! Ejemplo rápido:
//! ```rust
//! use flow::stubs::InMemoryPersistence;
//! use flow::PersistenceAdapter;
//! use std::sync::Arc;
//! let store: Arc<dyn PersistenceAdapter> = Arc::new(InMemoryPersistence::new());
//! ```
pub mod domain;
pub mod errors;
pub mod handlers;
pub mod process;
pub mod repository;
pub mod stubs;
pub mod timers;

pub use domain::*;
pub use errors::*;
pub use handlers::*;
pub use process::*;
pub use repository::*;
pub use stubs::*;
pub use timers::*;
