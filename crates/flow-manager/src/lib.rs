//! flow-manager: gestor de instancias de proceso
//!
//! Crea, cachea y rehidrata instancias de proceso sobre los contratos del
//! crate `flow`. Garantiza un único id por instancia bajo creaciones
//! asíncronas concurrentes y serializa la inicialización de definiciones
//! (incluida la carga de instancias persistidas).
//!
//! ```rust,no_run
//! use flow::{ProcessHandlerSet, StaticDefinition};
//! use flow_manager::{ProcessDescriptor, ProcessManager};
//! use std::sync::Arc;
//!
//! # async fn demo() -> flow_manager::Result<()> {
//! let manager = ProcessManager::new();
//! manager.add_definition(Arc::new(StaticDefinition::new("Order")), ProcessHandlerSet::new())?;
//! manager.after_initialization().await?;
//! let order = manager.create_process(ProcessDescriptor::new("Order", "o-1")).await?;
//! order.trigger_event("Review", serde_json::json!({"amount": 10})).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod collaboration;
pub mod errors;
pub mod init_queue;
pub mod manager;
pub mod registry;
pub mod stored;

pub use cache::InstanceCache;
pub use collaboration::CollaborationBuilder;
pub use errors::{ManagerError, Result};
pub use init_queue::{DefinitionLoader, InitializationQueue};
pub use manager::{ManagerConfig, ProcessDescriptor, ProcessManager};
pub use registry::{DefinitionRegistry, RegisteredDefinition};
pub use stored::{StoredProcess, StoredProcessFactory};
