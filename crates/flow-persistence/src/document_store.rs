// Archivo: document_store.rs
// Propósito: almacén de documentos de proceso sobre Diesel.
//
// Una misma tabla (`process_documents`) sirve al backend embebido (SQLite)
// y al remoto (Postgres). Las consultas se generan por backend con la macro
// `document_connection!`; el resto (pool perezoso, `spawn_blocking`,
// mapeo de errores) es genérico sobre `DocumentConnection`.
use crate::config::StoreConfig;
use crate::schema::process_documents;
use async_trait::async_trait;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, R2D2Connection};
use diesel::sql_types::Text;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use flow::{now_millis, PersistenceAdapter, ProcessDocument, ProcessError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

type DbPool<C> = Pool<ConnectionManager<C>>;

/// Fila Diesel de `process_documents`. Las columnas `id`, `saved` y
/// `updated` son la fuente de verdad de los metadatos de almacenamiento.
#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = process_documents)]
pub struct DocumentRow {
  pub id: String,
  pub process_name: String,
  pub process_id: String,
  pub saved: i64,
  pub updated: i64,
  pub body: String,
}

impl DocumentRow {
  fn from_document(doc: &ProcessDocument) -> serde_json::Result<Self> {
    Ok(DocumentRow { id: doc.id.clone().unwrap_or_default(),
                     process_name: doc.process_name.clone(),
                     process_id: doc.process_id.clone(),
                     saved: doc.saved.unwrap_or_default(),
                     updated: doc.updated.unwrap_or_default(),
                     body: serde_json::to_string(doc)? })
  }

  pub fn to_document(&self) -> serde_json::Result<ProcessDocument> {
    let mut doc: ProcessDocument = serde_json::from_str(&self.body)?;
    doc.id = Some(self.id.clone());
    doc.saved = Some(self.saved);
    doc.updated = Some(self.updated);
    Ok(doc)
  }
}

fn db_err(e: diesel::result::Error) -> ProcessError {
  ProcessError::Storage(format!("db: {}", e))
}

fn join_err(e: tokio::task::JoinError) -> ProcessError {
  ProcessError::Storage(format!("tarea bloqueante abortada: {}", e))
}

/// Operaciones de documentos que cada conexión Diesel soporta.
pub trait DocumentConnection: R2D2Connection + Send + 'static {
  const BACKEND: &'static str;

  /// Ajustes por conexión (se ejecuta al crear cada conexión del pool).
  fn setup_session(&mut self) -> QueryResult<()>;

  /// Ajustes de la base y migraciones embebidas (una vez por pool).
  fn prepare_schema(&mut self) -> Result<()>;

  fn find_documents(&mut self, process_id: &str, process_name: &str) -> QueryResult<Vec<DocumentRow>>;

  fn find_by_name(&mut self, process_name: &str) -> QueryResult<Vec<DocumentRow>>;

  /// Upsert transaccional por (`process_name`, `process_id`).
  fn upsert_document(&mut self, document: ProcessDocument) -> Result<ProcessDocument>;
}

macro_rules! document_connection {
  ($conn:ty, $backend:literal, $txn:ident, $session_sql:expr, $schema_sql:expr, $upsert_lock_sql:expr) => {
    impl DocumentConnection for $conn {
      const BACKEND: &'static str = $backend;

      fn setup_session(&mut self) -> QueryResult<()> {
        let sql: &str = $session_sql;
        if !sql.is_empty() {
          self.batch_execute(sql)?;
        }
        Ok(())
      }

      fn prepare_schema(&mut self) -> Result<()> {
        let sql: &str = $schema_sql;
        if !sql.is_empty() {
          let _ = self.batch_execute(sql);
        }
        self.run_pending_migrations(MIGRATIONS)
            .map_err(|e| ProcessError::Storage(format!("migraciones: {}", e)))?;
        Ok(())
      }

      fn find_documents(&mut self, process_id: &str, process_name: &str) -> QueryResult<Vec<DocumentRow>> {
        process_documents::table.filter(process_documents::process_id.eq(process_id))
                                .filter(process_documents::process_name.eq(process_name))
                                .load::<DocumentRow>(self)
      }

      fn find_by_name(&mut self, process_name: &str) -> QueryResult<Vec<DocumentRow>> {
        process_documents::table.filter(process_documents::process_name.eq(process_name))
                                .order(process_documents::saved.asc())
                                .load::<DocumentRow>(self)
      }

      fn upsert_document(&mut self, document: ProcessDocument) -> Result<ProcessDocument> {
        let process_id = document.process_id.clone();
        let process_name = document.process_name.clone();
        let lock_sql: &str = $upsert_lock_sql;
        let stored = self.$txn::<_, diesel::result::Error, _>(|conn| {
                           if !lock_sql.is_empty() {
                             diesel::sql_query(lock_sql).bind::<Text, _>(process_name.clone())
                                                        .bind::<Text, _>(process_id.clone())
                                                        .execute(conn)?;
                           }
                           let rows = conn.find_documents(&process_id, &process_name)?;
                           if rows.len() > 1 {
                             return Ok(None);
                           }
                           let now = now_millis();
                           match rows.into_iter().next() {
                             Some(row) => {
                               let prev = row.to_document()
                                             .map_err(|e| diesel::result::Error::DeserializationError(Box::new(e)))?;
                               let next = document.stamped(Some(&prev), now, || row.id.clone());
                               let body = serde_json::to_string(&next)
                                 .map_err(|e| diesel::result::Error::SerializationError(Box::new(e)))?;
                               diesel::update(process_documents::table.filter(process_documents::id.eq(&row.id)))
                                 .set((process_documents::updated.eq(next.updated.unwrap_or(now)),
                                       process_documents::body.eq(&body)))
                                 .execute(conn)?;
                               Ok(Some(next))
                             }
                             None => {
                               let next = document.stamped(None, now, || Uuid::new_v4().to_string());
                               let row = DocumentRow::from_document(&next)
                                 .map_err(|e| diesel::result::Error::SerializationError(Box::new(e)))?;
                               diesel::insert_into(process_documents::table).values(&row).execute(conn)?;
                               Ok(Some(next))
                             }
                           }
                         })
                         .map_err(db_err)?;
        stored.ok_or_else(|| ProcessError::not_unique(&process_id))
      }
    }
  };
}

// SQLite: `BEGIN IMMEDIATE` ya serializa a los escritores.
document_connection!(diesel::SqliteConnection,
                     "sqlite",
                     immediate_transaction,
                     "PRAGMA busy_timeout = 5000;",
                     "PRAGMA journal_mode = WAL;",
                     "");

// Postgres: sin índice único, dos upserts del mismo id se serializan con un
// lock consultivo que se libera al terminar la transacción.
#[cfg(feature = "pg")]
document_connection!(diesel::PgConnection,
                     "postgres",
                     transaction,
                     "",
                     "",
                     "SELECT pg_advisory_xact_lock(hashtext($1 || '/' || $2))");

/// Aplica `setup_session` a cada conexión nueva del pool.
#[derive(Debug)]
struct SessionSetup;

impl<C: DocumentConnection> CustomizeConnection<C, diesel::r2d2::Error> for SessionSetup {
  fn on_acquire(&self, conn: &mut C) -> std::result::Result<(), diesel::r2d2::Error> {
    conn.setup_session().map_err(diesel::r2d2::Error::QueryError)
  }
}

fn build_pool<C: DocumentConnection>(config: &StoreConfig) -> Result<DbPool<C>> {
  let manager = ConnectionManager::<C>::new(config.connection_string());
  let mut builder = Pool::<ConnectionManager<C>>::builder().max_size(config.pool_size())
                                                          .connection_customizer(Box::new(SessionSetup));
  if config.is_memory() {
    // la base desaparece con su única conexión
    builder = builder.idle_timeout(None).max_lifetime(None);
  }
  let pool = builder.build(manager)
                    .map_err(|e| ProcessError::Storage(format!("pool: {}", e)))?;
  let mut conn = pool.get().map_err(|e| ProcessError::Storage(format!("pool: {}", e)))?;
  conn.prepare_schema()?;
  Ok(pool)
}

enum PoolSlot<C: DocumentConnection> {
  Unopened,
  Open(Arc<DbPool<C>>),
  Closed,
}

/// Almacén de documentos Diesel con pool establecido de forma perezosa.
///
/// La primera operación abre el pool y aplica migraciones; los llamadores
/// concurrentes de esa primera operación esperan al mismo establecimiento en
/// curso en lugar de abrir pools duplicados. Tras `close` toda operación
/// falla con `Storage`.
pub struct DocumentStore<C: DocumentConnection> {
  config: StoreConfig,
  slot: AsyncMutex<PoolSlot<C>>,
  opens: AtomicUsize,
}

/// Backend embebido.
pub type SqliteDocumentStore = DocumentStore<diesel::SqliteConnection>;
/// Backend remoto.
#[cfg(feature = "pg")]
pub type PgDocumentStore = DocumentStore<diesel::PgConnection>;

impl<C: DocumentConnection> DocumentStore<C> {
  /// Crea el almacén sin conectar todavía.
  pub fn new(config: StoreConfig) -> Self {
    Self { config,
           slot: AsyncMutex::new(PoolSlot::Unopened),
           opens: AtomicUsize::new(0) }
  }

  pub fn config(&self) -> &StoreConfig {
    &self.config
  }

  /// Veces que se estableció el pool (migraciones incluidas).
  pub fn pool_opens(&self) -> usize {
    self.opens.load(Ordering::SeqCst)
  }

  async fn pool(&self) -> Result<Arc<DbPool<C>>> {
    let mut slot = self.slot.lock().await;
    match &*slot {
      PoolSlot::Open(pool) => return Ok(pool.clone()),
      PoolSlot::Closed => return Err(ProcessError::Storage("almacén cerrado".into())),
      PoolSlot::Unopened => {}
    }
    let config = self.config.clone();
    let pool = tokio::task::spawn_blocking(move || build_pool::<C>(&config)).await
                                                                           .map_err(join_err)??;
    let pool = Arc::new(pool);
    self.opens.fetch_add(1, Ordering::SeqCst);
    *slot = PoolSlot::Open(pool.clone());
    log::info!("almacén {} abierto ({} conexiones)", C::BACKEND, self.config.pool_size());
    Ok(pool)
  }

  async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where T: Send + 'static,
          F: FnOnce(&mut C) -> Result<T> + Send + 'static
  {
    let pool = self.pool().await?;
    tokio::task::spawn_blocking(move || {
      let mut conn = pool.get().map_err(|e| ProcessError::Storage(format!("pool: {}", e)))?;
      op(&mut conn)
    }).await
      .map_err(join_err)?
  }
}

#[async_trait]
impl<C: DocumentConnection> PersistenceAdapter for DocumentStore<C> {
  async fn persist(&self, document: ProcessDocument) -> Result<ProcessDocument> {
    self.with_conn(move |conn| conn.upsert_document(document)).await
  }

  async fn load(&self, process_id: &str, process_name: &str) -> Result<Option<ProcessDocument>> {
    let process_id = process_id.to_string();
    let process_name = process_name.to_string();
    self.with_conn(move |conn| {
          let rows = conn.find_documents(&process_id, &process_name).map_err(db_err)?;
          match rows.as_slice() {
            [] => Ok(None),
            [row] => Ok(Some(row.to_document()?)),
            _ => Err(ProcessError::not_unique(&process_id)),
          }
        })
        .await
  }

  async fn load_all(&self, process_name: &str) -> Result<Vec<ProcessDocument>> {
    let process_name = process_name.to_string();
    self.with_conn(move |conn| {
          let rows = conn.find_by_name(&process_name).map_err(db_err)?;
          rows.iter()
              .map(|r| r.to_document().map_err(ProcessError::from))
              .collect()
        })
        .await
  }

  async fn close(&self) -> Result<()> {
    let mut slot = self.slot.lock().await;
    if let PoolSlot::Open(_) = &*slot {
      log::info!("almacén {} cerrado", C::BACKEND);
    }
    *slot = PoolSlot::Closed;
    Ok(())
  }
}
