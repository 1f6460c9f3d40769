// Archivo: config.rs
// Propósito: elegir el backend de documentos a partir de una cadena de
// conexión y cargar la configuración desde el entorno (`.env` incluido).
use flow::errors::{ProcessError, Result};

/// Variable de entorno principal con la cadena de conexión.
pub const DB_URL_VAR: &str = "PROCFLOW_DB_URL";
/// Variable con el tamaño del pool de conexiones.
pub const DB_POOL_VAR: &str = "PROCFLOW_DB_POOL";
/// Archivo SQLite por defecto cuando no hay configuración.
pub const DEFAULT_DB_PATH: &str = "procflow.db";
pub const DEFAULT_POOL_SIZE: u32 = 4;

/// Backend elegido en tiempo de configuración.
///
/// - `Embedded`: archivo SQLite local (o `:memory:`).
/// - `Remote`: base de documentos remota (tabla JSON en Postgres).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
  Embedded { path: String, pool_size: u32 },
  Remote { url: String, pool_size: u32 },
}

impl StoreConfig {
  /// Interpreta una cadena de conexión.
  ///
  /// `postgres://` y `postgresql://` seleccionan el backend remoto;
  /// `sqlite://`, URIs `file:`, `:memory:` y rutas simples el embebido.
  /// Cualquier otro esquema `x://` es un error de configuración.
  pub fn from_connection_string(conn: &str) -> Result<Self> {
    let conn = conn.trim();
    if conn.is_empty() {
      return Err(ProcessError::Configuration("cadena de conexión vacía".into()));
    }
    if conn.starts_with("postgres://") || conn.starts_with("postgresql://") {
      return Ok(StoreConfig::Remote { url: conn.to_string(),
                                      pool_size: DEFAULT_POOL_SIZE });
    }
    if let Some(path) = conn.strip_prefix("sqlite://") {
      return Ok(StoreConfig::embedded(path));
    }
    if conn.starts_with("file:") || conn == ":memory:" {
      return Ok(StoreConfig::embedded(conn));
    }
    if let Some(idx) = conn.find("://") {
      return Err(ProcessError::Configuration(format!("esquema de conexión no soportado: {}", &conn[..idx])));
    }
    Ok(StoreConfig::embedded(conn))
  }

  /// Lee `PROCFLOW_DB_URL`, luego `DATABASE_URL`, y si no hay ninguna usa
  /// `procflow.db`. `PROCFLOW_DB_POOL` fija el tamaño del pool.
  pub fn from_env() -> Result<Self> {
    dotenvy::dotenv().ok();
    let url = std::env::var(DB_URL_VAR).or_else(|_| std::env::var("DATABASE_URL"))
                                       .unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    let config = Self::from_connection_string(&url)?;
    match std::env::var(DB_POOL_VAR) {
      Ok(raw) => {
        let size: u32 = raw.trim().parse().map_err(|_| {
                                              ProcessError::Configuration(format!("{} inválido: {}", DB_POOL_VAR, raw))
                                            })?;
        Ok(config.with_pool_size(size))
      }
      Err(_) => Ok(config),
    }
  }

  fn embedded(path: &str) -> Self {
    StoreConfig::Embedded { path: path.to_string(),
                            pool_size: DEFAULT_POOL_SIZE }
  }

  pub fn with_pool_size(self, size: u32) -> Self {
    let size = size.max(1);
    match self {
      StoreConfig::Embedded { path, .. } => StoreConfig::Embedded { path, pool_size: size },
      StoreConfig::Remote { url, .. } => StoreConfig::Remote { url, pool_size: size },
    }
  }

  /// `true` para bases SQLite que viven sólo en memoria.
  pub fn is_memory(&self) -> bool {
    match self {
      StoreConfig::Embedded { path, .. } => path == ":memory:" || path.contains("mode=memory"),
      StoreConfig::Remote { .. } => false,
    }
  }

  /// Tamaño efectivo del pool. Una base en memoria sólo existe dentro de su
  /// conexión, así que se fuerza a 1.
  pub fn pool_size(&self) -> u32 {
    if self.is_memory() {
      return 1;
    }
    match self {
      StoreConfig::Embedded { pool_size, .. } | StoreConfig::Remote { pool_size, .. } => *pool_size,
    }
  }

  pub fn connection_string(&self) -> &str {
    match self {
      StoreConfig::Embedded { path, .. } => path,
      StoreConfig::Remote { url, .. } => url,
    }
  }
}
