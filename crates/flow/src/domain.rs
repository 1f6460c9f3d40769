// Archivo: domain.rs
// Propósito: tipos de dominio compartidos: `Timeout`, el documento
// persistido de un proceso (`ProcessDocument`) y las vistas mínimas de la
// definición (`FlowObject`, `Participant`).
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// Milisegundos desde epoch según el reloj de pared.
pub fn now_millis() -> i64 {
  Utc::now().timestamp_millis()
}

/// Timeout pendiente: fecha límite absoluta (`at`, ms desde epoch) y la
/// duración original (`timeout`, ms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeout {
  pub at: i64,
  pub timeout: i64,
}

impl Timeout {
  /// Construye un timeout relativo: `at = now + duration`.
  pub fn relative(duration_ms: i64) -> Self {
    Self::relative_to(now_millis(), duration_ms)
  }

  pub fn relative_to(now_ms: i64, duration_ms: i64) -> Self {
    Timeout { at: now_ms.saturating_add(duration_ms),
              timeout: duration_ms }
  }

  /// Construye un timeout absoluto (restaurado desde persistencia).
  pub fn absolute(at: i64, timeout: i64) -> Self {
    Timeout { at, timeout }
  }

  /// Milisegundos restantes hasta la fecha límite (0 si ya pasó).
  pub fn remaining_from(&self, now_ms: i64) -> u64 {
    if self.at <= now_ms {
      0
    } else {
      (self.at - now_ms) as u64
    }
  }

  pub fn is_due_at(&self, now_ms: i64) -> bool {
    self.at <= now_ms
  }
}

/// Participante colaborador declarado por una definición.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
  pub name: String,
}

impl Participant {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }
}

/// Tipo de flow object relevante para el subsistema de timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowObjectKind {
  Task,
  StartEvent,
  EndEvent,
  Gateway,
  /// Timer adjunto a una actividad.
  BoundaryTimerEvent,
  /// Paso de espera por timer en el flujo principal.
  IntermediateCatchTimerEvent,
  /// Cualquier otro evento intermedio (mensaje, señal...).
  IntermediateCatchEvent,
}

/// Nodo con nombre de la definición (tarea, evento, gateway).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowObject {
  pub name: String,
  pub kind: FlowObjectKind,
}

impl FlowObject {
  pub fn new(name: impl Into<String>, kind: FlowObjectKind) -> Self {
    Self { name: name.into(), kind }
  }

  pub fn is_intermediate_catch_event(&self) -> bool {
    matches!(self.kind,
             FlowObjectKind::IntermediateCatchTimerEvent | FlowObjectKind::IntermediateCatchEvent)
  }

  pub fn is_timer_event(&self) -> bool {
    matches!(self.kind,
             FlowObjectKind::BoundaryTimerEvent | FlowObjectKind::IntermediateCatchTimerEvent)
  }
}

/// Documento persistido de una instancia de proceso.
///
/// El layout JSON (camelCase más `_id`, `_saved`, `_updated`) es parte de la
/// superficie de compatibilidad con almacenes existentes. Los metadatos de
/// almacenamiento los asigna el adaptador:
/// - `_id`: asignado en el primer insert y preservado después.
/// - `_saved`: se fija una sola vez, en el primer insert.
/// - `_updated`: se refresca en cada `persist`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDocument {
  #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  pub process_name: String,
  pub process_id: String,
  #[serde(default)]
  pub parent_token: Option<JsonValue>,
  #[serde(default)]
  pub properties: Map<String, JsonValue>,
  #[serde(default)]
  pub state: JsonValue,
  #[serde(default)]
  pub history: JsonValue,
  #[serde(default)]
  pub pending_timeouts: BTreeMap<String, Timeout>,
  #[serde(default)]
  pub views: JsonValue,
  #[serde(rename = "_saved", default, skip_serializing_if = "Option::is_none")]
  pub saved: Option<i64>,
  #[serde(rename = "_updated", default, skip_serializing_if = "Option::is_none")]
  pub updated: Option<i64>,
}

impl ProcessDocument {
  /// Documento vacío (sin metadatos de almacenamiento) para un proceso.
  pub fn new(process_name: impl Into<String>, process_id: impl Into<String>) -> Self {
    Self { id: None,
           process_name: process_name.into(),
           process_id: process_id.into(),
           parent_token: None,
           properties: Map::new(),
           state: JsonValue::Null,
           history: JsonValue::Array(Vec::new()),
           pending_timeouts: BTreeMap::new(),
           views: JsonValue::Null,
           saved: None,
           updated: None }
  }

  /// Aplica la regla de upsert a un documento recién recibido.
  ///
  /// `existing` es el documento almacenado (si existe). Devuelve el documento
  /// a escribir con `_id`, `_saved` y `_updated` ya resueltos. `_updated`
  /// avanza siempre estrictamente respecto del valor anterior.
  pub fn stamped(mut self, existing: Option<&ProcessDocument>, now_ms: i64, new_id: impl FnOnce() -> String) -> Self {
    match existing {
      Some(prev) => {
        self.id = prev.id.clone();
        self.saved = prev.saved;
        let floor = prev.updated.map(|u| u + 1).unwrap_or(now_ms);
        self.updated = Some(now_ms.max(floor));
      }
      None => {
        self.id = Some(new_id());
        self.saved = Some(now_ms);
        self.updated = Some(now_ms);
      }
    }
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn relative_timeout_adds_duration() {
    let t = Timeout::relative_to(1_000, 250);
    assert_eq!(t, Timeout { at: 1_250, timeout: 250 });
    assert_eq!(t.remaining_from(1_100), 150);
    assert_eq!(t.remaining_from(2_000), 0);
    assert!(t.is_due_at(1_250));
  }

  #[test]
  fn document_uses_compatible_field_names() {
    let mut doc = ProcessDocument::new("Order", "o-1");
    doc.pending_timeouts.insert("Wait".into(), Timeout::absolute(10, 5));
    let doc = doc.stamped(None, 42, || "abc".into());
    let v = serde_json::to_value(&doc).unwrap();
    assert_eq!(v["processName"], json!("Order"));
    assert_eq!(v["processId"], json!("o-1"));
    assert_eq!(v["pendingTimeouts"]["Wait"], json!({"at": 10, "timeout": 5}));
    assert_eq!(v["_id"], json!("abc"));
    assert_eq!(v["_saved"], json!(42));
    assert_eq!(v["_updated"], json!(42));
  }

  #[test]
  fn restamping_keeps_saved_and_advances_updated() {
    let first = ProcessDocument::new("P", "1").stamped(None, 100, || "id-1".into());
    let second = ProcessDocument::new("P", "1").stamped(Some(&first), 100, || "other".into());
    assert_eq!(second.id.as_deref(), Some("id-1"));
    assert_eq!(second.saved, Some(100));
    assert_eq!(second.updated, Some(101));
  }
}
