// Archivo: timers.rs
// Propósito: subsistema de timers pendientes de una instancia de proceso.
//
// Cada nombre de timer pasa por `ausente -> pendiente(at=T) -> ausente`
// (al dispararse en T o al cancelarse). Un timer pendiente tiene siempre
// exactamente un handle vivo (tarea tokio); ambos se guardan en la misma
// entrada, de modo que no existe ventana observable con uno y sin el otro.
//
// Los timeouts sobreviven a un ciclo guardar/restaurar: al restaurar se
// reutiliza la fecha límite absoluta persistida, y si ya pasó el timer se
// dispara de inmediato y de forma síncrona.
use crate::domain::{now_millis, Timeout};
use crate::errors::{ProcessError, Result};
use crate::handlers::{Done, HandlerContext, ProcessHandlerSet, GET_TIMEOUT_SUFFIX};
use crate::process::ProcessDefinition;
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;

/// Lado de la instancia que recibe los disparos de timers.
///
/// Lo implementa la instancia de proceso; el subsistema sólo guarda una
/// referencia débil para no crear ciclos.
pub trait TimerHost: Send + Sync {
  /// Contexto para invocar handlers de usuario.
  fn handler_context(&self, flow_object_name: &str, data: JsonValue) -> HandlerContext;

  /// Llegada al evento de frontera asociado al timer.
  fn boundary_timer_fired(&self, name: &str);

  /// Retira el token pendiente en el paso de espera.
  fn leave_catch_step(&self, name: &str);

  /// El handler de usuario terminó: el flujo continúa (tokens salientes).
  fn catch_step_completed(&self, name: &str, data: JsonValue);
}

/// Tipo de timer según el flow object que lo declara.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
  Boundary,
  IntermediateCatch,
}

struct ArmedTimer {
  timeout: Timeout,
  kind: TimerKind,
  seq: u64,
  handle: AbortHandle,
}

#[derive(Default)]
struct TimerTable {
  armed: HashMap<String, ArmedTimer>,
  next_seq: u64,
}

struct Shared {
  table: Mutex<TimerTable>,
  handlers: Arc<ProcessHandlerSet>,
  host: Weak<dyn TimerHost>,
}

impl Drop for Shared {
  fn drop(&mut self) {
    let table = self.table.get_mut().unwrap_or_else(|e| e.into_inner());
    for (_, t) in table.armed.drain() {
      t.handle.abort();
    }
  }
}

/// Timers pendientes de una instancia. Clonar comparte la misma tabla.
#[derive(Clone)]
pub struct PendingTimerEvents {
  shared: Arc<Shared>,
}

impl PendingTimerEvents {
  /// Crea la tabla vacía para la instancia `host`.
  pub fn new(handlers: Arc<ProcessHandlerSet>, host: Weak<dyn TimerHost>) -> Self {
    Self { shared: Arc::new(Shared { table: Mutex::new(TimerTable::default()),
                                     handlers,
                                     host }) }
  }

  fn lock(&self) -> MutexGuard<'_, TimerTable> {
    self.shared.table.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Añade un timer de frontera. `persisted` conserva la fecha límite
  /// absoluta guardada.
  pub fn add_boundary_timer(&self, name: &str, persisted: Option<Timeout>) -> Result<()> {
    self.add(name, TimerKind::Boundary, persisted)
  }

  /// Añade un timer de evento intermedio de captura.
  pub fn add_intermediate_catch_timer(&self, name: &str, persisted: Option<Timeout>) -> Result<()> {
    self.add(name, TimerKind::IntermediateCatch, persisted)
  }

  fn add(&self, name: &str, kind: TimerKind, persisted: Option<Timeout>) -> Result<()> {
    let duration = self.resolve_duration(name)?;
    let now = now_millis();
    let timeout = match persisted {
      Some(t) => t,
      None => Timeout::relative_to(now, duration),
    };

    if timeout.is_due_at(now) {
      self.remove_timeout(name);
      log::debug!("timer '{}' vencido (at={}), se dispara de inmediato", name, timeout.at);
      self.dispatch(name, kind);
      return Ok(());
    }

    let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
                    ProcessError::Configuration(format!("se requiere un runtime tokio para armar el timer '{}'", name))
                  })?;
    let delay = Duration::from_millis(timeout.remaining_from(now));

    let mut table = self.lock();
    if let Some(prev) = table.armed.remove(name) {
      prev.handle.abort();
    }
    let seq = table.next_seq;
    table.next_seq += 1;
    let weak = Arc::downgrade(&self.shared);
    let timer_name = name.to_string();
    let task = runtime.spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Some(shared) = weak.upgrade() {
                          PendingTimerEvents { shared }.fire_armed(&timer_name, seq);
                        }
                      });
    table.armed.insert(name.to_string(),
                       ArmedTimer { timeout,
                                    kind,
                                    seq,
                                    handle: task.abort_handle() });
    log::debug!("timer '{}' armado para at={} ({:?})", name, timeout.at, kind);
    Ok(())
  }

  /// Invoca `<name>$getTimeout` y valida que devuelva un número.
  fn resolve_duration(&self, name: &str) -> Result<i64> {
    let handler = self.shared.handlers.timeout_handler(name).ok_or_else(|| {
                    ProcessError::TimerConfiguration(format!("no existe el handler '{}{}'",
                                                             crate::handlers::handler_name(name),
                                                             GET_TIMEOUT_SUFFIX))
                  })?;
    let ctx = self.context(name, JsonValue::Null);
    let value = handler(&ctx);
    value.as_f64().map(|ms| ms.round() as i64).ok_or_else(|| {
      ProcessError::TimerConfiguration(format!("'{}{}' debe devolver un número, devolvió {}",
                                               crate::handlers::handler_name(name),
                                               GET_TIMEOUT_SUFFIX,
                                               value))
    })
  }

  fn context(&self, name: &str, data: JsonValue) -> HandlerContext {
    match self.shared.host.upgrade() {
      Some(host) => host.handler_context(name, data),
      None => HandlerContext { process_id: String::new(),
                               process_name: String::new(),
                               flow_object_name: name.to_string(),
                               properties: Map::new(),
                               data },
    }
  }

  /// Despertar de la tarea armada: sólo dispara si la entrada sigue siendo
  /// la misma armada (mismo `seq`). La entrada se retira bajo el lock, lo que
  /// garantiza como mucho una entrega por armado.
  fn fire_armed(&self, name: &str, seq: u64) {
    let kind = {
      let mut table = self.lock();
      match table.armed.get(name) {
        Some(t) if t.seq == seq => table.armed.remove(name).map(|t| t.kind),
        _ => None,
      }
    };
    if let Some(kind) = kind {
      self.dispatch(name, kind);
    }
  }

  // La entrada del timer ya no está en la tabla cuando se llega aquí.
  fn dispatch(&self, name: &str, kind: TimerKind) {
    let Some(host) = self.shared.host.upgrade() else {
      return;
    };
    log::debug!("timer '{}' disparado ({:?})", name, kind);
    match kind {
      TimerKind::Boundary => host.boundary_timer_fired(name),
      TimerKind::IntermediateCatch => {
        host.leave_catch_step(name);
        let weak_host = self.shared.host.clone();
        let step = name.to_string();
        let done = Done::new(move |data| {
                     if let Some(h) = weak_host.upgrade() {
                       h.catch_step_completed(&step, data);
                     }
                   });
        match self.shared.handlers.event_handler(name) {
          Some(handler) => handler(host.handler_context(name, JsonValue::Null), done),
          None => done.complete(JsonValue::Null),
        }
      }
    }
  }

  /// Cancela el timer `name`. Idempotente: un nombre desconocido es no-op.
  pub fn remove_timeout(&self, name: &str) {
    if let Some(t) = self.lock().armed.remove(name) {
      t.handle.abort();
      log::debug!("timer '{}' cancelado", name);
    }
  }

  /// Cancela todos los timers pendientes.
  pub fn remove_all(&self) {
    let drained: Vec<ArmedTimer> = self.lock().armed.drain().map(|(_, t)| t).collect();
    for t in drained {
      t.handle.abort();
    }
  }

  /// Restaura los timers persistidos. Cada nombre se busca en la definición
  /// para decidir si es de frontera o de captura intermedia.
  pub fn restore(&self, persisted: &BTreeMap<String, Timeout>, definition: &dyn ProcessDefinition) -> Result<()> {
    for (name, timeout) in persisted {
      match definition.flow_object_by_name(name) {
        Some(fo) if fo.is_intermediate_catch_event() => self.add_intermediate_catch_timer(name, Some(*timeout))?,
        Some(_) => self.add_boundary_timer(name, Some(*timeout))?,
        None => {
          log::warn!("timer persistido '{}' ignorado: no existe en la definición '{}'",
                     name,
                     definition.name());
        }
      }
    }
    Ok(())
  }

  /// Copia de los timeouts pendientes, lista para persistir.
  pub fn timeouts(&self) -> BTreeMap<String, Timeout> {
    self.lock()
        .armed
        .iter()
        .map(|(name, t)| (name.clone(), t.timeout))
        .collect()
  }

  pub fn get_timeout(&self, name: &str) -> Option<Timeout> {
    self.lock().armed.get(name).map(|t| t.timeout)
  }

  pub fn kind_of(&self, name: &str) -> Option<TimerKind> {
    self.lock().armed.get(name).map(|t| t.kind)
  }

  /// `true` si existe un handle vivo para `name`.
  pub fn has_live_handle(&self, name: &str) -> bool {
    self.lock().armed.get(name).map(|t| !t.handle.is_finished()).unwrap_or(false)
  }

  pub fn len(&self) -> usize {
    self.lock().armed.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl fmt::Debug for PendingTimerEvents {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PendingTimerEvents").field("timeouts", &self.timeouts()).finish()
  }
}
