// Archivo: handlers.rs
// Propósito: tabla explícita de handlers por definición de proceso.
//
// Los handlers se registran una vez al cargar la definición, indexados por
// el nombre saneado del flow object (más un sufijo opcional como
// `$getTimeout`). La regla de saneamiento forma parte de la superficie de
// compatibilidad con módulos de handlers existentes.
use crate::process::ProcessDefinition;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Sufijo del handler que resuelve la duración de un timer.
pub const GET_TIMEOUT_SUFFIX: &str = "$getTimeout";

const REPLACED_CHARS: &[char] = &[':', '!', '`', '~', '^', '@', '*', '#', '¢', '¬', 'ç', '?', '¦', '|', '&', ';', '%',
                                  '"', '<', '>', '(', ')', '{', '}', '[', ']', '+', ',', ' ', '\t', '\n'];

/// Nombre de handler para un flow object.
///
/// Cada carácter de `REPLACED_CHARS` se sustituye por `_`; si el resultado
/// empieza por un dígito se antepone `_`.
pub fn handler_name(name: &str) -> String {
  let mut clean: String = name.chars()
                              .map(|c| if REPLACED_CHARS.contains(&c) { '_' } else { c })
                              .collect();
  if clean.starts_with(|c: char| c.is_ascii_digit()) {
    clean.insert(0, '_');
  }
  clean
}

/// Datos que recibe un handler de usuario.
#[derive(Debug, Clone)]
pub struct HandlerContext {
  pub process_id: String,
  pub process_name: String,
  pub flow_object_name: String,
  pub properties: Map<String, JsonValue>,
  pub data: JsonValue,
}

/// Callback de finalización entregado a los handlers de eventos.
///
/// El flujo sólo continúa cuando el handler llama a `complete`. Si el
/// handler descarta el `Done` sin llamarlo, el flujo queda detenido en ese
/// paso.
pub struct Done {
  callback: Option<Box<dyn FnOnce(JsonValue) + Send>>,
}

impl Done {
  pub fn new(callback: impl FnOnce(JsonValue) + Send + 'static) -> Self {
    Self { callback: Some(Box::new(callback)) }
  }

  /// Completa el paso con los datos de salida del handler.
  pub fn complete(mut self, data: JsonValue) {
    if let Some(cb) = self.callback.take() {
      cb(data);
    }
  }
}

impl fmt::Debug for Done {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Done").field("pending", &self.callback.is_some()).finish()
  }
}

/// Devuelve la duración del timer en milisegundos. Se devuelve un
/// `JsonValue` porque los módulos de handlers pueden devolver cualquier cosa;
/// un valor no numérico es un error de configuración.
pub type TimeoutHandler = Arc<dyn Fn(&HandlerContext) -> JsonValue + Send + Sync>;
/// Handler de usuario con callback de finalización.
pub type EventHandler = Arc<dyn Fn(HandlerContext, Done) + Send + Sync>;
/// Hooks `doneLoadingHandler` / `doneSavingHandler`.
pub type LifecycleHandler = Arc<dyn Fn(&HandlerContext) + Send + Sync>;

/// Conjunto de handlers de una definición.
#[derive(Clone, Default)]
pub struct ProcessHandlerSet {
  timeouts: HashMap<String, TimeoutHandler>,
  events: HashMap<String, EventHandler>,
  done_loading: Option<LifecycleHandler>,
  done_saving: Option<LifecycleHandler>,
}

impl ProcessHandlerSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registra `<name>$getTimeout`.
  pub fn with_timeout(mut self,
                      flow_object_name: &str,
                      handler: impl Fn(&HandlerContext) -> JsonValue + Send + Sync + 'static)
                      -> Self {
    let key = format!("{}{}", handler_name(flow_object_name), GET_TIMEOUT_SUFFIX);
    self.timeouts.insert(key, Arc::new(handler));
    self
  }

  /// Registra el handler de usuario del flow object `flow_object_name`.
  pub fn with_event(mut self,
                    flow_object_name: &str,
                    handler: impl Fn(HandlerContext, Done) + Send + Sync + 'static)
                    -> Self {
    self.events.insert(handler_name(flow_object_name), Arc::new(handler));
    self
  }

  pub fn with_done_loading(mut self, handler: impl Fn(&HandlerContext) + Send + Sync + 'static) -> Self {
    self.done_loading = Some(Arc::new(handler));
    self
  }

  pub fn with_done_saving(mut self, handler: impl Fn(&HandlerContext) + Send + Sync + 'static) -> Self {
    self.done_saving = Some(Arc::new(handler));
    self
  }

  pub fn timeout_handler(&self, flow_object_name: &str) -> Option<&TimeoutHandler> {
    self.timeouts
        .get(&format!("{}{}", handler_name(flow_object_name), GET_TIMEOUT_SUFFIX))
  }

  pub fn event_handler(&self, flow_object_name: &str) -> Option<&EventHandler> {
    self.events.get(&handler_name(flow_object_name))
  }

  pub fn done_loading(&self) -> Option<&LifecycleHandler> {
    self.done_loading.as_ref()
  }

  pub fn done_saving(&self) -> Option<&LifecycleHandler> {
    self.done_saving.as_ref()
  }

  /// Nombres de handler `$getTimeout` que faltan para los timers de la
  /// definición.
  pub fn missing_timeout_handlers(&self, definition: &dyn ProcessDefinition) -> Vec<String> {
    definition.flow_objects()
              .iter()
              .filter(|fo| fo.is_timer_event())
              .filter(|fo| self.timeout_handler(&fo.name).is_none())
              .map(|fo| format!("{}{}", handler_name(&fo.name), GET_TIMEOUT_SUFFIX))
              .collect()
  }
}

impl fmt::Debug for ProcessHandlerSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut timeouts: Vec<&String> = self.timeouts.keys().collect();
    timeouts.sort();
    let mut events: Vec<&String> = self.events.keys().collect();
    events.sort();
    f.debug_struct("ProcessHandlerSet")
     .field("timeouts", &timeouts)
     .field("events", &events)
     .field("done_loading", &self.done_loading.is_some())
     .field("done_saving", &self.done_saving.is_some())
     .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::Mutex;

  #[test]
  fn sanitizes_reserved_characters() {
    assert_eq!(handler_name("Wait 5s"), "Wait_5s");
    assert_eq!(handler_name("a:b!c`d~e^f@g*h#i"), "a_b_c_d_e_f_g_h_i");
    assert_eq!(handler_name("x?y|z&w;v%u\"t"), "x_y_z_w_v_u_t");
    assert_eq!(handler_name("(a)[b]{c}<d>+e,f"), "_a__b__c__d__e_f");
    assert_eq!(handler_name("tab\there\nnl"), "tab_here_nl");
    assert_eq!(handler_name("¢¬ç¦"), "____");
    assert_eq!(handler_name("plain_name-1.2"), "plain_name-1.2");
  }

  #[test]
  fn numeric_prefix_gets_underscore() {
    assert_eq!(handler_name("5 minutes"), "_5_minutes");
    assert_eq!(handler_name("0"), "_0");
  }

  #[test]
  fn timeout_lookup_uses_sanitized_name() {
    let set = ProcessHandlerSet::new().with_timeout("Wait 5s", |_| json!(5000));
    let ctx = HandlerContext { process_id: "1".into(),
                               process_name: "P".into(),
                               flow_object_name: "Wait 5s".into(),
                               properties: Map::new(),
                               data: JsonValue::Null };
    let h = set.timeout_handler("Wait 5s").expect("handler");
    assert_eq!(h(&ctx), json!(5000));
    assert!(set.timeout_handler("Wait_5s").is_some());
    assert!(set.timeout_handler("Other").is_none());
  }

  #[test]
  fn done_runs_its_callback_once() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let done = Done::new(move |v| s.lock().unwrap().push(v));
    done.complete(json!({"ok": true}));
    assert_eq!(seen.lock().unwrap().as_slice(), &[json!({"ok": true})]);
  }
}
