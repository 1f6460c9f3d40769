// Archivo: stored.rs
// Propósito: instancia de proceso de referencia respaldada por documentos.
//
// `StoredProcess` guarda propiedades, estado e historial como JSON opaco,
// registra en el historial cada evento y cada disparo de timer, y se
// persiste a sí misma a través del adaptador. No implementa paso de tokens:
// el estado sólo refleja el último flow object alcanzado.
//
// Cada disparo de timer se guarda en segundo plano: el documento deja de
// listar el timer disparado, así que un reinicio no lo vuelve a entregar.
use async_trait::async_trait;
use flow::{now_millis, HandlerContext, PendingTimerEvents, PersistenceAdapter, ProcessDefinition, ProcessDocument,
           ProcessFactory, ProcessHandlerSet, ProcessInstance, Result, TimerHost};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::Mutex as AsyncMutex;

enum ParticipantRef {
  // débil: dos participantes se referencian mutuamente
  Live(Weak<dyn ProcessInstance>),
  Id(String),
}

struct StoredData {
  properties: Map<String, JsonValue>,
  state: JsonValue,
  history: Vec<JsonValue>,
  participants: HashMap<String, ParticipantRef>,
}

impl Default for StoredData {
  fn default() -> Self {
    Self { properties: Map::new(),
           state: json!({ "tokens": [] }),
           history: Vec::new(),
           participants: HashMap::new() }
  }
}

/// Instancia de proceso cuyo estado completo cabe en un `ProcessDocument`.
pub struct StoredProcess {
  process_id: String,
  timers: PendingTimerEvents,
  definition: Arc<dyn ProcessDefinition>,
  handlers: Arc<ProcessHandlerSet>,
  persistence: Option<Arc<dyn PersistenceAdapter>>,
  data: Mutex<StoredData>,
  // turno de guardado: un guardado posterior ve siempre un estado posterior
  saving: AsyncMutex<()>,
  me: Weak<StoredProcess>,
}

impl StoredProcess {
  /// Crea una instancia vacía. Los timers quedan ligados a la instancia
  /// mediante una referencia débil.
  pub fn new(process_id: &str,
             definition: Arc<dyn ProcessDefinition>,
             handlers: Arc<ProcessHandlerSet>,
             persistence: Option<Arc<dyn PersistenceAdapter>>)
             -> Arc<Self> {
    Arc::new_cyclic(|weak: &Weak<StoredProcess>| {
      let host: Weak<dyn TimerHost> = weak.clone();
      StoredProcess { process_id: process_id.to_string(),
                      timers: PendingTimerEvents::new(handlers.clone(), host),
                      definition,
                      handlers,
                      persistence,
                      data: Mutex::new(StoredData::default()),
                      saving: AsyncMutex::new(()),
                      me: weak.clone() }
    })
  }

  fn lock(&self) -> MutexGuard<'_, StoredData> {
    self.data.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn record(&self, entry: JsonValue) {
    self.lock().history.push(entry);
  }

  fn move_token(&self, position: Option<&str>) {
    self.lock().state = match position {
      Some(p) => json!({ "tokens": [{ "position": p }] }),
      None => json!({ "tokens": [] }),
    };
  }

  fn context(&self, flow_object_name: &str, data: JsonValue) -> HandlerContext {
    HandlerContext { process_id: self.process_id.clone(),
                     process_name: self.definition.name().to_string(),
                     flow_object_name: flow_object_name.to_string(),
                     properties: self.lock().properties.clone(),
                     data }
  }

  /// Guarda la instancia desde un contexto síncrono (disparo de timer).
  fn save_in_background(&self) {
    if self.persistence.is_none() {
      return;
    }
    let Some(me) = self.me.upgrade() else {
      return;
    };
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
      log::warn!("'{}' sin runtime tokio: el disparo del timer no se guarda", self.process_id);
      return;
    };
    runtime.spawn(async move {
             if let Err(e) = me.persist().await {
               log::error!("no se pudo guardar '{}' tras un timer: {}", me.process_id, e);
             }
           });
  }

  /// Aplica un documento persistido y restaura sus timers pendientes. Un
  /// timer vencido mientras la instancia no estaba cargada se dispara aquí.
  pub fn restore_from(&self, doc: &ProcessDocument) -> Result<()> {
    {
      let mut data = self.lock();
      data.properties = doc.properties.clone();
      if !doc.state.is_null() {
        data.state = doc.state.clone();
      }
      data.history = doc.history.as_array().cloned().unwrap_or_default();
    }
    self.timers.restore(&doc.pending_timeouts, self.definition.as_ref())
  }

  /// Documento con el estado actual, listo para `PersistenceAdapter::persist`.
  pub fn document(&self) -> ProcessDocument {
    let mut doc = ProcessDocument::new(self.definition.name(), &self.process_id);
    {
      let data = self.lock();
      doc.properties = data.properties.clone();
      doc.state = data.state.clone();
      doc.history = JsonValue::Array(data.history.clone());
    }
    doc.pending_timeouts = self.timers.timeouts();
    doc
  }

  pub fn set_property(&self, key: &str, value: JsonValue) {
    self.lock().properties.insert(key.to_string(), value);
  }

  /// Id del participante `name`, esté resuelto en memoria o no.
  pub fn participant_id(&self, name: &str) -> Option<String> {
    match self.lock().participants.get(name)? {
      ParticipantRef::Live(weak) => weak.upgrade().map(|p| p.process_id()),
      ParticipantRef::Id(id) => Some(id.clone()),
    }
  }
}

impl fmt::Debug for StoredProcess {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StoredProcess")
     .field("process_id", &self.process_id)
     .field("process_name", &self.definition.name())
     .field("timers", &self.timers)
     .finish()
  }
}

impl TimerHost for StoredProcess {
  fn handler_context(&self, flow_object_name: &str, data: JsonValue) -> HandlerContext {
    self.context(flow_object_name, data)
  }

  fn boundary_timer_fired(&self, name: &str) {
    self.record(json!({ "event": name, "type": "boundaryTimer", "at": now_millis() }));
    self.move_token(Some(name));
    self.save_in_background();
  }

  fn leave_catch_step(&self, name: &str) {
    self.record(json!({ "event": name, "type": "timerElapsed", "at": now_millis() }));
    self.move_token(None);
    self.save_in_background();
  }

  fn catch_step_completed(&self, name: &str, data: JsonValue) {
    self.record(json!({ "event": name, "type": "timerCompleted", "data": data, "at": now_millis() }));
    self.save_in_background();
  }
}

#[async_trait]
impl ProcessInstance for StoredProcess {
  fn process_id(&self) -> String {
    self.process_id.clone()
  }

  fn process_name(&self) -> String {
    self.definition.name().to_string()
  }

  fn state(&self) -> JsonValue {
    self.lock().state.clone()
  }

  fn history(&self) -> JsonValue {
    JsonValue::Array(self.lock().history.clone())
  }

  fn properties(&self) -> Map<String, JsonValue> {
    self.lock().properties.clone()
  }

  fn add_participant(&self, name: &str, instance: Arc<dyn ProcessInstance>) {
    self.lock()
        .participants
        .insert(name.to_string(), ParticipantRef::Live(Arc::downgrade(&instance)));
  }

  fn add_participant_id(&self, name: &str, process_id: &str) {
    self.lock()
        .participants
        .insert(name.to_string(), ParticipantRef::Id(process_id.to_string()));
  }

  fn participant(&self, name: &str) -> Option<Arc<dyn ProcessInstance>> {
    match self.lock().participants.get(name)? {
      ParticipantRef::Live(weak) => weak.upgrade(),
      ParticipantRef::Id(_) => None,
    }
  }

  fn pending_timer_events(&self) -> &PendingTimerEvents {
    &self.timers
  }

  /// Registra el evento, mezcla sus datos (si son un objeto) en las
  /// propiedades y mueve el token al flow object. Alcanzar un flow object
  /// con timer arma su timer. Con persistencia configurada, guarda.
  async fn trigger_event(&self, event_name: &str, data: JsonValue) -> Result<()> {
    let flow_object = self.definition.flow_object_by_name(event_name);
    {
      let mut stored = self.lock();
      if let Some(fields) = data.as_object() {
        stored.properties.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
      }
      stored.history.push(json!({ "event": event_name, "data": data, "at": now_millis() }));
    }
    self.move_token(Some(event_name));
    if let Some(fo) = flow_object.filter(|fo| fo.is_timer_event()) {
      if fo.is_intermediate_catch_event() {
        self.timers.add_intermediate_catch_timer(event_name, None)?;
      } else {
        self.timers.add_boundary_timer(event_name, None)?;
      }
    }
    self.persist().await
  }

  async fn persist(&self) -> Result<()> {
    let Some(store) = &self.persistence else {
      return Ok(());
    };
    let _turn = self.saving.lock().await;
    store.persist(self.document()).await?;
    if let Some(hook) = self.handlers.done_saving() {
      hook(&self.context("", JsonValue::Null));
    }
    Ok(())
  }
}

/// Fábrica de `StoredProcess`: carga el documento persistido (si existe)
/// antes de devolver la instancia.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoredProcessFactory;

impl StoredProcessFactory {
  pub fn new() -> Self {
    Self
  }
}

#[async_trait]
impl ProcessFactory for StoredProcessFactory {
  async fn create_instance(&self,
                           process_id: &str,
                           definition: Arc<dyn ProcessDefinition>,
                           handlers: Arc<ProcessHandlerSet>,
                           persistence: Option<Arc<dyn PersistenceAdapter>>)
                           -> Result<Arc<dyn ProcessInstance>> {
    let process_name = definition.name().to_string();
    let instance = StoredProcess::new(process_id, definition, handlers, persistence.clone());
    if let Some(store) = persistence {
      if let Some(doc) = store.load(process_id, &process_name).await? {
        instance.restore_from(&doc)?;
        if let Some(hook) = instance.handlers.done_loading() {
          hook(&instance.context("", JsonValue::Null));
        }
      }
    }
    Ok(instance as Arc<dyn ProcessInstance>)
  }
}
