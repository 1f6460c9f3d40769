// Archivo: init_queue.rs
// Propósito: serializar la inicialización asíncrona de definiciones.
//
// Una única tarea tokio drena la cola en orden FIFO, una definición cada
// vez. Los registros que llegan mientras se drena se añaden a la misma
// ronda. Cuando la cola se vacía, todos los que esperan reciben el mismo
// resultado. Un fallo abandona las definiciones restantes y queda
// recordado hasta que un nuevo registro arranca otra ronda.
use crate::errors::{ManagerError, Result};
use crate::registry::RegisteredDefinition;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

/// Paso de instalación de una definición (carga de persistidos incluida).
#[async_trait]
pub trait DefinitionLoader: Send + Sync {
  async fn install(&self, entry: RegisteredDefinition) -> Result<()>;
}

type Waiter = oneshot::Sender<Result<()>>;

#[derive(Default)]
struct QueueState {
  pending: VecDeque<RegisteredDefinition>,
  running: bool,
  outcome: Option<ManagerError>,
  waiters: Vec<Waiter>,
}

fn lock(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
  state.lock().unwrap_or_else(|e| e.into_inner())
}

fn notify(waiters: Vec<Waiter>, outcome: &Option<ManagerError>) {
  for waiter in waiters {
    let result = match outcome {
      Some(e) => Err(e.clone()),
      None => Ok(()),
    };
    // el receptor pudo haberse cancelado
    let _ = waiter.send(result);
  }
}

/// Cola de inicialización de definiciones.
#[derive(Clone, Default)]
pub struct InitializationQueue {
  state: Arc<Mutex<QueueState>>,
}

impl InitializationQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Añade una definición. Si no hay ronda en curso, arranca una nueva
  /// (olvidando el error de la ronda anterior) con su propia tarea.
  pub fn enqueue(&self, entry: RegisteredDefinition, loader: Arc<dyn DefinitionLoader>) -> Result<()> {
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
                    flow::ProcessError::Configuration("se requiere un runtime tokio para inicializar definiciones".into())
                  })?;
    let mut st = lock(&self.state);
    log::debug!("definición '{}' encolada ({} pendientes)", entry.name(), st.pending.len());
    st.pending.push_back(entry);
    if st.running {
      return Ok(());
    }
    st.running = true;
    st.outcome = None;
    drop(st);
    runtime.spawn(drain(self.state.clone(), loader));
    Ok(())
  }

  /// Espera a que la ronda en curso termine. Sin ronda en curso devuelve
  /// de inmediato el resultado de la última.
  pub async fn after_initialization(&self) -> Result<()> {
    let rx = {
      let mut st = lock(&self.state);
      if !st.running {
        return match &st.outcome {
          Some(e) => Err(e.clone()),
          None => Ok(()),
        };
      }
      let (tx, rx) = oneshot::channel();
      st.waiters.push(tx);
      rx
    };
    rx.await.map_err(|_| ManagerError::QueueClosed)?
  }

  /// `true` mientras hay una ronda drenándose.
  pub fn is_running(&self) -> bool {
    lock(&self.state).running
  }
}

// Cierra la ronda si la tarea termina sin pasar por el final normal
// (p. ej. un pánico dentro del loader).
struct RunGuard {
  state: Arc<Mutex<QueueState>>,
}

impl Drop for RunGuard {
  fn drop(&mut self) {
    let mut st = lock(&self.state);
    if !st.running {
      return;
    }
    st.running = false;
    st.pending.clear();
    st.outcome = Some(ManagerError::QueueClosed);
    let waiters = std::mem::take(&mut st.waiters);
    let outcome = st.outcome.clone();
    drop(st);
    notify(waiters, &outcome);
  }
}

async fn drain(state: Arc<Mutex<QueueState>>, loader: Arc<dyn DefinitionLoader>) {
  let _guard = RunGuard { state: state.clone() };
  loop {
    let next = {
      let mut st = lock(&state);
      match st.pending.pop_front() {
        Some(entry) => entry,
        None => {
          st.running = false;
          let waiters = std::mem::take(&mut st.waiters);
          let outcome = st.outcome.clone();
          drop(st);
          notify(waiters, &outcome);
          return;
        }
      }
    };
    let name = next.name().to_string();
    if let Err(e) = loader.install(next).await {
      // la ronda se cierra bajo el mismo lock: un registro posterior ya
      // arranca una ronda nueva en lugar de colarse en la fallida
      let mut st = lock(&state);
      log::error!("inicialización de '{}' fallida, se abandonan {} definiciones: {}",
                  name,
                  st.pending.len(),
                  e);
      st.pending.clear();
      st.outcome = Some(e);
      st.running = false;
      let waiters = std::mem::take(&mut st.waiters);
      let outcome = st.outcome.clone();
      drop(st);
      notify(waiters, &outcome);
      return;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use flow::{ProcessError, ProcessHandlerSet, StaticDefinition};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Weak;
  use std::time::Duration;

  #[derive(Default)]
  struct Recorder {
    installed: Mutex<Vec<String>>,
    fail_on: Option<String>,
  }

  #[async_trait]
  impl DefinitionLoader for Recorder {
    async fn install(&self, entry: RegisteredDefinition) -> Result<()> {
      tokio::time::sleep(Duration::from_millis(10)).await;
      if self.fail_on.as_deref() == Some(entry.name()) {
        return Err(ManagerError::Initialization { definition: entry.name().to_string(),
                                                  source: ProcessError::DuplicateId("p-1".into()) });
      }
      self.installed.lock().unwrap().push(entry.name().to_string());
      Ok(())
    }
  }

  fn entry(name: &str) -> RegisteredDefinition {
    RegisteredDefinition::new(Arc::new(StaticDefinition::new(name)), ProcessHandlerSet::new())
  }

  #[tokio::test]
  async fn drains_in_fifo_order_in_a_single_run() {
    let queue = InitializationQueue::new();
    let loader = Arc::new(Recorder::default());
    for name in ["A", "B", "C"] {
      queue.enqueue(entry(name), loader.clone()).unwrap();
    }
    assert!(queue.is_running());
    queue.after_initialization().await.unwrap();
    assert_eq!(*loader.installed.lock().unwrap(), vec!["A", "B", "C"]);
    assert!(!queue.is_running());
  }

  #[tokio::test]
  async fn failure_abandons_the_rest_and_is_remembered() {
    let queue = InitializationQueue::new();
    let loader = Arc::new(Recorder { fail_on: Some("B".into()),
                                     ..Default::default() });
    for name in ["A", "B", "C"] {
      queue.enqueue(entry(name), loader.clone()).unwrap();
    }
    let (first, second) = tokio::join!(queue.after_initialization(), queue.after_initialization());
    assert!(first.unwrap_err().is_duplicate_id());
    assert!(matches!(second, Err(ManagerError::Initialization { .. })));
    assert_eq!(*loader.installed.lock().unwrap(), vec!["A"]);

    // recordado hasta la próxima ronda
    assert!(queue.after_initialization().await.is_err());
    queue.enqueue(entry("D"), loader.clone()).unwrap();
    queue.after_initialization().await.unwrap();
    assert_eq!(*loader.installed.lock().unwrap(), vec!["A", "D"]);
  }

  /// Loader que, al instalar "A", registra "C" en la misma cola y deja un
  /// waiter esperando a mitad de la ronda.
  struct Chaining {
    me: Weak<Chaining>,
    queue: InitializationQueue,
    installed: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    fail_on: Option<String>,
    late_waiter: Mutex<Option<tokio::task::JoinHandle<Result<()>>>>,
  }

  impl Chaining {
    fn new(queue: &InitializationQueue, fail_on: Option<&str>) -> Arc<Self> {
      Arc::new_cyclic(|me| Chaining { me: me.clone(),
                                      queue: queue.clone(),
                                      installed: Mutex::new(Vec::new()),
                                      active: AtomicUsize::new(0),
                                      max_active: AtomicUsize::new(0),
                                      fail_on: fail_on.map(str::to_string),
                                      late_waiter: Mutex::new(None) })
    }

    async fn late_outcome(&self) -> Result<()> {
      let handle = self.late_waiter.lock().unwrap().take().expect("late waiter");
      handle.await.expect("join")
    }
  }

  #[async_trait]
  impl DefinitionLoader for Chaining {
    async fn install(&self, entry: RegisteredDefinition) -> Result<()> {
      let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
      self.max_active.fetch_max(now, Ordering::SeqCst);
      if entry.name() == "A" {
        if let Some(me) = self.me.upgrade() {
          self.queue.enqueue(self::entry("C"), me).unwrap();
        }
        let queue = self.queue.clone();
        let waiter = tokio::spawn(async move { queue.after_initialization().await });
        *self.late_waiter.lock().unwrap() = Some(waiter);
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
      self.active.fetch_sub(1, Ordering::SeqCst);
      if self.fail_on.as_deref() == Some(entry.name()) {
        return Err(ManagerError::Initialization { definition: entry.name().to_string(),
                                                  source: ProcessError::DuplicateId("p-1".into()) });
      }
      self.installed.lock().unwrap().push(entry.name().to_string());
      Ok(())
    }
  }

  #[tokio::test]
  async fn registration_during_a_drain_joins_the_same_run() {
    let queue = InitializationQueue::new();
    let loader = Chaining::new(&queue, None);
    queue.enqueue(entry("A"), loader.clone()).unwrap();
    queue.enqueue(entry("B"), loader.clone()).unwrap();

    queue.after_initialization().await.unwrap();
    assert_eq!(*loader.installed.lock().unwrap(), vec!["A", "B", "C"]);
    // un solo worker: nunca dos instalaciones a la vez
    assert_eq!(loader.max_active.load(Ordering::SeqCst), 1);
    assert!(loader.late_outcome().await.is_ok());
  }

  #[tokio::test]
  async fn registration_during_a_failed_run_is_abandoned() {
    let queue = InitializationQueue::new();
    let loader = Chaining::new(&queue, Some("B"));
    queue.enqueue(entry("A"), loader.clone()).unwrap();
    queue.enqueue(entry("B"), loader.clone()).unwrap();

    assert!(queue.after_initialization().await.unwrap_err().is_duplicate_id());
    assert_eq!(*loader.installed.lock().unwrap(), vec!["A"]);
    assert!(loader.late_outcome().await.unwrap_err().is_duplicate_id());
    assert!(!queue.is_running());
  }

  #[test]
  fn enqueue_outside_a_runtime_is_a_configuration_error() {
    let queue = InitializationQueue::new();
    let err = queue.enqueue(entry("A"), Arc::new(Recorder::default())).unwrap_err();
    assert!(matches!(err, ManagerError::Process(ProcessError::Configuration(_))));
  }
}
