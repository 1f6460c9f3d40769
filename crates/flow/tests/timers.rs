use flow::{now_millis, Done, HandlerContext, PendingTimerEvents, ProcessError, ProcessHandlerSet, StaticDefinition,
           Timeout, TimerHost, TimerKind};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

#[derive(Default)]
struct RecordingHost {
  events: Mutex<Vec<(String, i64)>>,
}

impl RecordingHost {
  fn events(&self) -> Vec<String> {
    self.events.lock().unwrap().iter().map(|(e, _)| e.clone()).collect()
  }

  fn fired_at(&self, event: &str) -> Option<i64> {
    self.events.lock().unwrap().iter().find(|(e, _)| e == event).map(|(_, t)| *t)
  }

  fn push(&self, e: String) {
    self.events.lock().unwrap().push((e, now_millis()));
  }
}

impl TimerHost for RecordingHost {
  fn handler_context(&self, flow_object_name: &str, data: Value) -> HandlerContext {
    HandlerContext { process_id: "p-1".into(),
                     process_name: "Timers".into(),
                     flow_object_name: flow_object_name.into(),
                     properties: Map::new(),
                     data }
  }

  fn boundary_timer_fired(&self, name: &str) {
    self.push(format!("boundary:{}", name));
  }

  fn leave_catch_step(&self, name: &str) {
    self.push(format!("leave:{}", name));
  }

  fn catch_step_completed(&self, name: &str, data: Value) {
    self.push(format!("continue:{}:{}", name, data));
  }
}

fn timers_for(host: &Arc<RecordingHost>, handlers: ProcessHandlerSet) -> PendingTimerEvents {
  let weak: Weak<dyn TimerHost> = Arc::downgrade(host) as Weak<dyn TimerHost>;
  PendingTimerEvents::new(Arc::new(handlers), weak)
}

#[tokio::test]
async fn boundary_timer_fires_once_after_duration() {
  let host = Arc::new(RecordingHost::default());
  let timers = timers_for(&host, ProcessHandlerSet::new().with_timeout("Deadline", |_| json!(40)));

  timers.add_boundary_timer("Deadline", None).expect("add");
  assert!(timers.has_live_handle("Deadline"));
  assert_eq!(timers.kind_of("Deadline"), Some(TimerKind::Boundary));
  assert!(host.events().is_empty());

  tokio::time::sleep(Duration::from_millis(200)).await;
  assert_eq!(host.events(), vec!["boundary:Deadline".to_string()]);
  assert!(timers.is_empty());
  assert!(!timers.has_live_handle("Deadline"));
}

#[tokio::test]
async fn non_numeric_timeout_is_a_configuration_error() {
  let host = Arc::new(RecordingHost::default());
  let timers = timers_for(&host, ProcessHandlerSet::new().with_timeout("Wait", |_| json!("five seconds")));

  let err = timers.add_boundary_timer("Wait", None).unwrap_err();
  assert!(matches!(err, ProcessError::TimerConfiguration(_)));
  assert!(timers.is_empty());
}

#[tokio::test]
async fn missing_timeout_handler_is_a_configuration_error() {
  let host = Arc::new(RecordingHost::default());
  let timers = timers_for(&host, ProcessHandlerSet::new());
  let err = timers.add_intermediate_catch_timer("Wait", None).unwrap_err();
  assert!(matches!(err, ProcessError::TimerConfiguration(_)));
}

#[tokio::test]
async fn remove_timeout_is_idempotent() {
  let host = Arc::new(RecordingHost::default());
  let timers = timers_for(&host, ProcessHandlerSet::new().with_timeout("T", |_| json!(50)));

  timers.remove_timeout("never-added");
  timers.add_boundary_timer("T", None).unwrap();
  timers.remove_timeout("T");
  timers.remove_timeout("T");
  assert!(!timers.has_live_handle("T"));
  assert!(timers.get_timeout("T").is_none());

  tokio::time::sleep(Duration::from_millis(150)).await;
  assert!(host.events().is_empty(), "cancelled timer must not fire");
}

#[tokio::test]
async fn readding_a_timer_keeps_a_single_handle() {
  let host = Arc::new(RecordingHost::default());
  let timers = timers_for(&host, ProcessHandlerSet::new().with_timeout("T", |_| json!(30)));

  timers.add_boundary_timer("T", None).unwrap();
  timers.add_boundary_timer("T", None).unwrap();
  assert_eq!(timers.len(), 1);

  tokio::time::sleep(Duration::from_millis(150)).await;
  assert_eq!(host.events(), vec!["boundary:T".to_string()]);
}

#[tokio::test]
async fn elapsed_persisted_timer_fires_synchronously_on_restore() {
  let host = Arc::new(RecordingHost::default());
  let definition = StaticDefinition::new("Timers").with_boundary_timer("Expired");
  let timers = timers_for(&host, ProcessHandlerSet::new().with_timeout("Expired", |_| json!(60_000)));

  let mut persisted = BTreeMap::new();
  persisted.insert("Expired".to_string(), Timeout::absolute(now_millis() - 5_000, 60_000));
  timers.restore(&persisted, &definition).expect("restore");

  // sin esperar: el disparo ocurrió dentro de `restore`
  assert_eq!(host.events(), vec!["boundary:Expired".to_string()]);
  assert!(timers.is_empty());
}

#[tokio::test]
async fn restored_timer_keeps_its_absolute_deadline() {
  let handlers = || ProcessHandlerSet::new().with_timeout("Reminder", |_| json!(120));
  let definition = StaticDefinition::new("Timers").with_boundary_timer("Reminder");

  let first_host = Arc::new(RecordingHost::default());
  let first = timers_for(&first_host, handlers());
  first.add_boundary_timer("Reminder", None).unwrap();
  let saved = first.timeouts();
  let original = saved["Reminder"];
  drop(first);

  tokio::time::sleep(Duration::from_millis(30)).await;

  let host = Arc::new(RecordingHost::default());
  let restored = timers_for(&host, handlers());
  restored.restore(&saved, &definition).unwrap();
  assert_eq!(restored.get_timeout("Reminder"), Some(original));

  tokio::time::sleep(Duration::from_millis(300)).await;
  assert!(first_host.events().is_empty(), "dropped table must not fire");
  let fired = host.fired_at("boundary:Reminder").expect("fired");
  assert!(fired >= original.at - 5, "fired too early: {} < {}", fired, original.at);
  assert!(fired - original.at < 150, "fired too late: {} vs {}", fired, original.at);
}

#[tokio::test]
async fn catch_timer_waits_for_handler_completion() {
  let pending: Arc<Mutex<Option<Done>>> = Arc::new(Mutex::new(None));
  let slot = pending.clone();
  let handlers = ProcessHandlerSet::new().with_timeout("Wait", |_| json!(0))
                                         .with_event("Wait", move |_ctx, done| {
                                           *slot.lock().unwrap() = Some(done);
                                         });
  let host = Arc::new(RecordingHost::default());
  let definition = StaticDefinition::new("Timers").with_catch_timer("Wait");
  let timers = timers_for(&host, handlers);

  let mut persisted = BTreeMap::new();
  persisted.insert("Wait".to_string(), Timeout::absolute(now_millis() - 1, 0));
  timers.restore(&persisted, &definition).unwrap();

  assert_eq!(host.events(), vec!["leave:Wait".to_string()]);
  let done = pending.lock().unwrap().take().expect("handler invoked");
  done.complete(json!({"ok": 1}));
  assert_eq!(host.events(),
             vec!["leave:Wait".to_string(), format!("continue:Wait:{}", json!({"ok": 1}))]);
}

#[tokio::test]
async fn catch_timer_without_user_handler_continues_at_once() {
  let host = Arc::new(RecordingHost::default());
  let timers = timers_for(&host, ProcessHandlerSet::new().with_timeout("Pause", |_| json!(10)));
  timers.add_intermediate_catch_timer("Pause", None).unwrap();

  tokio::time::sleep(Duration::from_millis(120)).await;
  assert_eq!(host.events(), vec!["leave:Pause".to_string(), "continue:Pause:null".to_string()]);
}

#[tokio::test]
async fn restore_skips_timers_unknown_to_the_definition() {
  let host = Arc::new(RecordingHost::default());
  let definition = StaticDefinition::new("Timers");
  let timers = timers_for(&host, ProcessHandlerSet::new());
  let mut persisted = BTreeMap::new();
  persisted.insert("Gone".to_string(), Timeout::absolute(now_millis() + 10_000, 10_000));
  timers.restore(&persisted, &definition).unwrap();
  assert!(timers.is_empty());
  assert!(host.events().is_empty());
}
