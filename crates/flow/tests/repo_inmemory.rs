use flow::stubs::InMemoryPersistence;
use flow::{PersistenceAdapter, ProcessDocument, ProcessError, Timeout};
use serde_json::json;
use std::time::Duration;

fn doc(name: &str, id: &str) -> ProcessDocument {
  let mut d = ProcessDocument::new(name, id);
  d.properties.insert("amount".into(), json!(10));
  d
}

#[tokio::test]
async fn persisting_same_id_twice_keeps_one_document() {
  let repo = InMemoryPersistence::new();
  let first = repo.persist(doc("Order", "o-1")).await.unwrap();
  assert!(first.id.is_some());
  assert_eq!(first.saved, first.updated);

  tokio::time::sleep(Duration::from_millis(5)).await;
  let mut changed = doc("Order", "o-1");
  changed.pending_timeouts.insert("Reminder".into(), Timeout::absolute(123, 45));
  let second = repo.persist(changed).await.unwrap();

  assert_eq!(repo.len(), 1);
  assert_eq!(second.id, first.id);
  assert_eq!(second.saved, first.saved);
  assert!(second.updated.unwrap() > first.updated.unwrap());

  let loaded = repo.load("o-1", "Order").await.unwrap().expect("stored");
  assert_eq!(loaded.pending_timeouts["Reminder"], Timeout::absolute(123, 45));
}

#[tokio::test]
async fn distinct_ids_yield_distinct_documents() {
  let repo = InMemoryPersistence::new();
  repo.persist(doc("Order", "o-1")).await.unwrap();
  repo.persist(doc("Order", "o-2")).await.unwrap();
  repo.persist(doc("Invoice", "o-1")).await.unwrap();
  assert_eq!(repo.len(), 3);
  assert_eq!(repo.load_all("Order").await.unwrap().len(), 2);
  assert_eq!(repo.load_all("Invoice").await.unwrap().len(), 1);
}

#[tokio::test]
async fn missing_documents_are_not_errors() {
  let repo = InMemoryPersistence::new();
  assert!(repo.load("nope", "Order").await.unwrap().is_none());
  assert!(repo.load_all("Order").await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicated_process_id_is_reported_as_corruption() {
  let repo = InMemoryPersistence::new();
  repo.insert_raw(doc("Order", "o-1")).unwrap();
  repo.insert_raw(doc("Order", "o-1")).unwrap();

  let err = repo.persist(doc("Order", "o-1")).await.unwrap_err();
  assert!(matches!(err, ProcessError::Storage(ref m) if m.contains("process id is not unique")));
  let err = repo.load("o-1", "Order").await.unwrap_err();
  assert!(matches!(err, ProcessError::Storage(_)));
}

#[tokio::test]
async fn close_is_safe_to_repeat() {
  let repo = InMemoryPersistence::new();
  repo.close().await.unwrap();
  repo.close().await.unwrap();
  assert!(repo.is_closed());
  assert!(repo.load_all("Order").await.is_err());
}

#[test]
fn adapter_works_on_a_plain_block_on() {
  let repo = InMemoryPersistence::new();
  let stored = tokio_test::assert_ok!(tokio_test::block_on(repo.persist(doc("Order", "o-1"))));
  assert_eq!(stored.process_id, "o-1");
  let loaded = tokio_test::assert_ok!(tokio_test::block_on(repo.load("o-1", "Order")));
  assert_eq!(loaded.map(|d| d.id), Some(stored.id));
}
