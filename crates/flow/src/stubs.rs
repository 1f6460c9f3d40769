// Archivo: stubs.rs
// Propósito: implementaciones en memoria para pruebas y wiring rápido.
//
// Incluye un adaptador de persistencia en memoria (`InMemoryPersistence`) y
// una definición estática (`StaticDefinition`). No son durables y se usan
// para demos o pruebas locales.
use crate::domain::{now_millis, FlowObject, FlowObjectKind, Participant, ProcessDocument};
use crate::errors::{ProcessError, Result};
use crate::process::ProcessDefinition;
use crate::repository::PersistenceAdapter;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Adaptador de persistencia en memoria (no durable).
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    documents: Mutex<Vec<ProcessDocument>>,
    closed: AtomicBool,
}

impl InMemoryPersistence {
    /// Crea un almacén vacío.
    pub fn new() -> Self {
        Self::default()
    }

    /// Helper para mapear `Mutex::lock()` en un `Result` con
    /// `ProcessError::Storage`, y rechazar el uso tras `close`.
    fn documents(&self) -> Result<MutexGuard<'_, Vec<ProcessDocument>>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProcessError::Storage("almacén cerrado".into()));
        }
        self.documents
            .lock()
            .map_err(|e| ProcessError::Storage(format!("mutex poisoned: {:?}", e)))
    }

    /// Inserta un documento tal cual, sin regla de upsert. Sirve para
    /// sembrar datos previos o simular corrupción en pruebas.
    pub fn insert_raw(&self, document: ProcessDocument) -> Result<()> {
        self.documents()?.push(document);
        Ok(())
    }

    /// Número total de documentos almacenados.
    pub fn len(&self) -> usize {
        self.documents.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryPersistence {
    async fn persist(&self, document: ProcessDocument) -> Result<ProcessDocument> {
        let mut docs = self.documents()?;
        let matches: Vec<usize> = docs.iter()
                                      .enumerate()
                                      .filter(|(_, d)| {
                                          d.process_id == document.process_id && d.process_name == document.process_name
                                      })
                                      .map(|(i, _)| i)
                                      .collect();
        match matches.as_slice() {
            [] => {
                let stored = document.stamped(None, now_millis(), || Uuid::new_v4().to_string());
                docs.push(stored.clone());
                Ok(stored)
            }
            [idx] => {
                let stored = document.stamped(Some(&docs[*idx]), now_millis(), || Uuid::new_v4().to_string());
                docs[*idx] = stored.clone();
                Ok(stored)
            }
            _ => Err(ProcessError::not_unique(&document.process_id)),
        }
    }

    async fn load(&self, process_id: &str, process_name: &str) -> Result<Option<ProcessDocument>> {
        let docs = self.documents()?;
        let mut found = docs.iter()
                            .filter(|d| d.process_id == process_id && d.process_name == process_name);
        let first = found.next().cloned();
        if found.next().is_some() {
            return Err(ProcessError::not_unique(process_id));
        }
        Ok(first)
    }

    async fn load_all(&self, process_name: &str) -> Result<Vec<ProcessDocument>> {
        let docs = self.documents()?;
        Ok(docs.iter().filter(|d| d.process_name == process_name).cloned().collect())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Definición estática construida en código. Sustituye al parser de
/// fuentes de definición en pruebas y demos.
#[derive(Debug, Clone)]
pub struct StaticDefinition {
    name: String,
    participants: Vec<Participant>,
    flow_objects: Vec<FlowObject>,
}

impl StaticDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(),
               participants: Vec::new(),
               flow_objects: Vec::new() }
    }

    pub fn with_participant(mut self, name: impl Into<String>) -> Self {
        self.participants.push(Participant::new(name));
        self
    }

    pub fn with_flow_object(mut self, name: impl Into<String>, kind: FlowObjectKind) -> Self {
        self.flow_objects.push(FlowObject::new(name, kind));
        self
    }

    pub fn with_boundary_timer(self, name: impl Into<String>) -> Self {
        self.with_flow_object(name, FlowObjectKind::BoundaryTimerEvent)
    }

    pub fn with_catch_timer(self, name: impl Into<String>) -> Self {
        self.with_flow_object(name, FlowObjectKind::IntermediateCatchTimerEvent)
    }
}

impl ProcessDefinition for StaticDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn collaborating_participants(&self) -> Vec<Participant> {
        self.participants.clone()
    }

    fn flow_objects(&self) -> Vec<FlowObject> {
        self.flow_objects.clone()
    }
}
