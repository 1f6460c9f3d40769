// Archivo: cache.rs
// Propósito: caché de instancias del gestor y protocolo de unicidad de ids.
//
// La caché es la única autoridad sobre "¿existe este id?". Las creaciones
// comprueban dos veces: antes de cualquier trabajo asíncrono
// (`ensure_available`) y justo antes de confirmar (`commit`). La segunda
// comprobación y la escritura ocurren bajo la misma adquisición del lock, y
// el lock nunca se mantiene a través de un `.await`.
use flow::{ProcessError, ProcessInstance};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

type Entries = IndexMap<String, Arc<dyn ProcessInstance>>;

/// Instancias en memoria indexadas por process id, en orden de creación.
#[derive(Default)]
pub struct InstanceCache {
  entries: Mutex<Entries>,
}

fn duplicate(id: &str) -> ProcessError {
  log::debug!("id de proceso rechazado por duplicado: {}", id);
  ProcessError::DuplicateId(id.to_string())
}

/// Verifica que ningún id esté en la caché ni se repita dentro del lote.
fn check_ids<'a>(entries: &Entries, ids: impl IntoIterator<Item = &'a str>) -> Result<(), ProcessError> {
  let mut seen = HashSet::new();
  for id in ids {
    if entries.contains_key(id) || !seen.insert(id) {
      return Err(duplicate(id));
    }
  }
  Ok(())
}

impl InstanceCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Entries> {
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Primera comprobación: rechaza de inmediato ids ya usados.
  pub fn ensure_available(&self, ids: &[&str]) -> Result<(), ProcessError> {
    check_ids(&self.lock(), ids.iter().copied())
  }

  /// Segunda comprobación y confirmación del lote completo. Si un solo id
  /// choca, no se escribe ninguno.
  pub fn commit(&self, instances: &[Arc<dyn ProcessInstance>]) -> Result<(), ProcessError> {
    let ids: Vec<String> = instances.iter().map(|i| i.process_id()).collect();
    let mut entries = self.lock();
    check_ids(&entries, ids.iter().map(String::as_str))?;
    for (id, instance) in ids.into_iter().zip(instances.iter()) {
      entries.insert(id, instance.clone());
    }
    Ok(())
  }

  pub fn get(&self, process_id: &str) -> Option<Arc<dyn ProcessInstance>> {
    self.lock().get(process_id).cloned()
  }

  pub fn contains(&self, process_id: &str) -> bool {
    self.lock().contains_key(process_id)
  }

  /// Todas las instancias, en orden de creación.
  pub fn values(&self) -> Vec<Arc<dyn ProcessInstance>> {
    self.lock().values().cloned().collect()
  }

  /// Instancias que cumplen `pred`. El predicado se evalúa sobre una copia,
  /// fuera del lock.
  pub fn filter(&self, pred: impl Fn(&dyn ProcessInstance) -> bool) -> Vec<Arc<dyn ProcessInstance>> {
    self.values().into_iter().filter(|i| pred(&**i)).collect()
  }

  /// Vacía la caché y devuelve las instancias retiradas.
  pub fn clear(&self) -> Vec<Arc<dyn ProcessInstance>> {
    self.lock().drain(..).map(|(_, i)| i).collect()
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
