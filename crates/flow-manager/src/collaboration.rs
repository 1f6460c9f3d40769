// Archivo: collaboration.rs
// Propósito: construir el lote de instancias de una petición y conectar
// sus participantes colaboradores.
use crate::registry::RegisteredDefinition;
use flow::{PersistenceAdapter, ProcessFactory, ProcessInstance, Result};
use std::sync::Arc;

/// Construye N instancias una a una y enlaza los participantes declarados
/// por cada definición con las demás instancias del mismo lote.
///
/// Un fallo en cualquier construcción aborta el lote: las instancias ya
/// construidas se descartan (y sus timers se cancelan) sin llegar a la caché.
pub struct CollaborationBuilder<'a> {
  factory: &'a dyn ProcessFactory,
  persistence: Option<Arc<dyn PersistenceAdapter>>,
}

impl<'a> CollaborationBuilder<'a> {
  pub fn new(factory: &'a dyn ProcessFactory, persistence: Option<Arc<dyn PersistenceAdapter>>) -> Self {
    Self { factory, persistence }
  }

  pub async fn build(&self, batch: Vec<(RegisteredDefinition, String)>) -> Result<Vec<Arc<dyn ProcessInstance>>> {
    let mut built: Vec<(RegisteredDefinition, Arc<dyn ProcessInstance>)> = Vec::with_capacity(batch.len());
    for (entry, process_id) in batch {
      let created = self.factory
                        .create_instance(&process_id,
                                         entry.definition.clone(),
                                         entry.handlers.clone(),
                                         self.persistence.clone())
                        .await;
      match created {
        Ok(instance) => built.push((entry, instance)),
        Err(e) => {
          discard(built.into_iter().map(|(_, i)| i));
          return Err(e);
        }
      }
    }
    wire_participants(&built);
    Ok(built.into_iter().map(|(_, i)| i).collect())
  }
}

/// Cancela los timers de instancias que no llegarán a la caché.
pub(crate) fn discard(instances: impl IntoIterator<Item = Arc<dyn ProcessInstance>>) {
  for instance in instances {
    instance.pending_timer_events().remove_all();
  }
}

// Un participante ausente del lote queda sin resolver; no es un error aquí.
fn wire_participants(built: &[(RegisteredDefinition, Arc<dyn ProcessInstance>)]) {
  for (entry, instance) in built {
    for participant in entry.definition.collaborating_participants() {
      let partner = built.iter()
                         .map(|(_, other)| other)
                         .find(|other| !Arc::ptr_eq(other, instance) && other.process_name() == participant.name);
      if let Some(partner) = partner {
        instance.add_participant(&participant.name, partner.clone());
      }
    }
  }
}
