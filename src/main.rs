use anyhow::Context;
use flow::PersistenceAdapter;
use flow_persistence::StoreConfig;
use std::io::{self, Write};
use std::sync::Arc;

/// Pequeño menú interactivo para inspeccionar los documentos de proceso
/// guardados en el almacén configurado (`PROCFLOW_DB_URL`, `DATABASE_URL`
/// o `procflow.db`).
///
/// Opciones soportadas:
/// 1) Listar documentos de un proceso
/// 2) Ver un documento
/// 3) Contar documentos por nombre de proceso
/// 4) Salir
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = StoreConfig::from_env().context("configuración de almacenamiento")?;
    log::debug!("configuración: {:?}", config);
    let store = flow_persistence::open_store(&config).context("abriendo el almacén")?;
    println!("Almacén: {}", config.connection_string());

    loop {
        println!("\n== procflow ==");
        println!("1) Listar documentos de un proceso");
        println!("2) Ver un documento");
        println!("3) Contar documentos por nombre de proceso");
        println!("4) Salir");
        let choice = prompt("Elige una opción: ")?;
        match choice.trim() {
            "1" => {
                let name = prompt("Nombre del proceso: ")?;
                list_documents(&store, name.trim()).await;
            }
            "2" => {
                let name = prompt("Nombre del proceso: ")?;
                let id = prompt("Process id: ")?;
                match store.load(id.trim(), name.trim()).await {
                    Ok(Some(doc)) => println!("{}", serde_json::to_string_pretty(&doc)?),
                    Ok(None) => println!("No existe el documento"),
                    Err(e) => eprintln!("Error cargando documento: {}", e),
                }
            }
            "3" => {
                let names = prompt("Nombres separados por coma: ")?;
                for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                    match store.load_all(name).await {
                        Ok(docs) => println!("{}: {}", name, docs.len()),
                        Err(e) => eprintln!("{}: error {}", name, e),
                    }
                }
            }
            "4" => {
                println!("Saliendo...");
                break;
            }
            other => {
                println!("Opción inválida: {}", other);
            }
        }
    }

    store.close().await?;
    Ok(())
}

async fn list_documents(store: &Arc<dyn PersistenceAdapter>, name: &str) {
    match store.load_all(name).await {
        Ok(docs) if docs.is_empty() => println!("Sin documentos para '{}'", name),
        Ok(docs) => {
            println!("\nPROCESS ID                           | SAVED         | UPDATED       | TIMERS");
            println!("--------------------------------------------------------------------------------");
            for d in docs {
                println!("{:<36} | {:<13} | {:<13} | {}",
                         d.process_id,
                         d.saved.unwrap_or_default(),
                         d.updated.unwrap_or_default(),
                         d.pending_timeouts.len());
            }
        }
        Err(e) => eprintln!("Error listando documentos: {}", e),
    }
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}
