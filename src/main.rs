use boq_domain::{BoqJobRequest, BoqService, BoqStatus, NewJob, NewMaterial, RequestContext};
use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Menú interactivo para administrar el BOQ de un proyecto usando el
/// repositorio de `boq-persistence`.
///
/// Opciones soportadas:
/// 1) Ver BOQ de un proyecto (lo crea en borrador si no existe)
/// 2) Crear proyecto
/// 3) Crear job
/// 4) Crear material y vincularlo a un job
/// 5) Agregar job al BOQ
/// 6) Quitar job del BOQ
/// 7) Cambiar estado del BOQ
/// 8) Fijar costo general de venta
/// 9) Ver price log del BOQ
/// 0) Salir
fn main() -> Result<(), Box<dyn Error>> {
    // RUST_LOG controla el nivel; los registros de `log` de las librerías
    // llegan por el puente de tracing-log.
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
                             .init();

    // Inicializar repo (aplica migraciones embebidas si procede)
    let repo = Arc::new(boq_persistence::new_from_env().map_err(|e| Box::new(e) as Box<dyn Error>)?);
    let service = BoqService::new(repo.clone());
    let timeout = Duration::from_secs(30);

    loop {
        println!("\n== BOQ CLI menu ==");
        println!("1) Ver BOQ de un proyecto");
        println!("2) Crear proyecto");
        println!("3) Crear job");
        println!("4) Crear material y vincularlo a un job");
        println!("5) Agregar job al BOQ");
        println!("6) Quitar job del BOQ");
        println!("7) Cambiar estado del BOQ");
        println!("8) Fijar costo general de venta");
        println!("9) Ver price log del BOQ");
        println!("0) Salir");
        print!("Elige una opción: ");
        io::stdout().flush().ok();

        let mut choice = String::new();
        io::stdin().read_line(&mut choice)?;
        let ctx = RequestContext::with_timeout(timeout);
        match choice.trim() {
            "1" => {
                let Some(project_id) = prompt_uuid("Project id (UUID): ")? else { continue };
                match service.get_boq_with_project(&ctx, project_id) {
                    Ok(view) => match serde_json::to_string_pretty(&view) {
                        Ok(s) => println!("{}", s),
                        Err(e) => eprintln!("Error serializando BOQ: {}", e),
                    },
                    Err(e) => eprintln!("Error leyendo BOQ: {}", e),
                }
            }
            "2" => {
                let name = prompt("Nombre (enter para vacío): ")?;
                let name_opt = if name.trim().is_empty() { None } else { Some(name.trim().to_string()) };
                match service.create_project(name_opt) {
                    Ok(id) => println!("Proyecto creado: {}", id),
                    Err(e) => eprintln!("Error creando proyecto: {}", e),
                }
            }
            "3" => {
                let name = prompt("Nombre del job: ")?;
                let description = prompt("Descripción (enter para vacío): ")?;
                let unit = prompt("Unidad (ej: m2): ")?;
                let job = NewJob { name: name.trim().to_string(),
                                   description: if description.trim().is_empty() { None } else { Some(description.trim().to_string()) },
                                   unit: unit.trim().to_string() };
                match service.create_job(job) {
                    Ok(id) => println!("Job creado: {}", id),
                    Err(e) => eprintln!("Error creando job: {}", e),
                }
            }
            "4" => {
                let Some(job_id) = prompt_uuid("Job id (UUID): ")? else { continue };
                let name = prompt("Nombre del material: ")?;
                let unit = prompt("Unidad (ej: kg): ")?;
                let Some(quantity) = prompt_f64("Cantidad por unidad de job: ")? else { continue };
                let material = NewMaterial { name: name.trim().to_string(), unit: unit.trim().to_string() };
                let material_id = match service.create_material(material) {
                    Ok(id) => id,
                    Err(e) => { eprintln!("Error creando material: {}", e); continue; }
                };
                match service.set_job_material(job_id, material_id, quantity) {
                    Ok(()) => println!("Material {} vinculado al job {}", material_id, job_id),
                    Err(e) => eprintln!("Error vinculando material: {}", e),
                }
            }
            "5" => {
                let Some(boq_id) = prompt_uuid("BOQ id (UUID): ")? else { continue };
                let Some(job_id) = prompt_uuid("Job id (UUID): ")? else { continue };
                let Some(quantity) = prompt_f64("Cantidad: ")? else { continue };
                let Some(labor_cost) = prompt_f64("Costo de mano de obra: ")? else { continue };
                match service.add_job(&ctx, boq_id, BoqJobRequest::new(job_id, quantity, labor_cost)) {
                    Ok(()) => println!("Job {} agregado al BOQ {}", job_id, boq_id),
                    Err(e) => eprintln!("Error agregando job: {}", e),
                }
            }
            "6" => {
                let Some(boq_id) = prompt_uuid("BOQ id (UUID): ")? else { continue };
                let Some(job_id) = prompt_uuid("Job id a quitar (UUID): ")? else { continue };
                let confirm = prompt(&format!("Confirma quitar {} del BOQ? escribir 'yes' para confirmar: ", job_id))?;
                if confirm.trim().to_lowercase() == "yes" {
                    match service.delete_job(&ctx, boq_id, job_id) {
                        Ok(()) => println!("Job quitado: {}", job_id),
                        Err(e) => eprintln!("Error quitando job: {}", e),
                    }
                } else {
                    println!("Operación cancelada");
                }
            }
            "7" => {
                let Some(boq_id) = prompt_uuid("BOQ id (UUID): ")? else { continue };
                let status_s = prompt("Nuevo estado (draft/approved/rejected): ")?;
                let status: BoqStatus = match status_s.trim().parse() {
                    Ok(s) => s,
                    Err(e) => { eprintln!("{}", e); continue; }
                };
                match service.set_status(&ctx, boq_id, status) {
                    Ok(s) => println!("BOQ {} ahora en estado {}", boq_id, s),
                    Err(e) => eprintln!("Error cambiando estado: {}", e),
                }
            }
            "8" => {
                let Some(boq_id) = prompt_uuid("BOQ id (UUID): ")? else { continue };
                let Some(cost) = prompt_f64("Costo general de venta: ")? else { continue };
                match service.set_selling_general_cost(&ctx, boq_id, cost) {
                    Ok(()) => println!("Costo actualizado"),
                    Err(e) => eprintln!("Error fijando costo: {}", e),
                }
            }
            "9" => {
                let Some(boq_id) = prompt_uuid("BOQ id (UUID): ")? else { continue };
                match service.list_price_logs(boq_id) {
                    Ok(logs) => {
                        println!("\nMATERIAL                             | JOB                                  | CANT     | FECHA");
                        println!("------------------------------------------------------------------------------------------------------");
                        for l in logs {
                            println!("{} | {} | {:>8} | {}", l.material_id, l.job_id, l.quantity, l.updated_at);
                        }
                    }
                    Err(e) => eprintln!("Error listando price log: {}", e),
                }
            }
            "0" => {
                println!("Saliendo...");
                break;
            }
            other => {
                println!("Opción inválida: {}", other);
            }
        }
    }

    drop(service);
    match Arc::try_unwrap(repo) {
        Ok(repo) => repo.close(),
        Err(_) => log::warn!("el repositorio sigue compartido; el pool se libera al terminar"),
    }
    Ok(())
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}

/// `None` si el texto no es un UUID válido (ya se informó al usuario).
fn prompt_uuid(msg: &str) -> io::Result<Option<Uuid>> {
    let s = prompt(msg)?;
    match Uuid::parse_str(s.trim()) {
        Ok(u) => Ok(Some(u)),
        Err(_) => {
            eprintln!("UUID inválido");
            Ok(None)
        }
    }
}

fn prompt_f64(msg: &str) -> io::Result<Option<f64>> {
    let s = prompt(msg)?;
    match s.trim().parse::<f64>() {
        Ok(n) => Ok(Some(n)),
        Err(_) => {
            eprintln!("Número inválido");
            Ok(None)
        }
    }
}
