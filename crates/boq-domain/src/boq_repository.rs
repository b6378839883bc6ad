use crate::{Boq, BoqError, BoqJob, BoqJobRequest, BoqStatus, BoqView, Job, JobMaterial, Material, MaterialPriceLog,
            NewJob, NewMaterial, Project, RequestContext};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Operaciones de persistencia del núcleo BOQ.
///
/// Cada método es una unidad atómica: o se aplica completo o no deja rastro.
/// Las implementaciones concretas (Diesel, memoria) deben respetar el
/// `RequestContext` recibido.
pub trait BoqRepository: Send + Sync {
    /// Devuelve la vista completa del BOQ del proyecto, creando un BOQ en
    /// borrador si el proyecto todavía no tiene uno.
    fn get_boq_with_project(&self, ctx: &RequestContext, project_id: &Uuid) -> Result<BoqView, BoqError>;

    /// Agrega un job al BOQ (sólo en `draft`) y registra en el price log
    /// los materiales que el job requiere.
    fn add_boq_job(&self, ctx: &RequestContext, boq_id: &Uuid, req: &BoqJobRequest) -> Result<(), BoqError>;

    /// Quita un job del BOQ (sólo en `draft`). Quitar un job ausente no es
    /// error. El price log no se toca.
    fn delete_boq_job(&self, ctx: &RequestContext, boq_id: &Uuid, job_id: &Uuid) -> Result<(), BoqError>;

    /// Cambia el estado del BOQ validando la transición.
    fn set_boq_status(&self, ctx: &RequestContext, boq_id: &Uuid, status: BoqStatus) -> Result<BoqStatus, BoqError>;

    /// Fija el costo general de venta; sólo en `draft`.
    fn set_selling_general_cost(&self, ctx: &RequestContext, boq_id: &Uuid, cost: f64) -> Result<(), BoqError>;

    fn create_project(&self, name: Option<String>) -> Result<Uuid, BoqError>;
    fn create_job(&self, job: NewJob) -> Result<Uuid, BoqError>;
    fn create_material(&self, material: NewMaterial) -> Result<Uuid, BoqError>;

    /// Inserta o actualiza la cantidad de un material dentro de un job.
    fn set_job_material(&self, job_id: &Uuid, material_id: &Uuid, quantity: f64) -> Result<(), BoqError>;

    /// Filas `boq_job` del BOQ (cantidad y mano de obra por job).
    fn list_boq_jobs(&self, boq_id: &Uuid) -> Result<Vec<BoqJob>, BoqError>;

    fn list_price_logs(&self, boq_id: &Uuid) -> Result<Vec<MaterialPriceLog>, BoqError>;
}

pub fn validate_cost(cost: f64) -> Result<(), BoqError> {
    if !cost.is_finite() || cost < 0.0 {
        return Err(BoqError::Validation(format!("selling_general_cost no puede ser negativo (recibido {})", cost)));
    }
    Ok(())
}

pub fn validate_material_quantity(quantity: f64) -> Result<(), BoqError> {
    if !quantity.is_finite() || quantity <= 0.0 {
        return Err(BoqError::Validation(format!("la cantidad de material debe ser positiva (recibido {})", quantity)));
    }
    Ok(())
}

#[derive(Default)]
struct Tables {
    projects: HashMap<Uuid, Project>,
    boqs: HashMap<Uuid, Boq>,
    jobs: HashMap<Uuid, Job>,
    materials: HashMap<Uuid, Material>,
    /// (job_id, material_id) -> cantidad
    job_materials: HashMap<(Uuid, Uuid), JobMaterial>,
    /// (boq_id, job_id)
    boq_jobs: HashMap<(Uuid, Uuid), BoqJob>,
    /// (material_id, boq_id, job_id)
    price_logs: HashMap<(Uuid, Uuid, Uuid), MaterialPriceLog>,
}

impl Tables {
    fn boq_status(&self, boq_id: &Uuid) -> Result<BoqStatus, BoqError> {
        self.boqs
            .get(boq_id)
            .map(|b| b.status)
            .ok_or_else(|| BoqError::NotFound(format!("boq {} no existe", boq_id)))
    }
}

/// Implementación en memoria para tests y desarrollo.
///
/// Todas las tablas viven detrás de un único mutex, así cada operación se
/// comporta como una transacción: valida todo antes de escribir.
pub struct InMemoryBoqRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryBoqRepository {
    pub fn new() -> Self {
        Self { tables: Arc::new(Mutex::new(Tables::default())) }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, BoqError> {
        self.tables
            .lock()
            .map_err(|e| BoqError::DataAccess(format!("Mutex 'tables' poisoned: {}", e)))
    }
}

impl Default for InMemoryBoqRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl BoqRepository for InMemoryBoqRepository {
    fn get_boq_with_project(&self, ctx: &RequestContext, project_id: &Uuid) -> Result<BoqView, BoqError> {
        ctx.check("buscar boq")?;
        let mut t = self.lock()?;
        let existing = t.boqs.values().find(|b| &b.project_id == project_id).cloned();
        let boq = match existing {
            Some(b) => b,
            None => {
                if !t.projects.contains_key(project_id) {
                    return Err(BoqError::DataAccess(format!("no se pudo crear el BOQ: proyecto {} no existe", project_id)));
                }
                ctx.check("crear boq")?;
                let b = Boq::new_draft(*project_id);
                log::info!("creado BOQ {} en borrador para el proyecto {}", b.boq_id, project_id);
                t.boqs.insert(b.boq_id, b.clone());
                b
            }
        };
        let jobs: Vec<Job> = t.boq_jobs
                              .values()
                              .filter(|bj| bj.boq_id == boq.boq_id)
                              .filter_map(|bj| t.jobs.get(&bj.job_id).cloned())
                              .collect();
        Ok(BoqView::assemble(boq, jobs))
    }

    fn add_boq_job(&self, ctx: &RequestContext, boq_id: &Uuid, req: &BoqJobRequest) -> Result<(), BoqError> {
        req.validate()?;
        ctx.check("leer estado del boq")?;
        let mut t = self.lock()?;
        t.boq_status(boq_id)?.ensure_mutable("agregar jobs")?;
        if !t.jobs.contains_key(&req.job_id) {
            return Err(BoqError::Constraint(format!("job {} no existe", req.job_id)));
        }
        if t.boq_jobs.contains_key(&(*boq_id, req.job_id)) {
            return Err(BoqError::Constraint(format!("el job {} ya está en el boq {}", req.job_id, boq_id)));
        }
        let materials: Vec<JobMaterial> =
            t.job_materials.values().filter(|jm| jm.job_id == req.job_id).cloned().collect();
        ctx.check("insertar boq_job")?;
        t.boq_jobs.insert((*boq_id, req.job_id),
                          BoqJob { boq_id: *boq_id, job_id: req.job_id, quantity: req.quantity, labor_cost: req.labor_cost });
        let now = Utc::now().naive_utc();
        for m in materials {
            t.price_logs
             .entry((m.material_id, *boq_id, req.job_id))
             .or_insert_with(|| MaterialPriceLog { material_id: m.material_id,
                                                   boq_id: *boq_id,
                                                   job_id: req.job_id,
                                                   quantity: m.quantity,
                                                   updated_at: now });
        }
        Ok(())
    }

    fn delete_boq_job(&self, ctx: &RequestContext, boq_id: &Uuid, job_id: &Uuid) -> Result<(), BoqError> {
        ctx.check("leer estado del boq")?;
        let mut t = self.lock()?;
        t.boq_status(boq_id)?.ensure_mutable("quitar jobs")?;
        ctx.check("borrar boq_job")?;
        t.boq_jobs.remove(&(*boq_id, *job_id));
        Ok(())
    }

    fn set_boq_status(&self, ctx: &RequestContext, boq_id: &Uuid, status: BoqStatus) -> Result<BoqStatus, BoqError> {
        ctx.check("leer estado del boq")?;
        let mut t = self.lock()?;
        let current = t.boq_status(boq_id)?;
        if !current.can_transition_to(status) {
            return Err(BoqError::InvalidState(format!("transición {} -> {} no permitida", current, status)));
        }
        if let Some(b) = t.boqs.get_mut(boq_id) {
            b.status = status;
        }
        Ok(status)
    }

    fn set_selling_general_cost(&self, ctx: &RequestContext, boq_id: &Uuid, cost: f64) -> Result<(), BoqError> {
        validate_cost(cost)?;
        ctx.check("leer estado del boq")?;
        let mut t = self.lock()?;
        t.boq_status(boq_id)?.ensure_mutable("cambiar el costo general")?;
        if let Some(b) = t.boqs.get_mut(boq_id) {
            b.selling_general_cost = Some(cost);
        }
        Ok(())
    }

    fn create_project(&self, name: Option<String>) -> Result<Uuid, BoqError> {
        let p = Project { project_id: Uuid::new_v4(), name };
        let id = p.project_id;
        self.lock()?.projects.insert(id, p);
        Ok(id)
    }

    fn create_job(&self, job: NewJob) -> Result<Uuid, BoqError> {
        job.validate()?;
        let j = Job { job_id: Uuid::new_v4(), name: job.name, description: job.description, unit: job.unit };
        let id = j.job_id;
        self.lock()?.jobs.insert(id, j);
        Ok(id)
    }

    fn create_material(&self, material: NewMaterial) -> Result<Uuid, BoqError> {
        material.validate()?;
        let m = Material { material_id: Uuid::new_v4(), name: material.name, unit: material.unit };
        let id = m.material_id;
        self.lock()?.materials.insert(id, m);
        Ok(id)
    }

    fn set_job_material(&self, job_id: &Uuid, material_id: &Uuid, quantity: f64) -> Result<(), BoqError> {
        validate_material_quantity(quantity)?;
        let mut t = self.lock()?;
        if !t.jobs.contains_key(job_id) {
            return Err(BoqError::NotFound(format!("job {} no existe", job_id)));
        }
        if !t.materials.contains_key(material_id) {
            return Err(BoqError::NotFound(format!("material {} no existe", material_id)));
        }
        t.job_materials
         .insert((*job_id, *material_id), JobMaterial { job_id: *job_id, material_id: *material_id, quantity });
        Ok(())
    }

    fn list_boq_jobs(&self, boq_id: &Uuid) -> Result<Vec<BoqJob>, BoqError> {
        let t = self.lock()?;
        Ok(t.boq_jobs.values().filter(|bj| &bj.boq_id == boq_id).cloned().collect())
    }

    fn list_price_logs(&self, boq_id: &Uuid) -> Result<Vec<MaterialPriceLog>, BoqError> {
        let t = self.lock()?;
        Ok(t.price_logs.values().filter(|pl| &pl.boq_id == boq_id).cloned().collect())
    }
}
