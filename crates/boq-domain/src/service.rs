// Archivo: service.rs
// Propósito: `BoqService`, la capa orquestadora que invocan los handlers
// (HTTP o CLI). Valida la entrada, registra en el log y delega en el
// repositorio inyectado. `AsyncBoqService` la expone a llamadores async con
// plazo: el trabajo bloqueante corre en `spawn_blocking` y el vencimiento
// cancela el `RequestContext`.
use crate::boq_repository::{validate_cost, validate_material_quantity};
use crate::{BoqError, BoqJob, BoqJobRequest, BoqRepository, BoqStatus, BoqView, MaterialPriceLog, NewJob, NewMaterial,
            RequestContext};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Servicio de alto nivel sobre BOQs.
pub struct BoqService<R> where R: BoqRepository
{
    repo: Arc<R>,
}

impl<R> Clone for BoqService<R> where R: BoqRepository
{
    fn clone(&self) -> Self {
        Self { repo: self.repo.clone() }
    }
}

impl<R> BoqService<R> where R: BoqRepository
{
    /// El repositorio (y su pool) lo crea y lo cierra el proceso dueño.
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn get_boq_with_project(&self, ctx: &RequestContext, project_id: Uuid) -> Result<BoqView, BoqError> {
        let view = self.repo.get_boq_with_project(ctx, &project_id).map_err(|e| {
            log::warn!("get_boq_with_project({}) falló: {}", project_id, e);
            e
        })?;
        log::debug!("boq {} del proyecto {}: {} jobs", view.id, project_id, view.jobs.len());
        Ok(view)
    }

    pub fn add_job(&self, ctx: &RequestContext, boq_id: Uuid, req: BoqJobRequest) -> Result<(), BoqError> {
        req.validate()?;
        self.repo.add_boq_job(ctx, &boq_id, &req).map_err(|e| {
            log::warn!("add_boq_job({}, {}) falló [{}]: {}", boq_id, req.job_id, e.kind(), e);
            e
        })?;
        log::info!("job {} agregado al boq {}", req.job_id, boq_id);
        Ok(())
    }

    pub fn delete_job(&self, ctx: &RequestContext, boq_id: Uuid, job_id: Uuid) -> Result<(), BoqError> {
        self.repo.delete_boq_job(ctx, &boq_id, &job_id).map_err(|e| {
            log::warn!("delete_boq_job({}, {}) falló [{}]: {}", boq_id, job_id, e.kind(), e);
            e
        })?;
        log::info!("job {} quitado del boq {}", job_id, boq_id);
        Ok(())
    }

    pub fn set_status(&self, ctx: &RequestContext, boq_id: Uuid, status: BoqStatus) -> Result<BoqStatus, BoqError> {
        let s = self.repo.set_boq_status(ctx, &boq_id, status)?;
        log::info!("boq {} ahora en estado {}", boq_id, s);
        Ok(s)
    }

    pub fn set_selling_general_cost(&self, ctx: &RequestContext, boq_id: Uuid, cost: f64) -> Result<(), BoqError> {
        validate_cost(cost)?;
        self.repo.set_selling_general_cost(ctx, &boq_id, cost)
    }

    pub fn create_project(&self, name: Option<String>) -> Result<Uuid, BoqError> {
        self.repo.create_project(name)
    }

    pub fn create_job(&self, job: NewJob) -> Result<Uuid, BoqError> {
        job.validate()?;
        self.repo.create_job(job)
    }

    pub fn create_material(&self, material: NewMaterial) -> Result<Uuid, BoqError> {
        material.validate()?;
        self.repo.create_material(material)
    }

    pub fn set_job_material(&self, job_id: Uuid, material_id: Uuid, quantity: f64) -> Result<(), BoqError> {
        validate_material_quantity(quantity)?;
        self.repo.set_job_material(&job_id, &material_id, quantity)
    }

    pub fn list_boq_jobs(&self, boq_id: Uuid) -> Result<Vec<BoqJob>, BoqError> {
        self.repo.list_boq_jobs(&boq_id)
    }

    pub fn list_price_logs(&self, boq_id: Uuid) -> Result<Vec<MaterialPriceLog>, BoqError> {
        self.repo.list_price_logs(&boq_id)
    }
}

/// Fachada async de `BoqService` con plazo por llamada.
pub struct AsyncBoqService<R> where R: BoqRepository
{
    inner: BoqService<R>,
    timeout: Duration,
}

impl<R> AsyncBoqService<R> where R: BoqRepository + 'static
{
    pub fn new(inner: BoqService<R>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Ejecuta `op` en el pool bloqueante de tokio. Si vence el plazo se
    /// cancela el contexto y se espera a la tarea: el resultado devuelto es
    /// siempre el que produjo la operación, así `Cancelled` sólo llega cuando
    /// la transacción efectivamente se revirtió.
    async fn run<T, F>(&self, op: F) -> Result<T, BoqError>
        where T: Send + 'static,
              F: FnOnce(&BoqService<R>, &RequestContext) -> Result<T, BoqError> + Send + 'static
    {
        let ctx = RequestContext::with_timeout(self.timeout);
        let svc = self.inner.clone();
        let op_ctx = ctx.clone();
        let mut handle = tokio::task::spawn_blocking(move || op(&svc, &op_ctx));
        let joined = match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                ctx.cancel();
                log::warn!("plazo de {:?} vencido; esperando a que la operación termine", self.timeout);
                handle.await
            }
        };
        match joined {
            Ok(Ok(v)) if ctx.is_cancelled() => {
                log::warn!("la operación terminó después del plazo y quedó confirmada");
                Ok(v)
            }
            Ok(res) => res,
            Err(join) => Err(BoqError::DataAccess(format!("tarea bloqueante abortada: {}", join))),
        }
    }

    pub async fn get_boq_with_project(&self, project_id: Uuid) -> Result<BoqView, BoqError> {
        self.run(move |svc, ctx| svc.get_boq_with_project(ctx, project_id)).await
    }

    pub async fn add_job(&self, boq_id: Uuid, req: BoqJobRequest) -> Result<(), BoqError> {
        self.run(move |svc, ctx| svc.add_job(ctx, boq_id, req)).await
    }

    pub async fn delete_job(&self, boq_id: Uuid, job_id: Uuid) -> Result<(), BoqError> {
        self.run(move |svc, ctx| svc.delete_job(ctx, boq_id, job_id)).await
    }
}
