use crate::boq_repository::{BoqRepository, InMemoryBoqRepository};
use crate::{BoqError, NewJob, NewMaterial};
use uuid::Uuid;

/// Identificadores de los datos de ejemplo creados por `BoqStubs`.
#[derive(Debug, Clone, Copy)]
pub struct SampleIds {
    pub project_id: Uuid,
    pub job_id: Uuid,
    pub steel_id: Uuid,
    pub cement_id: Uuid,
}

pub struct BoqStubs;

impl BoqStubs {
    /// Crea un repositorio en memoria con un proyecto, un job "Columna de
    /// hormigón" y sus dos materiales (acero 5, cemento 10). El BOQ del
    /// proyecto todavía no existe: se crea en la primera lectura.
    pub fn sample_repo() -> Result<(InMemoryBoqRepository, SampleIds), BoqError> {
        let repo = InMemoryBoqRepository::new();
        let ids = Self::seed(&repo)?;
        Ok((repo, ids))
    }

    /// Puebla cualquier `BoqRepository` con el catálogo de ejemplo.
    pub fn seed<R: BoqRepository + ?Sized>(repo: &R) -> Result<SampleIds, BoqError> {
        let project_id = repo.create_project(Some("Edificio demo".into()))?;
        let job_id = repo.create_job(NewJob { name: "Columna de hormigón".into(),
                                              description: Some("Columna 30x30 armada".into()),
                                              unit: "m3".into() })?;
        let steel_id = repo.create_material(NewMaterial { name: "Acero".into(), unit: "kg".into() })?;
        let cement_id = repo.create_material(NewMaterial { name: "Cemento".into(), unit: "bolsa".into() })?;
        repo.set_job_material(&job_id, &steel_id, 5.0)?;
        repo.set_job_material(&job_id, &cement_id, 10.0)?;
        Ok(SampleIds { project_id, job_id, steel_id, cement_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoqJobRequest, RequestContext};

    #[test]
    fn sample_job_logs_both_materials() -> Result<(), BoqError> {
        let (repo, ids) = BoqStubs::sample_repo()?;
        let ctx = RequestContext::new();
        let boq = repo.get_boq_with_project(&ctx, &ids.project_id)?.id;
        repo.add_boq_job(&ctx, &boq, &BoqJobRequest::new(ids.job_id, 2.0, 350.0))?;

        let view = repo.get_boq_with_project(&ctx, &ids.project_id)?;
        assert_eq!(view.jobs.len(), 1);
        assert_eq!(view.jobs[0].job_id, ids.job_id);

        let mut logs: Vec<(Uuid, f64)> = repo.list_price_logs(&boq)?.into_iter().map(|l| (l.material_id, l.quantity)).collect();
        logs.sort_by(|a, b| a.1.total_cmp(&b.1));
        assert_eq!(logs, vec![(ids.steel_id, 5.0), (ids.cement_id, 10.0)]);

        // quitar y volver a agregar no duplica el price log
        repo.delete_boq_job(&ctx, &boq, &ids.job_id)?;
        assert_eq!(repo.list_price_logs(&boq)?.len(), 2);
        repo.add_boq_job(&ctx, &boq, &BoqJobRequest::new(ids.job_id, 2.0, 350.0))?;
        assert_eq!(repo.list_price_logs(&boq)?.len(), 2);
        Ok(())
    }
}
