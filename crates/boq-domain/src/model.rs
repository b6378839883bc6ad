// model.rs
use crate::{BoqError, BoqStatus};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Proyecto de construcción. Cada proyecto tiene a lo sumo un BOQ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
  pub project_id: Uuid,
  pub name: Option<String>,
}

/// Cabecera de un BOQ tal como se guarda en la tabla `boq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boq {
  pub boq_id: Uuid,
  pub project_id: Uuid,
  pub status: BoqStatus,
  pub selling_general_cost: Option<f64>,
}

impl Boq {
  /// BOQ recién creado para un proyecto: borrador y sin costo general.
  pub fn new_draft(project_id: Uuid) -> Self {
    Self { boq_id: Uuid::new_v4(), project_id, status: BoqStatus::Draft, selling_general_cost: None }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
  pub job_id: Uuid,
  pub name: String,
  pub description: Option<String>,
  pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
  pub material_id: Uuid,
  pub name: String,
  pub unit: String,
}

/// Composición de un job: cuánto de cada material requiere una unidad del job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMaterial {
  pub job_id: Uuid,
  pub material_id: Uuid,
  pub quantity: f64,
}

/// Fila de la tabla de unión `boq_job` con cantidad y mano de obra propias
/// de ese BOQ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoqJob {
  pub boq_id: Uuid,
  pub job_id: Uuid,
  pub quantity: f64,
  pub labor_cost: f64,
}

/// Snapshot de la cantidad de un material requerida por un job al momento de
/// agregarlo a un BOQ. Se crea una sola vez por (material, boq, job).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialPriceLog {
  pub material_id: Uuid,
  pub boq_id: Uuid,
  pub job_id: Uuid,
  pub quantity: f64,
  pub updated_at: NaiveDateTime,
}

/// Datos para dar de alta un job en el catálogo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
  pub name: String,
  pub description: Option<String>,
  pub unit: String,
}

impl NewJob {
  pub fn validate(&self) -> Result<(), BoqError> {
    if self.name.trim().is_empty() {
      return Err(BoqError::Validation("el nombre del job no puede estar vacío".to_string()));
    }
    if self.unit.trim().is_empty() {
      return Err(BoqError::Validation("la unidad del job no puede estar vacía".to_string()));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMaterial {
  pub name: String,
  pub unit: String,
}

impl NewMaterial {
  pub fn validate(&self) -> Result<(), BoqError> {
    if self.name.trim().is_empty() {
      return Err(BoqError::Validation("el nombre del material no puede estar vacío".to_string()));
    }
    if self.unit.trim().is_empty() {
      return Err(BoqError::Validation("la unidad del material no puede estar vacía".to_string()));
    }
    Ok(())
  }
}

/// Cuerpo de la petición para agregar un job a un BOQ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoqJobRequest {
  pub job_id: Uuid,
  pub quantity: f64,
  pub labor_cost: f64,
}

impl BoqJobRequest {
  pub fn new(job_id: Uuid, quantity: f64, labor_cost: f64) -> Self {
    Self { job_id, quantity, labor_cost }
  }

  pub fn validate(&self) -> Result<(), BoqError> {
    if !self.quantity.is_finite() || self.quantity <= 0.0 {
      return Err(BoqError::Validation(format!("quantity debe ser un número positivo (recibido {})", self.quantity)));
    }
    if !self.labor_cost.is_finite() || self.labor_cost < 0.0 {
      return Err(BoqError::Validation(format!("labor_cost no puede ser negativo (recibido {})", self.labor_cost)));
    }
    Ok(())
  }
}

/// Job tal como aparece en la vista agregada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
  pub job_id: Uuid,
  pub name: String,
  /// Cadena vacía cuando el job no tiene descripción.
  pub description: String,
  pub unit: String,
}

impl From<Job> for JobView {
  fn from(job: Job) -> Self {
    Self { job_id: job.job_id, name: job.name, description: job.description.unwrap_or_default(), unit: job.unit }
  }
}

/// Vista desnormalizada de un BOQ con sus jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoqView {
  pub id: Uuid,
  pub project_id: Uuid,
  pub status: BoqStatus,
  /// 0 cuando el costo no fue fijado.
  pub selling_general_cost: f64,
  pub jobs: Vec<JobView>,
}

impl BoqView {
  pub fn assemble(boq: Boq, jobs: Vec<Job>) -> Self {
    Self { id: boq.boq_id,
           project_id: boq.project_id,
           status: boq.status,
           selling_general_cost: boq.selling_general_cost.unwrap_or(0.0),
           jobs: jobs.into_iter().map(JobView::from).collect() }
  }

  pub fn contains_job(&self, job_id: &Uuid) -> bool {
    self.jobs.iter().any(|j| &j.job_id == job_id)
  }
}
