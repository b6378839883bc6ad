//! Dominio del núcleo BOQ (Bill of Quantities).
//!
//! Define las entidades (proyecto, BOQ, job, material, price log), el estado
//! cerrado `BoqStatus`, la taxonomía `BoqError`, el contrato de persistencia
//! `BoqRepository` con una implementación en memoria y el servicio que
//! consumen los handlers.
mod boq_repository;
mod boq_status;
mod boq_stubs;
mod context;
mod errors;
mod model;
mod service;

pub use boq_repository::{BoqRepository, InMemoryBoqRepository};
pub use boq_status::BoqStatus;
pub use boq_stubs::{BoqStubs, SampleIds};
pub use context::RequestContext;
pub use errors::BoqError;
pub use model::{Boq, BoqJob, BoqJobRequest, BoqView, Job, JobMaterial, JobView, Material, MaterialPriceLog, NewJob,
                NewMaterial, Project};
pub use service::{AsyncBoqService, BoqService};
// Validaciones compartidas con las implementaciones de persistencia
pub use boq_repository::{validate_cost, validate_material_quantity};
