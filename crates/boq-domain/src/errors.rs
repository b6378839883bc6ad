// errors.rs
use thiserror::Error;

/// Taxonomía de errores del núcleo BOQ.
///
/// La capa HTTP (fuera de este workspace) es quien traduce cada variante a
/// un código de estado.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BoqError {
  /// El BOQ (u otra entidad referenciada) no existe.
  #[error("No encontrado: {0}")]
  NotFound(String),
  /// Mutación sobre un BOQ que no está en estado `draft`, o transición de
  /// estado no permitida.
  #[error("Estado inválido: {0}")]
  InvalidState(String),
  /// Violación de unicidad o de integridad referencial al insertar.
  #[error("Violación de restricción: {0}")]
  Constraint(String),
  /// Cualquier otro fallo del almacenamiento (conexión, consulta, commit).
  #[error("Error de acceso a datos: {0}")]
  DataAccess(String),
  #[error("Error de validación: {0}")]
  Validation(String),
  #[error("Error de serialización: {0}")]
  Serialization(String),
  /// El llamador canceló la operación o venció su plazo; no se confirmó nada.
  #[error("Operación cancelada: {0}")]
  Cancelled(String),
}

impl BoqError {
  /// Nombre corto de la variante, útil para logs y para mapear a HTTP.
  pub fn kind(&self) -> &'static str {
    match self {
      BoqError::NotFound(_) => "not_found",
      BoqError::InvalidState(_) => "invalid_state",
      BoqError::Constraint(_) => "constraint",
      BoqError::DataAccess(_) => "data_access",
      BoqError::Validation(_) => "validation",
      BoqError::Serialization(_) => "serialization",
      BoqError::Cancelled(_) => "cancelled",
    }
  }
}

impl From<serde_json::Error> for BoqError {
  fn from(e: serde_json::Error) -> Self {
    Self::Serialization(e.to_string())
  }
}

impl From<uuid::Error> for BoqError {
  fn from(e: uuid::Error) -> Self {
    Self::DataAccess(format!("uuid inválido: {}", e))
  }
}
