// boq_status.rs
use crate::BoqError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Estado del ciclo de vida de un BOQ.
///
/// Sólo `Draft` admite cambios en la composición de jobs. Cualquier texto
/// desconocido leído de la base de datos se rechaza en `from_str`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoqStatus {
  Draft,
  Approved,
  Rejected,
}

impl BoqStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      BoqStatus::Draft => "draft",
      BoqStatus::Approved => "approved",
      BoqStatus::Rejected => "rejected",
    }
  }

  pub fn is_mutable(&self) -> bool {
    match self {
      BoqStatus::Draft => true,
      BoqStatus::Approved | BoqStatus::Rejected => false,
    }
  }

  /// Falla con `InvalidState` salvo que el BOQ esté en borrador. `action`
  /// describe la operación rechazada ("agregar jobs", ...).
  pub fn ensure_mutable(&self, action: &str) -> Result<(), BoqError> {
    if self.is_mutable() {
      Ok(())
    } else {
      Err(BoqError::InvalidState(format!("sólo se puede {} en un BOQ en estado draft (estado actual: {})",
                                         action, self)))
    }
  }

  /// Transiciones permitidas: draft -> approved | rejected, rejected -> draft.
  /// Quedarse en el mismo estado siempre es válido.
  pub fn can_transition_to(&self, next: BoqStatus) -> bool {
    if *self == next {
      return true;
    }
    match (self, next) {
      (BoqStatus::Draft, BoqStatus::Approved) | (BoqStatus::Draft, BoqStatus::Rejected) => true,
      (BoqStatus::Rejected, BoqStatus::Draft) => true,
      // approved es terminal
      _ => false,
    }
  }
}

impl FromStr for BoqStatus {
  type Err = BoqError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "draft" => Ok(BoqStatus::Draft),
      "approved" => Ok(BoqStatus::Approved),
      "rejected" => Ok(BoqStatus::Rejected),
      other => Err(BoqError::DataAccess(format!("estado de BOQ desconocido: '{}'", other))),
    }
  }
}

impl fmt::Display for BoqStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
