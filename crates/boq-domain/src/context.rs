// context.rs
use crate::BoqError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Contexto de una petición: bandera de cancelación compartida y plazo
/// opcional.
///
/// Los repositorios llaman a `check` antes de cada sentencia dentro de la
/// transacción; si el contexto fue cancelado o venció, la operación falla con
/// `BoqError::Cancelled` y la transacción se revierte.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
  cancelled: Arc<AtomicBool>,
  deadline: Option<Instant>,
}

impl RequestContext {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_timeout(timeout: Duration) -> Self {
    Self { cancelled: Arc::new(AtomicBool::new(false)), deadline: Some(Instant::now() + timeout) }
  }

  /// Marca el contexto (y todos sus clones) como cancelado.
  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst) || self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
  }

  /// Tiempo restante antes del plazo, si hay uno.
  pub fn remaining(&self) -> Option<Duration> {
    self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
  }

  pub fn check(&self, stage: &str) -> Result<(), BoqError> {
    if self.is_cancelled() {
      log::warn!("operación cancelada en la etapa '{}'", stage);
      return Err(BoqError::Cancelled(stage.to_string()));
    }
    Ok(())
  }
}
