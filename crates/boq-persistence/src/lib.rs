//! Persistencia Diesel para el núcleo BOQ.
//! Expone el módulo `schema`, la configuración leída del entorno y el
//! repositorio que implementa `boq_domain::BoqRepository`. La implementación
//! detallada está en `boq_persistence.rs`.

mod boq_persistence;
pub mod config;
pub mod schema;

#[cfg(any(test, not(feature = "pg")))]
pub use boq_persistence::new_sqlite_for_test;
pub use boq_persistence::{new_from_env, DieselBoqRepository, MIGRATIONS};
pub use config::DbConfig;
