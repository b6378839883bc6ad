//! Configuración de la conexión leída del entorno (con soporte `.env`).
use boq_domain::BoqError;
use std::time::Duration;

pub const DEFAULT_POOL_SIZE: u32 = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct DbConfig {
  pub database_url: String,
  pub pool_size: u32,
  /// Tiempo máximo para obtener una conexión del pool.
  pub connection_timeout: Duration,
}

impl DbConfig {
  pub fn new(database_url: impl Into<String>) -> Self {
    Self { database_url: database_url.into(),
           pool_size: DEFAULT_POOL_SIZE,
           connection_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS) }
  }

  /// `BOQ_DB_URL` (o `DATABASE_URL` como respaldo), `BOQ_DB_POOL_SIZE` y
  /// `BOQ_DB_TIMEOUT_SECS`.
  pub fn from_env() -> Result<Self, BoqError> {
    dotenvy::dotenv().ok();
    let url = std::env::var("BOQ_DB_URL").or_else(|_| std::env::var("DATABASE_URL"))
                                         .map_err(|_| BoqError::DataAccess("BOQ_DB_URL / DATABASE_URL not set".into()))?;
    let pool_size = parse_var("BOQ_DB_POOL_SIZE", DEFAULT_POOL_SIZE)?;
    if pool_size == 0 {
      return Err(BoqError::Validation("BOQ_DB_POOL_SIZE debe ser mayor que 0".into()));
    }
    let timeout = parse_var("BOQ_DB_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
    Ok(Self { database_url: url, pool_size, connection_timeout: Duration::from_secs(timeout) })
  }

  pub fn looks_like_postgres(&self) -> bool {
    let l = self.database_url.to_lowercase();
    l.starts_with("postgres://") || l.starts_with("postgresql://") || l.contains('@')
  }

  pub fn looks_like_sqlite(&self) -> bool {
    let l = self.database_url.to_lowercase();
    !self.looks_like_postgres() && (l.starts_with("file:") || l.contains("mode=memory") || l.ends_with(".db") || l.contains("sqlite"))
  }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, BoqError> {
  match std::env::var(name) {
    Ok(v) => v.trim().parse::<T>().map_err(|_| BoqError::Validation(format!("{} inválido: '{}'", name, v))),
    Err(_) => Ok(default),
  }
}
