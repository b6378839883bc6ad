use crate::config::DbConfig;
use crate::schema;
use crate::schema::{boq, boq_job, job, job_material, material, material_price_log, project};
use boq_domain::{validate_cost, validate_material_quantity, Boq, BoqError, BoqJob, BoqJobRequest, BoqRepository, BoqStatus,
                 BoqView, Job, MaterialPriceLog, NewJob, NewMaterial, RequestContext};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");
#[cfg(all(feature = "pg", not(test)))]
type DbConn = PgConnection;
#[cfg(any(test, not(feature = "pg")))]
type DbConn = SqliteConnection;
type DbPool = Pool<ConnectionManager<DbConn>>;
/// Repo Diesel que implementa `BoqRepository`. Cada operación toma una
/// conexión del pool y corre dentro de una sola transacción.
pub struct DieselBoqRepository {
  pool: Arc<DbPool>,
}
/// SQLite necesita estos PRAGMAs en cada conexión nueva del pool (las claves
/// foráneas vienen desactivadas por defecto).
#[cfg(any(test, not(feature = "pg")))]
#[derive(Debug)]
struct SqlitePragmas;
#[cfg(any(test, not(feature = "pg")))]
impl diesel::r2d2::CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
  fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
    diesel::sql_query("PRAGMA foreign_keys = ON;").execute(conn).map_err(diesel::r2d2::Error::QueryError)?;
    diesel::sql_query("PRAGMA busy_timeout = 5000;").execute(conn).map_err(diesel::r2d2::Error::QueryError)?;
    Ok(())
  }
}
impl DieselBoqRepository {
  pub fn from_config(config: &DbConfig) -> Result<Self, BoqError> {
    let manager = ConnectionManager::<DbConn>::new(config.database_url.as_str());
    let builder = Pool::builder().max_size(config.pool_size).connection_timeout(config.connection_timeout);
    #[cfg(any(test, not(feature = "pg")))]
    let builder = builder.connection_customizer(Box::new(SqlitePragmas));
    let pool = builder.build(manager)
                      .map_err(|e| BoqError::DataAccess(format!("no se pudo crear el pool de conexiones: {}", e)))?;
    let repo = DieselBoqRepository { pool: Arc::new(pool) };
    repo.prepare()?;
    Ok(repo)
  }
  fn prepare(&self) -> Result<(), BoqError> {
    let mut c = self.conn()?;
    #[cfg(any(test, not(feature = "pg")))]
    if let Err(e) = diesel::sql_query("PRAGMA journal_mode = WAL;").execute(&mut c) {
      log::warn!("no se pudo activar WAL: {}", e);
    }
    let applied = c.run_pending_migrations(MIGRATIONS)
                   .map_err(|e| BoqError::DataAccess(format!("migraciones: {}", e)))?;
    if !applied.is_empty() {
      log::info!("{} migraciones aplicadas", applied.len());
    }
    Ok(())
  }
  fn conn(&self) -> Result<PooledConnection<ConnectionManager<DbConn>>, BoqError> {
    self.pool.get().map_err(|e| BoqError::DataAccess(format!("pool: {}", e)))
  }
  /// Libera el pool. Las conexiones se cierran al soltar la última
  /// referencia.
  pub fn close(self) {
    let state = self.pool.state();
    log::info!("cerrando pool ({} conexiones, {} ociosas)", state.connections, state.idle_connections);
    drop(self);
  }
  fn load_or_create_boq(conn: &mut DbConn, ctx: &RequestContext, project_id: &Uuid) -> Result<BoqView, BoqError> {
    let pid = project_id.to_string();
    write_tx(conn, |conn| {
      apply_deadline(conn, ctx)?;
      ctx.check("buscar boq")?;
      let existing = boq::table.filter(boq::project_id.eq(&pid))
                               .first::<BoqRow>(conn)
                               .optional()
                               .map_err(|e| classify("verificar existencia del BOQ", e))?;
      let row = match existing {
        Some(r) => r,
        None => {
          let project_row = project::table.filter(project::project_id.eq(&pid))
                                          .select(project::project_id)
                                          .first::<String>(conn)
                                          .optional()
                                          .map_err(|e| classify("buscar proyecto", e))?;
          if project_row.is_none() {
            return Err(BoqError::DataAccess(format!("no se pudo crear el BOQ: proyecto {} no existe", project_id)).into());
          }
          ctx.check("crear boq")?;
          #[cfg(test)]
          if let Some(hook) = BEFORE_BOQ_INSERT.with(|h| h.take()) {
            hook(conn, project_id);
          }
          let row = BoqRow::from(&Boq::new_draft(*project_id));
          diesel::insert_into(boq::table).values(&row)
                                         .execute(conn)
                                         .map_err(|e| classify("crear BOQ", e))?;
          log::info!("creado BOQ {} en borrador para el proyecto {}", row.boq_id, project_id);
          row
        }
      };
      ctx.check("cargar jobs")?;
      let jobs = job::table.inner_join(boq_job::table)
                           .filter(boq_job::boq_id.eq(&row.boq_id))
                           .select(job::all_columns)
                           .distinct()
                           .load::<JobRow>(conn)
                           .map_err(|e| classify("cargar jobs del BOQ", e))?;
      let boq = row.into_domain()?;
      let jobs = jobs.into_iter().map(JobRow::into_domain).collect::<Result<Vec<_>, _>>()?;
      Ok(BoqView::assemble(boq, jobs))
    }).map_err(|e| e.into_boq("get_boq_with_project"))
  }
}
// Se ejecuta una vez, dentro de la transacción, justo antes de insertar el
// BOQ nuevo. Los tests lo usan para simular a otro llamador ganando el insert.
#[cfg(test)]
thread_local! {
  static BEFORE_BOQ_INSERT: std::cell::Cell<Option<fn(&mut DbConn, &Uuid)>> = const { std::cell::Cell::new(None) };
}
// Diesel row structs for the BOQ tables
#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::project)]
struct ProjectRow {
  pub project_id: String,
  pub name: Option<String>,
}
#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::boq)]
struct BoqRow {
  pub boq_id: String,
  pub project_id: String,
  pub status: String,
  pub selling_general_cost: Option<f64>,
}
impl From<&Boq> for BoqRow {
  fn from(b: &Boq) -> Self {
    BoqRow { boq_id: b.boq_id.to_string(),
             project_id: b.project_id.to_string(),
             status: b.status.as_str().to_string(),
             selling_general_cost: b.selling_general_cost }
  }
}
impl BoqRow {
  fn into_domain(self) -> Result<Boq, BoqError> {
    Ok(Boq { boq_id: parse_id(&self.boq_id)?,
             project_id: parse_id(&self.project_id)?,
             status: self.status.parse()?,
             selling_general_cost: self.selling_general_cost })
  }
}
#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::job)]
struct JobRow {
  pub job_id: String,
  pub name: String,
  pub description: Option<String>,
  pub unit: String,
}
impl JobRow {
  fn into_domain(self) -> Result<Job, BoqError> {
    Ok(Job { job_id: parse_id(&self.job_id)?, name: self.name, description: self.description, unit: self.unit })
  }
}
#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::material)]
struct MaterialRow {
  pub material_id: String,
  pub name: String,
  pub unit: String,
}
#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::job_material)]
struct JobMaterialRow {
  pub job_id: String,
  pub material_id: String,
  pub quantity: f64,
}
#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::boq_job)]
struct BoqJobRow {
  pub boq_id: String,
  pub job_id: String,
  pub quantity: f64,
  pub labor_cost: f64,
}
impl BoqJobRow {
  fn into_domain(self) -> Result<BoqJob, BoqError> {
    Ok(BoqJob { boq_id: parse_id(&self.boq_id)?,
                job_id: parse_id(&self.job_id)?,
                quantity: self.quantity,
                labor_cost: self.labor_cost })
  }
}
#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::material_price_log)]
struct PriceLogRow {
  pub material_id: String,
  pub boq_id: String,
  pub job_id: String,
  pub quantity: f64,
  pub updated_at: NaiveDateTime,
}
impl PriceLogRow {
  fn into_domain(self) -> Result<MaterialPriceLog, BoqError> {
    Ok(MaterialPriceLog { material_id: parse_id(&self.material_id)?,
                          boq_id: parse_id(&self.boq_id)?,
                          job_id: parse_id(&self.job_id)?,
                          quantity: self.quantity,
                          updated_at: self.updated_at })
  }
}
/// Error interno de una transacción: o un error de dominio decidido dentro
/// del closure, o un error de Diesel (BEGIN/COMMIT incluidos).
#[derive(Debug, Error)]
enum TxError {
  #[error(transparent)]
  Domain(#[from] BoqError),
  #[error(transparent)]
  Db(#[from] DieselError),
}
impl TxError {
  fn into_boq(self, op: &str) -> BoqError {
    match self {
      TxError::Domain(e) => e,
      TxError::Db(e) => classify(op, e),
    }
  }
}
const STATEMENT_TIMEOUT_MSG: &str = "canceling statement due to statement timeout";
/// Traduce un error de Diesel a la taxonomía del dominio, con contexto.
fn classify(op: &str, e: DieselError) -> BoqError {
  match e {
    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
      BoqError::Constraint(format!("{}: {}", op, info.message()))
    }
    DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
      BoqError::Constraint(format!("{}: {}", op, info.message()))
    }
    // SQLSTATE 57014: Postgres cortó la sentencia por `statement_timeout`
    DieselError::DatabaseError(_, info) if info.message().contains(STATEMENT_TIMEOUT_MSG) => {
      BoqError::Cancelled(format!("{}: plazo vencido ({})", op, info.message()))
    }
    other => BoqError::DataAccess(format!("{}: {}", op, other)),
  }
}
fn map_db_err<T>(op: &str, res: std::result::Result<T, DieselError>) -> Result<T, BoqError> {
  res.map_err(|e| classify(op, e))
}
fn parse_id(s: &str) -> Result<Uuid, BoqError> {
  Uuid::parse_str(s).map_err(|e| BoqError::DataAccess(format!("invalid uuid '{}': {}", s, e)))
}
/// Transacción de escritura. En SQLite se abre con `BEGIN IMMEDIATE` para
/// tomar el lock de escritura antes de leer el estado del BOQ.
#[cfg(any(test, not(feature = "pg")))]
fn write_tx<T, F>(conn: &mut DbConn, f: F) -> Result<T, TxError>
  where F: FnOnce(&mut DbConn) -> Result<T, TxError>
{
  conn.immediate_transaction(f)
}
#[cfg(all(feature = "pg", not(test)))]
fn write_tx<T, F>(conn: &mut DbConn, f: F) -> Result<T, TxError>
  where F: FnOnce(&mut DbConn) -> Result<T, TxError>
{
  conn.build_transaction().read_committed().run(f)
}
/// Aplica el plazo restante del contexto a las sentencias de la transacción.
#[cfg(all(feature = "pg", not(test)))]
fn apply_deadline(conn: &mut DbConn, ctx: &RequestContext) -> Result<(), TxError> {
  if let Some(remaining) = ctx.remaining() {
    let ms = remaining.as_millis().max(1);
    diesel::sql_query(format!("SET LOCAL statement_timeout = {}", ms)).execute(conn)?;
  }
  Ok(())
}
#[cfg(any(test, not(feature = "pg")))]
fn apply_deadline(_conn: &mut DbConn, _ctx: &RequestContext) -> Result<(), TxError> {
  Ok(())
}
/// Lee el estado del BOQ bloqueando la fila en Postgres (`FOR UPDATE`), así
/// ningún cambio de estado concurrente se cuela entre la verificación y la
/// escritura.
fn locked_status(conn: &mut DbConn, boq_id: &str) -> Result<BoqStatus, BoqError> {
  let query = boq::table.filter(boq::boq_id.eq(boq_id)).select(boq::status);
  #[cfg(all(feature = "pg", not(test)))]
  let query = query.for_update();
  let raw = query.get_result::<String>(conn).optional().map_err(|e| classify("obtener estado del BOQ", e))?;
  match raw {
    Some(s) => s.parse::<BoqStatus>(),
    None => Err(BoqError::NotFound(format!("boq {} no existe", boq_id))),
  }
}
impl BoqRepository for DieselBoqRepository {
  fn get_boq_with_project(&self, ctx: &RequestContext, project_id: &Uuid) -> Result<BoqView, BoqError> {
    let mut conn = self.conn()?;
    match Self::load_or_create_boq(&mut conn, ctx, project_id) {
      // UNIQUE(project_id): otro llamador creó el BOQ primero; releer.
      Err(BoqError::Constraint(msg)) => {
        log::warn!("BOQ del proyecto {} creado en paralelo ({}); reintentando lectura", project_id, msg);
        Self::load_or_create_boq(&mut conn, ctx, project_id)
      }
      other => other,
    }
  }
  fn add_boq_job(&self, ctx: &RequestContext, boq_id: &Uuid, req: &BoqJobRequest) -> Result<(), BoqError> {
    req.validate()?;
    let mut conn = self.conn()?;
    let bid = boq_id.to_string();
    let jid = req.job_id.to_string();
    let created = write_tx(&mut conn, |conn| {
      apply_deadline(conn, ctx)?;
      ctx.check("leer estado del boq")?;
      locked_status(conn, &bid)?.ensure_mutable("agregar jobs")?;
      let job_row = job::table.filter(job::job_id.eq(&jid))
                              .select(job::job_id)
                              .first::<String>(conn)
                              .optional()
                              .map_err(|e| classify("buscar job", e))?;
      if job_row.is_none() {
        return Err(BoqError::Constraint(format!("job {} no existe", jid)).into());
      }
      let dup = boq_job::table.filter(boq_job::boq_id.eq(&bid))
                              .filter(boq_job::job_id.eq(&jid))
                              .select(boq_job::job_id)
                              .first::<String>(conn)
                              .optional()
                              .map_err(|e| classify("verificar boq_job", e))?;
      if dup.is_some() {
        return Err(BoqError::Constraint(format!("el job {} ya está en el boq {}", jid, bid)).into());
      }
      ctx.check("insertar boq_job")?;
      let row = BoqJobRow { boq_id: bid.clone(), job_id: jid.clone(), quantity: req.quantity, labor_cost: req.labor_cost };
      map_db_err("agregar job al BOQ", diesel::insert_into(boq_job::table).values(&row).execute(conn))?;
      ctx.check("cargar materiales del job")?;
      let materials = map_db_err("obtener materiales del job",
                                 job_material::table.filter(job_material::job_id.eq(&jid)).load::<JobMaterialRow>(conn))?;
      let now = Utc::now().naive_utc();
      let mut created = 0usize;
      for m in materials {
        ctx.check("registrar price log")?;
        let exists = material_price_log::table.filter(material_price_log::boq_id.eq(&bid))
                                              .filter(material_price_log::material_id.eq(&m.material_id))
                                              .filter(material_price_log::job_id.eq(&jid))
                                              .select(material_price_log::material_id)
                                              .first::<String>(conn)
                                              .optional()
                                              .map_err(|e| classify("verificar price log", e))?;
        if exists.is_none() {
          let log_row = PriceLogRow { material_id: m.material_id,
                                      boq_id: bid.clone(),
                                      job_id: jid.clone(),
                                      quantity: m.quantity,
                                      updated_at: now };
          map_db_err("crear price log",
                     diesel::insert_into(material_price_log::table).values(&log_row).execute(conn))?;
          created += 1;
        }
      }
      Ok(created)
    }).map_err(|e| e.into_boq("add_boq_job"))?;
    log::debug!("boq {}: job {} agregado, {} filas nuevas en price log", bid, jid, created);
    Ok(())
  }
  fn delete_boq_job(&self, ctx: &RequestContext, boq_id: &Uuid, job_id: &Uuid) -> Result<(), BoqError> {
    let mut conn = self.conn()?;
    let bid = boq_id.to_string();
    let jid = job_id.to_string();
    let deleted = write_tx(&mut conn, |conn| {
      apply_deadline(conn, ctx)?;
      ctx.check("leer estado del boq")?;
      locked_status(conn, &bid)?.ensure_mutable("quitar jobs")?;
      ctx.check("borrar boq_job")?;
      let n = map_db_err("borrar job del BOQ",
                         diesel::delete(boq_job::table.filter(boq_job::boq_id.eq(&bid))
                                                      .filter(boq_job::job_id.eq(&jid))).execute(conn))?;
      Ok(n)
    }).map_err(|e| e.into_boq("delete_boq_job"))?;
    if deleted == 0 {
      log::debug!("boq {}: job {} no estaba asociado; nada que borrar", bid, jid);
    }
    Ok(())
  }
  fn set_boq_status(&self, ctx: &RequestContext, boq_id: &Uuid, status: BoqStatus) -> Result<BoqStatus, BoqError> {
    let mut conn = self.conn()?;
    let bid = boq_id.to_string();
    write_tx(&mut conn, |conn| {
      apply_deadline(conn, ctx)?;
      ctx.check("leer estado del boq")?;
      let current = locked_status(conn, &bid)?;
      if !current.can_transition_to(status) {
        return Err(BoqError::InvalidState(format!("transición {} -> {} no permitida", current, status)).into());
      }
      ctx.check("actualizar estado")?;
      map_db_err("actualizar estado del BOQ",
                 diesel::update(boq::table.filter(boq::boq_id.eq(&bid))).set(boq::status.eq(status.as_str()))
                                                                       .execute(conn))?;
      Ok(status)
    }).map_err(|e| e.into_boq("set_boq_status"))
  }
  fn set_selling_general_cost(&self, ctx: &RequestContext, boq_id: &Uuid, cost: f64) -> Result<(), BoqError> {
    validate_cost(cost)?;
    let mut conn = self.conn()?;
    let bid = boq_id.to_string();
    write_tx(&mut conn, |conn| {
      apply_deadline(conn, ctx)?;
      ctx.check("leer estado del boq")?;
      locked_status(conn, &bid)?.ensure_mutable("cambiar el costo general")?;
      map_db_err("actualizar costo general",
                 diesel::update(boq::table.filter(boq::boq_id.eq(&bid))).set(boq::selling_general_cost.eq(Some(cost)))
                                                                       .execute(conn))?;
      Ok(())
    }).map_err(|e| e.into_boq("set_selling_general_cost"))
  }
  fn create_project(&self, name: Option<String>) -> Result<Uuid, BoqError> {
    let mut conn = self.conn()?;
    let id = Uuid::new_v4();
    let row = ProjectRow { project_id: id.to_string(), name };
    map_db_err("crear proyecto", diesel::insert_into(project::table).values(&row).execute(&mut conn))?;
    Ok(id)
  }
  fn create_job(&self, new_job: NewJob) -> Result<Uuid, BoqError> {
    new_job.validate()?;
    let mut conn = self.conn()?;
    let id = Uuid::new_v4();
    let row = JobRow { job_id: id.to_string(), name: new_job.name, description: new_job.description, unit: new_job.unit };
    map_db_err("crear job", diesel::insert_into(job::table).values(&row).execute(&mut conn))?;
    Ok(id)
  }
  fn create_material(&self, new_material: NewMaterial) -> Result<Uuid, BoqError> {
    new_material.validate()?;
    let mut conn = self.conn()?;
    let id = Uuid::new_v4();
    let row = MaterialRow { material_id: id.to_string(), name: new_material.name, unit: new_material.unit };
    map_db_err("crear material", diesel::insert_into(material::table).values(&row).execute(&mut conn))?;
    Ok(id)
  }
  fn set_job_material(&self, job_id: &Uuid, material_id: &Uuid, quantity: f64) -> Result<(), BoqError> {
    validate_material_quantity(quantity)?;
    let mut conn = self.conn()?;
    let jid = job_id.to_string();
    let mid = material_id.to_string();
    write_tx(&mut conn, |conn| {
      let job_row = job::table.filter(job::job_id.eq(&jid))
                              .select(job::job_id)
                              .first::<String>(conn)
                              .optional()
                              .map_err(|e| classify("buscar job", e))?;
      if job_row.is_none() {
        return Err(BoqError::NotFound(format!("job {} no existe", jid)).into());
      }
      let material_row = material::table.filter(material::material_id.eq(&mid))
                                        .select(material::material_id)
                                        .first::<String>(conn)
                                        .optional()
                                        .map_err(|e| classify("buscar material", e))?;
      if material_row.is_none() {
        return Err(BoqError::NotFound(format!("material {} no existe", mid)).into());
      }
      let target = job_material::table.filter(job_material::job_id.eq(&jid))
                                      .filter(job_material::material_id.eq(&mid));
      let updated = map_db_err("actualizar job_material",
                               diesel::update(target).set(job_material::quantity.eq(quantity)).execute(conn))?;
      if updated == 0 {
        let row = JobMaterialRow { job_id: jid.clone(), material_id: mid.clone(), quantity };
        map_db_err("insertar job_material", diesel::insert_into(job_material::table).values(&row).execute(conn))?;
      }
      Ok(())
    }).map_err(|e| e.into_boq("set_job_material"))
  }
  fn list_boq_jobs(&self, boq_id: &Uuid) -> Result<Vec<BoqJob>, BoqError> {
    let mut conn = self.conn()?;
    let rows = map_db_err("listar boq_job",
                          boq_job::table.filter(boq_job::boq_id.eq(boq_id.to_string())).load::<BoqJobRow>(&mut conn))?;
    rows.into_iter().map(BoqJobRow::into_domain).collect()
  }
  fn list_price_logs(&self, boq_id: &Uuid) -> Result<Vec<MaterialPriceLog>, BoqError> {
    let mut conn = self.conn()?;
    let rows = map_db_err("listar price log",
                          material_price_log::table.filter(material_price_log::boq_id.eq(boq_id.to_string()))
                                                   .load::<PriceLogRow>(&mut conn))?;
    rows.into_iter().map(PriceLogRow::into_domain).collect()
  }
}
/// Crear repo desde las variables de entorno (`BOQ_DB_URL` / `DATABASE_URL`).
pub fn new_from_env() -> Result<DieselBoqRepository, BoqError> {
  let config = DbConfig::from_env()?;
  check_backend(&config)?;
  DieselBoqRepository::from_config(&config)
}
#[cfg(all(feature = "pg", not(test)))]
fn check_backend(config: &DbConfig) -> Result<(), BoqError> {
  if !config.looks_like_postgres() {
    return Err(BoqError::DataAccess("boq-persistence: BOQ_DB_URL does not look like Postgres URL".into()));
  }
  Ok(())
}
#[cfg(any(test, not(feature = "pg")))]
fn check_backend(config: &DbConfig) -> Result<(), BoqError> {
  if config.looks_like_sqlite() {
    return Ok(());
  }
  Err(BoqError::DataAccess("boq-persistence was compiled without 'pg' feature; enable the 'pg' feature to use \
                            Postgres in production"
                                                   .into()))
}
/// Test helper: repositorio SQLite explícito para la URL dada, sin pasar por
/// el entorno.
#[cfg(any(test, not(feature = "pg")))]
pub fn new_sqlite_for_test(database_url: &str) -> Result<DieselBoqRepository, BoqError> {
  DieselBoqRepository::from_config(&DbConfig::new(database_url))
}
