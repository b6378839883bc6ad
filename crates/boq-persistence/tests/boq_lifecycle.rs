// Integration tests against a temp-file SQLite database. Built with `pg`
// the crate talks to Postgres, so these are compiled out.
#![cfg(not(feature = "pg"))]
use boq_domain::{BoqError, BoqJobRequest, BoqRepository, BoqStatus, BoqStubs, NewJob, NewMaterial, RequestContext};
use boq_persistence::{new_sqlite_for_test, DieselBoqRepository};
use std::path::PathBuf;
use uuid::Uuid;

struct TempDb {
  repo: Option<DieselBoqRepository>,
  path: PathBuf,
}

impl TempDb {
  fn new() -> Self {
    let path = std::env::temp_dir().join(format!("boq_test_{}.db", Uuid::new_v4()));
    let repo = new_sqlite_for_test(path.to_str().unwrap()).expect("failed to create repo");
    TempDb { repo: Some(repo), path }
  }

  fn repo(&self) -> &DieselBoqRepository {
    self.repo.as_ref().unwrap()
  }
}

impl Drop for TempDb {
  fn drop(&mut self) {
    if let Some(repo) = self.repo.take() {
      repo.close();
    }
    let _ = std::fs::remove_file(&self.path);
    let _ = std::fs::remove_file(self.path.with_extension("db-wal"));
    let _ = std::fs::remove_file(self.path.with_extension("db-shm"));
  }
}

fn job(repo: &DieselBoqRepository, name: &str) -> Uuid {
  repo.create_job(NewJob { name: name.into(), description: None, unit: "m2".into() }).expect("create job")
}

#[test]
fn first_read_creates_one_draft_boq_and_is_idempotent() {
  let db = TempDb::new();
  let repo = db.repo();
  let project = repo.create_project(Some("Torre A".into())).unwrap();
  let ctx = RequestContext::new();

  let first = repo.get_boq_with_project(&ctx, &project).unwrap();
  assert_eq!(first.project_id, project);
  assert_eq!(first.status, BoqStatus::Draft);
  assert_eq!(first.selling_general_cost, 0.0);
  assert!(first.jobs.is_empty());

  let second = repo.get_boq_with_project(&ctx, &project).unwrap();
  assert_eq!(first.id, second.id);
}

#[test]
fn read_for_unknown_project_is_a_data_access_error_and_creates_nothing() {
  let db = TempDb::new();
  let repo = db.repo();
  let ghost = Uuid::new_v4();
  match repo.get_boq_with_project(&RequestContext::new(), &ghost) {
    Err(BoqError::DataAccess(_)) => {}
    other => panic!("expected DataAccess, got {:?}", other),
  }
  // un proyecto real creado después obtiene un BOQ nuevo, sin restos del intento fallido
  let project = repo.create_project(None).unwrap();
  let view = repo.get_boq_with_project(&RequestContext::new(), &project).unwrap();
  assert_eq!(view.project_id, project);
}

#[test]
fn concurrent_first_reads_create_a_single_boq() {
  let db = TempDb::new();
  let repo = db.repo();
  let project = repo.create_project(Some("Edificio B".into())).unwrap();

  let results: Vec<_> = std::thread::scope(|s| {
    let handles: Vec<_> = (0..8).map(|_| s.spawn(move || repo.get_boq_with_project(&RequestContext::new(), &project)))
                                .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
  });

  let mut ids = std::collections::HashSet::new();
  for res in results {
    match res {
      Ok(view) => {
        ids.insert(view.id);
      }
      Err(e) => panic!("concurrent first read failed: {:?}", e),
    }
  }
  assert_eq!(ids.len(), 1, "expected one boq for the project, got {:?}", ids);
  let again = repo.get_boq_with_project(&RequestContext::new(), &project).unwrap();
  assert!(ids.contains(&again.id));
}

#[test]
fn added_job_appears_exactly_once() {
  let db = TempDb::new();
  let repo = db.repo();
  let ctx = RequestContext::new();
  let project = repo.create_project(None).unwrap();
  let j1 = repo.create_job(NewJob { name: "Tarrajeo".into(), description: Some("Muros interiores".into()), unit: "m2".into() })
               .unwrap();
  let boq = repo.get_boq_with_project(&ctx, &project).unwrap().id;

  repo.add_boq_job(&ctx, &boq, &BoqJobRequest::new(j1, 120.0, 15.5)).unwrap();

  let view = repo.get_boq_with_project(&ctx, &project).unwrap();
  assert_eq!(view.jobs.len(), 1);
  assert_eq!(view.jobs[0].job_id, j1);
  assert_eq!(view.jobs[0].description, "Muros interiores");
  assert_eq!(view.jobs[0].unit, "m2");

  let rows = repo.list_boq_jobs(&boq).unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].quantity, 120.0);
  assert_eq!(rows[0].labor_cost, 15.5);
}

#[test]
fn adding_same_job_twice_is_a_constraint_error() {
  let db = TempDb::new();
  let repo = db.repo();
  let ctx = RequestContext::new();
  let project = repo.create_project(None).unwrap();
  let j = job(repo, "Zapata");
  let boq = repo.get_boq_with_project(&ctx, &project).unwrap().id;
  let req = BoqJobRequest::new(j, 1.0, 0.0);

  repo.add_boq_job(&ctx, &boq, &req).unwrap();
  match repo.add_boq_job(&ctx, &boq, &req) {
    Err(BoqError::Constraint(_)) => {}
    other => panic!("expected Constraint on duplicate add, got {:?}", other),
  }
  assert_eq!(repo.get_boq_with_project(&ctx, &project).unwrap().jobs.len(), 1);
}

#[test]
fn adding_unknown_job_is_a_constraint_error() {
  let db = TempDb::new();
  let repo = db.repo();
  let ctx = RequestContext::new();
  let project = repo.create_project(None).unwrap();
  let boq = repo.get_boq_with_project(&ctx, &project).unwrap().id;
  let res = repo.add_boq_job(&ctx, &boq, &BoqJobRequest::new(Uuid::new_v4(), 1.0, 0.0));
  assert!(matches!(res, Err(BoqError::Constraint(_))), "got {:?}", res);
  assert!(repo.list_boq_jobs(&boq).unwrap().is_empty());
}

#[test]
fn mutations_on_missing_boq_are_not_found() {
  let db = TempDb::new();
  let repo = db.repo();
  let ctx = RequestContext::new();
  let j = job(repo, "Vereda");
  let ghost = Uuid::new_v4();
  assert!(matches!(repo.add_boq_job(&ctx, &ghost, &BoqJobRequest::new(j, 1.0, 0.0)), Err(BoqError::NotFound(_))));
  assert!(matches!(repo.delete_boq_job(&ctx, &ghost, &j), Err(BoqError::NotFound(_))));
}

#[test]
fn non_draft_boq_rejects_add_and_delete() {
  let db = TempDb::new();
  let repo = db.repo();
  let ctx = RequestContext::new();
  let project = repo.create_project(None).unwrap();
  let kept = job(repo, "Cimiento");
  let other = job(repo, "Techo");
  let boq = repo.get_boq_with_project(&ctx, &project).unwrap().id;
  repo.add_boq_job(&ctx, &boq, &BoqJobRequest::new(kept, 2.0, 10.0)).unwrap();

  assert_eq!(repo.set_boq_status(&ctx, &boq, BoqStatus::Approved).unwrap(), BoqStatus::Approved);

  match repo.add_boq_job(&ctx, &boq, &BoqJobRequest::new(other, 1.0, 1.0)) {
    Err(BoqError::InvalidState(_)) => {}
    other => panic!("expected InvalidState, got {:?}", other),
  }
  match repo.delete_boq_job(&ctx, &boq, &kept) {
    Err(BoqError::InvalidState(_)) => {}
    other => panic!("expected InvalidState, got {:?}", other),
  }
  let view = repo.get_boq_with_project(&ctx, &project).unwrap();
  assert_eq!(view.status, BoqStatus::Approved);
  assert_eq!(view.jobs.len(), 1);
  assert_eq!(view.jobs[0].job_id, kept);

  // approved es terminal
  assert!(matches!(repo.set_boq_status(&ctx, &boq, BoqStatus::Draft), Err(BoqError::InvalidState(_))));
}

#[test]
fn rejected_boq_can_be_reopened() {
  let db = TempDb::new();
  let repo = db.repo();
  let ctx = RequestContext::new();
  let project = repo.create_project(None).unwrap();
  let j = job(repo, "Pintura");
  let boq = repo.get_boq_with_project(&ctx, &project).unwrap().id;
  repo.set_boq_status(&ctx, &boq, BoqStatus::Rejected).unwrap();
  assert!(repo.add_boq_job(&ctx, &boq, &BoqJobRequest::new(j, 1.0, 1.0)).is_err());
  repo.set_boq_status(&ctx, &boq, BoqStatus::Draft).unwrap();
  repo.add_boq_job(&ctx, &boq, &BoqJobRequest::new(j, 1.0, 1.0)).unwrap();
  assert_eq!(repo.get_boq_with_project(&ctx, &project).unwrap().jobs.len(), 1);
}

#[test]
fn price_log_rows_are_created_once_per_material() {
  let db = TempDb::new();
  let repo = db.repo();
  let ctx = RequestContext::new();
  let project = repo.create_project(None).unwrap();
  let j = job(repo, "Contrapiso");
  let m1 = repo.create_material(NewMaterial { name: "Arena".into(), unit: "m3".into() }).unwrap();
  let m2 = repo.create_material(NewMaterial { name: "Piedra".into(), unit: "m3".into() }).unwrap();
  repo.set_job_material(&j, &m1, 2.0).unwrap();
  repo.set_job_material(&j, &m2, 3.0).unwrap();
  let boq = repo.get_boq_with_project(&ctx, &project).unwrap().id;

  repo.add_boq_job(&ctx, &boq, &BoqJobRequest::new(j, 1.0, 0.0)).unwrap();
  let logs = repo.list_price_logs(&boq).unwrap();
  assert_eq!(logs.len(), 2);
  let first_stamps: Vec<_> = logs.iter().map(|l| (l.material_id, l.updated_at)).collect();

  // quitar y volver a agregar el mismo job no crea filas nuevas
  repo.delete_boq_job(&ctx, &boq, &j).unwrap();
  assert_eq!(repo.list_price_logs(&boq).unwrap().len(), 2);
  repo.add_boq_job(&ctx, &boq, &BoqJobRequest::new(j, 1.0, 0.0)).unwrap();
  let logs = repo.list_price_logs(&boq).unwrap();
  assert_eq!(logs.len(), 2);
  for l in &logs {
    assert!(first_stamps.contains(&(l.material_id, l.updated_at)), "price log row was rewritten: {:?}", l);
  }
}

#[test]
fn delete_is_a_no_op_for_absent_job_and_removes_only_the_pair() {
  let db = TempDb::new();
  let repo = db.repo();
  let ctx = RequestContext::new();
  let p1 = repo.create_project(None).unwrap();
  let p2 = repo.create_project(None).unwrap();
  let a = job(repo, "A");
  let b = job(repo, "B");
  let boq1 = repo.get_boq_with_project(&ctx, &p1).unwrap().id;
  let boq2 = repo.get_boq_with_project(&ctx, &p2).unwrap().id;
  repo.add_boq_job(&ctx, &boq1, &BoqJobRequest::new(a, 1.0, 0.0)).unwrap();
  repo.add_boq_job(&ctx, &boq1, &BoqJobRequest::new(b, 1.0, 0.0)).unwrap();
  repo.add_boq_job(&ctx, &boq2, &BoqJobRequest::new(a, 1.0, 0.0)).unwrap();

  repo.delete_boq_job(&ctx, &boq1, &Uuid::new_v4()).unwrap();
  assert_eq!(repo.list_boq_jobs(&boq1).unwrap().len(), 2);

  repo.delete_boq_job(&ctx, &boq1, &a).unwrap();
  let left: Vec<Uuid> = repo.get_boq_with_project(&ctx, &p1).unwrap().jobs.iter().map(|j| j.job_id).collect();
  assert_eq!(left, vec![b]);
  let other: Vec<Uuid> = repo.get_boq_with_project(&ctx, &p2).unwrap().jobs.iter().map(|j| j.job_id).collect();
  assert_eq!(other, vec![a]);
}

#[test]
fn steel_and_cement_example() {
  let db = TempDb::new();
  let repo = db.repo();
  let ids = BoqStubs::seed(repo).unwrap();
  let ctx = RequestContext::new();
  let b1 = repo.get_boq_with_project(&ctx, &ids.project_id).unwrap().id;

  repo.add_boq_job(&ctx, &b1, &BoqJobRequest::new(ids.job_id, 4.0, 800.0)).unwrap();

  let view = repo.get_boq_with_project(&ctx, &ids.project_id).unwrap();
  let jobs: Vec<Uuid> = view.jobs.iter().map(|j| j.job_id).collect();
  assert_eq!(jobs, vec![ids.job_id]);

  let mut logs: Vec<(Uuid, Uuid, Uuid, f64)> =
    repo.list_price_logs(&b1).unwrap().into_iter().map(|l| (l.material_id, l.boq_id, l.job_id, l.quantity)).collect();
  logs.sort_by(|x, y| x.3.total_cmp(&y.3));
  assert_eq!(logs, vec![(ids.steel_id, b1, ids.job_id, 5.0), (ids.cement_id, b1, ids.job_id, 10.0)]);
}

#[test]
fn cancelled_context_commits_nothing() {
  let db = TempDb::new();
  let repo = db.repo();
  let project = repo.create_project(None).unwrap();
  let j = job(repo, "Escalera");
  let ctx = RequestContext::new();
  ctx.cancel();

  assert!(matches!(repo.get_boq_with_project(&ctx, &project), Err(BoqError::Cancelled(_))));
  let live = RequestContext::new();
  let boq = repo.get_boq_with_project(&live, &project).unwrap().id;
  assert!(matches!(repo.add_boq_job(&ctx, &boq, &BoqJobRequest::new(j, 1.0, 0.0)), Err(BoqError::Cancelled(_))));
  assert!(repo.list_boq_jobs(&boq).unwrap().is_empty());
}

#[test]
fn selling_general_cost_only_changes_in_draft() {
  let db = TempDb::new();
  let repo = db.repo();
  let ctx = RequestContext::new();
  let project = repo.create_project(None).unwrap();
  let boq = repo.get_boq_with_project(&ctx, &project).unwrap().id;

  repo.set_selling_general_cost(&ctx, &boq, 2500.0).unwrap();
  assert_eq!(repo.get_boq_with_project(&ctx, &project).unwrap().selling_general_cost, 2500.0);
  assert!(matches!(repo.set_selling_general_cost(&ctx, &boq, -1.0), Err(BoqError::Validation(_))));

  repo.set_boq_status(&ctx, &boq, BoqStatus::Approved).unwrap();
  assert!(matches!(repo.set_selling_general_cost(&ctx, &boq, 10.0), Err(BoqError::InvalidState(_))));
}

#[test]
fn job_material_upsert_and_missing_references() {
  let db = TempDb::new();
  let repo = db.repo();
  let j = job(repo, "Enchape");
  let m = repo.create_material(NewMaterial { name: "Cerámico".into(), unit: "m2".into() }).unwrap();
  repo.set_job_material(&j, &m, 1.0).unwrap();
  repo.set_job_material(&j, &m, 1.05).unwrap();
  assert!(matches!(repo.set_job_material(&j, &Uuid::new_v4(), 1.0), Err(BoqError::NotFound(_))));
  assert!(matches!(repo.set_job_material(&Uuid::new_v4(), &m, 1.0), Err(BoqError::NotFound(_))));
  assert!(matches!(repo.set_job_material(&j, &m, 0.0), Err(BoqError::Validation(_))));

  let ctx = RequestContext::new();
  let project = repo.create_project(None).unwrap();
  let boq = repo.get_boq_with_project(&ctx, &project).unwrap().id;
  repo.add_boq_job(&ctx, &boq, &BoqJobRequest::new(j, 1.0, 0.0)).unwrap();
  let logs = repo.list_price_logs(&boq).unwrap();
  assert_eq!(logs.len(), 1);
  assert_eq!(logs[0].quantity, 1.05);
}
