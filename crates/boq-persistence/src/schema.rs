// Diesel schema for the BOQ tables. Ids are stored as Text so the same
// migrations run on SQLite and Postgres.
use diesel::allow_tables_to_appear_in_same_query;
diesel::table! {
    project (project_id) {
        project_id -> Text,
        name -> Nullable<Text>,
    }
}
diesel::table! {
    boq (boq_id) {
        boq_id -> Text,
        project_id -> Text,
        status -> Text,
        selling_general_cost -> Nullable<Double>,
    }
}
diesel::table! {
    job (job_id) {
        job_id -> Text,
        name -> Text,
        description -> Nullable<Text>,
        unit -> Text,
    }
}
diesel::table! {
    material (material_id) {
        material_id -> Text,
        name -> Text,
        unit -> Text,
    }
}
diesel::table! {
    job_material (job_id, material_id) {
        job_id -> Text,
        material_id -> Text,
        quantity -> Double,
    }
}
diesel::table! {
    boq_job (boq_id, job_id) {
        boq_id -> Text,
        job_id -> Text,
        quantity -> Double,
        labor_cost -> Double,
    }
}
diesel::table! {
    material_price_log (material_id, boq_id, job_id) {
        material_id -> Text,
        boq_id -> Text,
        job_id -> Text,
        quantity -> Double,
        updated_at -> Timestamp,
    }
}
diesel::joinable!(boq -> project (project_id));
diesel::joinable!(boq_job -> job (job_id));
allow_tables_to_appear_in_same_query!(project, boq, job, material, job_material, boq_job, material_price_log);
