//! Diesel table definitions.
//!
//! Tables: apps, incidents, analyses. Incidents cascade from apps and
//! analyses cascade from incidents.

diesel::table! {
    apps (id) {
        id -> Int8,
        repo_owner -> Varchar,
        repo_name -> Varchar,
        webhook_key -> Varchar,
        vercel_project_id -> Nullable<Varchar>,
        deployment_status -> Varchar,
        live_url -> Nullable<Varchar>,
        instrumented -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    incidents (id) {
        id -> Int8,
        app_id -> Int8,
        incident_type -> Varchar,
        source -> Varchar,
        status -> Varchar,
        error_message -> Text,
        error_fingerprint -> Varchar,
        stack_trace -> Nullable<Text>,
        logs -> Nullable<Jsonb>,
        created_at -> Timestamptz,
        resolved_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    analyses (id) {
        id -> Int8,
        incident_id -> Int8,
        model -> Varchar,
        prompt -> Text,
        root_cause -> Nullable<Text>,
        suggested_fix -> Nullable<Jsonb>,
        files_analyzed -> Jsonb,
        commits_analyzed -> Jsonb,
        pr_url -> Nullable<Varchar>,
        pr_number -> Nullable<Int4>,
        branch_name -> Nullable<Varchar>,
        tokens_used -> Nullable<Int8>,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(incidents -> apps (app_id));
diesel::joinable!(analyses -> incidents (incident_id));

diesel::allow_tables_to_appear_in_same_query!(apps, incidents, analyses);
