//! Diesel table definitions for the portal sync subsystem.
//!
//! Tables: portal_teams, portal_projects, portal_secrets,
//! portal_discovered_resources, portal_provisioning_requests, portal_audit_logs.

diesel::table! {
    portal_teams (id) {
        id -> Uuid,
        name -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    portal_projects (id) {
        id -> Uuid,
        name -> Varchar,
        kind -> Varchar,
        description -> Text,
        owner_team_id -> Uuid,
        catalog_file_path -> Nullable<Varchar>,
        catalog_metadata -> Nullable<Jsonb>,
        links -> Jsonb,
        last_synced_at -> Nullable<Timestamptz>,
        sync_status -> Varchar,
        sync_error -> Nullable<Text>,
        auto_synced -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    portal_secrets (id) {
        id -> Uuid,
        name -> Varchar,
        provider -> Varchar,
        encrypted_value -> Bytea,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    portal_discovered_resources (id) {
        id -> Uuid,
        project_id -> Uuid,
        secret_id -> Uuid,
        arn -> Varchar,
        resource_type -> Varchar,
        name -> Varchar,
        region -> Varchar,
        status -> Varchar,
        metadata -> Jsonb,
        discovered_at -> Timestamptz,
        last_synced_at -> Timestamptz,
    }
}

diesel::table! {
    portal_provisioning_requests (id) {
        id -> Uuid,
        project_id -> Uuid,
        secret_id -> Uuid,
        resource_type -> Varchar,
        name -> Varchar,
        region -> Varchar,
        attributes -> Jsonb,
        status -> Varchar,
        arn -> Nullable<Varchar>,
        error -> Nullable<Text>,
        requested_by -> Varchar,
        created_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    portal_audit_logs (id) {
        id -> Uuid,
        actor_email -> Varchar,
        action -> Varchar,
        resource_type -> Varchar,
        resource_name -> Varchar,
        status -> Varchar,
        details -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(portal_projects -> portal_teams (owner_team_id));
diesel::joinable!(portal_discovered_resources -> portal_projects (project_id));
diesel::joinable!(portal_discovered_resources -> portal_secrets (secret_id));
diesel::joinable!(portal_provisioning_requests -> portal_projects (project_id));

diesel::allow_tables_to_appear_in_same_query!(
    portal_teams,
    portal_projects,
    portal_secrets,
    portal_discovered_resources,
    portal_provisioning_requests,
    portal_audit_logs,
);
