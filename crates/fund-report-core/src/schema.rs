//! Diesel table definitions for the ingestion schema.
//!
//! Kept in sync with the SQL migrations under `migrations/`.

diesel::table! {
    fund_reports (id) {
        id -> Uuid,
        fund_code -> Varchar,
        fund_name -> Varchar,
        fund_manager -> Nullable<Varchar>,
        report_type -> Varchar,
        report_period_start -> Nullable<Date>,
        report_period_end -> Date,
        net_asset_value -> Nullable<Numeric>,
        total_net_assets -> Nullable<Numeric>,
        period_profit -> Nullable<Numeric>,
        parser_kind -> Varchar,
        taxonomy_version -> Nullable<Varchar>,
        confidence -> Numeric,
        created_at -> Timestamptz,
        reparsed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    asset_allocations (id) {
        id -> Uuid,
        fund_report_id -> Uuid,
        asset_type -> Varchar,
        asset_subtype -> Nullable<Varchar>,
        market_value -> Numeric,
        net_value_ratio -> Numeric,
    }
}

diesel::table! {
    top_holdings (id) {
        id -> Uuid,
        fund_report_id -> Uuid,
        rank -> Int4,
        security_code -> Varchar,
        security_name -> Varchar,
        shares -> Nullable<Int8>,
        market_value -> Numeric,
        net_value_ratio -> Numeric,
    }
}

diesel::table! {
    industry_allocations (id) {
        id -> Uuid,
        fund_report_id -> Uuid,
        industry_name -> Varchar,
        market_value -> Numeric,
        net_value_ratio -> Numeric,
    }
}

diesel::table! {
    download_tasks (task_id) {
        task_id -> Uuid,
        status -> Varchar,
        save_dir -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        requested_refs -> Jsonb,
        per_item -> Jsonb,
        progress -> Jsonb,
    }
}

diesel::joinable!(asset_allocations -> fund_reports (fund_report_id));
diesel::joinable!(top_holdings -> fund_reports (fund_report_id));
diesel::joinable!(industry_allocations -> fund_reports (fund_report_id));

diesel::allow_tables_to_appear_in_same_query!(
    fund_reports,
    asset_allocations,
    top_holdings,
    industry_allocations,
    download_tasks,
);
