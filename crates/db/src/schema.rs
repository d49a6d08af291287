//! Idempotent DDL for the relational index, run-state, lock and message tables.

use chatsync_common::error::{ChatSyncError, ChatSyncResult};
use sqlx::PgPool;

const INDEX_SCHEMA: &[&str] = &[
    "create table if not exists customers (
       id uuid primary key,
       external_id text not null unique,
       name text not null,
       avatar_url text,
       avatar_key text,
       created_at timestamptz not null default now(),
       updated_at timestamptz not null default now()
     )",
    "create table if not exists deals (
       id uuid primary key,
       external_id text not null unique,
       customer_id uuid references customers(id) on delete cascade,
       last_message_id text,
       last_message_at timestamptz,
       message_count bigint not null default 0,
       sync_status text not null default 'pending',
       created_at timestamptz not null default now(),
       updated_at timestamptz not null default now()
     )",
    "create index if not exists deals_complete_idx
       on deals (last_message_at desc) where sync_status = 'complete'",
    "create table if not exists sync_runs (
       id uuid primary key,
       run_id text not null unique,
       status text not null default 'pending',
       cursor_value text not null default '',
       cutoff_date timestamptz,
       processed_count bigint not null default 0,
       last_error text,
       started_at timestamptz not null default now(),
       updated_at timestamptz not null default now()
     )",
    // At most one incomplete run across the whole table.
    "create unique index if not exists sync_runs_single_incomplete_uidx
       on sync_runs ((true)) where status in ('pending', 'running')",
    "create table if not exists sync_locks (
       lock_key text primary key,
       owner text not null,
       expires_at timestamptz not null
     )",
];

const MESSAGE_SCHEMA: &[&str] = &["create table if not exists chat_messages (
       chat_id text not null,
       message_id text not null,
       text text not null,
       created_at timestamptz not null,
       stored_at timestamptz not null default now(),
       primary key (chat_id, message_id)
     )"];

/// Create the relational index, run-state and lock tables if missing.
pub async fn ensure_schema(pool: &PgPool) -> ChatSyncResult<()> {
    execute_all(pool, INDEX_SCHEMA).await
}

/// Create the document-store table if missing. May target a different database.
pub async fn ensure_message_schema(pool: &PgPool) -> ChatSyncResult<()> {
    execute_all(pool, MESSAGE_SCHEMA).await
}

async fn execute_all(pool: &PgPool, statements: &[&str]) -> ChatSyncResult<()> {
    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| ChatSyncError::Database(e.to_string()))?;
    }
    Ok(())
}
