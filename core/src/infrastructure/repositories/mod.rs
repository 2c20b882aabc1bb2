// Copyright (c) 2026 Isprava Engineering
//! PostgreSQL-backed repositories (`SPEC_FULL.md` SS3a), grounded on the
//! teacher's `infrastructure/repositories/postgres_agent.rs` `ON CONFLICT`
//! upsert style.

pub mod postgres_acl;
pub mod postgres_session;
pub mod postgres_user;

pub use postgres_acl::PostgresAclConfigStore;
pub use postgres_session::PostgresSessionStore;
pub use postgres_user::PostgresUserRepository;
