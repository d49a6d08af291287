pub mod memory;
pub mod pg_repository;
pub mod repositories;
