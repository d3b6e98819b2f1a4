/*!
 * Database module for persistent storage of jobs.
 *
 * This module provides SQLite-based persistence for:
 * - Job records with their configuration snapshot
 * - Progress, status and output references written by the pipeline
 */

pub mod connection;
pub mod models;
pub mod repository;
pub mod schema;

pub use connection::{DatabaseConnection, DatabaseStats};
pub use repository::JobRepository;
