pub mod csv_import;
pub mod db;
pub mod error;
pub mod models;
pub mod schedule;
pub mod service;
