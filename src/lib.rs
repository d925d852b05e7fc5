pub mod auth;
pub mod availability;
pub mod db;
pub mod error;
pub mod models;
pub mod notices;
pub mod reservations;
pub mod routes;
pub mod settings;
pub mod settlement;
pub mod state;
pub mod sweeps;
pub mod timeutil;
