pub mod config;
pub mod handlers;
pub mod mesh;
pub mod services;
pub mod startup;
