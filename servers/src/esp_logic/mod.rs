pub mod config;
pub mod live;
pub mod logger;
pub mod routes;
pub mod state;
