pub mod health;
pub mod latency;
pub mod routes;
pub mod views;

pub use routes::{router, ApiState};
