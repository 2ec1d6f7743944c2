//! Background jobs that run alongside the API server.

mod stock_monitor;

pub use stock_monitor::*;
