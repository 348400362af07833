pub mod chart;
pub mod config;
pub mod plot;
pub mod table;
pub mod watch;
