pub mod analyze;
pub mod sites;
pub mod status;
pub mod watch;
