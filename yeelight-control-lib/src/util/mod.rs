pub mod command;
pub mod constants;
pub mod discovery;
pub mod params;
