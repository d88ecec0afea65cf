pub mod open;
pub mod plugins;
