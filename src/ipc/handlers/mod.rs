pub mod core;
pub mod legacy_data;
pub mod migration;
pub mod project;
