pub mod profile;
pub mod stations;
