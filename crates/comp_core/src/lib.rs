pub mod comp_config;
pub mod comp_parameters;
