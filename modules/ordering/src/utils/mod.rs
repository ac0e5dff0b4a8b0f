pub mod actor;
pub mod geo;
pub mod pricing;
