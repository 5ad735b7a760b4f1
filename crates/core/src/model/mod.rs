pub mod context;
pub mod k6;
pub mod playwright;
pub mod span;
