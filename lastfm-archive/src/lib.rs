pub mod api;
pub mod driver;
pub mod model;
pub mod store;
