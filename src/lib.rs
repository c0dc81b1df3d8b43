pub mod app;
pub mod apps;
pub mod shutdown;
