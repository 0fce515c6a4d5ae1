pub mod engine;
pub mod guards;
pub mod references;
pub mod resolver;
