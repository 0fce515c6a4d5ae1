pub mod filesystem;
pub mod parser;
pub mod pipeline;
pub mod project;
pub mod symbols;
