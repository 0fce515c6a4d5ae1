pub mod fingerprint;
pub mod schema;
