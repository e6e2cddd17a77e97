pub mod service_definition;

pub use service_definition::*;
