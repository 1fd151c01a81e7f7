// Domain layer: data model and the capability traits the core depends on.

pub mod model;
pub mod ports;
