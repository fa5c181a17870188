// Domain layer: shared models and ports (interfaces) used by the components.

pub mod model;
pub mod ports;
