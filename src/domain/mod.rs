// Domain layer: data units and the ports (traits) stages and clocks implement.

pub mod model;
pub mod ports;
