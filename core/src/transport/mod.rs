// Transport module — radio abstraction and in-process loopback medium

pub mod loopback;
pub mod radio;

pub use loopback::{LoopbackAir, LoopbackRadio};
pub use radio::{check_payload, RadioTransport, ScanObservation, TransportError};

#[cfg(test)]
pub use radio::MockRadioTransport;
