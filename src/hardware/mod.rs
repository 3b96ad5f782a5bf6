//! Pin output backends

mod gpio;

pub use gpio::SimulatedPins;
