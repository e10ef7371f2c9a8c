//! Internal processors and the registry that constructs them by uid.

mod gain;
mod passthrough;
mod peak_meter;
mod registry;

pub use gain::GainPlugin;
pub use passthrough::PassthroughPlugin;
pub use peak_meter::PeakMeterPlugin;
pub use registry::InternalPluginRegistry;
