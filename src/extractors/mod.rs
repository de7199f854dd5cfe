// Code-based extraction of the runtime contract
//
// Extractors read the entrypoint and application source to find the port the
// process actually binds, so it can be checked against the declared port
// before anything is built.

pub mod entrypoint;
pub mod port;

pub use entrypoint::{EntryTarget, EntrypointResolver};
pub use port::{BindPort, BindPortExtractor, BindPortInfo, PortSource};
