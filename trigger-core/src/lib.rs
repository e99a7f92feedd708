// Trigger subsystem validation engine.
//
// The crate drives a digitizer and a signal generator through the traits in
// `device`, sweeps capture settings, and checks each fetched buffer. It has no
// hardware dependency; the `sim` module provides a loopback board so the
// bench and the tests run on a host.

pub mod acquisition;
pub mod buffer;
pub mod device;
pub mod options;
pub mod report;
pub mod scenarios;
pub mod sim;
pub mod sweep;
pub mod validate;
