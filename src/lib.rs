extern crate serde;
extern crate toml;

pub mod analysis;
pub mod clock;
pub mod communications;
pub mod configs;
pub mod instrument;
pub mod logging;
pub mod multifit;
pub mod peak;
pub mod recording;
pub mod scan;
pub mod sweep;
pub mod util;
