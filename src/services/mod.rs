pub mod aggregator;
#[cfg(test)]
pub(crate) mod fixture_server;
pub mod http;
pub mod platform;
pub mod renderer;
pub mod sleeper;
pub mod yahoo;

pub use aggregator::*;
pub use platform::*;
pub use renderer::*;
pub use sleeper::SleeperPlatform;
pub use yahoo::YahooPlatform;
