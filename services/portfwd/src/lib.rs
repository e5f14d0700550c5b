pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;

pub use config::{Config, PairList, ProxyPair};
pub use error::{ConfigError, ProxyError};
pub use logging::{CaptureSink, LogSink, PrefixLogger, TracingSink};
pub use proxy::{
    AddressPair, CopyOutcome, Direction, DirectionSummary, Listener, ListenerConfig,
    ListenerExit, ListenerStats, ProxyOptions, ProxySet, RelayPair, RelayReport, RelayState,
    Shutdown, ShutdownRx,
};
