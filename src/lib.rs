#![allow(clippy::needless_doctest_main)]
#![doc = include_str!("../README.md")]

mod builder;
mod entry;
mod error;
mod handle;
mod key;
mod metrics;
mod queue;
mod store;
mod unit;
mod worker;

pub use builder::CacheBuilder;
pub use error::CacheError;
pub use handle::Handle;
pub use key::ResourceKey;
pub use metrics::CacheMetrics;
pub use store::{Cache, ReclaimObserver};
pub use unit::{CloseError, LoadedUnit};
