//! Slidegate - Distributed Sliding-Window Rate Limiting
//!
//! This crate answers "may this identifier act again right now?" for any
//! number of independent processes sharing one store. Each check prunes,
//! counts and records attempts for the identifier in a single atomic batch,
//! so the processes need no coordination of their own.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use slidegate::{Limiter, RedisStore};
//!
//! let store = RedisStore::connect("redis://127.0.0.1/").await?;
//! let rate = Limiter::new(Arc::new(store)).rate(3, Duration::from_secs(1));
//!
//! let admission = rate.allowed("8.8.8.8").await?;
//! println!("{} {}", admission.allowed, admission.remaining);
//! ```
//!
//! HTTP services get the same decision as a tower layer via
//! [`Limiter::limit_layer`].

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;

pub use error::{Result, SlidegateError};
pub use http::{AdmissionLayer, LimitExceeded};
pub use ratelimit::{Admission, Clock, Limiter, ManualClock, RatePolicy, RateWindow, SystemClock};
pub use store::{AttemptStore, MemoryStore, RedisStore, RedisStoreConfig, StoreError};
