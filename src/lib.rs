//! Chain commit protocol for edges whose two copies live on different partitions.
//!
//! The [`chain`] module holds the coordinators, the resume machinery and the
//! scanner; [`storage`] holds key layouts, the key-value contract and the
//! apply path they write through.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chain;
pub mod config;
pub mod error;
pub mod primitives;
pub mod storage;
pub mod types;

pub use chain::{ChainEnv, ResumeOutcome, ResumeScanner, TxnId};
pub use config::ChainConfig;
pub use error::{ChainError, RemoteError, Result, StoreError};
