//! Judgebox - sandboxed execution hosts and a load-balanced judge
//!
//! Two roles share this crate:
//! - exec: compiles and runs one submission under OS resource limits
//! - judge: spreads test cases over a pool of exec hosts and aggregates them

pub mod compiler;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod judger;
pub mod languages;
pub mod pool;
pub mod protocol;
pub mod runner;
pub mod server;
pub mod storage;
pub mod workspace;
