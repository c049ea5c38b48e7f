// posview/src/lib.rs
// Main entry point for the position view library

//! # posview - live and historical position view for brokerage accounts
//!
//! The state behind a trading account's position history screen:
//!
//! - Account directory and selection defaulting (REAL first, then DEMO)
//! - A subscription controller that keeps exactly one live position feed
//!   open for the selected account and never leaks snapshots from a stale one
//! - A ticketed closed-position query for the historical mode
//! - A single loading flag combining both sources
//!
//! The live feed and the closed-position backend are external collaborators,
//! plugged in through [`feed::PositionFeed`] and
//! [`closed_positions::ClosedPositionSource`].

mod base;
pub mod account;
pub mod codec;
pub mod config;
pub mod directory;
pub mod selection;
pub mod feed;
pub mod feed_mock;
pub mod subscription;
pub mod closed_positions;
pub mod status;
pub mod view;

pub use base::PosViewError;
pub use view::{PositionHistoryView, ViewOutput};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
