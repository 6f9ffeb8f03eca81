//! Chromium backend for the rehearse engine, driven over CDP.

pub mod backend;
pub mod cdp;
mod dom;

pub use backend::{CdpContext, HeadlessBackend};
pub use cdp::LaunchOptions;
