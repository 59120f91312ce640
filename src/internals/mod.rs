//! Internal machinery shared by the provider layer.

pub mod retry;
pub mod tokens;
