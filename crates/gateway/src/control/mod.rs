//! Operator control plane.

pub mod dispatch;
pub mod ws;
