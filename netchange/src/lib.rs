//! Network-change monitor.
//!
//! Watches the kernel's link, address and route notifications and hands a
//! content-free [`ChangeSignal`](iface::ChangeSignal) to a reconcile loop
//! whenever something relevant changed.

pub mod error;
pub mod iface;
pub mod runtime;
