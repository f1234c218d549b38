//! Acknowledged-mode segmentation and retransmission engine for a
//! cellular link layer.
//!
//! An upper layer submits units to a [`entity::TxEntity`], which splits
//! them into window-sequenced fragments and hands them to the lower
//! layer on credit pulls. The peer [`entity::RxEntity`] reassembles the
//! fragments, delivers each unit exactly once, and feeds cumulative or
//! bitmap acknowledgments back. Losses are repaired by per-fragment
//! retransmission timers; a unit whose fragment exhausts its retry
//! budget is dropped whole on both sides through the window-advance
//! handshake.
//!
//! The engine is single-threaded and clock-free: every entry point takes
//! the current `Instant` from the caller, and timer deadlines are polled
//! with `handle_timers`.

pub mod entity;
pub mod protocol;
pub mod timer;
pub mod utils;
