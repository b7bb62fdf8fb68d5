//! codedrop-transfer: expiring-transfer lifecycle over an untrusted blob store

pub mod lifecycle;
pub mod sweeper;

pub use lifecycle::{system_clock, Clock, FetchedTransfer, TransferReceipt, TransferService};
pub use sweeper::{ReportHook, RetentionSweeper, SweepReport};
