//! Integration tests for the observer graph

mod move_subjects;
mod naming;
mod ownership;
mod snapshot_store;
mod stream_integrity;
mod transfer_roundtrip;
