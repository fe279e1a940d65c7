//! Core engine for persistent, resumable, bandwidth-shaped HTTPS downloads.
//!
//! [`manager::DownloadManager`] is the single entry point; every other
//! module is a component it assembles (store, transport, strategies,
//! bandwidth scheduling, progress, recovery).

pub mod bandwidth;
pub mod catalog;
pub mod config;
pub mod downloader;
pub mod error;
pub mod events;
pub mod logging;
pub mod manager;
pub mod progress;
pub mod recovery;
pub mod segmenter;
pub mod storage;
pub mod store;
pub mod transport;
pub mod url_model;
