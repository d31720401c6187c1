//! Core of the Filen command-line client: client-side authenticated
//! cryptography, a retrying backend client, a cache-backed path resolver,
//! the 1 MiB-chunked transfer engine, and the batch orchestrator with its
//! crash-safe resume journal.
//!
//! The CLI crate is a thin shell over this library; nothing here touches
//! a terminal.

pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod transfer;

pub use config::{Config, Context, Credentials, DEFAULT_BASE_URL};
pub use error::{Error, ErrorKind, Result};
pub use fs::{Node, NodeId, NodeKind, RemotePath, Resolver};
pub use transfer::{
    BatchReport, BatchRunner, CancelFlag, ConflictPolicy, Engine, Filters, JournalStore,
    Operation, TransferOptions, CHUNK_SIZE,
};
