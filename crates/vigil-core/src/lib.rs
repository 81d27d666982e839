//! Core domain of the vigil agent: capability traits, recovery signals,
//! the persisted record and the settings model.

pub mod capability;
pub mod command;
pub mod controller;
pub mod error;
pub mod identity;
pub mod phase;
pub mod record;
pub mod recovery;
pub mod session;
pub mod settings;
pub mod status;
pub mod upload;

pub use error::{Result, VigilError};
pub use recovery::{Flow, Interrupt, RecoverySignal};
