//! modelport converts trained computation-graph models from producer formats
//! into a portable interchange document, with an external tensor store for
//! models above the format's single-file size ceiling.

pub mod compress;
pub mod custom_ops;
pub mod dispatch;
pub mod error;
pub mod exchange;
pub mod loader;
pub mod model;
pub mod optim;
pub mod package;
pub mod pipeline;
pub mod rename;
pub mod ser;
pub mod store;
pub mod tfpb;

pub use error::{Error, Result};
