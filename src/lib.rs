pub mod record;
pub mod format;
pub mod writer;
pub mod buffer;
pub mod producer;
pub mod discovery;
pub mod remote;
pub mod backend;
pub mod dispatcher;
pub mod layer;

#[cfg(feature = "kafka")]
pub mod kafka;

pub mod env;
pub mod init;
