//! Errors that terminate the terrain viewer.
//!
//! None of these are recoverable: assets are fixed at build time, so a failure here is a
//! deployment defect. Loaders hand them back as values and [`exit_on_fatal_error`] is the
//! single place that logs them and shuts the app down.

use async_channel::{Receiver, Sender};
use bevy::prelude::*;
use derive_more::derive::{Display, Error};

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum TerrainError {
    /// A file is missing, unreadable or could not be decoded.
    #[display("failed to load resource {path}: {reason}")]
    ResourceLoad { path: String, reason: String },
    /// Shader composition, compilation or pipeline creation failed.
    #[display("failed to build pipeline {pipeline}:\n{message}")]
    ShaderBuild { pipeline: String, message: String },
    /// The decoded image has a channel count without a matching texture format.
    #[display("unsupported channel count {channels} in image {path}")]
    UnsupportedFormat { path: String, channels: u8 },
    /// The terrain configuration violates one of its invariants.
    #[display("invalid terrain configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl TerrainError {
    pub(crate) fn resource_load(path: impl ToString, reason: impl ToString) -> Self {
        Self::ResourceLoad {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_config(reason: impl ToString) -> Self {
        Self::InvalidConfig {
            reason: reason.to_string(),
        }
    }
}

pub type TerrainResult<T> = Result<T, TerrainError>;

/// Collects fatal errors from the main world, asset loading and the render world.
///
/// The render world runs on its own thread in pipelined rendering, therefore errors travel
/// through a channel instead of a shared resource.
#[derive(Resource, Clone)]
pub struct FatalErrors {
    sender: Sender<TerrainError>,
    receiver: Receiver<TerrainError>,
}

impl Default for FatalErrors {
    fn default() -> Self {
        let (sender, receiver) = async_channel::unbounded();
        Self { sender, receiver }
    }
}

impl FatalErrors {
    pub fn report(&self, error: TerrainError) {
        // The receiver lives as long as the main world, so a closed channel means we are
        // already shutting down.
        let _ = self.sender.try_send(error);
    }

    pub(crate) fn sender(&self) -> Sender<TerrainError> {
        self.sender.clone()
    }

    pub(crate) fn drain(&self) -> impl Iterator<Item = TerrainError> + '_ {
        std::iter::from_fn(|| self.receiver.try_recv().ok())
    }
}

/// Logs every reported error to stderr and requests a failing exit.
pub fn exit_on_fatal_error(errors: Res<FatalErrors>, mut exit: EventWriter<AppExit>) {
    let mut failed = false;

    for error in errors.drain() {
        error!("{error}");
        failed = true;
    }

    if failed {
        exit.send(AppExit::error());
    }
}
