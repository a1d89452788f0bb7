//! Remote audio playback: output devices and the gapless scheduler

mod device;
mod scheduler;

#[cfg(feature = "cpal-audio")]
mod cpal_output;

pub use device::{CompletionCallback, NullOutputDevice, OutputDevice, PlaybackBuffer, ScheduledSource};
pub use scheduler::{PlaybackScheduler, ScheduledChunk};

#[cfg(feature = "cpal-audio")]
pub use cpal_output::CpalOutputDevice;

use std::sync::Arc;

use crate::error::Result;

/// Open the default speaker when built with cpal, otherwise the null output
pub fn open_default_output() -> Result<Arc<dyn OutputDevice>> {
    #[cfg(feature = "cpal-audio")]
    {
        Ok(Arc::new(CpalOutputDevice::open()?))
    }

    #[cfg(not(feature = "cpal-audio"))]
    {
        Ok(Arc::new(NullOutputDevice::new()))
    }
}
