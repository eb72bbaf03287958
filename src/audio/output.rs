/// Where the renderer delivers each mixed buffer in push mode
/// ([`Renderer::render_buffer`](crate::Renderer::render_buffer)).
///
/// `write` runs on the render thread: no blocking, no allocation.
pub trait OutputTarget: Send {
    /// 0 defers to the scheduler's configured channel count.
    fn channel_count(&self) -> usize;

    fn write(&mut self, interleaved: &[f32]);
}

/// Discards everything. Used when a hardware callback pulls frames through
/// [`Renderer::render_into`](crate::Renderer::render_into) instead.
#[derive(Debug, Clone, Copy)]
pub struct NullOutput {
    channels: usize,
}

impl NullOutput {
    pub fn new(channels: usize) -> Self {
        Self { channels }
    }
}

impl OutputTarget for NullOutput {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn write(&mut self, _interleaved: &[f32]) {}
}

#[cfg(feature = "cpal")]
pub use device::{CpalOutput, OutputError};

#[cfg(feature = "cpal")]
mod device {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use thiserror::Error;

    use crate::timing::Renderer;

    #[derive(Debug, Error)]
    pub enum OutputError {
        #[error("no output device available")]
        NoDevice,
        #[error("failed to query output config: {0}")]
        DefaultConfig(#[from] cpal::DefaultStreamConfigError),
        #[error("failed to build output stream: {0}")]
        BuildStream(#[from] cpal::BuildStreamError),
        #[error("failed to start output stream: {0}")]
        PlayStream(#[from] cpal::PlayStreamError),
        #[error("failed to pause output stream: {0}")]
        PauseStream(#[from] cpal::PauseStreamError),
    }

    /// Drives a [`Renderer`] from the default output device until dropped.
    pub struct CpalOutput {
        stream: cpal::Stream,
        channels: usize,
    }

    impl CpalOutput {
        pub fn start(mut renderer: Renderer) -> Result<Self, OutputError> {
            let host = cpal::default_host();
            let device = host.default_output_device().ok_or(OutputError::NoDevice)?;
            let config = device.default_output_config()?;
            let stream_config: cpal::StreamConfig = config.into();

            let channels = stream_config.channels as usize;
            renderer.set_channel_count(channels);
            tracing::info!(
                channels,
                sample_rate = ?stream_config.sample_rate,
                "opening output stream"
            );

            let stream = device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    renderer.render_into(data);
                },
                |err| tracing::error!(%err, "output stream error"),
                None,
            )?;

            stream.play()?;

            Ok(Self { stream, channels })
        }

        pub fn channel_count(&self) -> usize {
            self.channels
        }

        pub fn pause(&self) -> Result<(), OutputError> {
            self.stream.pause()?;
            Ok(())
        }

        pub fn resume(&self) -> Result<(), OutputError> {
            self.stream.play()?;
            Ok(())
        }
    }
}
