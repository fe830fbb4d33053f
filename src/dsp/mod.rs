pub mod denoise_engine;
pub mod denoise_invoker;
pub mod frame_adapter;
pub mod gain_shaper;
pub mod resampler;
pub mod sample_buffer;
pub mod utils;

pub use denoise_engine::{
    BypassEngine, DenoiseEngine, EngineFactory, RnnoiseEngine, RnnoiseFactory, RNNOISE_FRAME_SIZE,
    RNNOISE_SAMPLE_RATE,
};
pub use denoise_invoker::DenoiseInvoker;
pub use frame_adapter::FrameAdapter;
pub use gain_shaper::{AdaptiveGainShaper, VoiceActivityHistory};
pub use resampler::LinearResampler;
pub use sample_buffer::{AudioBlock, AudioBlockMut, SampleBuffer};
