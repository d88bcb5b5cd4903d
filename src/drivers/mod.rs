// src/drivers/mod.rs
pub mod alignment;
pub mod buffer;
pub mod error;
pub mod extractor;
pub mod fft;
pub mod pipeline;
pub mod plot;
pub mod source;
pub use alignment::{assess, AlignmentReport};
pub use buffer::{frame_queue, FrameConsumer, FrameProducer, WindowAssembler};
pub use error::{ConfigError, ErrorKind, RenderError, RppgError};
pub use extractor::{PosExtractor, TensorModel, TensorModelExtractor, WaveformExtractor};
pub use fft::{PowerSpectrum, SpectrumBuilder};
pub use pipeline::{collect_window, Analysis, VitalsPipeline};
pub use plot::{render_spectrum_png, render_waveform_png, PlotStyle};
pub use source::{CaptureSpec, FrameSource, ManualSource, SyntheticFaceSource, SyntheticPulse};
