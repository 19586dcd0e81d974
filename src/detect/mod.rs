mod backend;
mod backends;
mod pipeline;
mod result;
pub mod score;
pub mod variants;

pub use backend::{DecoderBackend, RawRead};
pub use backends::{backend_by_name, RqrrBackend, StubBackend};
pub use pipeline::{DetectorSettings, TagDetector};
pub use result::{DetectDiagnostics, Detection, DetectionReport, Pass};
