pub mod rqrr_backend;
pub mod stub;

use anyhow::{anyhow, Result};

use super::backend::DecoderBackend;

pub use rqrr_backend::RqrrBackend;
pub use stub::StubBackend;

/// Instantiate a backend by its configured name.
pub fn backend_by_name(name: &str) -> Result<Box<dyn DecoderBackend>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "rqrr" | "" => Ok(Box::new(RqrrBackend::new())),
        "stub" => Ok(Box::new(StubBackend::new())),
        other => Err(anyhow!("unknown decoder backend '{}'", other)),
    }
}
