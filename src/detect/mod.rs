mod backend;
mod backends;
pub mod labels;
mod result;
pub mod yolo;

pub use backend::DetectorBackend;
#[cfg(feature = "backend-tract")]
pub use backends::{TractYoloBackend, YoloSettings};
pub use backends::{ScriptedBackend, ScriptedResponse, StubBackend};
pub use result::Detection;
