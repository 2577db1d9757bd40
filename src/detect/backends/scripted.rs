use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// One canned answer for `ScriptedBackend`.
#[derive(Clone, Debug)]
pub enum ScriptedResponse {
    Detections(Vec<Detection>),
    Fail(String),
}

/// Backend that replays a fixed script of answers, one per `detect` call.
///
/// Once the script runs out every call returns no detections. The call counter
/// is shared so a test can keep watching it after the backend is boxed.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: VecDeque<ScriptedResponse>,
    calls: Arc<AtomicU64>,
}

impl ScriptedBackend {
    pub fn new(script: impl IntoIterator<Item = ScriptedResponse>) -> Self {
        Self {
            script: script.into_iter().collect(),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append an answer to the end of the script.
    pub fn push(&mut self, response: ScriptedResponse) {
        self.script.push_back(response);
    }

    /// Shared handle to the number of `detect` calls made so far.
    pub fn call_counter(&self) -> Arc<AtomicU64> {
        self.calls.clone()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front() {
            Some(ScriptedResponse::Detections(detections)) => Ok(detections),
            Some(ScriptedResponse::Fail(reason)) => Err(anyhow!(reason)),
            None => Ok(Vec::new()),
        }
    }
}
