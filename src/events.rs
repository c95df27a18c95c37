//! Per-session callback surface.
//!
//! Grounded on `thaumic-core`'s `events::emitter::EventEmitter` trait
//! (`NoopEventEmitter`/`LoggingEventEmitter`), adapted from a broadcast-bus
//! trait object into a single record of optional closures, since this
//! spec's callbacks are scoped to one session rather than fanned out to
//! many subscribers.

use crate::boundary::BoundaryEvent;
use crate::error::SpeechError;

/// Optional per-session callbacks. Unset fields are simply not invoked;
/// the caller owns the closures and the core never invokes them while
/// holding an internal lock (see the concurrency notes in the synthesis
/// spec).
#[derive(Default)]
pub struct SpeechCallbacks {
    pub on_start: Option<Box<dyn FnMut() + Send>>,
    pub on_done: Option<Box<dyn FnMut(Vec<u8>) + Send>>,
    pub on_error: Option<Box<dyn FnMut(SpeechError) + Send>>,
    pub on_stopped: Option<Box<dyn FnMut() + Send>>,
    pub on_pause: Option<Box<dyn FnMut() + Send>>,
    pub on_resume: Option<Box<dyn FnMut() + Send>>,
    pub on_boundary: Option<Box<dyn FnMut(BoundaryEvent) + Send>>,
    pub on_mark: Option<Box<dyn FnMut(String) + Send>>,
}

impl SpeechCallbacks {
    pub fn fire_start(&mut self) {
        if let Some(f) = self.on_start.as_mut() {
            f();
        }
    }

    pub fn fire_done(&mut self, audio: Vec<u8>) {
        if let Some(f) = self.on_done.as_mut() {
            f(audio);
        }
    }

    pub fn fire_error(&mut self, err: SpeechError) {
        if let Some(f) = self.on_error.as_mut() {
            f(err);
        }
    }

    pub fn fire_stopped(&mut self) {
        if let Some(f) = self.on_stopped.as_mut() {
            f();
        }
    }

    pub fn fire_pause(&mut self) {
        if let Some(f) = self.on_pause.as_mut() {
            f();
        }
    }

    pub fn fire_resume(&mut self) {
        if let Some(f) = self.on_resume.as_mut() {
            f();
        }
    }

    pub fn fire_boundary(&mut self, event: BoundaryEvent) {
        if let Some(f) = self.on_boundary.as_mut() {
            f(event);
        }
    }

    pub fn fire_mark(&mut self, name: String) {
        if let Some(f) = self.on_mark.as_mut() {
            f(name);
        }
    }
}
