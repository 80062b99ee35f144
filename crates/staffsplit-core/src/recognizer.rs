use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use staffsplit_domain_image::Strip;
use staffsplit_domain_score::{import_partial_payload, FailureKind, PartialScore, StripFailure};
use staffsplit_ports::omr::{OmrError, OmrOptions, OmrPort};
use staffsplit_ports::types::StripIndex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cooperative cancellation for one conversion request.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DispatchConfig {
    pub worker_limit: usize,
    pub strip_timeout: Duration,
}

/// A log the engine kept for one strip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EngineLog {
    pub strip_index: StripIndex,
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct StripRecognition {
    pub partial: PartialScore,
    pub engine_log: Option<PathBuf>,
}

impl StripRecognition {
    fn failed(failure: StripFailure) -> Self {
        Self {
            partial: PartialScore::Failed(failure),
            engine_log: None,
        }
    }
}

#[derive(Debug)]
pub struct DispatchResult {
    /// Results for every dispatched strip, in strip order.
    pub partials: Vec<PartialScore>,
    /// Engine logs kept for dispatched strips, in strip order.
    pub engine_logs: Vec<EngineLog>,
    /// Strips never handed to the engine because the request was cancelled.
    pub undispatched: Vec<StripIndex>,
}

/// Counting semaphore over engine calls. A permit lives on the engine
/// thread, so a call the worker stopped waiting for still holds its slot.
struct EngineSlots {
    free: Mutex<usize>,
    released: Condvar,
}

impl EngineSlots {
    fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(limit.max(1)),
            released: Condvar::new(),
        })
    }

    fn acquire(self: &Arc<Self>) -> SlotPermit {
        let mut free = self.free.lock();
        while *free == 0 {
            self.released.wait(&mut free);
        }
        *free -= 1;
        SlotPermit(Arc::clone(self))
    }
}

struct SlotPermit(Arc<EngineSlots>);

impl Drop for SlotPermit {
    fn drop(&mut self) {
        *self.0.free.lock() += 1;
        self.0.released.notify_one();
    }
}

/// Turns strips into partial scores through a swappable OMR engine.
pub struct RecognitionAdapter {
    engine: Arc<dyn OmrPort>,
    engine_path: Option<String>,
    enable_diagnostics: bool,
}

impl RecognitionAdapter {
    pub fn new(engine: Arc<dyn OmrPort>) -> Self {
        Self {
            engine,
            engine_path: None,
            enable_diagnostics: false,
        }
    }

    pub fn with_engine_path(mut self, engine_path: Option<String>) -> Self {
        self.engine_path = engine_path;
        self
    }

    pub fn with_diagnostics(mut self, enable: bool) -> Self {
        self.enable_diagnostics = enable;
        self
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    fn options(&self, strip_index: StripIndex, deadline: Option<Duration>) -> OmrOptions {
        OmrOptions {
            strip_index,
            enable_diagnostics: self.enable_diagnostics,
            engine_path: self.engine_path.clone(),
            deadline,
        }
    }

    /// Recognize one strip on the calling thread.
    pub fn recognize(&self, strip: &Strip) -> StripRecognition {
        let png = match strip.to_png() {
            Ok(png) => png,
            Err(err) => return encode_failure(strip.index, err),
        };
        recognize_png(self.engine.as_ref(), &png, &self.options(strip.index, None))
    }

    /// Recognize one strip, giving up after `timeout`.
    ///
    /// The engine call runs on its own thread; on timeout that thread is left
    /// to finish on its own and its result is discarded.
    pub fn recognize_with_timeout(&self, strip: &Strip, timeout: Duration) -> StripRecognition {
        let slots = EngineSlots::new(1);
        self.recognize_in_slot(strip, timeout, slots.acquire())
    }

    fn recognize_in_slot(
        &self,
        strip: &Strip,
        timeout: Duration,
        permit: SlotPermit,
    ) -> StripRecognition {
        let png = match strip.to_png() {
            Ok(png) => png,
            Err(err) => return encode_failure(strip.index, err),
        };

        let strip_index = strip.index;
        let engine = Arc::clone(&self.engine);
        let options = self.options(strip_index, Some(timeout));
        let (tx, rx) = mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name(format!("omr-strip-{}", strip_index))
            .spawn(move || {
                let recognition = recognize_png(engine.as_ref(), &png, &options);
                drop(permit);
                let _ = tx.send(recognition);
            });
        if let Err(err) = spawned {
            return StripRecognition::failed(StripFailure {
                strip_index,
                kind: FailureKind::Engine,
                detail: format!("failed to start recognition thread: {err}"),
            });
        }

        match rx.recv_timeout(timeout) {
            Ok(recognition) => recognition,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(strip_index, ?timeout, "strip recognition timed out");
                StripRecognition::failed(StripFailure {
                    strip_index,
                    kind: FailureKind::Timeout,
                    detail: format!("no result after {:?}", timeout),
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => StripRecognition::failed(StripFailure {
                strip_index,
                kind: FailureKind::Engine,
                detail: "recognition thread panicked".to_string(),
            }),
        }
    }

    /// Recognize every strip with at most `worker_limit` engine calls in
    /// flight, counting calls that outlived their timeout. Returns once every
    /// dispatched strip has a result; abandoned calls may still be running.
    pub fn recognize_all(
        &self,
        strips: &[Strip],
        config: DispatchConfig,
        cancel: &CancelToken,
    ) -> DispatchResult {
        let total = strips.len();
        let workers = config.worker_limit.clamp(1, total.max(1));
        let next = AtomicUsize::new(0);
        let slots = EngineSlots::new(workers);
        let results: Mutex<Vec<Option<StripRecognition>>> = Mutex::new(vec![None; total]);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let position = next.fetch_add(1, Ordering::SeqCst);
                    let Some(strip) = strips.get(position) else {
                        break;
                    };
                    let permit = slots.acquire();
                    if cancel.is_cancelled() {
                        break;
                    }
                    let recognition = self.recognize_in_slot(strip, config.strip_timeout, permit);
                    debug!(
                        strip_index = strip.index,
                        failed = recognition.partial.is_failed(),
                        "strip finished"
                    );
                    results.lock()[position] = Some(recognition);
                });
            }
        });

        let mut partials = Vec::with_capacity(total);
        let mut engine_logs = Vec::new();
        let mut undispatched = Vec::new();
        for (strip, result) in strips.iter().zip(results.into_inner()) {
            match result {
                Some(recognition) => {
                    if let Some(path) = recognition.engine_log {
                        engine_logs.push(EngineLog {
                            strip_index: strip.index,
                            path,
                        });
                    }
                    partials.push(recognition.partial);
                }
                None => undispatched.push(strip.index),
            }
        }

        info!(
            strips = total,
            workers,
            failed = partials.iter().filter(|p| p.is_failed()).count(),
            undispatched = undispatched.len(),
            "recognition finished"
        );
        DispatchResult {
            partials,
            engine_logs,
            undispatched,
        }
    }
}

fn recognize_png(engine: &dyn OmrPort, png: &[u8], options: &OmrOptions) -> StripRecognition {
    let strip_index = options.strip_index;
    let output = match engine.recognize_png(png, options) {
        Ok(output) => output,
        Err(err) => {
            let kind = match err {
                OmrError::Timeout(_) => FailureKind::Timeout,
                _ => FailureKind::Engine,
            };
            warn!(strip_index, engine = engine.name(), %err, "engine failed");
            return StripRecognition::failed(StripFailure {
                strip_index,
                kind,
                detail: err.to_string(),
            });
        }
    };

    let partial = match import_partial_payload(&output.musicxml, strip_index) {
        Ok(strip) => PartialScore::Recognized(strip),
        Err(err) => {
            warn!(strip_index, %err, "engine output is not usable MusicXML");
            PartialScore::Failed(StripFailure {
                strip_index,
                kind: FailureKind::Parse,
                detail: err.to_string(),
            })
        }
    };
    StripRecognition {
        partial,
        engine_log: output.diagnostics_path,
    }
}

fn encode_failure(strip_index: StripIndex, err: impl std::fmt::Display) -> StripRecognition {
    StripRecognition::failed(StripFailure {
        strip_index,
        kind: FailureKind::Encode,
        detail: format!("failed to encode strip: {err}"),
    })
}
