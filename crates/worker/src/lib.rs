//! Session client for the isolated rendering context.
//!
//! A [`RenderSession`] runs the engine on a dedicated worker thread and talks
//! to it over the typed request/response protocol. At most one request of
//! each kind is in flight at a time; a second call of the same kind while the
//! first is unresolved reports [`SessionError::Busy`] instead of queueing.
//! When a worker thread cannot be spawned the session falls back to running
//! the engine in-process with the same API.

mod engine_state;
mod metrics;
#[cfg(test)]
mod tests;
mod worker_loop;

pub use metrics::SessionMetrics;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use model::{Bitmap, InputPoint, RenderOptions};
use protocol::{AckKind, LayerId, RequestKind, WorkerRequest, WorkerResponse};

use engine_state::EngineState;

const RESPONSE_POLL: Duration = Duration::from_millis(5);
const CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A request of this kind is already awaiting its response.
    Busy(RequestKind),
    /// The worker thread is gone; the session is unusable.
    Disconnected,
    Timeout,
    Cancelled,
    Disposed,
    /// The worker reported a failure for this request. Only the awaiting
    /// call fails; the session stays usable.
    Worker(String),
    /// The worker answered with a response the protocol does not allow for
    /// this request kind.
    Protocol(String),
    /// The rendered bitmap does not fit the caller-supplied target surface.
    TargetMismatch(String),
}

/// A caller-supplied destination for a rendered stroke.
pub enum StrokeTarget<'a> {
    Raster(&'a mut Bitmap),
    /// Rendering happens into a raster bitmap first; the result is uploaded
    /// to the shader surface's backing texture.
    Gpu(&'a gpu::GpuSurface),
}

/// Shared flag for abandoning an in-flight wait. Cancelling does not recall
/// the request; its late response is drained and discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

enum Backend {
    Threaded {
        sender: Option<Sender<WorkerRequest>>,
        receiver: Receiver<WorkerResponse>,
        join_handle: Option<JoinHandle<()>>,
    },
    Local {
        state: Box<EngineState>,
    },
}

pub struct RenderSession {
    backend: Backend,
    in_flight: VecDeque<RequestKind>,
    metrics: SessionMetrics,
    disposed: bool,
}

impl RenderSession {
    /// Spawn the engine on a dedicated worker thread, falling back to the
    /// in-process engine when the platform refuses to spawn one.
    pub fn create() -> Self {
        match Self::spawn_threaded() {
            Ok(session) => session,
            Err(error) => {
                eprintln!("[session] worker thread unavailable ({error}), using in-process fallback");
                Self::local()
            }
        }
    }

    /// Run the engine inline on the caller's thread. Same API, no
    /// parallelism, no transferable snapshots.
    pub fn local() -> Self {
        Self {
            backend: Backend::Local {
                state: Box::new(EngineState::new()),
            },
            in_flight: VecDeque::new(),
            metrics: SessionMetrics::default(),
            disposed: false,
        }
    }

    fn spawn_threaded() -> std::io::Result<Self> {
        let (request_sender, request_receiver) = bounded(CHANNEL_CAPACITY);
        let (response_sender, response_receiver) = bounded(CHANNEL_CAPACITY);
        let join_handle = std::thread::Builder::new()
            .name("render-worker".to_owned())
            .spawn(move || worker_loop::run(request_receiver, response_sender))?;
        Ok(Self {
            backend: Backend::Threaded {
                sender: Some(request_sender),
                receiver: response_receiver,
                join_handle: Some(join_handle),
            },
            in_flight: VecDeque::new(),
            metrics: SessionMetrics::default(),
            disposed: false,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_channels(
        sender: Sender<WorkerRequest>,
        receiver: Receiver<WorkerResponse>,
    ) -> Self {
        Self {
            backend: Backend::Threaded {
                sender: Some(sender),
                receiver,
                join_handle: None,
            },
            in_flight: VecDeque::new(),
            metrics: SessionMetrics::default(),
            disposed: false,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.backend, Backend::Local { .. })
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn init(
        &mut self,
        width: u32,
        height: u32,
        pixel_ratio: Option<f32>,
    ) -> Result<(), SessionError> {
        let response = self.call(
            WorkerRequest::Init {
                width,
                height,
                pixel_ratio,
            },
            None,
            None,
        )?;
        match response {
            WorkerResponse::Ack {
                for_kind: AckKind::Init,
            } => Ok(()),
            WorkerResponse::Error { message } => Err(SessionError::Worker(message)),
            other => Err(SessionError::Protocol(format!("{other:?}"))),
        }
    }

    pub fn resize(
        &mut self,
        width: u32,
        height: u32,
        pixel_ratio: Option<f32>,
    ) -> Result<(), SessionError> {
        let response = self.call(
            WorkerRequest::Resize {
                width,
                height,
                pixel_ratio,
            },
            None,
            None,
        )?;
        match response {
            WorkerResponse::Ack {
                for_kind: AckKind::Resize,
            } => Ok(()),
            WorkerResponse::Error { message } => Err(SessionError::Worker(message)),
            other => Err(SessionError::Protocol(format!("{other:?}"))),
        }
    }

    /// Liveness probe. `Ok(false)` means the worker did not answer within
    /// the timeout; the session itself may still recover.
    pub fn ping(&mut self, timeout: Duration) -> Result<bool, SessionError> {
        match self.call(WorkerRequest::Ping, Some(timeout), None) {
            Ok(WorkerResponse::Pong) => Ok(true),
            Ok(WorkerResponse::Error { message }) => Err(SessionError::Worker(message)),
            Ok(other) => Err(SessionError::Protocol(format!("{other:?}"))),
            Err(SessionError::Timeout) => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Render one stroke and wait for the resulting bitmap. The bitmap's
    /// backing memory transfers out of the worker without a copy.
    pub fn render_stroke(
        &mut self,
        layer_id: Option<LayerId>,
        options: RenderOptions,
        path: Vec<InputPoint>,
        seed: Option<u64>,
        cancel: Option<&CancelToken>,
    ) -> Result<Bitmap, SessionError> {
        let started = Instant::now();
        let response = self.call(
            WorkerRequest::RenderStroke {
                layer_id,
                options,
                path,
                seed,
            },
            None,
            cancel,
        )?;
        match response {
            WorkerResponse::Bitmap { bitmap, .. } => {
                self.metrics
                    .record_stroke_round_trip(started.elapsed().as_secs_f32() * 1000.0);
                Ok(bitmap)
            }
            WorkerResponse::Error { message } => Err(SessionError::Worker(message)),
            other => Err(SessionError::Protocol(format!("{other:?}"))),
        }
    }

    /// Render one stroke into a caller-supplied target surface. Raster
    /// targets take the result directly; shader-surface targets receive it
    /// as a texture upload.
    pub fn render_stroke_into(
        &mut self,
        target: StrokeTarget<'_>,
        layer_id: Option<LayerId>,
        options: RenderOptions,
        path: Vec<InputPoint>,
        seed: Option<u64>,
        cancel: Option<&CancelToken>,
    ) -> Result<(), SessionError> {
        let bitmap = self.render_stroke(layer_id, options, path, seed, cancel)?;
        match target {
            StrokeTarget::Raster(raster) => {
                raster.copy_from(&bitmap);
                Ok(())
            }
            StrokeTarget::Gpu(surface) => surface
                .write_backing_pixels(&bitmap)
                .map_err(|error| SessionError::TargetMismatch(format!("{error:?}"))),
        }
    }

    /// Requests sent but not yet resolved, abandoned waits included.
    pub fn pending_requests(&self) -> usize {
        self.in_flight.len()
    }

    /// Read back a layer's current contents. `Ok(None)` in fallback mode,
    /// which has no transferable surface to copy out of.
    pub fn snapshot(&mut self, layer_id: Option<LayerId>) -> Result<Option<Bitmap>, SessionError> {
        if self.disposed {
            return Err(SessionError::Disposed);
        }
        if self.is_fallback() {
            return Ok(None);
        }
        let response = self.call(WorkerRequest::Snapshot { layer_id }, None, None)?;
        match response {
            WorkerResponse::Bitmap { bitmap, .. } => Ok(Some(bitmap)),
            WorkerResponse::Error { message } => Err(SessionError::Worker(message)),
            other => Err(SessionError::Protocol(format!("{other:?}"))),
        }
    }

    /// Shut the worker down and release the session. Safe to call more than
    /// once; every call after the first is a no-op.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Backend::Threaded {
            sender,
            join_handle,
            ..
        } = &mut self.backend
        {
            // Dropping the sender closes the request channel; the worker
            // loop drains and exits.
            sender.take();
            if let Some(handle) = join_handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn call(
        &mut self,
        request: WorkerRequest,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<WorkerResponse, SessionError> {
        if self.disposed {
            return Err(SessionError::Disposed);
        }
        let kind = request.kind();

        match &mut self.backend {
            Backend::Local { state } => {
                if cancel.is_some_and(CancelToken::is_cancelled) {
                    return Err(SessionError::Cancelled);
                }
                self.metrics.record_request();
                Ok(state.handle(request))
            }
            Backend::Threaded {
                sender, receiver, ..
            } => {
                // Retire any late responses of abandoned calls first, so a
                // cancelled request does not gate its kind forever. Responses
                // are only consumed while an abandoned request can claim them.
                while !self.in_flight.is_empty() {
                    let Ok(response) = receiver.try_recv() else {
                        break;
                    };
                    if !retire_front(&mut self.in_flight, &response) {
                        eprintln!("[session] discarding stray response: {response:?}");
                    }
                }
                if self.in_flight.contains(&kind) {
                    return Err(SessionError::Busy(kind));
                }

                let sender = sender.as_ref().ok_or(SessionError::Disposed)?;
                sender
                    .send(request)
                    .map_err(|_| SessionError::Disconnected)?;
                self.metrics.record_request();
                let mut ahead = self.in_flight.len();
                self.in_flight.push_back(kind);

                let deadline = timeout.map(|timeout| Instant::now() + timeout);
                loop {
                    if cancel.is_some_and(CancelToken::is_cancelled) {
                        return Err(SessionError::Cancelled);
                    }
                    let wait = match deadline {
                        Some(deadline) => deadline
                            .saturating_duration_since(Instant::now())
                            .min(RESPONSE_POLL),
                        None => RESPONSE_POLL,
                    };
                    match receiver.recv_timeout(wait) {
                        Ok(response) => {
                            if retire_front(&mut self.in_flight, &response) {
                                if ahead == 0 {
                                    return Ok(response);
                                }
                                // Terminal response of an abandoned call.
                                ahead -= 1;
                            } else {
                                eprintln!("[session] discarding stray response: {response:?}");
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                                return Err(SessionError::Timeout);
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            return Err(SessionError::Disconnected);
                        }
                    }
                }
            }
        }
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Pop the oldest in-flight request if this response terminates it. Returns
/// false for responses nothing is waiting on (`Done`, protocol strays).
fn retire_front(in_flight: &mut VecDeque<RequestKind>, response: &WorkerResponse) -> bool {
    match in_flight.front() {
        Some(front) if response.terminates(*front) => {
            in_flight.pop_front();
            true
        }
        _ => false,
    }
}
