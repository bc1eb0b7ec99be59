//! Scoring kernels.
//!
//! A kernel takes one slot's padded feature chunk plus the broadcast class statistics
//! and returns one class index per row in the chunk, padding rows included. The
//! dispatcher only talks to [`ClassificationKernel`], so the local [`CpuKernel`] and
//! the [`WorkerPool`] service adapter are interchangeable.

use crate::error::{Error, Result};
use rayon::prelude::*;
use std::{
    f32::consts::PI,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

/// Sizing scalars sent with every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelDims {
    pub num_classes: usize,
    pub num_features: usize,
    /// Row stride of `features`, `means` and `variances`.
    pub feature_stride: usize,
    pub chunk_size: usize,
}

/// Everything one slot needs, borrowed from the dispatcher's buffers.
#[derive(Debug, Clone, Copy)]
pub struct SlotRequest<'a> {
    pub slot: usize,
    /// `chunk_size * feature_stride`
    pub features: &'a [f32],
    /// `num_classes * feature_stride`
    pub means: &'a [f32],
    /// `num_classes * feature_stride`
    pub variances: &'a [f32],
    /// `num_classes`
    pub priors: &'a [f32],
    pub epsilon: f32,
    pub dims: KernelDims,
}

impl SlotRequest<'_> {
    /// Checks buffer lengths against `dims`.
    pub fn validate(&self) -> Result<()> {
        let d = &self.dims;
        let check = |what: &str, len: usize, expected: usize| {
            if len == expected {
                Ok(())
            } else {
                Err(Error::dispatch(
                    self.slot,
                    format!("{what} buffer has {len} values, expected {expected}"),
                ))
            }
        };
        if d.feature_stride == 0 || d.feature_stride < d.num_features {
            return Err(Error::dispatch(
                self.slot,
                format!(
                    "feature stride {} is narrower than {} features",
                    d.feature_stride, d.num_features
                ),
            ));
        }
        check("features", self.features.len(), d.chunk_size * d.feature_stride)?;
        check("means", self.means.len(), d.num_classes * d.feature_stride)?;
        check("variances", self.variances.len(), d.num_classes * d.feature_stride)?;
        check("priors", self.priors.len(), d.num_classes)
    }

    fn into_owned(self) -> OwnedRequest {
        OwnedRequest {
            slot: self.slot,
            features: self.features.to_vec(),
            means: self.means.to_vec(),
            variances: self.variances.to_vec(),
            priors: self.priors.to_vec(),
            epsilon: self.epsilon,
            dims: self.dims,
        }
    }
}

/// Scores one slot. Implementations must be safe to call from several slots at once.
pub trait ClassificationKernel: Send + Sync {
    fn name(&self) -> &str;

    /// Returns exactly `dims.chunk_size` predictions for `request`.
    fn score(&self, request: &SlotRequest<'_>) -> Result<Vec<usize>>;
}

/// Gaussian log-likelihood plus log-prior, argmax over classes.
///
/// A term whose denominator is exactly zero contributes nothing. Ties keep the lowest class.
pub fn classify_row(
    row: &[f32],
    means: &[f32],
    variances: &[f32],
    priors: &[f32],
    epsilon: f32,
    dims: &KernelDims,
) -> usize {
    let two_pi = 2.0 * PI;
    let mut best_class = 0;
    let mut best = f32::NEG_INFINITY;

    for (k, &prior) in priors.iter().enumerate().take(dims.num_classes) {
        let base = k * dims.feature_stride;
        let mut likelihood = prior.ln();

        for j in 0..dims.num_features {
            let variance = variances[base + j] + epsilon;

            let scaled = two_pi * variance;
            let norm = if scaled != 0.0 { 0.5 * scaled.ln() } else { 0.0 };

            let diff = row[j] - means[base + j];
            let denom = 2.0 * variance;
            let exponent = if denom != 0.0 { diff * diff / denom } else { 0.0 };

            likelihood -= norm + exponent;
        }

        if likelihood > best {
            best = likelihood;
            best_class = k;
        }
    }

    best_class
}

/// Local CPU implementation of the scoring contract.
#[derive(Debug, Clone, Default)]
pub struct CpuKernel {
    sequential: bool,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl CpuKernel {
    /// Rows are scored on whichever rayon pool the caller runs in.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows are scored on a dedicated pool of `threads` threads.
    pub fn with_threads(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("gnb-cpu-{i}"))
            .build()
            .map_err(|err| Error::InvalidConfig(format!("failed to build cpu pool: {err}")))?;
        Ok(CpuKernel {
            sequential: false,
            pool: Some(Arc::new(pool)),
        })
    }

    /// Scores rows one after another.
    pub fn sequential() -> Self {
        CpuKernel {
            sequential: true,
            pool: None,
        }
    }
}

impl ClassificationKernel for CpuKernel {
    fn name(&self) -> &str {
        "cpu"
    }

    fn score(&self, request: &SlotRequest<'_>) -> Result<Vec<usize>> {
        request.validate()?;
        let dims = request.dims;
        let predict = |row: &[f32]| {
            classify_row(
                row,
                request.means,
                request.variances,
                request.priors,
                request.epsilon,
                &dims,
            )
        };

        if self.sequential {
            return Ok(request
                .features
                .chunks(dims.feature_stride)
                .map(predict)
                .collect());
        }

        let rows = request.features.par_chunks(dims.feature_stride);
        let predictions: Vec<usize> = match &self.pool {
            Some(pool) => pool.install(|| rows.map(predict).collect()),
            None => rows.map(predict).collect(),
        };
        Ok(predictions)
    }
}

/// A request copied into buffers the service owns, the way an accelerator gets its inputs.
#[derive(Debug, Clone)]
struct OwnedRequest {
    slot: usize,
    features: Vec<f32>,
    means: Vec<f32>,
    variances: Vec<f32>,
    priors: Vec<f32>,
    epsilon: f32,
    dims: KernelDims,
}

impl OwnedRequest {
    fn as_request(&self) -> SlotRequest<'_> {
        SlotRequest {
            slot: self.slot,
            features: &self.features,
            means: &self.means,
            variances: &self.variances,
            priors: &self.priors,
            epsilon: self.epsilon,
            dims: self.dims,
        }
    }
}

struct Job {
    request: OwnedRequest,
    reply: mpsc::Sender<Result<Vec<usize>>>,
}

/// Adapter for an external compute service: a fixed set of worker threads that accept
/// submitted requests and answer through a per-request channel.
///
/// `score` submits and then waits. Without a timeout a worker that never answers blocks
/// the caller forever; with one the slot fails with [`Error::Dispatch`]. Work that timed
/// out is not cancelled, its result is dropped when it eventually arrives, and dropping
/// the pool does not wait for it.
pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Vec<JoinHandle<()>>,
    timeout: Option<Duration>,
}

impl WorkerPool {
    /// Starts `workers` threads, each running `backend` on the requests it picks up.
    pub fn spawn(workers: usize, backend: Arc<dyn ClassificationKernel>) -> Result<Self> {
        if workers == 0 {
            return Err(Error::InvalidConfig(
                "worker pool needs at least one worker".to_string(),
            ));
        }

        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let receiver = Arc::clone(&receiver);
            let backend = Arc::clone(&backend);
            let handle = thread::Builder::new()
                .name(format!("gnb-worker-{id}"))
                .spawn(move || worker_loop(id, &receiver, backend.as_ref()))
                .map_err(|err| {
                    Error::InvalidConfig(format!("failed to start worker {id}: {err}"))
                })?;
            handles.push(handle);
        }

        Ok(WorkerPool {
            name: format!("pool({})", backend.name()),
            sender: Mutex::new(Some(sender)),
            workers: handles,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    fn submit(&self, request: OwnedRequest) -> Result<mpsc::Receiver<Result<Vec<usize>>>> {
        let slot = request.slot;
        let (reply, response) = mpsc::channel();
        let sender = self
            .sender
            .lock()
            .map_err(|_| Error::dispatch(slot, "worker pool lock poisoned"))?;
        sender
            .as_ref()
            .ok_or_else(|| Error::dispatch(slot, "worker pool is shut down"))?
            .send(Job { request, reply })
            .map_err(|_| Error::dispatch(slot, "worker pool rejected the request"))?;
        Ok(response)
    }
}

fn worker_loop(
    id: usize,
    receiver: &Mutex<mpsc::Receiver<Job>>,
    backend: &dyn ClassificationKernel,
) {
    loop {
        let job = match receiver.lock() {
            Ok(receiver) => receiver.recv(),
            Err(_) => break,
        };
        let Ok(job) = job else {
            break;
        };

        tracing::debug!(worker = id, slot = job.request.slot, "running request");
        let result = backend.score(&job.request.as_request());
        // The submitter may have given up waiting.
        let _ = job.reply.send(result);
    }
}

impl ClassificationKernel for WorkerPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, request: &SlotRequest<'_>) -> Result<Vec<usize>> {
        request.validate()?;
        let slot = request.slot;
        let response = self.submit(request.into_owned())?;

        match self.timeout {
            Some(timeout) => match response.recv_timeout(timeout) {
                Ok(result) => result,
                Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::dispatch(
                    slot,
                    format!("no response within {timeout:?}"),
                )),
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    Err(Error::dispatch(slot, "worker exited without a response"))
                }
            },
            None => response
                .recv()
                .map_err(|_| Error::dispatch(slot, "worker exited without a response"))?,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        // Idle workers exit once the channel closes. A worker still busy with a request
        // that timed out is detached rather than joined.
        for handle in self.workers.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}
