// Shared test helpers

#![allow(dead_code)]

use carbonscope::channel::Transport;
use carbonscope::error::PipelineError;
use carbonscope::models::{Reading, Request, Response};
use carbonscope::producer::{MemoryProbe, SignalError};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub fn reading(cpu_percent: f64, memory_mb: f64, network_count: f64) -> Reading {
    Reading {
        cpu_percent,
        memory_mb,
        network_count,
        ..Reading::default()
    }
}

/// An updateMetrics payload whose reading timestamp identifies it.
pub fn update(source_id: &str, timestamp: u64) -> Request {
    Request::UpdateMetrics {
        source_id: source_id.into(),
        reading: Reading {
            timestamp,
            ..Reading::default()
        },
    }
}

/// Reading timestamps of the updateMetrics payloads in `requests`, in order.
pub fn update_timestamps(requests: &[Request]) -> Vec<u64> {
    requests
        .iter()
        .filter_map(|r| match r {
            Request::UpdateMetrics { reading, .. } => Some(reading.timestamp),
            _ => None,
        })
        .collect()
}

#[derive(Default)]
struct Script {
    link_up: bool,
    hang: bool,
    /// When set, calls wait for a permit on it before answering.
    gate: Option<Arc<Notify>>,
    /// Consumed one per updateMetrics call; when empty `link_up` decides.
    update_outcomes: VecDeque<bool>,
    calls: Vec<Request>,
    delivered: Vec<Request>,
    pings: usize,
}

/// Transport double: every call is recorded and answered per the script.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn up() -> Self {
        let t = Self::default();
        t.set_link_up(true);
        t
    }

    pub fn down() -> Self {
        Self::default()
    }

    pub fn set_link_up(&self, up: bool) {
        self.script.lock().unwrap().link_up = up;
    }

    /// Calls never complete.
    pub fn set_hang(&self, hang: bool) {
        self.script.lock().unwrap().hang = hang;
    }

    /// Hold every later call until the returned gate is notified (one permit per call).
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.script.lock().unwrap().gate = Some(gate.clone());
        gate
    }

    pub fn script_updates(&self, outcomes: &[bool]) {
        self.script
            .lock()
            .unwrap()
            .update_outcomes
            .extend(outcomes.iter().copied());
    }

    pub fn calls(&self) -> Vec<Request> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.script.lock().unwrap().calls.len()
    }

    pub fn delivered(&self) -> Vec<Request> {
        self.script.lock().unwrap().delivered.clone()
    }

    pub fn pings(&self) -> usize {
        self.script.lock().unwrap().pings
    }

    fn answer(&self, request: Request) -> (Option<Arc<Notify>>, Result<Response, PipelineError>) {
        let mut s = self.script.lock().unwrap();
        let gate = s.gate.clone();
        s.calls.push(request.clone());
        let ok = match &request {
            Request::Ping => {
                s.pings += 1;
                s.link_up
            }
            Request::UpdateMetrics { .. } => {
                let link_up = s.link_up;
                s.update_outcomes.pop_front().unwrap_or(link_up)
            }
            _ => s.link_up,
        };
        if !ok {
            return (
                gate,
                Err(PipelineError::TransportUnavailable("scripted failure".into())),
            );
        }
        let response = match request {
            Request::Ping => Response::Pong { alive: true },
            _ => Response::ack(),
        };
        s.delivered.push(request);
        (gate, Ok(response))
    }
}

impl Transport for ScriptedTransport {
    fn call(
        &self,
        request: Request,
    ) -> impl Future<Output = Result<Response, PipelineError>> + Send {
        let hang = self.script.lock().unwrap().hang;
        let (gate, result) = self.answer(request);
        async move {
            if hang {
                std::future::pending::<()>().await;
            }
            if let Some(gate) = gate {
                gate.notified().await;
            }
            result
        }
    }
}

/// Memory probe double; flip `fail` to simulate an unavailable signal.
#[derive(Clone)]
pub struct FakeMemory {
    pub bytes: Arc<AtomicU64>,
    pub fail: Arc<AtomicBool>,
}

impl FakeMemory {
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: Arc::new(AtomicU64::new(bytes)),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn failing() -> Self {
        let m = Self::new(0);
        m.fail.store(true, Ordering::SeqCst);
        m
    }
}

impl MemoryProbe for FakeMemory {
    fn heap_bytes(&mut self) -> Result<u64, SignalError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SignalError::Unavailable("memory"));
        }
        Ok(self.bytes.load(Ordering::SeqCst))
    }
}
