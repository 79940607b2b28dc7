// SPDX-License-Identifier: MIT
//! Streamed generation progress protocol.
//!
//! One generation run produces an ordered stream of [`ProgressEvent`]s over
//! a push channel, ending in a terminal `result` or `error` event. The
//! emitter enforces the two stream invariants: progress never decreases
//! within a run, and the terminal event always reports 100.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Log,
    Thinking,
    Action,
    Progress,
    Understanding,
    Result,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Log => "log",
            EventKind::Thinking => "thinking",
            EventKind::Action => "action",
            EventKind::Progress => "progress",
            EventKind::Understanding => "understanding",
            EventKind::Result => "result",
            EventKind::Error => "error",
        }
    }
}

/// One unit of the generation progress stream.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    /// 0–100, non-decreasing within one run.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Push side of one run's event stream.
///
/// Sends are fire-and-forget: a client that disconnected mid-run closes the
/// receiver, and the run keeps going — only the stream stops.
pub struct ProgressEmitter {
    tx: mpsc::Sender<ProgressEvent>,
    floor: u8,
}

impl ProgressEmitter {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx, floor: 0 }
    }

    /// Highest progress emitted so far.
    pub fn progress(&self) -> u8 {
        self.floor
    }

    pub async fn emit(&mut self, kind: EventKind, message: impl Into<String>, progress: u8) {
        self.emit_with(kind, message, progress, None).await;
    }

    pub async fn emit_with(
        &mut self,
        kind: EventKind,
        message: impl Into<String>,
        progress: u8,
        payload: Option<Value>,
    ) {
        // Clamp instead of trusting callers: a phase that reports lower than
        // an earlier one must not make the bar jump backwards.
        let progress = progress.clamp(self.floor, 100);
        self.floor = progress;
        let _ = self
            .tx
            .send(ProgressEvent {
                kind,
                message: message.into(),
                progress,
                payload,
            })
            .await;
    }

    /// Terminal result event; always 100.
    pub async fn finish(&mut self, message: impl Into<String>, payload: Value) {
        self.emit_with(EventKind::Result, message, 100, Some(payload)).await;
    }

    /// Terminal error event; always 100 so a progress bar completes even on
    /// failure.
    pub async fn fail(&mut self, message: impl Into<String>, payload: Option<Value>) {
        self.emit_with(EventKind::Error, message, 100, payload).await;
    }
}
