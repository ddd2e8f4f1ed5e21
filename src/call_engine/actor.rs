//! Control-Queue - ein Task besitzt die State Machine
//!
//! Host-Kommandos, Signaling-Events und UI-Aktionen landen alle in derselben
//! Queue und werden streng nacheinander abgearbeitet.

use super::audio::BridgeStats;
use super::engine::{
    CallEngineError, CallSnapshot, CallStateMachine, Credentials, EndOrigin, EngineParts,
    MakeCallReply, MakeCallRequest,
};
use crate::native_ui::NativeUiAction;
use crate::signaling::SignalingEvent;
use std::ops::ControlFlow;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Ein Eintrag der Control-Queue
#[derive(Debug)]
pub enum CallCommand {
    Initialize {
        credentials: Credentials,
        reply: oneshot::Sender<Result<(), CallEngineError>>,
    },
    MakeCall {
        request: MakeCallRequest,
        reply: MakeCallReply,
    },
    EndCall {
        reply: oneshot::Sender<()>,
    },
    SetMuted {
        muted: bool,
        reply: oneshot::Sender<()>,
    },
    SetSpeaker {
        on: bool,
        reply: oneshot::Sender<()>,
    },
    Signaling {
        correlation_id: Uuid,
        event: SignalingEvent,
    },
    NativeUi {
        correlation_id: Uuid,
        action: NativeUiAction,
    },
    Snapshot {
        reply: oneshot::Sender<CallSnapshot>,
    },
    Stats {
        reply: oneshot::Sender<BridgeStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) fn dispatch(machine: &mut CallStateMachine, command: CallCommand) -> ControlFlow<()> {
    match command {
        CallCommand::Initialize { credentials, reply } => {
            let _ = reply.send(machine.initialize(credentials));
        }
        CallCommand::MakeCall { request, reply } => machine.make_call(request, reply),
        CallCommand::EndCall { reply } => {
            machine.end_call(EndOrigin::Host);
            let _ = reply.send(());
        }
        CallCommand::SetMuted { muted, reply } => {
            machine.set_muted(muted);
            let _ = reply.send(());
        }
        CallCommand::SetSpeaker { on, reply } => {
            machine.set_speaker(on);
            let _ = reply.send(());
        }
        CallCommand::Signaling {
            correlation_id,
            event,
        } => machine.on_signaling(correlation_id, event),
        CallCommand::NativeUi {
            correlation_id,
            action,
        } => machine.on_native_ui(correlation_id, action),
        CallCommand::Snapshot { reply } => {
            let _ = reply.send(machine.snapshot());
        }
        CallCommand::Stats { reply } => {
            let _ = reply.send(machine.stats());
        }
        CallCommand::Shutdown { reply } => {
            machine.shutdown();
            let _ = reply.send(());
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

async fn run(mut machine: CallStateMachine, mut commands: mpsc::UnboundedReceiver<CallCommand>) {
    tracing::debug!("Call control task started");

    while let Some(command) = commands.recv().await {
        if dispatch(&mut machine, command).is_break() {
            break;
        }
    }

    tracing::debug!("Call control task stopped");
}

// ============================================================================
// CALL CONTROL HANDLE
// ============================================================================

/// Handle auf den Control-Task
#[derive(Debug, Clone)]
pub struct CallControl {
    tx: mpsc::UnboundedSender<CallCommand>,
}

impl CallControl {
    /// Startet den Control-Task. Muss innerhalb einer Tokio-Runtime laufen.
    pub fn spawn(parts: EngineParts) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let machine = CallStateMachine::new(parts, tx.clone());
        let task = tokio::spawn(run(machine, rx));
        (Self { tx }, task)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> CallCommand,
    ) -> Result<T, CallEngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| CallEngineError::EngineStopped)?;
        rx.await.map_err(|_| CallEngineError::EngineStopped)
    }

    pub async fn initialize(&self, credentials: Credentials) -> Result<(), CallEngineError> {
        self.request(|reply| CallCommand::Initialize { credentials, reply })
            .await?
    }

    /// `true` sobald die native UI den Call freigegeben hat und das
    /// Signaling verbindet
    pub async fn make_call(&self, request: MakeCallRequest) -> Result<bool, CallEngineError> {
        self.request(|reply| CallCommand::MakeCall { request, reply })
            .await?
    }

    pub async fn end_call(&self) -> Result<(), CallEngineError> {
        self.request(|reply| CallCommand::EndCall { reply }).await
    }

    pub async fn set_muted(&self, muted: bool) -> Result<(), CallEngineError> {
        self.request(|reply| CallCommand::SetMuted { muted, reply })
            .await
    }

    pub async fn set_speaker(&self, on: bool) -> Result<(), CallEngineError> {
        self.request(|reply| CallCommand::SetSpeaker { on, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<CallSnapshot, CallEngineError> {
        self.request(|reply| CallCommand::Snapshot { reply }).await
    }

    pub async fn stats(&self) -> Result<BridgeStats, CallEngineError> {
        self.request(|reply| CallCommand::Stats { reply }).await
    }

    pub async fn shutdown(&self) -> Result<(), CallEngineError> {
        self.request(|reply| CallCommand::Shutdown { reply }).await
    }

    /// Fire-and-forget Shutdown, z.B. aus `Drop`
    pub(crate) fn request_shutdown(&self) {
        let (reply, _) = oneshot::channel();
        let _ = self.tx.send(CallCommand::Shutdown { reply });
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}
