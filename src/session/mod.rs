//! Conversation sessions: one history, at most one turn in flight.

use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::agent_loop::{LoopEvent, SharedHistory, ToolLoop};
use crate::config::LoopConfig;
use crate::error::{Result, StepLoopError};
use crate::history::History;
use crate::provider::ModelProvider;
use crate::tools::ToolRegistry;
use crate::transport::TurnCancellation;
use crate::types::{ApprovalDecision, Turn, Usage};
use crate::util::usage::UsageTracker;

const DECISION_QUEUE: usize = 16;

struct InFlight {
    generation: u64,
    decisions: mpsc::Sender<ApprovalDecision>,
    cancellation: TurnCancellation,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    current: Option<InFlight>,
}

type SharedSlot = Arc<Mutex<Slot>>;

fn lock_slot(slot: &SharedSlot) -> std::sync::MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the in-flight slot when a run ends or its handle is dropped.
struct InFlightGuard {
    slot: SharedSlot,
    generation: u64,
}

impl InFlightGuard {
    fn release(&self) {
        let mut slot = lock_slot(&self.slot);
        if slot.current.as_ref().is_some_and(|f| f.generation == self.generation) {
            slot.current = None;
            debug!(generation = self.generation, "turn released");
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// The running turn: its event stream and its cancellation handle.
pub struct TurnHandle {
    events: BoxStream<'static, LoopEvent>,
    cancellation: TurnCancellation,
}

impl TurnHandle {
    /// Stop the turn at its next suspension point.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn cancellation(&self) -> &TurnCancellation {
        &self.cancellation
    }

    pub async fn next_event(&mut self) -> Option<LoopEvent> {
        self.events.next().await
    }

    /// Drain the turn to its end.
    pub async fn collect(self) -> Vec<LoopEvent> {
        self.events.collect().await
    }

    pub fn into_stream(self) -> BoxStream<'static, LoopEvent> {
        self.events
    }
}

impl std::fmt::Debug for TurnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnHandle")
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

/// A conversation with one model: owns the history and runs its turns.
pub struct Conversation {
    history: SharedHistory,
    tool_loop: ToolLoop,
    usage: UsageTracker,
    slot: SharedSlot,
}

impl Conversation {
    pub fn new(provider: Arc<dyn ModelProvider>, registry: ToolRegistry) -> Self {
        Self::with_history(provider, registry, History::new())
    }

    /// Continue a previously persisted conversation.
    pub fn with_history(provider: Arc<dyn ModelProvider>, registry: ToolRegistry, history: History) -> Self {
        Self {
            history: Arc::new(tokio::sync::Mutex::new(history)),
            tool_loop: ToolLoop::new(provider, registry),
            usage: UsageTracker::new(),
            slot: SharedSlot::default(),
        }
    }

    /// Whether a turn is currently running.
    pub fn is_busy(&self) -> bool {
        lock_slot(&self.slot).current.is_some()
    }

    /// Append a user message and start a turn for it.
    ///
    /// Fails with [`StepLoopError::TurnInFlight`] while another turn runs.
    pub async fn submit(&self, text: impl Into<String>, config: &LoopConfig) -> Result<TurnHandle> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(StepLoopError::InvalidArgument("message text is empty".into()));
        }
        let (guard, receiver) = self.reserve()?;
        self.history.lock().await.append(vec![Turn::user(text)])?;
        info!(model = %config.model, "user turn submitted");
        Ok(self.start(guard, receiver, config))
    }

    /// Record a decision for an outstanding approval.
    ///
    /// The decision is validated against the history first. It then goes to
    /// the running turn, or, when nothing runs and no approval of the turn
    /// is left undecided, a new run is started to continue the turn.
    pub async fn decide(&self, decision: ApprovalDecision, config: &LoopConfig) -> Result<Option<TurnHandle>> {
        self.history
            .lock()
            .await
            .append(vec![Turn::approval_response(&decision)])?;

        let running = lock_slot(&self.slot).current.as_ref().map(|f| f.decisions.clone());
        if let Some(decisions) = running {
            if decisions.send(decision).await.is_ok() {
                return Ok(None);
            }
        }

        if !self.history.lock().await.outstanding_approvals().is_empty() {
            debug!("waiting for the remaining approvals");
            return Ok(None);
        }
        let (guard, receiver) = self.reserve()?;
        info!("resuming turn after approvals");
        Ok(Some(self.start(guard, receiver, config)))
    }

    /// Cancel the running turn, if any.
    pub fn cancel(&self) {
        if let Some(current) = &lock_slot(&self.slot).current {
            current.cancellation.cancel();
        }
    }

    pub async fn history_snapshot(&self) -> History {
        self.history.lock().await.clone()
    }

    /// Drop the whole conversation and its usage totals.
    pub async fn reset(&self) -> Result<()> {
        if self.is_busy() {
            return Err(StepLoopError::TurnInFlight);
        }
        self.history.lock().await.reset();
        self.usage.reset();
        Ok(())
    }

    pub fn total_usage(&self) -> Usage {
        self.usage.total_usage()
    }

    fn reserve(&self) -> Result<(InFlightGuard, mpsc::Receiver<ApprovalDecision>)> {
        let mut slot = lock_slot(&self.slot);
        if slot.current.is_some() {
            return Err(StepLoopError::TurnInFlight);
        }
        slot.generation += 1;
        let (decisions, receiver) = mpsc::channel(DECISION_QUEUE);
        slot.current = Some(InFlight {
            generation: slot.generation,
            decisions,
            cancellation: TurnCancellation::new(),
        });
        let guard = InFlightGuard {
            slot: Arc::clone(&self.slot),
            generation: slot.generation,
        };
        Ok((guard, receiver))
    }

    fn start(&self, guard: InFlightGuard, receiver: mpsc::Receiver<ApprovalDecision>, config: &LoopConfig) -> TurnHandle {
        let cancellation = lock_slot(&self.slot)
            .current
            .as_ref()
            .map(|f| f.cancellation.clone())
            .unwrap_or_default();
        let mut inner = self.tool_loop.run(
            Arc::clone(&self.history),
            config.clone(),
            cancellation.clone(),
            receiver,
        );
        let usage = self.usage.clone();

        let events = async_stream::stream! {
            let guard = guard;
            while let Some(event) = inner.next().await {
                match &event {
                    LoopEvent::Usage { usage: turn_usage } => usage.record(turn_usage),
                    LoopEvent::Finished { .. } => guard.release(),
                    _ => {}
                }
                yield event;
            }
        };

        TurnHandle {
            events: Box::pin(events),
            cancellation,
        }
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("tool_loop", &self.tool_loop)
            .field("busy", &self.is_busy())
            .finish()
    }
}
