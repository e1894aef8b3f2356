use crate::error::{ErrorCategory, IndexingError, Result};
use crate::model::EntityKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unit-of-work state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkState {
    Open {
        opened_at: DateTime<Utc>,
    },
    Flushing {
        flush_started_at: DateTime<Utc>,
    },
    /// Backend calls in flight
    Executing {
        flush_started_at: DateTime<Utc>,
        batches_in_flight: usize,
    },
    Committed {
        flush_started_at: DateTime<Utc>,
        committed_at: DateTime<Utc>,
        duration_ms: u64,
        entities_indexed: usize,
    },
    Failed {
        failed_at: DateTime<Utc>,
        failed_keys: Vec<EntityKey>,
        error: String,
        category: ErrorCategory,
    },
    RolledBack {
        rolled_back_at: DateTime<Utc>,
        /// Entities the backend acknowledged before the rollback
        unretracted: usize,
    },
}

/// Four-state view: EXECUTING is reported as FLUSHING
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Open,
    Flushing,
    Committed,
    Failed,
    RolledBack,
}

impl WorkState {
    pub fn state_name(&self) -> &'static str {
        match self {
            WorkState::Open { .. } => "open",
            WorkState::Flushing { .. } => "flushing",
            WorkState::Executing { .. } => "executing",
            WorkState::Committed { .. } => "committed",
            WorkState::Failed { .. } => "failed",
            WorkState::RolledBack { .. } => "rolled_back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkState::Committed { .. } | WorkState::Failed { .. } | WorkState::RolledBack { .. }
        )
    }

    pub fn accepts_registrations(&self) -> bool {
        matches!(self, WorkState::Open { .. })
    }

    pub fn phase(&self) -> Phase {
        match self {
            WorkState::Open { .. } => Phase::Open,
            WorkState::Flushing { .. } | WorkState::Executing { .. } => Phase::Flushing,
            WorkState::Committed { .. } => Phase::Committed,
            WorkState::Failed { .. } => Phase::Failed,
            WorkState::RolledBack { .. } => Phase::RolledBack,
        }
    }
}

/// State machine for unit-of-work transitions
#[derive(Debug, Clone)]
pub struct WorkStateMachine {
    id: Uuid,
    state: WorkState,
    updated_at: DateTime<Utc>,
}

impl Default for WorkStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkStateMachine {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            state: WorkState::Open { opened_at: now },
            updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &WorkState {
        &self.state
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Fails with `UnitOfWorkClosed` unless OPEN
    pub fn ensure_open(&self) -> Result<()> {
        if self.state.accepts_registrations() {
            Ok(())
        } else {
            Err(IndexingError::UnitOfWorkClosed {
                state: self.state.state_name().to_string(),
            })
        }
    }

    /// Transition: OPEN → FLUSHING
    pub fn begin_flush(&mut self) -> Result<()> {
        match &self.state {
            WorkState::Open { .. } => {
                let now = Utc::now();
                self.state = WorkState::Flushing {
                    flush_started_at: now,
                };
                self.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("flushing")),
        }
    }

    /// Transition: FLUSHING → EXECUTING
    pub fn begin_execution(&mut self, batches_in_flight: usize) -> Result<()> {
        match &self.state {
            WorkState::Flushing { flush_started_at } => {
                self.state = WorkState::Executing {
                    flush_started_at: *flush_started_at,
                    batches_in_flight,
                };
                self.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(self.invalid("executing")),
        }
    }

    /// Transition: FLUSHING | EXECUTING → COMMITTED
    pub fn commit(&mut self, entities_indexed: usize) -> Result<()> {
        match &self.state {
            WorkState::Flushing { flush_started_at }
            | WorkState::Executing {
                flush_started_at, ..
            } => {
                let now = Utc::now();
                let duration_ms = (now - *flush_started_at).num_milliseconds().max(0) as u64;
                self.state = WorkState::Committed {
                    flush_started_at: *flush_started_at,
                    committed_at: now,
                    duration_ms,
                    entities_indexed,
                };
                self.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("committed")),
        }
    }

    /// Transition: FLUSHING | EXECUTING → FAILED
    pub fn fail(
        &mut self,
        failed_keys: Vec<EntityKey>,
        error: String,
        category: ErrorCategory,
    ) -> Result<()> {
        match &self.state {
            WorkState::Flushing { .. } | WorkState::Executing { .. } => {
                let now = Utc::now();
                self.state = WorkState::Failed {
                    failed_at: now,
                    failed_keys,
                    error,
                    category,
                };
                self.updated_at = now;
                Ok(())
            }
            _ => Err(self.invalid("failed")),
        }
    }

    /// Transition: * → ROLLED_BACK
    ///
    /// The persistence transaction decides the final state, so rollback is
    /// accepted from every state except ROLLED_BACK itself.
    pub fn roll_back(&mut self, unretracted: usize) -> Result<()> {
        if let WorkState::RolledBack { .. } = self.state {
            return Err(self.invalid("rolled_back"));
        }
        let now = Utc::now();
        self.state = WorkState::RolledBack {
            rolled_back_at: now,
            unretracted,
        };
        self.updated_at = now;
        Ok(())
    }

    fn invalid(&self, to: &str) -> IndexingError {
        IndexingError::InvalidStateTransition {
            from: self.state.state_name().to_string(),
            to: to.to_string(),
        }
    }
}
