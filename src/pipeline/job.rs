//! Per-chunk work state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use super::types::{AnalysisRequest, AnalysisResult, Provenance};

/// Where a request is in the analysis lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    AwaitingGeneration,
    Parsed,
    ParseFailed,
    Validated,
    Generated,
    Fallback,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Generated | Self::Fallback)
    }

    pub fn can_advance_to(&self, next: RequestState) -> bool {
        use RequestState::*;
        match self {
            Pending => matches!(next, AwaitingGeneration | Fallback),
            AwaitingGeneration => matches!(next, AwaitingGeneration | Parsed | ParseFailed | Fallback),
            Parsed => matches!(next, Validated),
            ParseFailed => matches!(next, AwaitingGeneration | Fallback),
            Validated => matches!(next, Generated),
            Generated | Fallback => false,
        }
    }
}

/// One request inside a chunk.
#[derive(Debug)]
pub struct JobItem<'r> {
    /// Position in the caller's request list.
    pub index: usize,
    pub request: &'r AnalysisRequest,
    pub state: RequestState,
    pub retries: u32,
    pub result: Option<AnalysisResult>,
}

/// A chunk of requests sharing one batch prompt.
#[derive(Debug)]
pub struct BatchJob<'r> {
    id: Uuid,
    items: Vec<JobItem<'r>>,
}

impl<'r> BatchJob<'r> {
    pub fn new(items: impl IntoIterator<Item = (usize, &'r AnalysisRequest)>) -> Self {
        Self {
            id: Uuid::new_v4(),
            items: items
                .into_iter()
                .map(|(index, request)| JobItem {
                    index,
                    request,
                    state: RequestState::Pending,
                    retries: 0,
                    result: None,
                })
                .collect(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[JobItem<'r>] {
        &self.items
    }

    pub fn requests(&self) -> Vec<&'r AnalysisRequest> {
        self.items.iter().map(|item| item.request).collect()
    }

    pub fn state(&self, pos: usize) -> RequestState {
        self.items[pos].state
    }

    /// Move one item to `next`. Illegal transitions are logged and ignored.
    pub fn advance(&mut self, pos: usize, next: RequestState) {
        let item = &mut self.items[pos];
        if !item.state.can_advance_to(next) {
            warn!(job = %self.id, index = item.index, from = ?item.state, to = ?next, "Ignoring illegal state transition");
            return;
        }
        if next == RequestState::AwaitingGeneration && item.state != RequestState::Pending {
            item.retries += 1;
        }
        item.state = next;
    }

    /// Advance every non-terminal item.
    pub fn advance_unresolved(&mut self, next: RequestState) {
        for pos in self.unresolved() {
            self.advance(pos, next);
        }
    }

    /// Store the final result; state follows its provenance.
    pub fn resolve(&mut self, pos: usize, result: AnalysisResult) {
        let item = &mut self.items[pos];
        item.state = match result.provenance {
            Provenance::Generated => RequestState::Generated,
            Provenance::Fallback => RequestState::Fallback,
        };
        item.result = Some(result);
    }

    /// Positions of items without a final result.
    pub fn unresolved(&self) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.state.is_terminal())
            .map(|(pos, _)| pos)
            .collect()
    }

    /// `(request index, result)` for every resolved item.
    pub fn into_results(self) -> Vec<(usize, AnalysisResult)> {
        self.items
            .into_iter()
            .filter_map(|item| item.result.map(|r| (item.index, r)))
            .collect()
    }
}

/// Cooperative cancellation flag checked between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
