//! Runtime plan of one task: the step sequence with fallback splices applied.
//!
//! Each entry remembers which fallback branch put it there (`BranchFrame`),
//! so a failing branch step can escalate to the owner's next branch, and so
//! the whole remainder of a failed branch can be swapped out at once.

use std::sync::Arc;

use crate::config::SpliceMode;
use crate::domain::{Step, StepId};

/// Where a spliced-in branch came from.
#[derive(Debug)]
pub struct BranchFrame {
    /// Step whose `fallback` list the branch belongs to.
    pub owner: Arc<Step>,

    /// Index of the spliced branch in `owner.fallback`.
    pub branch: usize,

    /// Fallback nesting depth (1 for a top-level step's branch).
    pub depth: usize,

    pub parent: Option<Arc<BranchFrame>>,
}

impl BranchFrame {
    fn next_branch(&self) -> Option<usize> {
        let next = self.branch + 1;
        (next < self.owner.fallback.len()).then_some(next)
    }
}

#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub step: Arc<Step>,
    pub frame: Option<Arc<BranchFrame>>,
}

impl PlanEntry {
    fn depth(&self) -> usize {
        self.frame.as_ref().map_or(0, |f| f.depth)
    }

    /// Whether this entry sits inside `frame` (directly or nested deeper).
    fn within(&self, frame: &Arc<BranchFrame>) -> bool {
        let mut current = self.frame.as_ref();
        while let Some(f) = current {
            if Arc::ptr_eq(f, frame) {
                return true;
            }
            current = f.parent.as_ref();
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceOptions {
    pub mode: SpliceMode,
    pub escalation: bool,
    pub max_depth: usize,
}

/// A fallback branch that was spliced into the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackSelection {
    pub owner: StepId,
    pub branch: usize,
    pub steps: Vec<StepId>,

    /// The branch belongs to an enclosing step, not the one that failed.
    pub escalated: bool,

    /// Plan entries the branch replaced.
    pub replaced: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    entries: Vec<PlanEntry>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            entries: steps
                .into_iter()
                .map(|step| PlanEntry {
                    step: Arc::new(step),
                    frame: None,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PlanEntry> {
        self.entries.get(index)
    }

    pub fn ids(&self) -> Vec<StepId> {
        self.entries.iter().map(|e| e.step.id.clone()).collect()
    }

    /// Splice a fallback branch in place of the failed step at `index`.
    ///
    /// `own` allows the failed step's own first branch. With escalation on, a
    /// step inside a branch that has nothing left falls through to the next
    /// untried branch of the enclosing owners, innermost first. Returns `None`
    /// when no branch is left.
    pub fn splice_fallback(
        &mut self,
        index: usize,
        own: bool,
        options: SpliceOptions,
    ) -> Option<FallbackSelection> {
        let entry = self.entries.get(index)?.clone();

        if own && entry.step.has_fallback() {
            let depth = entry.depth() + 1;
            if depth <= options.max_depth {
                let end = match options.mode {
                    SpliceMode::ReplaceStep => index + 1,
                    SpliceMode::ReplaceRemainder => match &entry.frame {
                        Some(frame) => self.branch_end(index, frame),
                        None => self.entries.len(),
                    },
                };
                let frame = Arc::new(BranchFrame {
                    owner: Arc::clone(&entry.step),
                    branch: 0,
                    depth,
                    parent: entry.frame.clone(),
                });
                return Some(self.replace(index, end, frame, false));
            }
            tracing::warn!(
                step_id = %entry.step.id,
                depth,
                limit = options.max_depth,
                "fallback depth limit reached"
            );
        }

        if !options.escalation {
            return None;
        }

        let mut current = entry.frame.clone();
        while let Some(frame) = current {
            if let Some(next) = frame.next_branch() {
                let end = self.branch_end(index, &frame);
                let sibling = Arc::new(BranchFrame {
                    owner: Arc::clone(&frame.owner),
                    branch: next,
                    depth: frame.depth,
                    parent: frame.parent.clone(),
                });
                return Some(self.replace(index, end, sibling, true));
            }
            current = frame.parent.clone();
        }
        None
    }

    /// First index after `index` that is no longer inside `frame`.
    fn branch_end(&self, index: usize, frame: &Arc<BranchFrame>) -> usize {
        self.entries[index..]
            .iter()
            .position(|e| !e.within(frame))
            .map_or(self.entries.len(), |offset| index + offset)
    }

    fn replace(
        &mut self,
        start: usize,
        end: usize,
        frame: Arc<BranchFrame>,
        escalated: bool,
    ) -> FallbackSelection {
        let branch = &frame.owner.fallback[frame.branch];
        let entries: Vec<PlanEntry> = branch
            .iter()
            .map(|step| PlanEntry {
                step: Arc::new(step.clone()),
                frame: Some(Arc::clone(&frame)),
            })
            .collect();
        let steps = entries.iter().map(|e| e.step.id.clone()).collect();
        self.entries.splice(start..end, entries);

        FallbackSelection {
            owner: frame.owner.id.clone(),
            branch: frame.branch,
            steps,
            escalated,
            replaced: end - start,
        }
    }
}
