//! Step bookkeeping for prints and print objects.
//!
//! Every step carries a [`PrintState`]. Invalidation follows fixed
//! dependency tables: invalidating a step also invalidates the steps
//! listed as its dependents. Object steps invalidate the print's merge
//! step as well.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

static TIMESTAMP: AtomicU64 = AtomicU64::new(1);

fn next_timestamp() -> u64 {
    TIMESTAMP.fetch_add(1, Ordering::Relaxed)
}

/// Where a step is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepStatus {
    /// Never started.
    #[default]
    Fresh,
    /// Currently executing.
    Started,
    /// Interrupted while executing.
    Canceled,
    /// Finished; output is valid.
    Done,
    /// Finished once, output no longer valid.
    Invalidated,
}

/// State of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintState {
    /// Life cycle position.
    pub status: StepStatus,
    /// Stamp of the last transition, increasing across the process.
    pub timestamp: u64,
    /// Disabled steps are never started.
    pub enabled: bool,
}

impl Default for PrintState {
    fn default() -> Self {
        Self {
            status: StepStatus::Fresh,
            timestamp: 0,
            enabled: true,
        }
    }
}

/// A closed set of pipeline steps.
pub trait Step: Copy + Eq + std::fmt::Debug + 'static {
    /// All steps in execution order.
    const ALL: &'static [Self];

    /// Position in [`Step::ALL`].
    fn index(self) -> usize;

    /// Status bar label.
    fn label(self) -> &'static str;

    /// Share of the progress range, in percent of the step group.
    fn progress_level(self) -> u32;

    /// Steps invalidated together with this one.
    fn dependents(self) -> &'static [Self];
}

/// Per-object steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectStep {
    /// CSG evaluation of the object's parts.
    Assembly,
    /// Interior cavity.
    Hollowing,
    /// Drain holes.
    DrillHoles,
    /// Model layers.
    ObjectSlice,
    /// Points needing support.
    SupportPoints,
    /// Support tree mesh.
    SupportTree,
    /// Pad mesh.
    Pad,
    /// Support and pad layers.
    SliceSupports,
}

use ObjectStep::*;

impl ObjectStep {
    /// Steps run for every object before any object continues.
    pub const LEVEL_1: &'static [ObjectStep] = &[
        Assembly,
        Hollowing,
        DrillHoles,
        ObjectSlice,
        SupportPoints,
        SupportTree,
        Pad,
    ];

    /// Steps run once all objects finished [`ObjectStep::LEVEL_1`].
    pub const LEVEL_2: &'static [ObjectStep] = &[SliceSupports];
}

impl Step for ObjectStep {
    const ALL: &'static [Self] = &[
        Assembly,
        Hollowing,
        DrillHoles,
        ObjectSlice,
        SupportPoints,
        SupportTree,
        Pad,
        SliceSupports,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn label(self) -> &'static str {
        match self {
            Assembly => "Assembling model from parts",
            Hollowing => "Hollowing model",
            DrillHoles => "Drilling holes into model.",
            ObjectSlice => "Slicing model",
            SupportPoints => "Generating support points",
            SupportTree => "Generating support tree",
            Pad => "Generating pad",
            SliceSupports => "Slicing supports",
        }
    }

    fn progress_level(self) -> u32 {
        match self {
            Pad | SliceSupports => 11,
            _ => 13,
        }
    }

    fn dependents(self) -> &'static [Self] {
        match self {
            Assembly => &Self::ALL[1..],
            Hollowing => &Self::ALL[2..],
            DrillHoles => &Self::ALL[3..],
            ObjectSlice => &Self::ALL[4..],
            SupportPoints => &Self::ALL[5..],
            SupportTree => &Self::ALL[6..],
            Pad => &Self::ALL[7..],
            SliceSupports => &[],
        }
    }
}

/// Steps run once over all objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrintStep {
    /// Merge object layers into one stack and compute statistics.
    MergeSlicesAndEval,
    /// Draw the merged layers into display images.
    Rasterize,
}

impl Step for PrintStep {
    const ALL: &'static [Self] = &[PrintStep::MergeSlicesAndEval, PrintStep::Rasterize];

    fn index(self) -> usize {
        self as usize
    }

    fn label(self) -> &'static str {
        match self {
            PrintStep::MergeSlicesAndEval => "Merging slices and calculating statistics",
            PrintStep::Rasterize => "Rasterizing layers",
        }
    }

    fn progress_level(self) -> u32 {
        match self {
            PrintStep::MergeSlicesAndEval => 10,
            PrintStep::Rasterize => 90,
        }
    }

    fn dependents(self) -> &'static [Self] {
        match self {
            PrintStep::MergeSlicesAndEval => &[PrintStep::Rasterize],
            PrintStep::Rasterize => &[],
        }
    }
}

/// States of every step in `S`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepState<S: Step> {
    states: Vec<PrintState>,
    _steps: PhantomData<S>,
}

impl<S: Step> Default for StepState<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Step> StepState<S> {
    /// All steps fresh and enabled.
    pub fn new() -> Self {
        Self {
            states: vec![PrintState::default(); S::ALL.len()],
            _steps: PhantomData,
        }
    }

    /// State of `step`.
    pub fn state(&self, step: S) -> PrintState {
        self.states[step.index()]
    }

    /// Whether `step` finished and is still valid.
    pub fn is_done(&self, step: S) -> bool {
        self.states[step.index()].status == StepStatus::Done
    }

    /// Whether `step` is executing.
    pub fn is_started(&self, step: S) -> bool {
        self.states[step.index()].status == StepStatus::Started
    }

    /// Enable or disable `step`.
    pub fn set_enabled(&mut self, step: S, enabled: bool) {
        self.states[step.index()].enabled = enabled;
    }

    /// Mark `step` started. Returns `false` when the step is disabled or
    /// already done, in which case it must not run.
    pub fn set_started(&mut self, step: S) -> bool {
        let st = &mut self.states[step.index()];
        if !st.enabled || st.status == StepStatus::Done {
            return false;
        }
        st.status = StepStatus::Started;
        st.timestamp = next_timestamp();
        true
    }

    /// Mark a started `step` done.
    pub fn set_done(&mut self, step: S) -> bool {
        let st = &mut self.states[step.index()];
        if st.status != StepStatus::Started {
            return false;
        }
        st.status = StepStatus::Done;
        st.timestamp = next_timestamp();
        true
    }

    /// Mark a started `step` canceled.
    pub fn set_canceled(&mut self, step: S) -> bool {
        let st = &mut self.states[step.index()];
        if st.status != StepStatus::Started {
            return false;
        }
        st.status = StepStatus::Canceled;
        st.timestamp = next_timestamp();
        true
    }

    /// Invalidate `step` alone. Returns whether anything changed.
    pub fn invalidate(&mut self, step: S) -> bool {
        let st = &mut self.states[step.index()];
        let next = match st.status {
            StepStatus::Started => StepStatus::Canceled,
            StepStatus::Done => StepStatus::Invalidated,
            _ => return false,
        };
        st.status = next;
        st.timestamp = next_timestamp();
        true
    }

    /// Invalidate each of `steps` alone.
    pub fn invalidate_many(&mut self, steps: &[S]) -> bool {
        steps
            .iter()
            .fold(false, |acc, s| self.invalidate(*s) | acc)
    }

    /// Invalidate every step.
    pub fn invalidate_all(&mut self) -> bool {
        self.invalidate_many(S::ALL)
    }

    /// Whether every step is done.
    pub fn all_done(&self) -> bool {
        S::ALL.iter().all(|s| self.is_done(*s))
    }
}

/// Invalidate a print step and its dependents.
pub fn invalidate_print_step(print: &mut StepState<PrintStep>, step: PrintStep) -> bool {
    let invalidated = print.invalidate(step);
    print.invalidate_many(step.dependents()) | invalidated
}

/// Invalidate an object step, its dependents and the print's merge step.
///
/// Every object step feeds the merged layer stack.
pub fn invalidate_object_step(
    object: &mut StepState<ObjectStep>,
    print: &mut StepState<PrintStep>,
    step: ObjectStep,
) -> bool {
    let mut invalidated = object.invalidate(step);
    invalidated |= object.invalidate_many(step.dependents());
    invalidated | invalidate_print_step(print, PrintStep::MergeSlicesAndEval)
}

/// Invalidate every step of an object and of the print.
pub fn invalidate_all_object_steps(
    object: &mut StepState<ObjectStep>,
    print: &mut StepState<PrintStep>,
) -> bool {
    object.invalidate_all() | print.invalidate_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_done<S: Step>() -> StepState<S> {
        let mut st = StepState::new();
        for s in S::ALL {
            assert!(st.set_started(*s));
            assert!(st.set_done(*s));
        }
        st
    }

    #[test]
    fn test_life_cycle() {
        let mut st = StepState::<PrintStep>::new();
        let step = PrintStep::Rasterize;
        assert_eq!(st.state(step).status, StepStatus::Fresh);
        assert!(!st.set_done(step));
        assert!(st.set_started(step));
        let started = st.state(step).timestamp;
        assert!(st.set_done(step));
        assert!(st.state(step).timestamp > started);
        assert!(!st.set_started(step));
        assert!(st.invalidate(step));
        assert_eq!(st.state(step).status, StepStatus::Invalidated);
        assert!(!st.invalidate(step));
        assert!(st.set_started(step));
        assert!(st.invalidate(step));
        assert_eq!(st.state(step).status, StepStatus::Canceled);
    }

    #[test]
    fn test_disabled_step_does_not_start() {
        let mut st = StepState::<ObjectStep>::new();
        st.set_enabled(Hollowing, false);
        assert!(!st.set_started(Hollowing));
        assert!(st.set_started(Assembly));
    }

    #[test]
    fn test_hollowing_invalidates_everything_after_it() {
        let mut obj = all_done::<ObjectStep>();
        let mut print = all_done::<PrintStep>();
        assert!(invalidate_object_step(&mut obj, &mut print, Hollowing));
        assert!(obj.is_done(Assembly));
        for s in &ObjectStep::ALL[1..] {
            assert!(!obj.is_done(*s), "{s:?} still done");
        }
        assert!(!print.is_done(PrintStep::MergeSlicesAndEval));
        assert!(!print.is_done(PrintStep::Rasterize));
    }

    #[test]
    fn test_pad_keeps_earlier_steps() {
        let mut obj = all_done::<ObjectStep>();
        let mut print = all_done::<PrintStep>();
        invalidate_object_step(&mut obj, &mut print, Pad);
        for s in &ObjectStep::ALL[..6] {
            assert!(obj.is_done(*s));
        }
        assert!(!obj.is_done(Pad));
        assert!(!obj.is_done(SliceSupports));
    }

    #[test]
    fn test_merge_invalidates_rasterize() {
        let mut print = all_done::<PrintStep>();
        assert!(invalidate_print_step(&mut print, PrintStep::MergeSlicesAndEval));
        assert!(!print.is_done(PrintStep::Rasterize));
        let mut print = all_done::<PrintStep>();
        invalidate_print_step(&mut print, PrintStep::Rasterize);
        assert!(print.is_done(PrintStep::MergeSlicesAndEval));
    }

    #[test]
    fn test_fresh_state_reports_no_invalidation() {
        let mut obj = StepState::<ObjectStep>::new();
        let mut print = StepState::<PrintStep>::new();
        assert!(!invalidate_all_object_steps(&mut obj, &mut print));
    }

    #[test]
    fn test_progress_levels_sum() {
        let obj: u32 = ObjectStep::ALL.iter().map(|s| s.progress_level()).sum();
        let print: u32 = PrintStep::ALL.iter().map(|s| s.progress_level()).sum();
        assert_eq!(obj, 100);
        assert_eq!(print, 100);
    }
}
