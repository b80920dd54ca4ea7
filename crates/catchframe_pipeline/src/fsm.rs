//! Report lifecycle transition table.
//!
//! Every active transition is one row: `stage: from -> to`, bound to the
//! topic whose triggers run it. Handlers never infer the state machine,
//! they look it up here.

use catchframe_protocol::ReportStatus;
use std::fmt;

use crate::config::{PipelineMode, TopicConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Run the external transform, stage the processed artifact
    Transcode,
    /// Make the finished artifact public and record its location
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transcode => "transcode",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub stage: Stage,
    pub from: ReportStatus,
    pub to: ReportStatus,
    /// Topic whose triggers run this transition
    pub topic: String,
}

impl Transition {
    pub fn is_terminal(&self) -> bool {
        self.to.is_terminal()
    }
}

/// Outcome of checking a trigger against the record's current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Status equals `from`; do the work
    Run,
    /// Status is at or beyond `to`; nothing to do
    AlreadyDone,
    /// Status is before `from`; an earlier stage has not finished
    NotReady,
    /// Report is `failed`
    Abandoned,
}

pub fn decide(transition: &Transition, current: ReportStatus) -> Decision {
    if current == ReportStatus::Failed {
        return Decision::Abandoned;
    }
    if current.rank() >= transition.to.rank() {
        return Decision::AlreadyDone;
    }
    if current == transition.from {
        Decision::Run
    } else {
        Decision::NotReady
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTable {
    mode: PipelineMode,
    transitions: Vec<Transition>,
}

impl TransitionTable {
    pub fn new(mode: PipelineMode, topics: &TopicConfig) -> Self {
        let transitions = match mode {
            PipelineMode::Transcode => vec![
                Transition {
                    stage: Stage::Transcode,
                    from: ReportStatus::Pending,
                    to: ReportStatus::Downloaded,
                    topic: topics.intake.clone(),
                },
                Transition {
                    stage: Stage::Publish,
                    from: ReportStatus::Downloaded,
                    to: ReportStatus::Completed,
                    topic: topics.publish.clone(),
                },
            ],
            PipelineMode::Direct => vec![Transition {
                stage: Stage::Publish,
                from: ReportStatus::Pending,
                to: ReportStatus::Completed,
                topic: topics.intake.clone(),
            }],
        };
        Self { mode, transitions }
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn first(&self) -> &Transition {
        &self.transitions[0]
    }

    pub fn by_topic(&self, topic: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.topic == topic)
    }

    /// The transition that runs when a report sits at `status`.
    pub fn starting_at(&self, status: ReportStatus) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.from == status)
    }

    /// The transition a successful `transition` hands off to.
    pub fn next_after(&self, transition: &Transition) -> Option<&Transition> {
        self.starting_at(transition.to)
    }

    /// Statuses from which some transition still has to run.
    pub fn in_flight_statuses(&self) -> Vec<ReportStatus> {
        self.transitions.iter().map(|t| t.from).collect()
    }
}
