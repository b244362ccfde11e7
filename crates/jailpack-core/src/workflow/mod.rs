//! Export and import orchestration over a `VolumeEngine`.
//!
//! Both pipelines are strictly sequential: one engine call at a time, in the
//! order the dataset tree requires.

mod export;
mod import;
mod subtree;

#[cfg(test)]
pub(crate) mod testing;

use log::{error, info};
use std::fmt;
use std::sync::Arc;

pub use export::{ExportPipeline, ExportReport, StreamFailure};
pub use import::{ImportPipeline, ImportReport};
pub use subtree::list_subtree;

/// Severity of a progress message delivered to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowLevel {
    Info,
    Exception,
}

impl fmt::Display for WorkflowLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowLevel::Info => f.write_str("INFO"),
            WorkflowLevel::Exception => f.write_str("EXCEPTION"),
        }
    }
}

/// Single line of output produced by a pipeline step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowEvent {
    pub level: WorkflowLevel,
    pub message: String,
}

/// Caller hook receiving every event as it happens.
pub type WorkflowCallback = Arc<dyn Fn(&WorkflowEvent) + Send + Sync>;

/// Where pipeline events go besides the `log` facade.
#[derive(Clone, Default)]
pub struct Reporter {
    callback: Option<WorkflowCallback>,
    silent: bool,
}

impl Reporter {
    /// Deliver events to `callback`; `silent` suppresses delivery but not logging.
    pub fn new(callback: Option<WorkflowCallback>, silent: bool) -> Self {
        Self { callback, silent }
    }

    fn deliver(&self, event: &WorkflowEvent) {
        match event.level {
            WorkflowLevel::Info => info!("{}", event.message),
            WorkflowLevel::Exception => error!("{}", event.message),
        }
        if self.silent {
            return;
        }
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("callback", &self.callback.is_some())
            .field("silent", &self.silent)
            .finish()
    }
}

/// Events of one pipeline run, delivered as they are recorded.
pub(crate) struct EventLog<'a> {
    reporter: &'a Reporter,
    events: Vec<WorkflowEvent>,
}

impl<'a> EventLog<'a> {
    pub(crate) fn new(reporter: &'a Reporter) -> Self {
        Self {
            reporter,
            events: Vec::new(),
        }
    }

    pub(crate) fn info(&mut self, message: impl Into<String>) {
        self.record(WorkflowLevel::Info, message.into());
    }

    pub(crate) fn exception(&mut self, message: impl Into<String>) {
        self.record(WorkflowLevel::Exception, message.into());
    }

    fn record(&mut self, level: WorkflowLevel, message: String) {
        let event = WorkflowEvent { level, message };
        self.reporter.deliver(&event);
        self.events.push(event);
    }

    pub(crate) fn into_events(self) -> Vec<WorkflowEvent> {
        self.events
    }
}
