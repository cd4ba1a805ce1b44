//! Event pipeline
//!
//! Every decoded gateway event passes through three stages:
//! - **PreState**: runs inline before the roster absorbs the event, so
//!   handlers still see the old state
//! - **PostState**: runs inline after the roster absorbed it
//! - **Background**: each handler on its own task, nobody waits
//!
//! Handlers within the inline stages run in registration order. A failing or
//! panicking handler is logged and never stops its siblings.

pub mod handlers;

use crate::gateway::{Event, EventKind};
use crate::guard::{guarded, HandlerResult, Outcome};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PreState,
    PostState,
    Background,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, event: Arc<Event>) -> HandlerResult;
}

/// Closure-backed handler.
pub struct FnHandler<F> {
    name: &'static str,
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(&self, event: Arc<Event>) -> HandlerResult {
        (self.f)(event).await
    }
}

pub fn handler_fn<F, Fut>(name: &'static str, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler { name, f })
}

enum Filter {
    All,
    Kinds(Vec<EventKind>),
}

impl Filter {
    fn matches(&self, kind: EventKind) -> bool {
        match self {
            Filter::All => true,
            Filter::Kinds(kinds) => kinds.contains(&kind),
        }
    }
}

struct Registration {
    filter: Filter,
    handler: Arc<dyn EventHandler>,
}

#[derive(Default)]
pub struct PipelineBuilder {
    pre: Vec<Registration>,
    post: Vec<Registration>,
    background: Vec<Registration>,
}

impl PipelineBuilder {
    fn stage_mut(&mut self, stage: Stage) -> &mut Vec<Registration> {
        match stage {
            Stage::PreState => &mut self.pre,
            Stage::PostState => &mut self.post,
            Stage::Background => &mut self.background,
        }
    }

    pub fn on(mut self, stage: Stage, kinds: &[EventKind], handler: Arc<dyn EventHandler>) -> Self {
        self.stage_mut(stage).push(Registration {
            filter: Filter::Kinds(kinds.to_vec()),
            handler,
        });
        self
    }

    pub fn on_all(mut self, stage: Stage, handler: Arc<dyn EventHandler>) -> Self {
        self.stage_mut(stage).push(Registration {
            filter: Filter::All,
            handler,
        });
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            pre: self.pre,
            post: self.post,
            background: self.background,
        }
    }
}

/// Frozen handler registry.
pub struct Pipeline {
    pre: Vec<Registration>,
    post: Vec<Registration>,
    background: Vec<Registration>,
}

/// Result of dispatching one event.
pub struct Dispatch {
    pub kind: EventKind,
    /// Inline stage outcomes, in execution order.
    pub outcomes: Vec<(String, Outcome)>,
    /// Background handler tasks.
    pub background: Vec<JoinHandle<Outcome>>,
}

impl Dispatch {
    /// Wait for every background handler. Only tests and shutdown need this.
    pub async fn join_background(self) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(self.background.len());
        for task in self.background {
            outcomes.push(match task.await {
                Ok(outcome) => outcome,
                Err(e) => Outcome::Fault(format!("task failed: {}", e)),
            });
        }
        outcomes
    }
}

fn report(kind: EventKind, handler: &str, outcome: &Outcome) {
    match outcome {
        Outcome::Ok => {}
        Outcome::Error(e) => warn!(event = %kind, handler, error = %e, "Event handler failed"),
        Outcome::Fault(f) => error!(event = %kind, handler, fault = %f, "Recovered from handler fault"),
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn handler_count(&self, stage: Stage) -> usize {
        match stage {
            Stage::PreState => self.pre.len(),
            Stage::PostState => self.post.len(),
            Stage::Background => self.background.len(),
        }
    }

    pub async fn dispatch(&self, event: Event) -> Dispatch {
        let kind = event.kind;
        let event = Arc::new(event);
        let mut outcomes = Vec::new();

        for registration in self.pre.iter().chain(self.post.iter()) {
            if !registration.filter.matches(kind) {
                continue;
            }
            let name = registration.handler.name().to_string();
            let outcome = guarded(registration.handler.handle(event.clone())).await;
            report(kind, &name, &outcome);
            outcomes.push((name, outcome));
        }

        let background = self
            .background
            .iter()
            .filter(|r| r.filter.matches(kind))
            .map(|registration| {
                let handler = registration.handler.clone();
                let event = event.clone();
                tokio::spawn(async move {
                    let outcome = guarded(handler.handle(event)).await;
                    report(kind, handler.name(), &outcome);
                    outcome
                })
            })
            .collect();

        Dispatch {
            kind,
            outcomes,
            background,
        }
    }
}
