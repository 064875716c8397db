//! Deterministic scripted model for tests and offline runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use ragline_core::SamplingParameters;

use crate::error::LlmError;
use crate::model::{CompletionModel, FragmentStream, StreamingModel};
use crate::prompt::Prompt;

/// One scripted outcome of a `complete` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Reply(String),
    Fail(String),
    /// Never resolves; the caller's timeout has to fire.
    Hang,
}

/// A model that replays a fixed answer.
///
/// `complete` consumes queued [`ScriptStep`]s first and then returns the
/// fragments joined. `complete_stream` yields the fragments one by one.
/// Every call is counted and the last prompt is kept for inspection.
#[derive(Debug)]
pub struct ScriptedModel {
    name: String,
    fragments: Vec<String>,
    steps: Mutex<VecDeque<ScriptStep>>,
    fail_after: Option<usize>,
    fragment_delay: Option<Duration>,
    hang: bool,
    online: bool,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<Prompt>>,
}

impl ScriptedModel {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: "scripted".to_string(),
            fragments: fragments.into_iter().map(Into::into).collect(),
            steps: Mutex::new(VecDeque::new()),
            fail_after: None,
            fragment_delay: None,
            hang: false,
            online: true,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    /// A model whose `complete` always answers `reply`.
    pub fn replying(reply: impl Into<String>) -> Self {
        Self::new([reply.into()])
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Queue outcomes for the next `complete` calls.
    pub fn with_steps(self, steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        if let Ok(mut queue) = self.steps.lock() {
            queue.extend(steps);
        }
        self
    }

    /// Streams break after `n` fragments; `complete` fails outright.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    /// Every call hangs forever.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// `connect` fails.
    pub fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    /// Number of `complete` and `complete_stream` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<Prompt> {
        self.last_prompt.lock().ok().and_then(|p| p.clone())
    }

    fn record(&self, prompt: &Prompt) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_prompt.lock() {
            *last = Some(prompt.clone());
        }
    }

    fn next_step(&self) -> Option<ScriptStep> {
        self.steps.lock().ok().and_then(|mut q| q.pop_front())
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), LlmError> {
        if self.online {
            Ok(())
        } else {
            Err(LlmError::Unavailable("scripted model is offline".into()))
        }
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        _sampling: &SamplingParameters,
    ) -> Result<String, LlmError> {
        self.record(prompt);
        if self.hang {
            std::future::pending::<()>().await;
        }
        match self.next_step() {
            Some(ScriptStep::Reply(text)) => Ok(text),
            Some(ScriptStep::Fail(message)) => Err(LlmError::Unavailable(message)),
            Some(ScriptStep::Hang) => {
                std::future::pending::<()>().await;
                Err(LlmError::Timeout)
            }
            None if self.fail_after.is_some() => {
                Err(LlmError::Unavailable("scripted failure".into()))
            }
            None => Ok(self.fragments.concat()),
        }
    }
}

#[async_trait]
impl StreamingModel for ScriptedModel {
    async fn complete_stream(
        &self,
        prompt: &Prompt,
        _sampling: &SamplingParameters,
    ) -> Result<FragmentStream, LlmError> {
        self.record(prompt);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail_after == Some(0) {
            return Err(LlmError::Unavailable("scripted failure".into()));
        }

        let fragments = self.fragments.clone();
        let fail_after = self.fail_after;
        let delay = self.fragment_delay;
        Ok(Box::pin(async_stream::stream! {
            for (i, fragment) in fragments.into_iter().enumerate() {
                if fail_after == Some(i) {
                    yield Err(LlmError::Stream("scripted disconnect".into()));
                    return;
                }
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(fragment);
            }
        }))
    }
}
