//! Questions a VM can pause on while powering on (e.g. "moved or copied?").

use std::collections::HashSet;
use std::time::Duration;

use tracing::info;

use crate::error::{Result, VsphereError};
use crate::session::Session;
use crate::task::task_failure;
use crate::types::{ManagedObjectRef, TaskState};
use crate::xml::Element;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub key: String,
    pub label: String,
}

/// `VirtualMachine.runtime.question`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmQuestion {
    pub id: String,
    pub text: String,
    pub choices: Vec<Choice>,
    pub default_index: Option<usize>,
}

impl VmQuestion {
    pub fn from_element(el: &Element) -> Option<Self> {
        let choice = el.child("choice");
        Some(Self {
            id: el.text_of("id")?.to_string(),
            text: el.text_of("text").unwrap_or_default().to_string(),
            choices: choice
                .map(|c| {
                    c.children_named("choiceInfo")
                        .map(|info| Choice {
                            key: info.text_of("key").unwrap_or_default().to_string(),
                            label: info.text_of("label").unwrap_or_default().to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            default_index: choice.and_then(|c| c.value_of("defaultIndex")),
        })
    }

    pub fn default_choice(&self) -> Option<&Choice> {
        self.default_index.and_then(|i| self.choices.get(i))
    }

    pub fn is_valid_choice(&self, key: &str) -> bool {
        self.choices.iter().any(|c| c.key == key)
    }
}

/// Supplies answers to VM questions and observes power-on progress.
#[allow(async_fn_in_trait)]
pub trait QuestionPrompt {
    /// Return the key of the chosen answer.
    async fn answer(&self, question: &VmQuestion) -> Result<String>;

    /// Called once per poll while the power-on task is still running.
    fn progress(&self, _state: TaskState) {}
}

/// What one poll of a power-on task calls for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PowerOnStep {
    Done,
    /// A question not answered yet; the task is still in `state`.
    Ask(VmQuestion, TaskState),
    Wait(TaskState),
}

/// Decides, poll by poll, whether a power-on task is finished, failed, or
/// waiting on a question. Each question id is asked at most once.
#[derive(Debug)]
pub(crate) struct PowerOnTracker {
    task: ManagedObjectRef,
    answered: HashSet<String>,
}

impl PowerOnTracker {
    pub(crate) fn new(task: ManagedObjectRef) -> Self {
        Self {
            task,
            answered: HashSet::new(),
        }
    }

    pub(crate) fn observe(
        &mut self,
        state: Option<TaskState>,
        error: Option<&Element>,
        question: Option<VmQuestion>,
    ) -> Result<PowerOnStep> {
        let state = state
            .ok_or_else(|| VsphereError::unexpected("PowerOnVM_Task", "task has no state"))?;

        match state {
            TaskState::Success => Ok(PowerOnStep::Done),
            TaskState::Error => Err(task_failure(&self.task, error)),
            TaskState::Queued | TaskState::Running => match question {
                Some(q) if self.answered.insert(q.id.clone()) => Ok(PowerOnStep::Ask(q, state)),
                _ => Ok(PowerOnStep::Wait(state)),
            },
        }
    }
}

/// An answer to send with `AnswerVM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Answer {
    pub question_id: String,
    pub choice: String,
}

/// Run the prompt for an `Ask` step. Returns the answer to send, if any, and
/// whether the task has finished.
pub(crate) async fn resolve_step<P: QuestionPrompt>(
    prompt: &P,
    step: PowerOnStep,
) -> Result<(Option<Answer>, bool)> {
    match step {
        PowerOnStep::Done => Ok((None, true)),
        PowerOnStep::Wait(state) => {
            prompt.progress(state);
            Ok((None, false))
        }
        PowerOnStep::Ask(question, state) => {
            let choice = prompt.answer(&question).await?;
            prompt.progress(state);
            Ok((
                Some(Answer {
                    question_id: question.id,
                    choice,
                }),
                false,
            ))
        }
    }
}

/// Power on `vm`, answering each distinct question it pauses on exactly once.
pub async fn power_on<P: QuestionPrompt>(
    session: &Session,
    vm: &ManagedObjectRef,
    prompt: &P,
) -> Result<()> {
    let task = session.invoke_for_ref("PowerOnVM_Task", vm, vec![]).await?;
    info!(vm = %vm, task = %task, "power on requested");

    let mut tracker = PowerOnTracker::new(task.clone());

    loop {
        let info = session.properties(&task, &["info.state", "info.error"]).await?;
        let runtime = session.properties(vm, &["runtime.question"]).await?;
        let question = runtime
            .get("runtime.question")
            .and_then(VmQuestion::from_element);

        let step = tracker.observe(info.parse("info.state"), info.get("info.error"), question)?;
        let (answer, done) = resolve_step(prompt, step).await?;
        if done {
            info!(vm = %vm, "powered on");
            return Ok(());
        }

        if let Some(answer) = answer {
            info!(vm = %vm, question = %answer.question_id, choice = %answer.choice, "answering VM question");
            session
                .invoke(
                    "AnswerVM",
                    vm,
                    vec![
                        Element::leaf("questionId", &answer.question_id),
                        Element::leaf("answerChoice", &answer.choice),
                    ],
                )
                .await?;
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
