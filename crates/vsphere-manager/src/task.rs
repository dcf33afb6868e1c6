//! Waiting for server-side tasks through a property collector filter.

use tracing::{debug, info, warn};

use crate::error::{Result, VsphereError};
use crate::property;
use crate::session::Session;
use crate::types::{ManagedObjectRef, TaskState};
use crate::xml::Element;

/// Seconds the server may hold a `WaitForUpdatesEx` call open before replying empty.
const MAX_WAIT_SECONDS: u32 = 60;

/// A task that reached `success`.
#[derive(Debug, Clone)]
pub struct CompletedTask {
    pub task: ManagedObjectRef,
    pub key: String,
    /// `TaskInfo.result`, e.g. the reference of a newly created VM.
    pub result: Option<Element>,
}

impl CompletedTask {
    pub fn result_ref(&self) -> Option<ManagedObjectRef> {
        self.result.as_ref().and_then(ManagedObjectRef::from_element)
    }
}

/// Tracks a set of tasks across `UpdateSet`s until all succeed or one fails.
#[derive(Debug)]
pub(crate) struct TaskTracker {
    pending: Vec<ManagedObjectRef>,
    completed: Vec<CompletedTask>,
}

impl TaskTracker {
    pub(crate) fn new(tasks: &[ManagedObjectRef]) -> Self {
        Self {
            pending: tasks.to_vec(),
            completed: Vec::new(),
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.pending.is_empty()
    }

    /// Consume one `UpdateSet`. The first task seen in the `error` state aborts
    /// with that task's error.
    pub(crate) fn apply(&mut self, update_set: &Element) -> Result<()> {
        for object_update in update_set
            .children_named("filterSet")
            .flat_map(|fs| fs.children_named("objectSet"))
        {
            let Some(task) = object_update
                .child("obj")
                .and_then(ManagedObjectRef::from_element)
            else {
                continue;
            };

            for change in object_update.children_named("changeSet") {
                let Some(val) = change.child("val") else {
                    continue;
                };
                let (state, info) = match change.text_of("name") {
                    Some("info") => (val.value_of::<TaskState>("state"), Some(val)),
                    Some("info.state") => (val.text().trim().parse().ok(), None),
                    _ => continue,
                };

                let Some(pos) = self.pending.iter().position(|t| *t == task) else {
                    continue;
                };

                match state {
                    Some(TaskState::Success) => {
                        let task = self.pending.remove(pos);
                        let key = info
                            .and_then(|i| i.text_of("key"))
                            .map(str::to_string)
                            .unwrap_or_else(|| task.value.clone());
                        debug!(task = %task, key = %key, "task succeeded");
                        self.completed.push(CompletedTask {
                            task,
                            key,
                            result: info.and_then(|i| i.child("result")).cloned(),
                        });
                    }
                    Some(TaskState::Error) => {
                        return Err(task_failure(&task, info.and_then(|i| i.child("error"))));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    pub(crate) fn into_completed(self) -> Vec<CompletedTask> {
        self.completed
    }
}

/// Build a `TaskFailed` from a `LocalizedMethodFault`.
pub(crate) fn task_failure(task: &ManagedObjectRef, error: Option<&Element>) -> VsphereError {
    let message = error
        .and_then(|e| e.text_of("localizedMessage"))
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .or_else(|| {
            error
                .and_then(|e| e.child("fault"))
                .and_then(|f| f.xsi_type.clone())
        })
        .unwrap_or_else(|| "unknown error".to_string());

    VsphereError::TaskFailed {
        task: task.value.clone(),
        message,
    }
}

/// Block until every task in `tasks` has succeeded, or return the first task error.
pub async fn wait_for_tasks(
    session: &Session,
    tasks: &[ManagedObjectRef],
) -> Result<Vec<CompletedTask>> {
    if tasks.is_empty() {
        return Ok(Vec::new());
    }

    let pc = &session.content().property_collector;
    let spec = property::filter_spec("spec", "Task", tasks, &["info"]);
    let filter = session
        .invoke_for_ref(
            "CreateFilter",
            pc,
            vec![spec, Element::leaf("partialUpdates", false)],
        )
        .await?;

    let outcome = poll_updates(session, tasks).await;

    if let Err(e) = session.invoke("DestroyPropertyFilter", &filter, vec![]).await {
        warn!(filter = %filter, error = %e, "failed to destroy property filter");
    }
    outcome
}

/// Wait for a single task and return its outcome.
pub async fn wait_for_task(session: &Session, task: &ManagedObjectRef) -> Result<CompletedTask> {
    wait_for_tasks(session, std::slice::from_ref(task))
        .await?
        .pop()
        .ok_or_else(|| VsphereError::unexpected("WaitForUpdatesEx", "task completed without info"))
}

async fn poll_updates(session: &Session, tasks: &[ManagedObjectRef]) -> Result<Vec<CompletedTask>> {
    let pc = &session.content().property_collector;
    let mut tracker = TaskTracker::new(tasks);
    let mut version: Option<String> = None;

    while !tracker.is_done() {
        let mut args = Vec::new();
        if let Some(ref v) = version {
            args.push(Element::leaf("version", v));
        }
        args.push(
            Element::new("options").with_child(Element::leaf("maxWaitSeconds", MAX_WAIT_SECONDS)),
        );

        let resp = session.invoke("WaitForUpdatesEx", pc, args).await?;
        let Some(update_set) = resp.child("returnval") else {
            continue;
        };

        tracker.apply(update_set)?;
        version = update_set.text_of("version").map(str::to_string);
    }

    let completed = tracker.into_completed();
    info!(count = completed.len(), "tasks completed");
    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(body: &str) -> Element {
        Element::parse(&format!(
            r#"<returnval xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
                 <version>2</version>
                 <filterSet><filter type="PropertyFilter">session[x]filter-1</filter>{body}</filterSet>
               </returnval>"#
        ))
        .unwrap()
    }

    fn task(id: &str) -> ManagedObjectRef {
        ManagedObjectRef::new("Task", id)
    }

    #[test]
    fn success_records_key_and_result() {
        let mut tracker = TaskTracker::new(&[task("task-1")]);
        tracker
            .apply(&update(
                r#"<objectSet><kind>modify</kind><obj type="Task">task-1</obj>
                     <changeSet><name>info</name><op>assign</op>
                       <val xsi:type="TaskInfo">
                         <key>task-1</key><task type="Task">task-1</task>
                         <state>success</state>
                         <result type="VirtualMachine" xsi:type="ManagedObjectReference">vm-77</result>
                       </val>
                     </changeSet>
                   </objectSet>"#,
            ))
            .unwrap();

        assert!(tracker.is_done());
        let done = tracker.into_completed();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].key, "task-1");
        assert_eq!(
            done[0].result_ref(),
            Some(ManagedObjectRef::new("VirtualMachine", "vm-77"))
        );
    }

    #[test]
    fn running_tasks_stay_pending() {
        let mut tracker = TaskTracker::new(&[task("task-1"), task("task-2")]);
        tracker
            .apply(&update(
                r#"<objectSet><kind>enter</kind><obj type="Task">task-1</obj>
                     <changeSet><name>info</name><op>assign</op>
                       <val><key>task-1</key><state>running</state></val>
                     </changeSet>
                   </objectSet>
                   <objectSet><kind>enter</kind><obj type="Task">task-2</obj>
                     <changeSet><name>info.state</name><op>assign</op><val>success</val></changeSet>
                   </objectSet>"#,
            ))
            .unwrap();

        assert!(!tracker.is_done());
        assert_eq!(tracker.pending, vec![task("task-1")]);
        assert_eq!(tracker.completed[0].key, "task-2");
    }

    #[test]
    fn error_aborts_with_localized_message() {
        let mut tracker = TaskTracker::new(&[task("task-9")]);
        let err = tracker
            .apply(&update(
                r#"<objectSet><kind>modify</kind><obj type="Task">task-9</obj>
                     <changeSet><name>info</name><op>assign</op>
                       <val>
                         <key>task-9</key><state>error</state>
                         <error>
                           <fault xsi:type="FileAlreadyExists"><file>[ds1] vm/vm.vmx</file></fault>
                           <localizedMessage>The file already exists.</localizedMessage>
                         </error>
                       </val>
                     </changeSet>
                   </objectSet>"#,
            ))
            .unwrap_err();

        match err {
            VsphereError::TaskFailed { task, message } => {
                assert_eq!(task, "task-9");
                assert_eq!(message, "The file already exists.");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fault_type_used_when_message_missing() {
        let error = Element::new("error").with_child(Element::typed("fault", "InvalidPowerState"));
        match task_failure(&task("task-3"), Some(&error)) {
            VsphereError::TaskFailed { message, .. } => assert_eq!(message, "InvalidPowerState"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unrelated_objects_and_properties_are_ignored() {
        let mut tracker = TaskTracker::new(&[task("task-1")]);
        tracker
            .apply(&update(
                r#"<objectSet><kind>modify</kind><obj type="Task">task-5</obj>
                     <changeSet><name>info.state</name><op>assign</op><val>error</val></changeSet>
                   </objectSet>
                   <objectSet><kind>modify</kind><obj type="Task">task-1</obj>
                     <changeSet><name>info.progress</name><op>assign</op><val>40</val></changeSet>
                   </objectSet>"#,
            ))
            .unwrap();
        assert!(!tracker.is_done());
    }
}
