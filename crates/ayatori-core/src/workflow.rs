//! Compiled workflows and the definition compiler.

use crate::error::WorkflowError;
use crate::state::{State, StateKind, StateName};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::num::NonZeroU64;
use std::time::Duration;

/// A workflow definition as written.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Definition {
    pub start_at: StateName,
    pub states: BTreeMap<StateName, StateDefinition>,
    #[serde(default)]
    pub timeout_seconds: Option<NonZeroU64>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// One entry of `States`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateDefinition {
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub next: Option<StateName>,
    #[serde(default)]
    pub end: bool,
    #[serde(flatten)]
    pub kind: StateKind,
}

/// Location of a state inside a compiled workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub branch: usize,
    pub offset: usize,
}

/// A compiled, immutable workflow.
///
/// States are laid out in branches: ordered runs that a walker can step
/// through by offset. A name index maps every state to its position.
///
/// # Examples
///
/// ```
/// use ayatori_core::Workflow;
///
/// let workflow = Workflow::from_json(r#"{
///     "StartAt": "Hello",
///     "States": {
///         "Hello": {"Type": "Pass", "Result": "hi", "Next": "Done"},
///         "Done": {"Type": "Succeed"}
///     }
/// }"#).unwrap();
///
/// assert_eq!(workflow.start_at().as_str(), "Hello");
/// assert_eq!(workflow.state_count(), 2);
/// assert!(workflow.has_state("Done"));
/// ```
pub struct Workflow {
    start_at: StateName,
    timeout: Option<Duration>,
    comment: Option<String>,
    branches: Vec<Vec<State>>,
    index: HashMap<StateName, Position>,
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("start_at", &self.start_at)
            .field("timeout", &self.timeout)
            .field("branches", &self.branches.len())
            .field("states", &self.index.len())
            .finish()
    }
}

impl Workflow {
    /// Parses and compiles a JSON definition.
    pub fn from_json(json: &str) -> Result<Self, WorkflowError> {
        let definition: Definition = serde_json::from_str(json)
            .map_err(|e| WorkflowError::InvalidDefinition(e.to_string()))?;
        Self::compile(definition)
    }

    /// Validates a definition and flattens it into branches.
    ///
    /// The first branch follows the `Next` chain from `StartAt`. Every state
    /// reached only through a Choice rule, a `Default` or a Catch rule starts
    /// a further branch, in the order those targets are discovered.
    pub fn compile(definition: Definition) -> Result<Self, WorkflowError> {
        let Definition {
            start_at,
            mut states,
            timeout_seconds,
            comment,
            ..
        } = definition;

        if !states.contains_key(&start_at) {
            return Err(WorkflowError::InvalidStartAt(start_at));
        }
        for (name, state) in &states {
            validate_transitions(name, state, |target| states.contains_key(target))?;
        }

        let mut branches = Vec::new();
        let mut index = HashMap::with_capacity(states.len());
        let mut pending = VecDeque::from([start_at.clone()]);

        while let Some(head) = pending.pop_front() {
            if index.contains_key(&head) {
                continue;
            }
            let branch_index = branches.len();
            let mut branch = Vec::new();
            let mut cursor = Some(head);

            while let Some(name) = cursor.take() {
                if index.contains_key(&name) {
                    break;
                }
                let definition = states
                    .remove(&name)
                    .ok_or_else(|| WorkflowError::StateNotFound(name.clone()))?;
                index.insert(
                    name.clone(),
                    Position {
                        branch: branch_index,
                        offset: branch.len(),
                    },
                );
                pending.extend(definition.kind.jump_targets().cloned());
                cursor = definition.next.clone();
                branch.push(State {
                    name,
                    comment: definition.comment,
                    next: definition.next,
                    end: definition.end,
                    kind: definition.kind,
                });
            }
            branches.push(branch);
        }

        if let Some(orphan) = states.keys().next() {
            return Err(WorkflowError::InvalidDefinition(format!(
                "state '{orphan}' is unreachable from '{start_at}'"
            )));
        }

        Ok(Self {
            start_at,
            timeout: timeout_seconds.map(|s| Duration::from_secs(s.get())),
            comment,
            branches,
            index,
        })
    }

    /// Builds a workflow from branches that are already flattened.
    ///
    /// Names must be unique and every transition must resolve. A state with
    /// neither `Next` nor `End` continues with the state after it in the
    /// same branch.
    pub fn from_branches(
        start_at: impl Into<StateName>,
        timeout: Option<Duration>,
        branches: Vec<Vec<State>>,
    ) -> Result<Self, WorkflowError> {
        let start_at = start_at.into();
        let mut index = HashMap::new();
        for (branch_index, branch) in branches.iter().enumerate() {
            for (offset, state) in branch.iter().enumerate() {
                let position = Position {
                    branch: branch_index,
                    offset,
                };
                if index.insert(state.name.clone(), position).is_some() {
                    return Err(WorkflowError::DuplicateState(state.name.clone()));
                }
            }
        }
        if !index.contains_key(&start_at) {
            return Err(WorkflowError::InvalidStartAt(start_at));
        }
        for state in branches.iter().flatten() {
            if let Some(target) = state.targets().find(|t| !index.contains_key(*t)) {
                return Err(WorkflowError::StateNotFound(target.clone()));
            }
        }

        Ok(Self {
            start_at,
            timeout,
            comment: None,
            branches,
            index,
        })
    }

    /// Returns the name of the start state.
    pub fn start_at(&self) -> &StateName {
        &self.start_at
    }

    /// Returns the overall deadline declared by `TimeoutSeconds`.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the definition's `Comment`.
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Returns the flattened branches.
    pub fn branches(&self) -> &[Vec<State>] {
        &self.branches
    }

    /// Looks up a state's position by name.
    pub fn position_of(&self, name: &str) -> Option<Position> {
        self.index.get(name).copied()
    }

    /// Returns the state at `position`, if any.
    pub fn state_at(&self, position: Position) -> Option<&State> {
        self.branches.get(position.branch)?.get(position.offset)
    }

    /// Returns `true` if a state with the given name exists.
    pub fn has_state(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Returns the number of states.
    pub fn state_count(&self) -> usize {
        self.index.len()
    }

    /// Returns an iterator over all state names.
    pub fn state_names(&self) -> impl Iterator<Item = &StateName> {
        self.index.keys()
    }
}

fn validate_transitions(
    name: &StateName,
    state: &StateDefinition,
    exists: impl Fn(&StateName) -> bool,
) -> Result<(), WorkflowError> {
    if let Some(target) = state
        .next
        .iter()
        .chain(state.kind.jump_targets())
        .find(|target| !exists(*target))
    {
        return Err(WorkflowError::StateNotFound(target.clone()));
    }

    let declared = |what: &str| {
        WorkflowError::InvalidDefinition(format!("{} state '{name}' {what}", state.kind.type_name()))
    };
    match (&state.kind, state.next.is_some(), state.end) {
        (_, true, true) => Err(declared("declares both Next and End")),
        (StateKind::Choice(_) | StateKind::Succeed(_) | StateKind::Fail(_), true, _)
        | (StateKind::Choice(_) | StateKind::Succeed(_) | StateKind::Fail(_), _, true) => {
            Err(declared("cannot declare Next or End"))
        }
        (StateKind::Choice(choice), _, _) if choice.choices.is_empty() => {
            Err(declared("needs at least one choice rule"))
        }
        (kind, false, false) if !kind.is_terminal() && !kind.is_dynamic() => {
            Err(declared("needs Next or End"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{PassState, SucceedState};

    #[test]
    fn test_flattening_follows_next_chain() {
        let workflow = Workflow::from_json(
            r#"{
                "StartAt": "A",
                "States": {
                    "A": {"Type": "Pass", "Next": "B"},
                    "B": {"Type": "Choice",
                          "Choices": [{"Variable": "$.x", "IsPresent": true, "Next": "C"}],
                          "Default": "D"},
                    "C": {"Type": "Pass", "Next": "E"},
                    "D": {"Type": "Pass", "Next": "E"},
                    "E": {"Type": "Succeed"}
                }
            }"#,
        )
        .unwrap();

        let names = |branch: &[State]| {
            branch
                .iter()
                .map(|s| s.name.as_str().to_string())
                .collect::<Vec<_>>()
        };
        let branches = workflow.branches();
        assert_eq!(branches.len(), 3);
        assert_eq!(names(&branches[0]), ["A", "B"]);
        assert_eq!(names(&branches[1]), ["C", "E"]);
        assert_eq!(names(&branches[2]), ["D"]);
        assert_eq!(
            workflow.position_of("E"),
            Some(Position {
                branch: 1,
                offset: 1
            })
        );
    }

    #[test]
    fn test_structural_errors() {
        let missing_start = Workflow::from_json(
            r#"{"StartAt": "Nope", "States": {"A": {"Type": "Succeed"}}}"#,
        );
        assert!(matches!(missing_start, Err(WorkflowError::InvalidStartAt(_))));

        let dangling = Workflow::from_json(
            r#"{"StartAt": "A", "States": {"A": {"Type": "Pass", "Next": "Gone"}}}"#,
        );
        assert!(matches!(
            dangling,
            Err(WorkflowError::StateNotFound(name)) if name.as_str() == "Gone"
        ));

        let no_transition = Workflow::from_json(
            r#"{"StartAt": "A", "States": {"A": {"Type": "Pass"}}}"#,
        );
        assert!(matches!(no_transition, Err(WorkflowError::InvalidDefinition(_))));

        let orphan = Workflow::from_json(
            r#"{"StartAt": "A", "States": {
                "A": {"Type": "Succeed"},
                "B": {"Type": "Succeed"}
            }}"#,
        );
        assert!(matches!(orphan, Err(WorkflowError::InvalidDefinition(_))));

        let malformed = Workflow::from_json(r#"{"StartAt": "A"}"#);
        assert!(matches!(malformed, Err(WorkflowError::InvalidDefinition(_))));
    }

    #[test]
    fn test_nested_branches_compile_in_isolation() {
        let workflow = Workflow::from_json(
            r#"{
                "StartAt": "Fan",
                "TimeoutSeconds": 30,
                "States": {
                    "Fan": {
                        "Type": "Parallel",
                        "Branches": [
                            {"StartAt": "Fan", "States": {"Fan": {"Type": "Pass", "End": true}}},
                            {"StartAt": "X", "States": {"X": {"Type": "Pass", "End": true}}}
                        ],
                        "End": true
                    }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(workflow.timeout(), Some(Duration::from_secs(30)));

        let state = workflow.state_at(Position { branch: 0, offset: 0 }).unwrap();
        let StateKind::Parallel(parallel) = &state.kind else {
            panic!("expected Parallel");
        };
        assert_eq!(parallel.branches.len(), 2);
        assert!(parallel.branches[0].has_state("Fan"));
    }

    #[test]
    fn test_nested_branch_errors_surface() {
        let result = Workflow::from_json(
            r#"{
                "StartAt": "M",
                "States": {
                    "M": {"Type": "Map", "Iterator": {"StartAt": "Gone", "States": {}}, "End": true}
                }
            }"#,
        );
        assert!(matches!(result, Err(WorkflowError::InvalidDefinition(_))));
    }

    #[test]
    fn test_from_branches() {
        let pass = || StateKind::Pass(PassState::default());
        let workflow = Workflow::from_branches(
            "A",
            None,
            vec![vec![
                State::new("A", pass()),
                State::new("B", StateKind::Succeed(SucceedState::default())),
            ]],
        )
        .unwrap();
        assert_eq!(workflow.state_count(), 2);

        let duplicate = Workflow::from_branches(
            "A",
            None,
            vec![vec![State::new("A", pass())], vec![State::new("A", pass())]],
        );
        assert!(matches!(duplicate, Err(WorkflowError::DuplicateState(_))));

        let dangling = Workflow::from_branches(
            "A",
            None,
            vec![vec![State::new("A", pass()).with_next("Z")]],
        );
        assert!(matches!(dangling, Err(WorkflowError::StateNotFound(_))));
    }
}
