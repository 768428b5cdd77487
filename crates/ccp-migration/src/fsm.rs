//! Orchestrator state machine
//!
//! [`transition`] is a pure function from `(State, Data, Event)` to the next
//! state, data and the effects to run. The driver in
//! [`orchestrator`](crate::orchestrator) performs effects and feeds their
//! results back as events.
//!
//! ```text
//!            start / RecheckState
//!                    |
//!                 Loading ----Failed----> InitializationFailed
//!                /       \
//!      Configuration     Migration
//!             |               |
//!           Idle          Migration
//!             \               /
//!          UpgradeResources -> Execute -> Executed -> Loading
//! ```

use crate::messages::{OrchestratorCommand, OrchestratorNotification, UpgradeReply};
use crate::planner::{compute_migration_state, plan_configuration, plan_migration, ExecutionPlan};
use crate::state::{
    ConfigurationResourceState, MigrationResourceState, MigratorTemplateConfigurationState,
};
use ccp_model::{ConfigurationId, Migration, MigrationLogRecord};
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Deriving the mode from persistence
    Loading,
    /// Active configuration, no migration
    Idle,
    /// Active migration
    Migration,
    /// Waiting for a recheck
    InitializationFailed,
    Stopped,
}

/// Resource state held between transitions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Data {
    pub configuration_state: Option<ConfigurationResourceState>,
    pub migration_state: Option<MigrationResourceState>,
}

/// Result of deriving state from persistence
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Configuration(ConfigurationResourceState),
    Migration {
        migration: Migration,
        source: Vec<MigratorTemplateConfigurationState>,
        destination: Vec<MigratorTemplateConfigurationState>,
    },
    Failed(Vec<MigrationLogRecord>),
}

#[derive(Debug)]
pub enum Event {
    Command(OrchestratorCommand),
    Loaded(LoadOutcome),
    Executed(Vec<MigrationLogRecord>),
}

/// Where execution runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Single side, the active configuration
    Configuration(ConfigurationId),
    /// Both sides of an active migration
    Migration {
        migration_id: ccp_model::MigrationId,
        from: ConfigurationId,
        to: ConfigurationId,
    },
}

#[derive(Debug)]
pub enum Effect {
    Notify(OrchestratorNotification),
    Reply {
        to: oneshot::Sender<UpgradeReply>,
        reply: UpgradeReply,
    },
    LoadState {
        force_extract: bool,
    },
    Execute {
        plan: ExecutionPlan,
        mode: ExecutionMode,
    },
    /// Event not handled in the current state
    Unhandled {
        state: State,
        event: &'static str,
    },
}

/// Initial state and effects
#[must_use]
pub fn start() -> (State, Data, Vec<Effect>) {
    (
        State::Loading,
        Data::default(),
        vec![
            Effect::Notify(OrchestratorNotification::ProcessingTheRequest),
            Effect::LoadState {
                force_extract: true,
            },
        ],
    )
}

/// Apply `event` in `state`
#[must_use]
pub fn transition(state: State, data: Data, event: Event) -> (State, Data, Vec<Effect>) {
    match (state, event) {
        (State::Stopped, event) => (state, data, vec![unhandled(state, &event)]),

        (_, Event::Command(OrchestratorCommand::Shutdown)) => (State::Stopped, data, Vec::new()),

        (_, Event::Command(OrchestratorCommand::RecheckState)) => (
            State::Loading,
            data,
            vec![Effect::LoadState {
                force_extract: false,
            }],
        ),

        (State::Loading, Event::Loaded(outcome)) => loaded(outcome),

        (State::Idle, Event::Command(OrchestratorCommand::UpgradeResources { requests, reply })) => {
            upgrade_configuration(data, &requests, reply)
        }

        (
            State::Migration,
            Event::Command(OrchestratorCommand::UpgradeResources { requests, reply }),
        ) => upgrade_migration(data, &requests, reply),

        (State::Idle | State::Migration, Event::Executed(records)) => (
            State::Loading,
            data,
            vec![
                Effect::Notify(OrchestratorNotification::Logs(records)),
                Effect::LoadState {
                    force_extract: false,
                },
            ],
        ),

        (state, event) => (state, data, vec![unhandled(state, &event)]),
    }
}

fn unhandled(state: State, event: &Event) -> Effect {
    let event = match event {
        Event::Command(OrchestratorCommand::RecheckState) => "RecheckState",
        Event::Command(OrchestratorCommand::UpgradeResources { .. }) => "UpgradeResources",
        Event::Command(OrchestratorCommand::Shutdown) => "Shutdown",
        Event::Loaded(_) => "Loaded",
        Event::Executed(_) => "Executed",
    };
    Effect::Unhandled { state, event }
}

fn loaded(outcome: LoadOutcome) -> (State, Data, Vec<Effect>) {
    match outcome {
        LoadOutcome::Configuration(state) => (
            State::Idle,
            Data {
                configuration_state: Some(state.clone()),
                migration_state: None,
            },
            vec![Effect::Notify(OrchestratorNotification::ConfigurationState(
                state,
            ))],
        ),
        LoadOutcome::Migration {
            migration,
            source,
            destination,
        } => {
            let templates = compute_migration_state(&source, &destination);
            let state = MigrationResourceState::new(&migration, templates);
            (
                State::Migration,
                Data {
                    configuration_state: None,
                    migration_state: Some(state.clone()),
                },
                vec![Effect::Notify(OrchestratorNotification::MigrationState(
                    state,
                ))],
            )
        }
        LoadOutcome::Failed(errors) => (
            State::InitializationFailed,
            Data::default(),
            vec![Effect::Notify(
                OrchestratorNotification::InitializationFailed(errors),
            )],
        ),
    }
}

fn upgrade_configuration(
    data: Data,
    requests: &[crate::planner::ResourceUpgrade],
    reply: Option<oneshot::Sender<UpgradeReply>>,
) -> (State, Data, Vec<Effect>) {
    let Some(state) = data.configuration_state.as_ref() else {
        let effects = reply
            .map(|to| Effect::Reply {
                to,
                reply: UpgradeReply::Declined(Vec::new()),
            })
            .into_iter()
            .collect();
        return (State::Idle, data, effects);
    };

    let (plan, errors) = plan_configuration(requests, state);
    let mode = ExecutionMode::Configuration(state.configuration_id);

    let mut effects = Vec::new();
    if !errors.is_empty() {
        if let Some(to) = reply {
            effects.push(Effect::Reply {
                to,
                reply: UpgradeReply::Declined(errors),
            });
        }
        return (State::Idle, data, effects);
    }

    if let Some(to) = reply {
        effects.push(Effect::Reply {
            to,
            reply: UpgradeReply::Acknowledged,
        });
    }
    effects.push(Effect::Notify(OrchestratorNotification::ProcessingTheRequest));
    effects.push(Effect::Execute { plan, mode });
    (State::Idle, data, effects)
}

fn upgrade_migration(
    data: Data,
    requests: &[crate::planner::ResourceUpgrade],
    reply: Option<oneshot::Sender<UpgradeReply>>,
) -> (State, Data, Vec<Effect>) {
    let Some(state) = data.migration_state.as_ref() else {
        return (State::Migration, data, Vec::new());
    };

    let (plan, errors) = plan_migration(requests, state);
    if !errors.is_empty() {
        return (
            State::Migration,
            data,
            vec![Effect::Notify(OrchestratorNotification::Logs(errors))],
        );
    }

    let mode = ExecutionMode::Migration {
        migration_id: state.migration_id,
        from: state.from_configuration_id,
        to: state.to_configuration_id,
    };
    let mut effects = Vec::new();
    if let Some(to) = reply {
        effects.push(Effect::Reply {
            to,
            reply: UpgradeReply::Acknowledged,
        });
    }
    effects.push(Effect::Notify(OrchestratorNotification::ProcessingTheRequest));
    effects.push(Effect::Execute { plan, mode });
    (State::Migration, data, effects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::ResourceUpgrade;
    use crate::state::{
        DependencyType, MigratorConfigurationState, ResourceConfigurationState, Side,
    };

    fn templates(points: &[&str], current: &str) -> Vec<MigratorTemplateConfigurationState> {
        vec![MigratorTemplateConfigurationState {
            code: "m1".into(),
            name: "M1".into(),
            priority: 1.0,
            migrators: vec![MigratorConfigurationState {
                type_name: "Db".into(),
                name: "Db".into(),
                migration_points: points.iter().map(ToString::to_string).collect(),
                last_defined_point: points.last().map(ToString::to_string),
                resources: vec![ResourceConfigurationState {
                    code: "main".into(),
                    name: "Main".into(),
                    current_point: Some(current.into()),
                }],
                priority: 1.0,
                dependency_type: DependencyType::CodeDependsOnResource,
            }],
        }]
    }

    fn request(target: Side) -> ResourceUpgrade {
        ResourceUpgrade {
            template_code: "m1".into(),
            migrator_type_name: "Db".into(),
            resource_code: "main".into(),
            target,
        }
    }

    fn idle() -> (State, Data) {
        let outcome = LoadOutcome::Configuration(ConfigurationResourceState {
            configuration_id: ConfigurationId(1),
            templates: templates(&["a", "b"], "a"),
        });
        let (state, data, _) = transition(State::Loading, Data::default(), Event::Loaded(outcome));
        (state, data)
    }

    fn migrating() -> (State, Data) {
        let mut migration = Migration::start(ConfigurationId(1), ConfigurationId(2));
        migration.id = ccp_model::MigrationId(9);
        let outcome = LoadOutcome::Migration {
            migration,
            source: templates(&["first"], "first"),
            destination: templates(&["first", "second"], "first"),
        };
        let (state, data, _) = transition(State::Loading, Data::default(), Event::Loaded(outcome));
        (state, data)
    }

    #[test]
    fn start_loads_with_forced_extraction() {
        let (state, _, effects) = start();
        assert_eq!(state, State::Loading);
        assert!(matches!(
            effects.as_slice(),
            [
                Effect::Notify(OrchestratorNotification::ProcessingTheRequest),
                Effect::LoadState {
                    force_extract: true
                }
            ]
        ));
    }

    #[test]
    fn loaded_outcomes_select_mode() {
        assert_eq!(idle().0, State::Idle);

        let (state, data) = migrating();
        assert_eq!(state, State::Migration);
        assert!(data.migration_state.is_some());

        let (state, _, effects) = transition(
            State::Loading,
            Data::default(),
            Event::Loaded(LoadOutcome::Failed(vec![MigrationLogRecord::error("boom")])),
        );
        assert_eq!(state, State::InitializationFailed);
        assert!(matches!(
            effects.as_slice(),
            [Effect::Notify(OrchestratorNotification::InitializationFailed(errors))] if errors.len() == 1
        ));
    }

    #[test]
    fn recheck_reloads_from_any_state() {
        for state in [State::Idle, State::Migration, State::InitializationFailed] {
            let (next, _, effects) = transition(
                state,
                Data::default(),
                Event::Command(OrchestratorCommand::RecheckState),
            );
            assert_eq!(next, State::Loading);
            assert!(matches!(
                effects.as_slice(),
                [Effect::LoadState {
                    force_extract: false
                }]
            ));
        }
    }

    #[test]
    fn idle_upgrade_acknowledges_then_executes() {
        let (state, data) = idle();
        let (to, _rx) = oneshot::channel();
        let (next, _, effects) = transition(
            state,
            data,
            Event::Command(OrchestratorCommand::UpgradeResources {
                requests: vec![request(Side::Destination)],
                reply: Some(to),
            }),
        );

        assert_eq!(next, State::Idle);
        assert!(matches!(
            effects.as_slice(),
            [
                Effect::Reply {
                    reply: UpgradeReply::Acknowledged,
                    ..
                },
                Effect::Notify(OrchestratorNotification::ProcessingTheRequest),
                Effect::Execute {
                    mode: ExecutionMode::Configuration(ConfigurationId(1)),
                    ..
                }
            ]
        ));
    }

    #[test]
    fn idle_upgrade_with_bad_request_is_declined() {
        let (state, data) = idle();
        let (to, _rx) = oneshot::channel();
        let mut bad = request(Side::Source);
        bad.template_code = "missing".into();

        let (next, _, effects) = transition(
            state,
            data,
            Event::Command(OrchestratorCommand::UpgradeResources {
                requests: vec![bad],
                reply: Some(to),
            }),
        );

        assert_eq!(next, State::Idle);
        assert!(matches!(
            effects.as_slice(),
            [Effect::Reply { reply: UpgradeReply::Declined(errors), .. }] if errors.len() == 1
        ));
    }

    #[test]
    fn migration_errors_are_pushed_without_reply() {
        let (state, data) = migrating();
        let (next, _, effects) = transition(
            state,
            data,
            Event::Command(OrchestratorCommand::UpgradeResources {
                requests: vec![request(Side::Source)],
                reply: None,
            }),
        );

        assert_eq!(next, State::Migration);
        assert!(matches!(
            effects.as_slice(),
            [Effect::Notify(OrchestratorNotification::Logs(errors))]
                if errors[0].message == "Resource can not be migrated"
        ));
    }

    #[test]
    fn executed_logs_are_pushed_and_state_reloaded() {
        let (state, data) = migrating();
        let (next, _, effects) = transition(
            state,
            data,
            Event::Executed(vec![MigrationLogRecord::operation("Migrated")]),
        );
        assert_eq!(next, State::Loading);
        assert!(matches!(
            effects.as_slice(),
            [
                Effect::Notify(OrchestratorNotification::Logs(_)),
                Effect::LoadState {
                    force_extract: false
                }
            ]
        ));
    }

    #[test]
    fn unexpected_events_are_unhandled() {
        let (state, data) = idle();
        let (next, _, effects) = transition(
            state,
            data,
            Event::Loaded(LoadOutcome::Failed(Vec::new())),
        );
        assert_eq!(next, State::Idle);
        assert!(matches!(
            effects.as_slice(),
            [Effect::Unhandled { event: "Loaded", .. }]
        ));

        let (next, _, effects) = transition(
            State::InitializationFailed,
            Data::default(),
            Event::Command(OrchestratorCommand::UpgradeResources {
                requests: Vec::new(),
                reply: None,
            }),
        );
        assert_eq!(next, State::InitializationFailed);
        assert!(matches!(
            effects.as_slice(),
            [Effect::Unhandled {
                event: "UpgradeResources",
                ..
            }]
        ));
    }
}
