//! Conversation lifecycle state machine.
//!
//! Driven solely by bus payloads; consumers never set the state directly.
//!
//! ```text
//! idle ─user_message─▶ queued ─message_start─▶ thinking ─text_delta─▶ responding
//!   ▲                                                                    │
//!   │                         tool_block_start ◀─────────────────────────┘
//!   │                                │
//!   │                          planning_tool ─tool_block_stop─▶ awaiting_tool_result
//!   │                                                                    │
//!   └──── message_stop (no pending tools) / interrupt / clear ◀── tool_result
//! ```
//!
//! A result may reach the bus before its call. Such a result is remembered,
//! and the matching `tool_block_start` then never becomes pending.

use std::collections::BTreeSet;

use agentwire_core::event::{EventKind, EventPayload};
use agentwire_core::message::MessageBody;
use agentwire_core::state::{ConversationState, LifecycleEvent};
use agentwire_core::stream::StreamEvent;
use tracing::{debug, trace};

/// One transition taken by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: ConversationState,
    pub to: ConversationState,
    pub trigger: EventKind,
}

#[derive(Debug, Default)]
pub struct ConversationStateMachine {
    state: ConversationState,
    pending_tools: BTreeSet<String>,
    early_results: BTreeSet<String>,
    message_open: bool,
    request_in_flight: bool,
}

impl ConversationStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// Tool calls that have started but not yet received a result.
    pub fn pending_tools(&self) -> impl Iterator<Item = &str> {
        self.pending_tools.iter().map(String::as_str)
    }

    /// Feed one bus payload; returns the transitions it caused, in order.
    pub fn apply(&mut self, payload: &EventPayload) -> Vec<StateChange> {
        let trigger = payload.kind();
        let mut changes = Vec::new();

        if self.state == ConversationState::Error {
            if let EventPayload::Lifecycle(LifecycleEvent::HistoryCleared) = payload {
                self.clear_tracking();
                self.transition(ConversationState::Idle, trigger, &mut changes);
            } else {
                trace!(%trigger, "Ignoring event while in error state");
            }
            return changes;
        }

        match payload {
            EventPayload::Message(event) if event.replayed => {}
            EventPayload::Message(event) => match &event.message.body {
                MessageBody::User { .. } => match self.state {
                    ConversationState::Idle => {
                        self.transition(ConversationState::Queued, trigger, &mut changes);
                    }
                    ConversationState::AwaitingToolResult if !self.request_in_flight => {
                        debug!(
                            abandoned = self.pending_tools.len(),
                            "New turn while tool calls are unanswered"
                        );
                        self.pending_tools.clear();
                        self.transition(ConversationState::Queued, trigger, &mut changes);
                    }
                    _ => {}
                },
                MessageBody::Error { error } => {
                    self.pending_tools.clear();
                    self.message_open = false;
                    self.transition(ConversationState::Error, trigger, &mut changes);
                    if error.recoverable {
                        self.transition(ConversationState::Idle, trigger, &mut changes);
                    }
                }
                _ => {}
            },

            EventPayload::Stream(event) => self.apply_stream(event, trigger, &mut changes),

            EventPayload::Lifecycle(event) => match event {
                LifecycleEvent::RequestStarted { .. } => {
                    self.request_in_flight = true;
                }
                LifecycleEvent::RequestCompleted { .. } => {
                    self.request_in_flight = false;
                    self.message_open = false;
                    if self.pending_tools.is_empty() {
                        self.transition(ConversationState::Idle, trigger, &mut changes);
                    }
                }
                LifecycleEvent::RequestInterrupted { .. } | LifecycleEvent::HistoryCleared => {
                    self.clear_tracking();
                    self.transition(ConversationState::Idle, trigger, &mut changes);
                }
            },

            EventPayload::State(_) | EventPayload::Tool(_) => {}
        }

        changes
    }

    fn apply_stream(&mut self, event: &StreamEvent, trigger: EventKind, changes: &mut Vec<StateChange>) {
        use ConversationState::*;

        match event {
            StreamEvent::MessageStart { .. } => {
                self.message_open = true;
                if matches!(self.state, Idle | Queued | AwaitingToolResult) {
                    self.transition(Thinking, trigger, changes);
                }
            }
            StreamEvent::TextDelta { .. } => {
                if matches!(self.state, Queued | Thinking) {
                    self.transition(Responding, trigger, changes);
                }
            }
            StreamEvent::ToolBlockStart { tool_id, .. } => {
                if self.early_results.remove(tool_id) {
                    trace!(%tool_id, "Tool call already has its result");
                } else {
                    self.pending_tools.insert(tool_id.clone());
                }
                self.transition(PlanningTool, trigger, changes);
            }
            StreamEvent::ToolBlockStop { .. } => {
                if self.state == PlanningTool {
                    let next = if self.pending_tools.is_empty() {
                        self.resume_state()
                    } else {
                        AwaitingToolResult
                    };
                    self.transition(next, trigger, changes);
                }
            }
            StreamEvent::ToolResult { tool_id, .. } => {
                if !self.pending_tools.remove(tool_id) {
                    trace!(%tool_id, "Result before its tool call");
                    self.early_results.insert(tool_id.clone());
                } else if self.pending_tools.is_empty()
                    && matches!(self.state, PlanningTool | AwaitingToolResult)
                {
                    let next = self.resume_state();
                    self.transition(next, trigger, changes);
                }
            }
            StreamEvent::MessageStop { .. } => {
                self.message_open = false;
                if self.pending_tools.is_empty() {
                    self.transition(Idle, trigger, changes);
                } else {
                    self.transition(AwaitingToolResult, trigger, changes);
                }
            }
            StreamEvent::TextBlockStart { .. }
            | StreamEvent::TextBlockStop { .. }
            | StreamEvent::ToolInputDelta { .. } => {}
        }
    }

    /// Where to go once no tool call is outstanding.
    fn resume_state(&self) -> ConversationState {
        if self.message_open {
            ConversationState::Responding
        } else if self.request_in_flight {
            ConversationState::Thinking
        } else {
            ConversationState::Idle
        }
    }

    fn clear_tracking(&mut self) {
        self.pending_tools.clear();
        self.early_results.clear();
        self.message_open = false;
        self.request_in_flight = false;
    }

    fn transition(&mut self, to: ConversationState, trigger: EventKind, changes: &mut Vec<StateChange>) {
        let from = self.state;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            debug!(%from, %to, %trigger, "Refusing state transition");
            return;
        }
        debug!(%from, %to, %trigger, "State transition");
        self.state = to;
        changes.push(StateChange { from, to, trigger });
    }
}

#[cfg(test)]
mod tests {
    use agentwire_core::message::{ErrorKind, Message};

    use super::*;

    fn stream(event: StreamEvent) -> EventPayload {
        EventPayload::Stream(event)
    }

    fn states(machine: &mut ConversationStateMachine, payloads: Vec<EventPayload>) -> Vec<ConversationState> {
        let mut seen = vec![machine.state()];
        for payload in payloads {
            seen.extend(machine.apply(&payload).into_iter().map(|c| c.to));
        }
        seen
    }

    fn message_start() -> EventPayload {
        stream(StreamEvent::MessageStart {
            message_id: "m1".into(),
            model: String::new(),
        })
    }

    fn message_stop() -> EventPayload {
        stream(StreamEvent::MessageStop {
            message_id: "m1".into(),
            stop_reason: None,
            stop_sequence: None,
        })
    }

    fn delta(text: &str) -> EventPayload {
        stream(StreamEvent::TextDelta { text: text.into() })
    }

    #[test]
    fn test_plain_reply_sequence() {
        let mut machine = ConversationStateMachine::new();
        let seen = states(
            &mut machine,
            vec![
                EventPayload::message(Message::user("hello")),
                message_start(),
                stream(StreamEvent::TextBlockStart { index: 0 }),
                delta("Hi"),
                delta(" there"),
                stream(StreamEvent::TextBlockStop { index: 0 }),
                message_stop(),
            ],
        );
        use ConversationState::*;
        assert_eq!(seen, vec![Idle, Queued, Thinking, Responding, Idle]);
    }

    #[test]
    fn test_tool_round_trip_inside_one_request() {
        use ConversationState::*;
        let mut machine = ConversationStateMachine::new();
        let seen = states(
            &mut machine,
            vec![
                EventPayload::message(Message::user("weather?")),
                EventPayload::Lifecycle(LifecycleEvent::RequestStarted {
                    request_id: "r1".into(),
                }),
                message_start(),
                delta("Checking"),
                stream(StreamEvent::ToolBlockStart {
                    tool_id: "t1".into(),
                    tool_name: "get_weather".into(),
                }),
                stream(StreamEvent::ToolBlockStop { tool_id: "t1".into() }),
                message_stop(),
                stream(StreamEvent::ToolResult {
                    tool_id: "t1".into(),
                    content: "72F".into(),
                    is_error: false,
                }),
                stream(StreamEvent::MessageStart {
                    message_id: "m2".into(),
                    model: String::new(),
                }),
                delta("It is 72F"),
                stream(StreamEvent::MessageStop {
                    message_id: "m2".into(),
                    stop_reason: None,
                    stop_sequence: None,
                }),
            ],
        );
        assert_eq!(
            seen,
            vec![
                Idle,
                Queued,
                Thinking,
                Responding,
                PlanningTool,
                AwaitingToolResult,
                Thinking,
                Responding,
                Idle
            ]
        );
    }

    #[test]
    fn test_result_after_request_ends_goes_idle() {
        let mut machine = ConversationStateMachine::new();
        machine.apply(&EventPayload::message(Message::user("go")));
        machine.apply(&message_start());
        machine.apply(&stream(StreamEvent::ToolBlockStart {
            tool_id: "t1".into(),
            tool_name: "x".into(),
        }));
        machine.apply(&stream(StreamEvent::ToolBlockStop { tool_id: "t1".into() }));
        machine.apply(&message_stop());
        machine.apply(&EventPayload::Lifecycle(LifecycleEvent::RequestCompleted {
            request_id: "r1".into(),
        }));
        assert_eq!(machine.state(), ConversationState::AwaitingToolResult);
        assert_eq!(machine.pending_tools().collect::<Vec<_>>(), vec!["t1"]);

        machine.apply(&stream(StreamEvent::ToolResult {
            tool_id: "t1".into(),
            content: "ok".into(),
            is_error: false,
        }));
        assert_eq!(machine.state(), ConversationState::Idle);
    }

    #[test]
    fn test_result_while_message_open_resumes_responding() {
        let mut machine = ConversationStateMachine::new();
        machine.apply(&message_start());
        machine.apply(&stream(StreamEvent::ToolBlockStart {
            tool_id: "t1".into(),
            tool_name: "x".into(),
        }));
        machine.apply(&stream(StreamEvent::ToolBlockStop { tool_id: "t1".into() }));
        let changes = machine.apply(&stream(StreamEvent::ToolResult {
            tool_id: "t1".into(),
            content: "ok".into(),
            is_error: false,
        }));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].from, ConversationState::AwaitingToolResult);
        assert_eq!(changes[0].to, ConversationState::Responding);
        assert_eq!(changes[0].trigger, EventKind::ToolResult);
    }

    fn tool_start(id: &str) -> EventPayload {
        stream(StreamEvent::ToolBlockStart {
            tool_id: id.into(),
            tool_name: "x".into(),
        })
    }

    fn tool_result(id: &str) -> EventPayload {
        stream(StreamEvent::ToolResult {
            tool_id: id.into(),
            content: "ok".into(),
            is_error: false,
        })
    }

    #[test]
    fn test_result_before_call_never_becomes_pending() {
        use ConversationState::*;
        let mut machine = ConversationStateMachine::new();
        let seen = states(
            &mut machine,
            vec![
                tool_result("t1"),
                EventPayload::message(Message::user("go")),
                message_start(),
                tool_start("t1"),
                stream(StreamEvent::ToolBlockStop { tool_id: "t1".into() }),
                message_stop(),
            ],
        );
        assert_eq!(seen, vec![Idle, Queued, Thinking, PlanningTool, Responding, Idle]);
        assert_eq!(machine.pending_tools().count(), 0);
    }

    #[test]
    fn test_early_result_only_covers_its_own_call() {
        let mut machine = ConversationStateMachine::new();
        machine.apply(&tool_result("t1"));
        machine.apply(&message_start());
        machine.apply(&tool_start("t1"));
        machine.apply(&tool_start("t2"));
        machine.apply(&stream(StreamEvent::ToolBlockStop { tool_id: "t2".into() }));
        machine.apply(&message_stop());
        assert_eq!(machine.state(), ConversationState::AwaitingToolResult);
        assert_eq!(machine.pending_tools().collect::<Vec<_>>(), vec!["t2"]);

        machine.apply(&tool_result("t2"));
        assert_eq!(machine.state(), ConversationState::Idle);
    }

    #[test]
    fn test_new_turn_leaves_unanswered_tool_calls_behind() {
        use ConversationState::*;
        let mut machine = ConversationStateMachine::new();
        machine.apply(&message_start());
        machine.apply(&tool_start("t1"));
        machine.apply(&message_stop());
        assert_eq!(machine.state(), AwaitingToolResult);

        let seen = states(
            &mut machine,
            vec![
                EventPayload::message(Message::user("never mind")),
                message_start(),
                delta("Sure"),
                message_stop(),
            ],
        );
        assert_eq!(seen, vec![AwaitingToolResult, Queued, Thinking, Responding, Idle]);
        assert_eq!(machine.pending_tools().count(), 0);
    }

    #[test]
    fn test_user_message_mid_request_does_not_abandon_tools() {
        let mut machine = ConversationStateMachine::new();
        machine.apply(&EventPayload::Lifecycle(LifecycleEvent::RequestStarted {
            request_id: "r1".into(),
        }));
        machine.apply(&message_start());
        machine.apply(&tool_start("t1"));
        machine.apply(&message_stop());
        assert!(machine.apply(&EventPayload::message(Message::user("hurry"))).is_empty());
        assert_eq!(machine.pending_tools().collect::<Vec<_>>(), vec!["t1"]);
    }

    #[test]
    fn test_clear_forgets_early_results() {
        let mut machine = ConversationStateMachine::new();
        machine.apply(&tool_result("t1"));
        machine.apply(&EventPayload::Lifecycle(LifecycleEvent::HistoryCleared));
        machine.apply(&message_start());
        machine.apply(&tool_start("t1"));
        machine.apply(&message_stop());
        assert_eq!(machine.state(), ConversationState::AwaitingToolResult);
        assert_eq!(machine.pending_tools().collect::<Vec<_>>(), vec!["t1"]);
    }

    #[test]
    fn test_interrupt_returns_to_idle() {
        let mut machine = ConversationStateMachine::new();
        machine.apply(&EventPayload::message(Message::user("go")));
        machine.apply(&message_start());
        machine.apply(&delta("partial"));
        let changes = machine.apply(&EventPayload::Lifecycle(LifecycleEvent::RequestInterrupted {
            request_id: "r1".into(),
        }));
        assert_eq!(changes.last().unwrap().to, ConversationState::Idle);
        // A late stop after the interrupt changes nothing.
        assert!(machine.apply(&message_stop()).is_empty());
    }

    #[test]
    fn test_recoverable_error_surfaces_then_idles() {
        let mut machine = ConversationStateMachine::new();
        machine.apply(&EventPayload::message(Message::user("go")));
        machine.apply(&message_start());
        let changes = machine.apply(&EventPayload::message(Message::error(
            ErrorKind::Driver,
            "stream broke",
            true,
        )));
        let path: Vec<_> = changes.iter().map(|c| (c.from, c.to)).collect();
        assert_eq!(
            path,
            vec![
                (ConversationState::Thinking, ConversationState::Error),
                (ConversationState::Error, ConversationState::Idle),
            ]
        );
    }

    #[test]
    fn test_error_state_only_leaves_through_clear() {
        let mut machine = ConversationStateMachine::new();
        machine.apply(&EventPayload::message(Message::error(ErrorKind::Reactor, "fatal", false)));
        assert_eq!(machine.state(), ConversationState::Error);

        for payload in [
            EventPayload::message(Message::user("again")),
            message_start(),
            delta("text"),
            EventPayload::Lifecycle(LifecycleEvent::RequestInterrupted {
                request_id: "r".into(),
            }),
        ] {
            assert!(machine.apply(&payload).is_empty());
            assert_eq!(machine.state(), ConversationState::Error);
        }

        let changes = machine.apply(&EventPayload::Lifecycle(LifecycleEvent::HistoryCleared));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].to, ConversationState::Idle);
    }

    #[test]
    fn test_replayed_messages_do_not_move_state() {
        let mut machine = ConversationStateMachine::new();
        assert!(machine.apply(&EventPayload::replayed(Message::user("old"))).is_empty());
        assert!(
            machine
                .apply(&EventPayload::replayed(Message::error(ErrorKind::Driver, "old", false)))
                .is_empty()
        );
        assert_eq!(machine.state(), ConversationState::Idle);
    }
}
