//! End-to-end runs of raw streams through the pure pipeline stages, wired
//! together the same way the agent bus wires them.

use agentwire_core::event::EventPayload;
use agentwire_core::message::{Message, MessageBody, ToolExchange};
use agentwire_core::raw::RawStreamEvent;
use agentwire_core::state::{ConversationState, LifecycleEvent};
use agentwire_core::stream::StreamEvent;
use agentwire_pipeline::{ConversationStateMachine, MessageAssembler, StreamTransformer, ToolPairer};
use serde_json::json;

#[derive(Default)]
struct Pipeline {
    transformer: StreamTransformer,
    assembler: MessageAssembler,
    pairer: ToolPairer,
    machine: ConversationStateMachine,
    messages: Vec<Message>,
    exchanges: Vec<ToolExchange>,
    states: Vec<ConversationState>,
}

impl Pipeline {
    fn new() -> Self {
        Self {
            states: vec![ConversationState::Idle],
            ..Default::default()
        }
    }

    fn publish(&mut self, payload: EventPayload) {
        for change in self.machine.apply(&payload) {
            self.states.push(change.to);
        }
        match &payload {
            EventPayload::Stream(event) => {
                for message in self.assembler.apply(event) {
                    self.publish(EventPayload::message(message));
                }
            }
            EventPayload::Message(event) => {
                self.messages.push(event.message.clone());
                if let Some(exchange) = self.pairer.on_message(&event.message) {
                    self.exchanges.push(exchange);
                }
            }
            EventPayload::Lifecycle(LifecycleEvent::RequestInterrupted { .. }) => self.assembler.discard(),
            _ => {}
        }
    }

    fn send(&mut self, text: &str) {
        self.publish(EventPayload::message(Message::user(text)));
    }

    fn feed(&mut self, raws: &[RawStreamEvent]) {
        for raw in raws {
            match self.transformer.transform(raw) {
                Ok(Some(event)) => self.publish(event.into()),
                Ok(None) => {}
                Err(err) => {
                    self.publish(EventPayload::message(Message::error(
                        agentwire_core::message::ErrorKind::Driver,
                        err.to_string(),
                        true,
                    )));
                    break;
                }
            }
        }
    }

    fn assistant_texts(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|m| matches!(m.body, MessageBody::Assistant { .. }))
            .filter_map(Message::text)
            .collect()
    }
}

fn text_turn(id: &str, chunks: &[&str]) -> Vec<RawStreamEvent> {
    let mut raws = vec![
        RawStreamEvent::message_start(id, "model-x"),
        RawStreamEvent::text_block_start(0),
    ];
    raws.extend(chunks.iter().map(|c| RawStreamEvent::text_delta(0, *c)));
    raws.push(RawStreamEvent::block_stop(0));
    raws.push(RawStreamEvent::message_stop());
    raws
}

#[test]
fn plain_reply_assembles_one_message_and_walks_states() {
    let mut pipeline = Pipeline::new();
    pipeline.send("hello");
    pipeline.feed(&text_turn("m1", &["Hi", " there"]));

    assert_eq!(pipeline.assistant_texts(), vec!["Hi there"]);
    use ConversationState::*;
    assert_eq!(pipeline.states, vec![Idle, Queued, Thinking, Responding, Idle]);
}

#[test]
fn replaying_a_turn_twice_yields_one_message() {
    let mut pipeline = Pipeline::new();
    let turn = text_turn("m1", &["Hi", " there"]);
    pipeline.feed(&turn);
    pipeline.feed(&turn);
    assert_eq!(pipeline.assistant_texts(), vec!["Hi there"]);
}

#[test]
fn delta_boundaries_do_not_change_content() {
    for chunks in [
        vec!["Hello", " world"],
        vec!["Hel", "lo wor", "ld"],
        vec!["H", "e", "l", "l", "o", " ", "w", "o", "r", "l", "d"],
        vec!["Hello world"],
    ] {
        let mut pipeline = Pipeline::new();
        pipeline.feed(&text_turn("m1", &chunks));
        assert_eq!(pipeline.assistant_texts(), vec!["Hello world"], "chunks: {chunks:?}");
    }
}

#[test]
fn duplicate_message_stop_is_a_no_op() {
    let mut pipeline = Pipeline::new();
    let mut raws = text_turn("m1", &["once"]);
    raws.push(RawStreamEvent::message_stop());
    pipeline.feed(&raws);
    assert_eq!(pipeline.assistant_texts(), vec!["once"]);
}

fn tool_turn() -> Vec<RawStreamEvent> {
    vec![
        RawStreamEvent::message_start("m1", ""),
        RawStreamEvent::tool_use_start(0, "toolu_1", "get_weather"),
        RawStreamEvent::input_json_delta(0, r#"{"loc"#),
        RawStreamEvent::input_json_delta(0, r#"ation":"SF"}"#),
        RawStreamEvent::block_stop(0),
        RawStreamEvent::stop_reason("tool_use"),
        RawStreamEvent::message_stop(),
    ]
}

#[test]
fn tool_pairing_is_order_independent() {
    let result = || StreamEvent::ToolResult {
        tool_id: "toolu_1".into(),
        content: "72F".into(),
        is_error: false,
    };

    let mut call_first = Pipeline::new();
    call_first.feed(&tool_turn());
    call_first.publish(result().into());

    let mut result_first = Pipeline::new();
    result_first.publish(result().into());
    result_first.feed(&tool_turn());

    for pipeline in [&call_first, &result_first] {
        let call = pipeline
            .messages
            .iter()
            .find_map(Message::as_tool_call)
            .unwrap();
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.input, json!({"location": "SF"}));

        assert_eq!(pipeline.exchanges.len(), 1);
        let exchange = &pipeline.exchanges[0];
        assert_eq!(exchange.output, "72F");
        assert!(!exchange.is_error);
        assert!(exchange.duration_ms >= 0);
        assert_eq!(pipeline.machine.state(), ConversationState::Idle);
        assert_eq!(pipeline.machine.pending_tools().count(), 0);
    }

    use ConversationState::*;
    assert_eq!(
        call_first.states,
        vec![Idle, Thinking, PlanningTool, AwaitingToolResult, Idle]
    );
    assert_eq!(result_first.states, vec![Idle, Thinking, PlanningTool, Responding, Idle]);
}

#[test]
fn early_result_does_not_stall_the_next_turn() {
    let mut pipeline = Pipeline::new();
    pipeline.publish(
        StreamEvent::ToolResult {
            tool_id: "toolu_1".into(),
            content: "72F".into(),
            is_error: false,
        }
        .into(),
    );
    pipeline.send("weather?");
    pipeline.feed(&tool_turn());
    pipeline.publish(
        LifecycleEvent::RequestCompleted {
            request_id: "r1".into(),
        }
        .into(),
    );
    assert_eq!(pipeline.machine.state(), ConversationState::Idle);

    let before = pipeline.states.len();
    pipeline.send("thanks");
    pipeline.feed(&text_turn("m2", &["You're welcome"]));

    use ConversationState::*;
    assert_eq!(pipeline.states[before..], [Queued, Thinking, Responding, Idle]);
    assert_eq!(pipeline.assistant_texts().last(), Some(&"You're welcome"));
}

#[test]
fn abort_never_half_emits() {
    let mut pipeline = Pipeline::new();
    pipeline.send("go");
    pipeline.feed(&[
        RawStreamEvent::message_start("m1", ""),
        RawStreamEvent::text_block_start(0),
        RawStreamEvent::text_delta(0, "partial"),
    ]);
    pipeline.publish(
        LifecycleEvent::RequestInterrupted {
            request_id: "r1".into(),
        }
        .into(),
    );
    assert_eq!(pipeline.machine.state(), ConversationState::Idle);

    // A stop delivered late, and even a restarted copy, produce nothing.
    pipeline.feed(&[RawStreamEvent::block_stop(0), RawStreamEvent::message_stop()]);
    pipeline.feed(&text_turn("m1", &["partial", " and more"]));
    assert!(pipeline.assistant_texts().is_empty());
}

#[test]
fn synthetic_failure_becomes_recoverable_error() {
    let mut pipeline = Pipeline::new();
    pipeline.send("go");
    pipeline.feed(&[
        RawStreamEvent::message_start("m1", ""),
        RawStreamEvent::synthetic_error("overloaded"),
        RawStreamEvent::message_stop(),
    ]);

    let errors: Vec<_> = pipeline.messages.iter().filter_map(Message::as_error).collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("overloaded"));
    assert_eq!(pipeline.machine.state(), ConversationState::Idle);

    // The pipeline keeps working for the next turn.
    pipeline.send("again");
    pipeline.feed(&text_turn("m2", &["ok"]));
    assert_eq!(pipeline.assistant_texts(), vec!["ok"]);
}

#[test]
fn error_state_never_returns_to_activity_without_idle() {
    let mut pipeline = Pipeline::new();
    pipeline.publish(EventPayload::message(Message::error(
        agentwire_core::message::ErrorKind::Reactor,
        "fatal",
        false,
    )));
    pipeline.send("ignored");
    pipeline.feed(&text_turn("m1", &["ignored"]));
    assert_eq!(pipeline.machine.state(), ConversationState::Error);
    assert_eq!(*pipeline.states.last().unwrap(), ConversationState::Error);

    pipeline.publish(LifecycleEvent::HistoryCleared.into());
    assert_eq!(pipeline.machine.state(), ConversationState::Idle);

    for pair in pipeline.states.windows(2) {
        if pair[0] == ConversationState::Error {
            assert_eq!(pair[1], ConversationState::Idle);
        }
    }
}
