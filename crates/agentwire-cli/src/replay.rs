//! `agentwire replay`: run a recorded raw-event file through a live agent.

use std::path::Path;
use std::sync::Arc;

use agentwire_agent::AgentEngine;
use agentwire_core::config::Config;
use agentwire_core::event::{AgentEvent, EventKind, EventPayload, ToolEvent};
use agentwire_core::message::MessageBody;
use agentwire_core::raw::RawStreamEvent;
use agentwire_core::state::{LifecycleEvent, StateEvent};
use agentwire_core::stream::StreamEvent;
use agentwire_driver::{RawEventStream, ScriptedDriver, jsonl, sse};
use bytes::Bytes;
use clap::ValueEnum;
use futures::TryStreamExt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecordingFormat {
    Jsonl,
    Sse,
}

impl RecordingFormat {
    /// Guess from the file extension; anything but `.sse` is JSON lines.
    pub fn infer(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("sse") => Self::Sse,
            _ => Self::Jsonl,
        }
    }
}

pub struct ReplayOptions {
    pub format: Option<RecordingFormat>,
    pub prompt: String,
    pub only: Vec<EventKind>,
    pub json: bool,
}

pub async fn load_recording(path: &Path, format: RecordingFormat) -> anyhow::Result<Vec<RawStreamEvent>> {
    let stream: RawEventStream = match format {
        RecordingFormat::Jsonl => {
            let file = tokio::fs::File::open(path).await?;
            jsonl::json_lines_stream(tokio::io::BufReader::new(file))
        }
        RecordingFormat::Sse => {
            let body = Bytes::from(tokio::fs::read(path).await?);
            sse::raw_events_from_sse(futures::stream::iter([Ok::<_, std::io::Error>(body)]))
        }
    };
    stream.try_collect().await
}

pub async fn run(path: &Path, options: ReplayOptions, config: Config) -> anyhow::Result<()> {
    let format = options.format.unwrap_or_else(|| RecordingFormat::infer(path));
    let events = load_recording(path, format).await?;
    info!(path = %path.display(), ?format, events = events.len(), "Recording loaded");

    let driver = Arc::new(ScriptedDriver::new());
    driver.push_script(events);
    let engine = AgentEngine::new(driver, config);
    let agent = engine.builder().with_id("replay").build()?;

    let only = options.only;
    let json = options.json;
    let _subscription = agent.subscribe_where(
        move |event| only.is_empty() || only.contains(&event.kind()),
        move |event| {
            if json {
                match serde_json::to_string(event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "Could not serialize event"),
                }
            } else {
                println!("{}", describe(event));
            }
        },
    )?;

    agent.send(&options.prompt).await?;
    agent.wait_idle().await?;

    if !json {
        let history = agent.history()?;
        println!();
        println!("State: {}", agent.state()?);
        println!("History: {} messages", history.len());
        for id in agent.pending_tool_calls()? {
            println!("Awaiting result for tool call {id}");
        }
    }

    engine.shutdown().await;
    Ok(())
}

/// One human-readable line per event.
pub fn describe(event: &AgentEvent) -> String {
    let detail = match &event.payload {
        EventPayload::Stream(stream) => match stream {
            StreamEvent::MessageStart { message_id, model } => format!("{message_id} ({model})"),
            StreamEvent::TextDelta { text } => format!("{text:?}"),
            StreamEvent::ToolBlockStart { tool_id, tool_name } => format!("{tool_name} [{tool_id}]"),
            StreamEvent::ToolInputDelta { partial_json, .. } => partial_json.clone(),
            StreamEvent::ToolResult { tool_id, is_error, .. } => {
                if *is_error {
                    format!("{tool_id} (error)")
                } else {
                    tool_id.clone()
                }
            }
            StreamEvent::MessageStop { stop_reason, .. } => stop_reason.clone().unwrap_or_default(),
            _ => String::new(),
        },
        EventPayload::State(StateEvent::StateChanged { from, to, trigger }) => {
            format!("{from} -> {to} on {trigger}")
        }
        EventPayload::Lifecycle(lifecycle) => match lifecycle {
            LifecycleEvent::RequestStarted { request_id }
            | LifecycleEvent::RequestCompleted { request_id }
            | LifecycleEvent::RequestInterrupted { request_id } => request_id.clone(),
            LifecycleEvent::HistoryCleared => String::new(),
        },
        EventPayload::Message(message) => match &message.message.body {
            MessageBody::User { content } | MessageBody::Assistant { content, .. } => format!("{content:?}"),
            MessageBody::ToolCall { tool_call } => format!("{}({})", tool_call.name, tool_call.input),
            MessageBody::ToolResult { tool_result } => {
                format!("{} -> {:?}", tool_result.tool_call_id, tool_result.content)
            }
            MessageBody::Error { error } => {
                let recoverable = if error.recoverable { "recoverable" } else { "fatal" };
                format!("{} ({recoverable})", error.message)
            }
        },
        EventPayload::Tool(tool) => match tool {
            ToolEvent::ToolExchangeCompleted { exchange } => {
                format!("{} [{}] {}ms", exchange.tool_name, exchange.tool_call_id, exchange.duration_ms)
            }
            ToolEvent::ToolResultOrphaned { tool_call_id, .. } => tool_call_id.clone(),
        },
    };

    if detail.is_empty() {
        event.kind().to_string()
    } else {
        format!("{:<24} {detail}", event.kind().as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use agentwire_core::message::Message;
    use agentwire_core::state::ConversationState;

    use super::*;

    #[test]
    fn test_infer_format() {
        assert_eq!(RecordingFormat::infer(Path::new("run.sse")), RecordingFormat::Sse);
        assert_eq!(RecordingFormat::infer(Path::new("run.jsonl")), RecordingFormat::Jsonl);
        assert_eq!(RecordingFormat::infer(Path::new("run")), RecordingFormat::Jsonl);
    }

    #[test]
    fn test_describe() {
        let delta = AgentEvent::new("a", StreamEvent::TextDelta { text: "hi".into() });
        assert_eq!(describe(&delta), format!("{:<24} \"hi\"", "text_delta"));

        let change = AgentEvent::new(
            "a",
            StateEvent::StateChanged {
                from: ConversationState::Idle,
                to: ConversationState::Queued,
                trigger: "user_message".into(),
            },
        );
        assert!(describe(&change).ends_with("idle -> queued on user_message"));

        let cleared = AgentEvent::new("a", LifecycleEvent::HistoryCleared);
        assert_eq!(describe(&cleared), "history_cleared");

        let user = AgentEvent::new("a", Message::user("hello"));
        assert!(describe(&user).starts_with("user_message"));
    }

    #[tokio::test]
    async fn test_load_both_formats() {
        let mut jsonl = tempfile::NamedTempFile::new().unwrap();
        for event in [RawStreamEvent::message_start("m1", "x"), RawStreamEvent::message_stop()] {
            writeln!(jsonl, "{}", serde_json::to_string(&event).unwrap()).unwrap();
        }
        let from_jsonl = load_recording(jsonl.path(), RecordingFormat::Jsonl).await.unwrap();
        assert_eq!(from_jsonl.len(), 2);

        let mut sse = tempfile::NamedTempFile::new().unwrap();
        for event in &from_jsonl {
            write!(
                sse,
                "event: {}\ndata: {}\n\n",
                event.type_name(),
                serde_json::to_string(event).unwrap()
            )
            .unwrap();
        }
        let from_sse = load_recording(sse.path(), RecordingFormat::Sse).await.unwrap();
        assert_eq!(from_sse, from_jsonl);
    }
}
