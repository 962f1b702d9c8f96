//! Stream-to-State transformer.
//!
//! Classifies each raw event against the currently open content block and
//! produces at most one normalized [`StreamEvent`] for it.

use agentwire_core::error::{AgentwireError, Result};
use agentwire_core::raw::{RawContentBlock, RawDelta, RawStreamEvent};
use agentwire_core::stream::StreamEvent;
use tracing::{debug, trace};

/// Kind of the content block currently open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlockKind {
    #[default]
    None,
    Text,
    ToolUse,
}

/// Per-request block tracking. Reset at every `message_start`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentBlockContext {
    pub block_kind: BlockKind,
    pub block_index: Option<usize>,
    pub tool_id: Option<String>,
    /// Id of the last started message. Kept after `message_stop` so a
    /// duplicated stop still names the message it belongs to.
    pub message_id: Option<String>,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
}

impl ContentBlockContext {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn close_block(&mut self) {
        self.block_kind = BlockKind::None;
        self.block_index = None;
        self.tool_id = None;
    }
}

/// Raw event to Stream event translator for one in-flight request.
#[derive(Debug, Default)]
pub struct StreamTransformer {
    context: ContentBlockContext,
}

impl StreamTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(&self) -> &ContentBlockContext {
        &self.context
    }

    /// Prepare for a new request.
    pub fn reset(&mut self) {
        self.context.reset();
    }

    /// Translate one raw event.
    ///
    /// Each raw event maps to zero or one Stream event. A synthetic
    /// assistant message is the backend reporting a failure; it comes back
    /// as [`AgentwireError::Driver`] and the caller should stop the pass.
    pub fn transform(&mut self, raw: &RawStreamEvent) -> Result<Option<StreamEvent>> {
        trace!(raw_type = raw.type_name(), "Transforming raw event");
        let ctx = &mut self.context;

        let event = match raw {
            RawStreamEvent::MessageStart { message } => {
                ctx.reset();
                ctx.message_id = Some(message.id.clone());
                Some(StreamEvent::MessageStart {
                    message_id: message.id.clone(),
                    model: message.model.clone(),
                })
            }

            RawStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                ctx.block_index = Some(*index);
                match content_block {
                    RawContentBlock::Text { .. } => {
                        ctx.block_kind = BlockKind::Text;
                        ctx.tool_id = None;
                        Some(StreamEvent::TextBlockStart { index: *index })
                    }
                    RawContentBlock::ToolUse { id, name, .. } => {
                        ctx.block_kind = BlockKind::ToolUse;
                        ctx.tool_id = Some(id.clone());
                        Some(StreamEvent::ToolBlockStart {
                            tool_id: id.clone(),
                            tool_name: name.clone(),
                        })
                    }
                    RawContentBlock::Unsupported => {
                        debug!(index, "Ignoring unsupported content block");
                        ctx.block_kind = BlockKind::None;
                        ctx.tool_id = None;
                        None
                    }
                }
            }

            RawStreamEvent::ContentBlockDelta { index, delta } => {
                if ctx.block_index != Some(*index) {
                    debug!(index, open = ?ctx.block_index, "Delta for a block that is not open");
                    return Ok(None);
                }
                match (ctx.block_kind, delta) {
                    (BlockKind::Text, RawDelta::TextDelta { text }) => {
                        Some(StreamEvent::TextDelta { text: text.clone() })
                    }
                    (BlockKind::ToolUse, RawDelta::InputJsonDelta { partial_json }) => {
                        ctx.tool_id.clone().map(|tool_id| StreamEvent::ToolInputDelta {
                            tool_id,
                            partial_json: partial_json.clone(),
                        })
                    }
                    _ => None,
                }
            }

            RawStreamEvent::ContentBlockStop { index } => {
                if ctx.block_index != Some(*index) {
                    debug!(index, open = ?ctx.block_index, "Stop for a block that is not open");
                    return Ok(None);
                }
                let event = match (ctx.block_kind, ctx.tool_id.take()) {
                    (BlockKind::ToolUse, Some(tool_id)) => Some(StreamEvent::ToolBlockStop { tool_id }),
                    (BlockKind::Text, _) => Some(StreamEvent::TextBlockStop { index: *index }),
                    _ => None,
                };
                ctx.close_block();
                event
            }

            RawStreamEvent::MessageDelta { delta, .. } => {
                if delta.stop_reason.is_some() {
                    ctx.stop_reason = delta.stop_reason.clone();
                }
                if delta.stop_sequence.is_some() {
                    ctx.stop_sequence = delta.stop_sequence.clone();
                }
                None
            }

            RawStreamEvent::MessageStop => match ctx.message_id.clone() {
                Some(message_id) => Some(StreamEvent::MessageStop {
                    message_id,
                    stop_reason: ctx.stop_reason.take(),
                    stop_sequence: ctx.stop_sequence.take(),
                }),
                None => {
                    debug!("message_stop without a preceding message_start");
                    None
                }
            },

            RawStreamEvent::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some(StreamEvent::ToolResult {
                tool_id: tool_use_id.clone(),
                content: content.clone(),
                is_error: *is_error,
            }),

            RawStreamEvent::Assistant {
                synthetic: true,
                text,
                error,
            } => {
                let reason = error
                    .clone()
                    .or_else(|| text.clone())
                    .unwrap_or_else(|| "backend reported a synthetic failure".to_string());
                return Err(AgentwireError::Driver(reason));
            }

            RawStreamEvent::Assistant { synthetic: false, .. }
            | RawStreamEvent::Ping
            | RawStreamEvent::Unknown => None,
        };

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(raws: &[RawStreamEvent]) -> Vec<StreamEvent> {
        let mut transformer = StreamTransformer::new();
        raws.iter()
            .filter_map(|raw| transformer.transform(raw).unwrap())
            .collect()
    }

    #[test]
    fn test_text_message() {
        let events = run(&[
            RawStreamEvent::message_start("m1", "model-x"),
            RawStreamEvent::text_block_start(0),
            RawStreamEvent::text_delta(0, "Hi"),
            RawStreamEvent::text_delta(0, " there"),
            RawStreamEvent::block_stop(0),
            RawStreamEvent::stop_reason("end_turn"),
            RawStreamEvent::message_stop(),
        ]);

        assert_eq!(
            events,
            vec![
                StreamEvent::MessageStart {
                    message_id: "m1".into(),
                    model: "model-x".into()
                },
                StreamEvent::TextBlockStart { index: 0 },
                StreamEvent::TextDelta { text: "Hi".into() },
                StreamEvent::TextDelta {
                    text: " there".into()
                },
                StreamEvent::TextBlockStop { index: 0 },
                StreamEvent::MessageStop {
                    message_id: "m1".into(),
                    stop_reason: Some("end_turn".into()),
                    stop_sequence: None
                },
            ]
        );
    }

    #[test]
    fn test_tool_block() {
        let events = run(&[
            RawStreamEvent::message_start("m1", ""),
            RawStreamEvent::tool_use_start(1, "toolu_1", "get_weather"),
            RawStreamEvent::input_json_delta(1, r#"{"loc"#),
            RawStreamEvent::input_json_delta(1, r#"ation":"SF"}"#),
            RawStreamEvent::block_stop(1),
        ]);

        assert_eq!(events.len(), 5);
        assert_eq!(
            events[1],
            StreamEvent::ToolBlockStart {
                tool_id: "toolu_1".into(),
                tool_name: "get_weather".into()
            }
        );
        assert_eq!(
            events[3],
            StreamEvent::ToolInputDelta {
                tool_id: "toolu_1".into(),
                partial_json: r#"ation":"SF"}"#.into()
            }
        );
        assert_eq!(
            events[4],
            StreamEvent::ToolBlockStop {
                tool_id: "toolu_1".into()
            }
        );
    }

    #[test]
    fn test_block_stop_clears_context() {
        let mut transformer = StreamTransformer::new();
        transformer
            .transform(&RawStreamEvent::message_start("m1", ""))
            .unwrap();
        transformer
            .transform(&RawStreamEvent::tool_use_start(0, "toolu_1", "search"))
            .unwrap();
        assert_eq!(transformer.context().block_kind, BlockKind::ToolUse);

        transformer.transform(&RawStreamEvent::block_stop(0)).unwrap();
        let ctx = transformer.context();
        assert_eq!(ctx.block_kind, BlockKind::None);
        assert!(ctx.tool_id.is_none());
        assert!(ctx.block_index.is_none());
        assert_eq!(ctx.message_id.as_deref(), Some("m1"));
    }

    #[test]
    fn test_mismatched_deltas_are_ignored() {
        let events = run(&[
            RawStreamEvent::message_start("m1", ""),
            RawStreamEvent::text_block_start(0),
            // JSON fragment inside a text block
            RawStreamEvent::input_json_delta(0, "{}"),
            // delta for a block index that is not open
            RawStreamEvent::text_delta(3, "stray"),
            RawStreamEvent::ContentBlockDelta {
                index: 0,
                delta: RawDelta::Unsupported,
            },
        ]);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_stop_for_unopened_block_is_ignored() {
        let mut transformer = StreamTransformer::new();
        transformer
            .transform(&RawStreamEvent::message_start("m1", ""))
            .unwrap();
        transformer
            .transform(&RawStreamEvent::tool_use_start(1, "toolu_1", "search"))
            .unwrap();

        assert_eq!(transformer.transform(&RawStreamEvent::block_stop(0)).unwrap(), None);
        assert_eq!(transformer.context().block_index, Some(1));
        assert_eq!(transformer.context().tool_id.as_deref(), Some("toolu_1"));

        assert_eq!(
            transformer.transform(&RawStreamEvent::block_stop(1)).unwrap(),
            Some(StreamEvent::ToolBlockStop {
                tool_id: "toolu_1".into()
            })
        );
        // A repeated stop finds nothing open.
        assert_eq!(transformer.transform(&RawStreamEvent::block_stop(1)).unwrap(), None);
    }

    #[test]
    fn test_stop_reason_is_deferred_to_message_stop() {
        let mut transformer = StreamTransformer::new();
        transformer
            .transform(&RawStreamEvent::message_start("m1", ""))
            .unwrap();
        let deferred = transformer
            .transform(&RawStreamEvent::MessageDelta {
                delta: agentwire_core::raw::RawMessageDelta {
                    stop_reason: Some("stop_sequence".into()),
                    stop_sequence: Some("###".into()),
                },
                usage: None,
            })
            .unwrap();
        assert!(deferred.is_none());

        let stop = transformer.transform(&RawStreamEvent::message_stop()).unwrap();
        assert_eq!(
            stop,
            Some(StreamEvent::MessageStop {
                message_id: "m1".into(),
                stop_reason: Some("stop_sequence".into()),
                stop_sequence: Some("###".into()),
            })
        );
        assert!(transformer.context().stop_reason.is_none());

        // A duplicated stop still names the message but carries no reason.
        let duplicate = transformer.transform(&RawStreamEvent::message_stop()).unwrap();
        assert_eq!(
            duplicate,
            Some(StreamEvent::MessageStop {
                message_id: "m1".into(),
                stop_reason: None,
                stop_sequence: None,
            })
        );
    }

    #[test]
    fn test_message_delta_without_stop_emits_nothing() {
        let mut transformer = StreamTransformer::new();
        let event = transformer
            .transform(&RawStreamEvent::MessageDelta {
                delta: Default::default(),
                usage: None,
            })
            .unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_message_stop_without_start_is_dropped() {
        let mut transformer = StreamTransformer::new();
        assert!(transformer.transform(&RawStreamEvent::message_stop()).unwrap().is_none());
    }

    #[test]
    fn test_synthetic_assistant_is_an_error() {
        let mut transformer = StreamTransformer::new();
        let err = transformer
            .transform(&RawStreamEvent::synthetic_error("rate limited"))
            .unwrap_err();
        assert!(matches!(err, AgentwireError::Driver(ref m) if m == "rate limited"));

        let real = RawStreamEvent::Assistant {
            synthetic: false,
            text: Some("full text".into()),
            error: None,
        };
        assert!(transformer.transform(&real).unwrap().is_none());
    }

    #[test]
    fn test_in_stream_tool_result() {
        let events = run(&[RawStreamEvent::tool_result("toolu_9", "done", true)]);
        assert_eq!(
            events,
            vec![StreamEvent::ToolResult {
                tool_id: "toolu_9".into(),
                content: "done".into(),
                is_error: true
            }]
        );
    }
}
