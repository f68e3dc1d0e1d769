// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Decoder and accumulator behaviour under arbitrary chunking.

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use toolstream::llm::mock_provider::sse;
use toolstream::stream::{FinishReason, SseDecoder, StreamDelta, ToolCallAccumulator};

/// Split `s` into fragments at the given char offsets.
fn fragment(s: &str, cuts: &[usize]) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    let mut offsets: Vec<usize> = cuts.iter().map(|c| c % (chars.len() + 1)).collect();
    offsets.push(0);
    offsets.push(chars.len());
    offsets.sort_unstable();
    offsets.dedup();
    offsets
        .windows(2)
        .map(|w| chars[w[0]..w[1]].iter().collect())
        .collect()
}

/// Split `bytes` into chunks at the given byte offsets, ignoring UTF-8.
fn chunk(bytes: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut offsets: Vec<usize> = cuts.iter().map(|c| c % (bytes.len() + 1)).collect();
    offsets.push(0);
    offsets.push(bytes.len());
    offsets.sort_unstable();
    offsets.dedup();
    offsets.windows(2).map(|w| bytes[w[0]..w[1]].to_vec()).collect()
}

fn decode_all(chunks: &[Vec<u8>]) -> Vec<StreamDelta> {
    let mut decoder = SseDecoder::new();
    let mut deltas = Vec::new();
    for chunk in chunks {
        deltas.extend(decoder.push(chunk).unwrap());
    }
    deltas.extend(decoder.finish().unwrap());
    deltas
}

fn arguments_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z_]{1,8}", "[a-zA-Z0-9 é漢\"\\\\{}:,]{0,12}", 0..5)
        .prop_map(|map| Value::Object(map.into_iter().map(|(k, v)| (k, Value::String(v))).collect::<Map<_, _>>()))
}

proptest! {
    #[test]
    fn arguments_survive_any_chunking(
        arguments in arguments_strategy(),
        arg_cuts in prop::collection::vec(any::<usize>(), 0..6),
        byte_cuts in prop::collection::vec(any::<usize>(), 0..12),
        keep_alive in any::<bool>(),
    ) {
        let text = arguments.to_string();
        let pieces = fragment(&text, &arg_cuts);

        let mut frames = vec![sse::tool_call_start(0, "call_1", "query", &pieces[0])];
        for piece in &pieces[1..] {
            if keep_alive {
                frames.push(sse::keep_alive());
            }
            frames.push(sse::tool_call_args(0, piece));
        }
        frames.push(sse::finish("tool_calls"));
        frames.push(sse::done());

        let body = frames.concat();
        let deltas = decode_all(&chunk(body.as_bytes(), &byte_cuts));

        let mut accumulator = ToolCallAccumulator::new();
        let mut finish = None;
        for delta in deltas {
            match delta {
                StreamDelta::ToolCall(call) => accumulator.push(call),
                StreamDelta::Finish(reason) => finish = Some(reason),
                _ => {}
            }
        }

        prop_assert_eq!(finish, Some(FinishReason::ToolCalls));
        let calls = accumulator.drain();
        prop_assert_eq!(calls.len(), 1);
        prop_assert_eq!(&calls[0].id, "call_1");
        prop_assert_eq!(&calls[0].raw_arguments, &text);
        prop_assert_eq!(calls[0].arguments.as_ref().unwrap(), &arguments);
    }

    #[test]
    fn text_survives_any_chunking(
        words in prop::collection::vec("[a-zA-Zé漢]{1,6}", 1..8),
        byte_cuts in prop::collection::vec(any::<usize>(), 0..12),
    ) {
        let content = words.join(" ");
        let body = sse::text_response(&content).concat();
        let deltas = decode_all(&chunk(body.as_bytes(), &byte_cuts));

        let text: String = deltas
            .iter()
            .filter_map(|d| match d {
                StreamDelta::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        prop_assert_eq!(text, content);
        prop_assert_eq!(deltas.last(), Some(&StreamDelta::Done));
    }
}

#[test]
fn test_interleaved_calls_resolve_in_index_order() {
    let body = [
        sse::tool_call_start(1, "call_b", "second", "{\"n\":"),
        sse::tool_call_start(0, "call_a", "first", "{}"),
        sse::tool_call_args(1, "2}"),
        sse::finish("tool_calls"),
    ]
    .concat();

    let mut accumulator = ToolCallAccumulator::new();
    for delta in decode_all(&[body.into_bytes()]) {
        if let StreamDelta::ToolCall(call) = delta {
            accumulator.push(call);
        }
    }

    let calls = accumulator.drain();
    assert_eq!(calls[0].name, "first");
    assert_eq!(calls[1].name, "second");
    assert_eq!(calls[1].arguments.as_ref().unwrap(), &json!({"n": 2}));
}

#[test]
fn test_crlf_frames_and_comments() {
    let body = ": ping\r\n\r\ndata: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\r\n\r\ndata: [DONE]\r\n\r\n";
    let deltas = decode_all(&[body.as_bytes().to_vec()]);
    assert_eq!(
        deltas,
        vec![StreamDelta::Text("hi".to_string()), StreamDelta::Done]
    );
}

#[test]
fn test_in_band_error_becomes_error_finish() {
    let deltas = decode_all(&[sse::error("upstream overloaded").into_bytes()]);
    assert!(matches!(
        deltas.as_slice(),
        [StreamDelta::Finish(FinishReason::Error(message))] if message.contains("upstream overloaded")
    ));
}
