// SPDX-License-Identifier: MIT

//! Conversation history for LLM nodes
//!
//! `HistoryMode` selects where context comes from. Windowed mode bounds the
//! run conversation by round count and an approximate token budget, always
//! cutting whole rounds from the oldest end.

use crate::adk::model::{HistoryTurn, Role};
use serde::{Deserialize, Serialize};

/// Active history strategy of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum HistoryMode {
    /// No history is sent
    #[default]
    Disabled,
    /// The node's stored turns, unmodified
    Legacy,
    /// The run conversation, bounded by `rounds` and `max_tokens`
    Windowed { rounds: usize, max_tokens: usize },
}

/// Estimates the token count (~4 chars per token, rounded up)
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

fn turns_tokens(turns: &[HistoryTurn]) -> usize {
    turns.iter().map(|t| estimate_tokens(&t.content)).sum()
}

/// Split `turns` into windowing units: `(start, len)` pairs.
///
/// A user turn directly followed by an assistant turn is one round; any other
/// turn stands alone.
fn units(turns: &[HistoryTurn]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < turns.len() {
        let paired = turns[i].role == Role::User
            && turns.get(i + 1).is_some_and(|t| t.role == Role::Assistant);
        let len = if paired { 2 } else { 1 };
        out.push((i, len));
        i += len;
    }
    out
}

/// Keep at most `max_rounds` recent rounds, then drop the oldest rounds while
/// the estimate exceeds `max_tokens`. A trailing unpaired user turn is always
/// kept and never counted as a round.
pub fn window(turns: &[HistoryTurn], max_tokens: usize, max_rounds: usize) -> Vec<HistoryTurn> {
    let (body, pending) = match turns.last() {
        Some(last) if last.role == Role::User => (&turns[..turns.len() - 1], Some(last)),
        _ => (turns, None),
    };

    let units = units(body);
    let mut first = units.len().saturating_sub(max_rounds);

    let pending_tokens = pending.map_or(0, |t| estimate_tokens(&t.content));
    let mut tokens = pending_tokens
        + units[first..]
            .iter()
            .map(|&(start, len)| turns_tokens(&body[start..start + len]))
            .sum::<usize>();

    while first < units.len() && tokens > max_tokens {
        let (start, len) = units[first];
        tokens -= turns_tokens(&body[start..start + len]);
        first += 1;
    }

    let keep_from = units.get(first).map_or(body.len(), |&(start, _)| start);
    let mut out = body[keep_from..].to_vec();
    out.extend(pending.cloned());

    if out.len() < turns.len() {
        log::debug!(
            "History windowed from {} to {} turns (~{} tokens)",
            turns.len(),
            out.len(),
            tokens
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(rounds: usize) -> Vec<HistoryTurn> {
        (0..rounds)
            .flat_map(|i| {
                [
                    HistoryTurn::user(format!("question {}", i)),
                    HistoryTurn::assistant(format!("answer {}", i)),
                ]
            })
            .collect()
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_round_limit_keeps_most_recent() {
        let turns = conversation(5);
        let out = window(&turns, usize::MAX, 2);
        assert_eq!(out, turns[6..].to_vec());
        assert_eq!(out[0].content, "question 3");
    }

    #[test]
    fn test_token_budget_drops_whole_rounds() {
        // "question N" is 3 tokens, "answer N" 2: 5 per round
        let turns = conversation(4);
        let out = window(&turns, 13, 10);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].content, "question 2");
        assert_eq!(out[3].content, "answer 3");
        assert!(turns_tokens(&out) <= 13);
    }

    #[test]
    fn test_trailing_user_turn_always_kept() {
        let mut turns = conversation(2);
        turns.push(HistoryTurn::user("x".repeat(400)));

        let out = window(&turns, 10, 5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, Role::User);
        assert_eq!(out[0].content.len(), 400);

        let out = window(&turns, usize::MAX, 0);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_windowing_is_idempotent() {
        let mut turns = conversation(6);
        turns.insert(3, HistoryTurn::user("dangling"));
        turns.push(HistoryTurn::user("pending question"));

        for (budget, rounds) in [(0, 0), (5, 3), (12, 2), (20, 10), (1000, 1), (1000, 100)] {
            let once = window(&turns, budget, rounds);
            let twice = window(&once, budget, rounds);
            assert_eq!(once, twice, "budget={} rounds={}", budget, rounds);
        }
    }

    #[test]
    fn test_orphan_turns_are_single_units() {
        let turns = vec![
            HistoryTurn::assistant("greeting"),
            HistoryTurn::user("a"),
            HistoryTurn::user("b"),
            HistoryTurn::assistant("c"),
        ];
        assert_eq!(units(&turns), vec![(0, 1), (1, 1), (2, 2)]);

        let out = window(&turns, usize::MAX, 1);
        assert_eq!(out, turns[2..].to_vec());
    }

    #[test]
    fn test_empty_history() {
        assert!(window(&[], 10, 3).is_empty());
    }

    #[test]
    fn test_history_mode_serde() {
        let mode: HistoryMode =
            serde_json::from_str(r#"{"mode": "windowed", "rounds": 3, "max_tokens": 100}"#)
                .unwrap();
        assert_eq!(
            mode,
            HistoryMode::Windowed {
                rounds: 3,
                max_tokens: 100
            }
        );
        assert_eq!(HistoryMode::default(), HistoryMode::Disabled);
    }
}
