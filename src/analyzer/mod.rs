//! Response Analyzer: classifies an agent's complete textual output into a
//! verdict (spec §4.4).

use crate::models::{AgentEvent, Analysis, AnalysisKind};

const START_MARKER: &str = "---HERMES_STATUS---";
const END_MARKER: &str = "---END_HERMES_STATUS---";

#[derive(Debug, Default, Clone)]
struct StatusBlock {
    status: Option<AnalysisKind>,
    exit_signal: Option<bool>,
    recommendation: String,
}

/// Stateless classifier; one instance is shared across tasks.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseAnalyzer;

impl ResponseAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Classifies one agent execution's transcript (spec §4.4). `events`
    /// supplies the tool-use signals the heuristic fallback needs when no
    /// status block is present.
    pub fn analyze(
        &self,
        transcript: &str,
        events: &[AgentEvent],
        success_criteria: &[String],
    ) -> Analysis {
        let criteria_met = count_criteria_met(transcript, success_criteria);
        let criteria_total = success_criteria.len();
        let wrote_files = events.iter().any(is_file_write);

        if let Some(block) = last_well_formed_block(transcript) {
            let kind = block.status.expect("well-formed block always has a status");
            let has_progress =
                matches!(kind, AnalysisKind::Complete | AnalysisKind::InProgress)
                    || wrote_files
                    || criteria_met > 0;
            return Analysis {
                kind,
                has_progress,
                confidence: 1.0,
                criteria_met,
                criteria_total,
                recommendation: block.recommendation,
            };
        }

        // No authoritative block: heuristic classification. The verdict
        // kind is always UNKNOWN here (spec §4.4) — keyword signals only
        // feed hasProgress/confidence, never an automatic COMPLETE/BLOCKED.
        let lower = transcript.to_ascii_lowercase();
        let mentions_completed = lower.contains("completed") || lower.contains("done");
        let mentions_blocked =
            lower.contains("blocked") || lower.contains("waiting") || lower.contains("paused");
        let mentions_in_progress = lower.contains("in progress") || lower.contains("in_progress");

        let signals = [
            mentions_completed,
            mentions_blocked,
            mentions_in_progress,
            wrote_files,
            criteria_met > 0,
        ];
        let signal_count = signals.iter().filter(|s| **s).count();

        let has_progress = wrote_files || criteria_met > 0 || mentions_in_progress;
        let confidence = (signal_count as f64 * 0.15).min(0.6);

        Analysis {
            kind: AnalysisKind::Unknown,
            has_progress,
            confidence,
            criteria_met,
            criteria_total,
            recommendation: "no HERMES_STATUS block found; classified heuristically".to_string(),
        }
    }
}

fn is_file_write(event: &AgentEvent) -> bool {
    match event {
        AgentEvent::ToolUse { name, .. } => {
            let n = name.to_ascii_lowercase();
            n.contains("write") || n.contains("edit") || n.contains("create")
        }
        AgentEvent::ToolResult { is_error, .. } => !is_error,
        _ => false,
    }
}

fn canonicalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

fn count_criteria_met(transcript: &str, criteria: &[String]) -> usize {
    let haystack = canonicalize(transcript);
    criteria
        .iter()
        .filter(|c| haystack.contains(&canonicalize(c)))
        .count()
}

/// Line-oriented state machine over the transcript, tolerant of LF and
/// CRLF line endings (spec §9). Deliberately avoids a global regex so a
/// status block template quoted inside a nested code fence cannot be
/// mistaken for the real thing unless it parses as a complete block; when
/// more than one well-formed block is present, the last one wins (the
/// genuine trailing status rather than an echoed instruction template).
fn last_well_formed_block(transcript: &str) -> Option<StatusBlock> {
    let mut last: Option<StatusBlock> = None;
    let mut current: Option<StatusBlock> = None;

    for raw_line in transcript.lines() {
        let line = raw_line.trim_end_matches('\r');
        let trimmed = line.trim();

        if trimmed == START_MARKER {
            current = Some(StatusBlock::default());
            continue;
        }
        if trimmed == END_MARKER {
            if let Some(block) = current.take() {
                if block.status.is_some() {
                    last = Some(block);
                }
            }
            continue;
        }

        if let Some(block) = current.as_mut() {
            if let Some((key, value)) = split_key_value(trimmed) {
                match key.as_str() {
                    "status" => block.status = AnalysisKind::parse(&value),
                    "exit_signal" => {
                        block.exit_signal = Some(value.eq_ignore_ascii_case("true"))
                    }
                    "recommendation" => block.recommendation = value,
                    _ => {}
                }
            } else if !trimmed.is_empty() && !block.recommendation.is_empty() {
                block.recommendation.push(' ');
                block.recommendation.push_str(trimmed);
            }
        }
    }

    last
}

fn split_key_value(line: &str) -> Option<(String, String)> {
    let idx = line.find(':')?;
    let key = line[..idx].trim().to_ascii_lowercase();
    if !matches!(key.as_str(), "status" | "exit_signal" | "recommendation") {
        return None;
    }
    let value = line[idx + 1..].trim().to_string();
    Some((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(status: &str) -> String {
        format!(
            "Some preamble text.\n---HERMES_STATUS---\nSTATUS: {status}\nEXIT_SIGNAL: true\nRECOMMENDATION: looks good\n---END_HERMES_STATUS---\ntrailing\n"
        )
    }

    #[test]
    fn authoritative_block_wins_regardless_of_other_text() {
        let analyzer = ResponseAnalyzer::new();
        let transcript = format!("completed nothing actually {}", block("BLOCKED"));
        let analysis = analyzer.analyze(&transcript, &[], &[]);
        assert_eq!(analysis.kind, AnalysisKind::Blocked);
        assert_eq!(analysis.confidence, 1.0);
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        let analyzer = ResponseAnalyzer::new();
        let transcript = block("COMPLETE").replace('\n', "\r\n");
        let analysis = analyzer.analyze(&transcript, &[], &[]);
        assert_eq!(analysis.kind, AnalysisKind::Complete);
    }

    #[test]
    fn keys_are_case_insensitive() {
        let analyzer = ResponseAnalyzer::new();
        let transcript =
            "---HERMES_STATUS---\nstatus: complete\nexit_signal: TRUE\nrecommendation: ok\n---END_HERMES_STATUS---";
        let analysis = analyzer.analyze(transcript, &[], &[]);
        assert_eq!(analysis.kind, AnalysisKind::Complete);
    }

    #[test]
    fn last_block_wins_when_template_is_echoed() {
        let analyzer = ResponseAnalyzer::new();
        let echoed_template = "Here is the format:\n---HERMES_STATUS---\nSTATUS: <one of ...>\n---END_HERMES_STATUS---\n";
        let real = block("PAUSED");
        let transcript = format!("{echoed_template}{real}");
        let analysis = analyzer.analyze(&transcript, &[], &[]);
        assert_eq!(analysis.kind, AnalysisKind::Paused);
    }

    #[test]
    fn missing_block_falls_back_to_unknown_heuristic() {
        let analyzer = ResponseAnalyzer::new();
        let analysis = analyzer.analyze("I finished the task, all done.", &[], &[]);
        assert_eq!(analysis.kind, AnalysisKind::Unknown);
        assert!(analysis.confidence < 1.0);
    }

    #[test]
    fn criteria_matching_is_case_and_whitespace_insensitive() {
        let analyzer = ResponseAnalyzer::new();
        let criteria = vec!["Unit   tests   PASS".to_string(), "docs updated".to_string()];
        let analysis = analyzer.analyze("all unit tests pass now", &[], &criteria);
        assert_eq!(analysis.criteria_met, 1);
        assert_eq!(analysis.criteria_total, 2);
    }

    #[test]
    fn file_write_tool_use_implies_progress_in_heuristic_path() {
        let analyzer = ResponseAnalyzer::new();
        let events = vec![AgentEvent::ToolUse {
            name: "write_file".to_string(),
            id: "1".to_string(),
            input: serde_json::json!({"path": "src/lib.rs"}),
        }];
        let analysis = analyzer.analyze("working on it", &events, &[]);
        assert!(analysis.has_progress);
    }
}
