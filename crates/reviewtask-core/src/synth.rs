//! Task synthesis: normalized units → candidate tasks.
//!
//! Pure and deterministic. Whether a unit yields zero, one, or several
//! tasks is decided by a pluggable [`Classifier`]; when the classifier
//! cannot decide, the unit becomes exactly one task.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::errors::{CoreError, CoreResult};
use crate::ids::task_id;
use crate::model::{PullRequestRef, Task, TaskStatus};
use crate::normalize::NormalizedUnit;

/// How many tasks a unit should produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Nothing actionable ("LGTM", "thanks", a lone emoji).
    Acknowledgment,
    /// One task for the whole unit.
    Single,
    /// One task per listed item.
    Multiple(Vec<String>),
}

/// Decides how a unit maps to tasks.
///
/// Implementations return `CoreError::ClassificationAmbiguous` when unsure;
/// the synthesizer then falls back to [`Classification::Single`].
pub trait Classifier {
    fn classify(&self, unit: &NormalizedUnit) -> CoreResult<Classification>;
}

/// Phrases that carry no action on their own, after punctuation is
/// stripped (so `+1` is matched as `1`).
const ACK_PHRASES: &[&str] = &[
    "lgtm",
    "looks good",
    "looks good to me",
    "looks great",
    "ship it",
    "approved",
    "thanks",
    "thank you",
    "nice",
    "nice work",
    "great work",
    "done",
    "1",
];

/// Keyword heuristics for acknowledgments, plus optional itemized-list
/// splitting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeuristicClassifier {
    /// Split bodies made of list items into one task per item.
    pub split_itemized: bool,
}

impl HeuristicClassifier {
    #[must_use]
    pub const fn new(split_itemized: bool) -> Self {
        Self { split_itemized }
    }
}

impl Classifier for HeuristicClassifier {
    fn classify(&self, unit: &NormalizedUnit) -> CoreResult<Classification> {
        if is_acknowledgment(&unit.body) {
            return Ok(Classification::Acknowledgment);
        }
        if !self.split_itemized {
            return Ok(Classification::Single);
        }

        let mut items = Vec::new();
        let mut prose = 0usize;
        let mut prose_after_items = false;
        for line in unit.body.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(item) = list_item(line) {
                items.push(item.to_string());
            } else {
                prose += 1;
                prose_after_items |= !items.is_empty();
            }
        }

        match items.len() {
            0 | 1 => Ok(Classification::Single),
            // A single intro line ("A few things:") is fine; anything more is
            // prose mixed with the list and we cannot tell what is actionable.
            _ if prose > 1 || prose_after_items => Err(CoreError::ClassificationAmbiguous {
                thread_id: unit.thread_id.clone(),
            }),
            _ => Ok(Classification::Multiple(items)),
        }
    }
}

/// True when `body` has no content beyond acknowledgment phrases,
/// punctuation, and emoji.
fn is_acknowledgment(body: &str) -> bool {
    let words: String = strip_markup(body)
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    let normalized = words.split_whitespace().collect::<Vec<_>>().join(" ");

    normalized.is_empty() || ACK_PHRASES.contains(&normalized.as_str())
}

/// Text of a markdown list item (`-`, `*`, `+`, `1.`, `1)`, with optional
/// task checkbox), or `None`.
fn list_item(line: &str) -> Option<&str> {
    let rest = if let Some(rest) = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("+ "))
    {
        rest
    } else {
        let digits = line.chars().take_while(char::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        let after = &line[digits..];
        after
            .strip_prefix(". ")
            .or_else(|| after.strip_prefix(") "))?
    };

    let rest = rest.trim_start();
    let rest = ["[ ] ", "[x] ", "[X] "]
        .iter()
        .find_map(|box_| rest.strip_prefix(box_))
        .unwrap_or(rest)
        .trim();
    (!rest.is_empty()).then_some(rest)
}

/// Remove HTML comments and replace suggestion blocks with a marker.
fn strip_markup(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        match rest[start..].find("-->") {
            Some(end) => rest = &rest[start + end + 3..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);

    let mut cleaned = String::with_capacity(out.len());
    let mut in_suggestion = false;
    for line in out.lines() {
        let trimmed = line.trim();
        if in_suggestion {
            if trimmed.starts_with("```") {
                in_suggestion = false;
            }
            continue;
        }
        if trimmed.starts_with("```suggestion") {
            in_suggestion = true;
            cleaned.push_str("(suggested change)\n");
            continue;
        }
        cleaned.push_str(line);
        cleaned.push('\n');
    }
    cleaned
}

/// Turn a comment body into a one-line task description.
///
/// Strips markup, collapses whitespace, and truncates to `max_chars`
/// (counted in characters, ellipsis included). `max_chars == 0` disables
/// truncation.
#[must_use]
pub fn clean_description(body: &str, max_chars: usize) -> String {
    let collapsed = strip_markup(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if max_chars == 0 || collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(max_chars.saturating_sub(1)).collect();
    truncated = truncated.trim_end().to_string();
    truncated.push('…');
    truncated
}

/// Synthesis settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthOptions {
    pub max_description_chars: usize,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            max_description_chars: 200,
        }
    }
}

/// Maps normalized units to candidate tasks.
pub struct Synthesizer<'a> {
    classifier: &'a dyn Classifier,
    options: SynthOptions,
}

impl<'a> Synthesizer<'a> {
    #[must_use]
    pub fn new(classifier: &'a dyn Classifier, options: SynthOptions) -> Self {
        Self {
            classifier,
            options,
        }
    }

    /// Produce candidate tasks, in unit order.
    ///
    /// Every candidate is `pending` with `created_at == updated_at == now`;
    /// the reconciler decides what survives from persisted state.
    #[must_use]
    pub fn synthesize(
        &self,
        pr: &PullRequestRef,
        units: &[NormalizedUnit],
        now: DateTime<Utc>,
    ) -> Vec<Task> {
        let mut seen = HashSet::new();
        let mut tasks = Vec::new();

        for unit in units {
            let classification = match self.classifier.classify(unit) {
                Ok(c) => c,
                Err(err) => {
                    tracing::debug!(thread_id = %unit.thread_id, %err, "falling back to one task");
                    Classification::Single
                }
            };

            let bodies: Vec<String> = match classification {
                Classification::Acknowledgment => continue,
                Classification::Single => vec![unit.body.clone()],
                Classification::Multiple(items) => items,
            };

            for (item, body) in bodies.iter().enumerate() {
                let source_comment_ids = std::iter::once(unit.anchor_id.clone()).collect();
                let id = task_id([unit.anchor_id.as_str()], item);
                if !seen.insert(id.clone()) {
                    continue;
                }
                tasks.push(Task {
                    id,
                    source_pr: pr.clone(),
                    source_comment_ids,
                    item,
                    description: clean_description(body, self.options.max_description_chars),
                    path: unit.path.clone(),
                    line: unit.line,
                    author: unit.author.clone(),
                    status: TaskStatus::Pending,
                    created_at: now,
                    updated_at: now,
                    user_notes: None,
                });
            }
        }

        tasks
    }
}
