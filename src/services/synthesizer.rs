//! Merges completed subtask outputs into one coherent result.

use std::collections::{HashMap, HashSet};

use crate::domain::subtask::{Subtask, SubtaskResult};

/// How a completed subtask's output was folded into the synthesized result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    Concatenation,
    Deduplication,
    StructuredMerge,
}

/// A detected disagreement between two completed subtasks over the same piece of work.
#[derive(Debug, Clone)]
pub enum Conflict {
    /// Two subtasks both claim to have modified the same file with divergent content.
    CodeOverlap { file: String, task_a: uuid::Uuid, task_b: uuid::Uuid },
    /// Two outputs assert opposite things about the same subject.
    LogicalContradiction { task_a: uuid::Uuid, task_b: uuid::Uuid },
    /// Two outputs of similar length but low textual similarity, suggesting divergent
    /// approaches to the same piece of work rather than a straightforward duplication.
    ApproachMismatch { task_a: uuid::Uuid, task_b: uuid::Uuid },
}

/// How a conflict was resolved.
#[derive(Debug, Clone)]
pub enum Resolution {
    HighestConfidence { winner: uuid::Uuid },
    HighestAuthority { winner: uuid::Uuid },
    Voting { winner: uuid::Uuid },
    MergeBoth,
}

#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub output: String,
    pub strategy: MergeStrategy,
    pub conflicts: Vec<(Conflict, Resolution)>,
}

const JACCARD_DEDUP_THRESHOLD: f64 = 0.8;
const APPROACH_MISMATCH_SIMILARITY_CEILING: f64 = 0.3;
const APPROACH_MISMATCH_LENGTH_RATIO_FLOOR: f64 = 0.7;
const CONTRADICTION_MARKERS: &[(&str, &str)] =
    &[("should", "should not"), ("is", "is not"), ("can", "cannot"), ("will", "will not")];

fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace().map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_ascii_lowercase()).filter(|w| !w.is_empty()).collect()
}

/// Jaccard similarity of the two texts' whitespace-tokenized, lowercased word sets.
#[must_use]
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// True when the two outputs assert opposite claims about the same subject: a shared
/// subject phrase paired with one of the polarity markers in each output but not the other.
fn looks_contradictory(a: &str, b: &str) -> bool {
    let (a_lower, b_lower) = (a.to_ascii_lowercase(), b.to_ascii_lowercase());
    for (positive, negative) in CONTRADICTION_MARKERS {
        let a_has_positive = a_lower.contains(positive) && !a_lower.contains(negative);
        let b_has_negative = b_lower.contains(negative);
        let a_has_negative = a_lower.contains(negative);
        let b_has_positive = b_lower.contains(positive) && !b_lower.contains(negative);
        if (a_has_positive && b_has_negative) || (a_has_negative && b_has_positive) {
            return true;
        }
    }
    false
}

/// Scans completed results for file overlaps, logical contradictions, and approach
/// mismatches between every distinct pair.
#[must_use]
pub fn detect_conflicts(completed: &[(&Subtask, &SubtaskResult)]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for i in 0..completed.len() {
        for j in (i + 1)..completed.len() {
            let (task_a, result_a) = completed[i];
            let (task_b, result_b) = completed[j];

            let shared_files: Vec<&String> =
                result_a.files_modified.iter().filter(|f| result_b.files_modified.contains(f)).collect();
            for file in shared_files {
                if jaccard_similarity(&result_a.output, &result_b.output) < JACCARD_DEDUP_THRESHOLD {
                    conflicts.push(Conflict::CodeOverlap { file: file.clone(), task_a: task_a.id, task_b: task_b.id });
                }
            }

            if looks_contradictory(&result_a.output, &result_b.output) {
                conflicts.push(Conflict::LogicalContradiction { task_a: task_a.id, task_b: task_b.id });
            }

            let sim = jaccard_similarity(&result_a.output, &result_b.output);
            let len_a = result_a.output.len().max(1) as f64;
            let len_b = result_b.output.len().max(1) as f64;
            let length_ratio = len_a.min(len_b) / len_a.max(len_b);
            if sim < APPROACH_MISMATCH_SIMILARITY_CEILING && length_ratio > APPROACH_MISMATCH_LENGTH_RATIO_FLOOR {
                conflicts.push(Conflict::ApproachMismatch { task_a: task_a.id, task_b: task_b.id });
            }
        }
    }
    conflicts
}

fn confidence(result: &SubtaskResult) -> u8 {
    result.quality_score.unwrap_or(3)
}

/// Resolves a single conflict: code overlaps prefer the highest-confidence (quality-scored)
/// version; contradictions defer to whichever task carries greater authority (foundation
/// tasks outrank non-foundation ones, ties broken by confidence); approach mismatches are
/// not forcibly resolved, they are merged and left for the reader/reviewer to reconcile.
fn resolve(conflict: &Conflict, tasks_by_id: &HashMap<uuid::Uuid, &Subtask>, results_by_id: &HashMap<uuid::Uuid, &SubtaskResult>) -> Resolution {
    match conflict {
        Conflict::CodeOverlap { task_a, task_b, .. } => {
            let conf_a = results_by_id.get(task_a).map(|r| confidence(r)).unwrap_or(0);
            let conf_b = results_by_id.get(task_b).map(|r| confidence(r)).unwrap_or(0);
            Resolution::HighestConfidence { winner: if conf_a >= conf_b { *task_a } else { *task_b } }
        }
        Conflict::LogicalContradiction { task_a, task_b } => {
            let foundation_a = tasks_by_id.get(task_a).map(|t| t.foundation).unwrap_or(false);
            let foundation_b = tasks_by_id.get(task_b).map(|t| t.foundation).unwrap_or(false);
            if foundation_a != foundation_b {
                Resolution::HighestAuthority { winner: if foundation_a { *task_a } else { *task_b } }
            } else {
                let conf_a = results_by_id.get(task_a).map(|r| confidence(r)).unwrap_or(0);
                let conf_b = results_by_id.get(task_b).map(|r| confidence(r)).unwrap_or(0);
                Resolution::Voting { winner: if conf_a >= conf_b { *task_a } else { *task_b } }
            }
        }
        Conflict::ApproachMismatch { .. } => Resolution::MergeBoth,
    }
}

/// Chooses a merge strategy from the shape of the completed outputs: mostly-overlapping
/// file sets call for a structured per-file merge, highly similar outputs call for
/// dedup-and-keep-one, otherwise a straightforward concatenation in task order.
fn choose_strategy(completed: &[(&Subtask, &SubtaskResult)]) -> MergeStrategy {
    let any_files = completed.iter().any(|(_, r)| !r.files_modified.is_empty());
    if any_files {
        return MergeStrategy::StructuredMerge;
    }
    for i in 0..completed.len() {
        for j in (i + 1)..completed.len() {
            if jaccard_similarity(completed[i].1.output.as_str(), completed[j].1.output.as_str()) > JACCARD_DEDUP_THRESHOLD {
                return MergeStrategy::Deduplication;
            }
        }
    }
    MergeStrategy::Concatenation
}

fn merge_structured(completed: &[(&Subtask, &SubtaskResult)]) -> String {
    let mut by_file: HashMap<&str, Vec<(&Subtask, &SubtaskResult)>> = HashMap::new();
    let mut unfiled = Vec::new();
    for &(task, result) in completed {
        if result.files_modified.is_empty() {
            unfiled.push((task, result));
        }
        for file in &result.files_modified {
            by_file.entry(file.as_str()).or_default().push((task, result));
        }
    }

    let mut sections = Vec::new();
    let mut files: Vec<&&str> = by_file.keys().collect();
    files.sort();
    for file in files {
        let entries = &by_file[*file];
        let winner = entries.iter().max_by_key(|(_, r)| confidence(r)).unwrap();
        sections.push(format!("## {file}\n\n{}", winner.1.output));
    }
    for (task, result) in unfiled {
        sections.push(format!("## {}\n\n{}", task.description, result.output));
    }
    sections.join("\n\n")
}

fn merge_deduplicated(completed: &[(&Subtask, &SubtaskResult)]) -> String {
    let mut kept: Vec<&SubtaskResult> = Vec::new();
    for &(_, result) in completed {
        let is_duplicate = kept.iter().any(|k| jaccard_similarity(&k.output, &result.output) > JACCARD_DEDUP_THRESHOLD);
        if !is_duplicate {
            kept.push(result);
        }
    }
    kept.iter().map(|r| r.output.as_str()).collect::<Vec<_>>().join("\n\n")
}

fn merge_concatenated(completed: &[(&Subtask, &SubtaskResult)]) -> String {
    completed.iter().map(|(task, result)| format!("### {}\n\n{}", task.description, result.output)).collect::<Vec<_>>().join("\n\n")
}

/// Synthesizes a single output from every completed subtask's result.
#[must_use]
pub fn synthesize(completed: &[(&Subtask, &SubtaskResult)]) -> SynthesisResult {
    if completed.is_empty() {
        return SynthesisResult { output: String::new(), strategy: MergeStrategy::Concatenation, conflicts: vec![] };
    }

    let conflicts = detect_conflicts(completed);
    let tasks_by_id: HashMap<uuid::Uuid, &Subtask> = completed.iter().map(|(t, _)| (t.id, *t)).collect();
    let results_by_id: HashMap<uuid::Uuid, &SubtaskResult> = completed.iter().map(|(t, r)| (t.id, *r)).collect();
    let resolved: Vec<(Conflict, Resolution)> =
        conflicts.into_iter().map(|c| { let r = resolve(&c, &tasks_by_id, &results_by_id); (c, r) }).collect();

    let strategy = choose_strategy(completed);
    let output = match strategy {
        MergeStrategy::StructuredMerge => merge_structured(completed),
        MergeStrategy::Deduplication => merge_deduplicated(completed),
        MergeStrategy::Concatenation => merge_concatenated(completed),
    };

    SynthesisResult { output, strategy, conflicts: resolved }
}
