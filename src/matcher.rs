//! Token-overlap matching of free text against task, reminder and event labels.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const MATCH_THRESHOLD: f64 = 0.30;
pub const NEAR_TIE_RATIO: f64 = 0.85;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9']+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Task,
    Reminder,
    Event,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Task => "task",
            ItemKind::Reminder => "reminder",
            ItemKind::Event => "event",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "task" => Some(ItemKind::Task),
            "reminder" => Some(ItemKind::Reminder),
            "event" => Some(ItemKind::Event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub kind: ItemKind,
    pub id: i32,
    pub label: String,
}

impl Candidate {
    pub fn new(kind: ItemKind, id: i32, label: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scored {
    pub candidate: Candidate,
    pub score: f64,
}

fn fold(token: &str) -> String {
    match token {
        "doc" => "doctor".to_string(),
        "docs" => "doctors".to_string(),
        other => other.to_string(),
    }
}

pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lowered)
        .map(|m| fold(m.as_str()))
        .collect()
}

fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Share of the candidate's tokens present in the prompt. Asymmetric: a short label
/// fully covered by the prompt scores 1.0.
pub fn score(prompt: &str, candidate_label: &str) -> f64 {
    let candidate = token_set(candidate_label);
    if candidate.is_empty() {
        return 0.0;
    }
    let prompt = token_set(prompt);
    let shared = candidate.intersection(&prompt).count();
    shared as f64 / candidate.len() as f64
}

/// Scores every candidate with a tokenisable label, highest first. Equal scores keep
/// input order.
pub fn rank(prompt: &str, candidates: &[Candidate]) -> Vec<Scored> {
    let mut scored: Vec<Scored> = candidates
        .iter()
        .filter(|c| !tokenize(&c.label).is_empty())
        .map(|c| Scored {
            candidate: c.clone(),
            score: score(prompt, &c.label),
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

pub fn best_match(prompt: &str, candidates: &[Candidate]) -> Option<Scored> {
    rank(prompt, candidates)
        .into_iter()
        .next()
        .filter(|top| top.score >= MATCH_THRESHOLD)
}

/// Best accepted match across independently scored pools. A pool without a match never
/// wins; equal scores go to the earlier pool.
pub fn best_across(prompt: &str, pools: &[&[Candidate]]) -> Option<Scored> {
    let mut best: Option<Scored> = None;
    for pool in pools {
        if let Some(hit) = best_match(prompt, pool) {
            let better = best.as_ref().map(|b| hit.score > b.score).unwrap_or(true);
            if better {
                best = Some(hit);
            }
        }
    }
    best
}

/// True when the runner-up is close enough to the leader that acting would be a guess.
pub fn is_near_tie(ranked: &[Scored]) -> bool {
    match ranked {
        [first, second, ..] => first.score > 0.0 && second.score >= NEAR_TIE_RATIO * first.score,
        _ => false,
    }
}
