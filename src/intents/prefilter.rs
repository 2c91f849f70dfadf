//! Regex rules that answer common conversational phrasings without a model call.
//!
//! Rules run in table order and the first hit wins; the specific relationship forms sit
//! above the generic "X is a Y" descriptor so they shadow it.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;

pub const PRONUNCIATION_LOOKBACK: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prefiltered {
    /// Explicit "remember ..." command.
    Remember { fact: String },
    /// Identity or relationship statement normalised into a stored fact.
    Fact { fact: String },
    /// Pronunciation correction; `term` may have been inferred from recent turns.
    Pronunciation { term: String, pronunciation: String },
    TodayQuery,
}

type RuleFn = fn(&Captures<'_>) -> Option<Prefiltered>;

struct Rule {
    name: &'static str,
    pattern: Regex,
    build: RuleFn,
}

const NAME: &str = r"[A-Z][\w'-]*(?:\s+[A-Z][\w'-]*)?";
const NOT_NAMES: &[&str] = &[
    "it", "this", "that", "there", "here", "what", "today", "tomorrow", "he", "she", "they", "i",
    "who", "which", "where", "when", "everything", "nothing",
];

const TODAY_PHRASES: &[&str] = &[
    "what's on today",
    "whats on today",
    "what is on today",
    "what's happening today",
    "what is happening today",
    "what do i have today",
    "what have i got today",
    "what have i got on today",
    "what's on my schedule today",
    "what's on the agenda today",
    "what does today look like",
    "what's today look like",
    "anything on today",
    "today's schedule",
    "what's on for today",
];

fn is_name(candidate: &str) -> bool {
    let first = candidate
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    !NOT_NAMES.contains(&first.as_str())
}

fn trim_fact(text: &str) -> String {
    text.trim()
        .trim_end_matches(['.', '!', '?'])
        .trim()
        .to_string()
}

fn remember_rule(caps: &Captures<'_>) -> Option<Prefiltered> {
    let fact = trim_fact(caps.name("fact")?.as_str());
    if fact.is_empty() || fact.to_lowercase().starts_with("to ") {
        return None;
    }
    Some(Prefiltered::Remember { fact })
}

fn relationship_rule(caps: &Captures<'_>) -> Option<Prefiltered> {
    let name = caps.name("name")?.as_str().trim();
    if !is_name(name) {
        return None;
    }
    let relation = trim_fact(caps.name("rel")?.as_str());
    Some(Prefiltered::Fact {
        fact: format!("{name} is the user's {relation}."),
    })
}

fn shared_condition_rule(caps: &Captures<'_>) -> Option<Prefiltered> {
    let name = caps.name("name")?.as_str().trim();
    if !is_name(name) {
        return None;
    }
    let condition = trim_fact(caps.name("cond")?.as_str());
    Some(Prefiltered::Fact {
        fact: format!("{name} and the user both have {condition}."),
    })
}

fn descriptor_rule(caps: &Captures<'_>) -> Option<Prefiltered> {
    let name = caps.name("name")?.as_str().trim();
    if !is_name(name) {
        return None;
    }
    let article = caps.name("art")?.as_str().to_lowercase();
    let description = trim_fact(caps.name("desc")?.as_str());
    Some(Prefiltered::Fact {
        fact: format!("{name} is {article} {description}."),
    })
}

fn pronunciation_rule(caps: &Captures<'_>) -> Option<Prefiltered> {
    let pronunciation = trim_fact(caps.name("say")?.as_str())
        .trim_matches(['"', '\''])
        .to_string();
    if pronunciation.is_empty() {
        return None;
    }
    let term = caps
        .name("term")
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("it"))
        .unwrap_or_default();
    Some(Prefiltered::Pronunciation {
        term,
        pronunciation,
    })
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    let rule = |name: &'static str, pattern: &str, build: RuleFn| Rule {
        name,
        pattern: Regex::new(pattern).unwrap(),
        build,
    };
    vec![
        rule(
            "remember",
            r"(?i)^\s*(?:please\s+)?remember(?:\s+that)?\s+(?P<fact>.+)$",
            remember_rule,
        ),
        rule(
            "relationship",
            &format!(r"^\s*(?P<name>{NAME})\s+(?i:is\s+my)\s+(?P<rel>[A-Za-z][A-Za-z -]*?)\s*[.!]?\s*$"),
            relationship_rule,
        ),
        rule(
            "possessive",
            &format!(
                r"^\s*(?i:my)\s+(?P<rel>[A-Za-z][A-Za-z -]*?)(?i:'s\s+name)?\s+(?i:is)\s+(?i:called\s+)?(?P<name>{NAME})\s*[.!]?\s*$"
            ),
            relationship_rule,
        ),
        rule(
            "shared_condition",
            &format!(
                r"^\s*(?P<name>{NAME})\s+(?i:and\s+I\s+both\s+have)\s+(?P<cond>.+?)\s*[.!]?\s*$"
            ),
            shared_condition_rule,
        ),
        rule(
            "descriptor",
            &format!(r"^\s*(?P<name>{NAME})\s+(?i:is)\s+(?P<art>(?i:an?))\s+(?P<desc>.+?)\s*[.!]?\s*$"),
            descriptor_rule,
        ),
        rule(
            "pronunciation",
            r#"(?i)^\s*(?:(?:it'?s|it\s+is)\s+|(?P<term>[\w' -]+?)\s+is\s+)?pronounced\s+(?:like\s+)?(?P<say>.+)$"#,
            pronunciation_rule,
        ),
    ]
});

fn normalize_query(text: &str) -> String {
    text.to_lowercase()
        .replace('\u{2019}', "'")
        .trim()
        .trim_end_matches(['?', '.', '!'])
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn is_today_query(text: &str) -> bool {
    let normalized = normalize_query(text);
    TODAY_PHRASES
        .iter()
        .any(|phrase| normalized == *phrase || normalized.contains(phrase))
}

/// Last capitalised word that does not open a sentence, scanning the newest turn first.
pub fn infer_term(recent_user_turns: &[String]) -> Option<String> {
    for turn in recent_user_turns.iter().rev().take(PRONUNCIATION_LOOKBACK) {
        let mut found = None;
        let mut sentence_start = true;
        for raw in turn.split_whitespace() {
            let word = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != '-');
            let capitalised = word.chars().next().map(char::is_uppercase).unwrap_or(false);
            if capitalised && !sentence_start && word != "I" {
                found = Some(word.trim_end_matches("'s").to_string());
            }
            sentence_start = raw.ends_with(['.', '!', '?']);
        }
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Runs the rule table; `recent_user_turns` (oldest first) fills in a missing
/// pronunciation subject.
pub fn classify(text: &str, recent_user_turns: &[String]) -> Option<Prefiltered> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    for rule in RULES.iter() {
        let Some(caps) = rule.pattern.captures(text) else {
            continue;
        };
        let Some(hit) = (rule.build)(&caps) else {
            continue;
        };
        tracing::debug!(rule = rule.name, "Prefilter matched");
        if let Prefiltered::Pronunciation {
            term,
            pronunciation,
        } = &hit
        {
            if term.is_empty() {
                let term = infer_term(recent_user_turns)?;
                return Some(Prefiltered::Pronunciation {
                    term,
                    pronunciation: pronunciation.clone(),
                });
            }
        }
        return Some(hit);
    }
    if is_today_query(text) {
        return Some(Prefiltered::TodayQuery);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(text: &str) -> Option<String> {
        match classify(text, &[]) {
            Some(Prefiltered::Fact { fact }) => Some(fact),
            _ => None,
        }
    }

    #[test]
    fn remember_commands_but_not_remember_to() {
        assert_eq!(
            classify("Remember that the boiler code is 4412", &[]),
            Some(Prefiltered::Remember {
                fact: "the boiler code is 4412".to_string()
            })
        );
        assert_eq!(classify("remember to buy milk", &[]), None);
    }

    #[test]
    fn relationship_forms() {
        assert_eq!(fact("Tom is my son").as_deref(), Some("Tom is the user's son."));
        assert_eq!(
            fact("my son's name is Tom").as_deref(),
            Some("Tom is the user's son.")
        );
        assert_eq!(
            fact("My sister is called Ana Lopez.").as_deref(),
            Some("Ana Lopez is the user's sister.")
        );
        assert_eq!(fact("It is my turn"), None);
    }

    #[test]
    fn shared_condition_and_descriptor() {
        assert_eq!(
            fact("Ella and I both have coeliac disease").as_deref(),
            Some("Ella and the user both have coeliac disease.")
        );
        assert_eq!(
            fact("Biscuit is a golden retriever").as_deref(),
            Some("Biscuit is a golden retriever.")
        );
        assert_eq!(fact("This is a test"), None);
    }

    #[test]
    fn relationship_shadows_descriptor() {
        assert_eq!(fact("Tom is my son.").as_deref(), Some("Tom is the user's son."));
    }

    #[test]
    fn pronunciation_with_and_without_subject() {
        assert_eq!(
            classify("Siobhan is pronounced shiv-awn", &[]),
            Some(Prefiltered::Pronunciation {
                term: "Siobhan".to_string(),
                pronunciation: "shiv-awn".to_string()
            })
        );
        let turns = vec![
            "remind me to ring Niamh tomorrow".to_string(),
            "what time is it".to_string(),
        ];
        assert_eq!(
            classify("it's pronounced neeve", &turns),
            Some(Prefiltered::Pronunciation {
                term: "Niamh".to_string(),
                pronunciation: "neeve".to_string()
            })
        );
        assert_eq!(classify("it's pronounced neeve", &[]), None);
    }

    #[test]
    fn today_queries() {
        assert_eq!(classify("What's on today?", &[]), Some(Prefiltered::TodayQuery));
        assert_eq!(
            classify("hey, what do I have today", &[]),
            Some(Prefiltered::TodayQuery)
        );
        assert_eq!(classify("what's on tomorrow", &[]), None);
    }
}
