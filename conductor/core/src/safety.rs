//! Safety Gate
//!
//! Deterministic crisis-phrase screening that runs on every text input before
//! persona resolution and before any backend call. A match short-circuits
//! generation and answers with one fixed supportive message.
//!
//! The gate has no configuration surface: the lexicon is compiled in and no
//! persona, config value, or client frame can switch it off.

/// Phrases indicating self-harm risk, matched case-insensitively
///
/// Entries are stored lowercase with single spaces and straight apostrophes,
/// matching the normalization applied to input.
pub const CRISIS_LEXICON: &[&str] = &[
    "kill myself",
    "killing myself",
    "suicide",
    "suicidal",
    "end my life",
    "ending my life",
    "take my own life",
    "want to die",
    "wanna die",
    "better off dead",
    "no reason to live",
    "don't want to live",
    "dont want to live",
    "hurt myself",
    "hurting myself",
    "harm myself",
    "self harm",
    "self-harm",
    "cut myself",
    "cutting myself",
    "overdose",
];

/// Reply sent instead of a generated answer when the gate triggers
pub const SAFETY_MESSAGE: &str = "I'm really sorry you're feeling this way, and I'm glad you told me. \
You don't have to go through this alone. If you are in immediate danger, please call your local \
emergency number right now. In the US you can call or text 988 to reach the Suicide & Crisis \
Lifeline, and in the UK and Ireland you can call Samaritans on 116 123, any time of day. \
If you can, please reach out to someone you trust and let them know how you're feeling. \
I'm here to keep talking with you.";

/// Outcome of screening one input
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SafetyVerdict {
    /// No lexicon phrase present; generation may proceed
    Clear,
    /// A crisis phrase was found; answer with [`SAFETY_MESSAGE`]
    Flagged,
}

impl SafetyVerdict {
    /// Whether the gate triggered
    #[must_use]
    pub fn is_flagged(&self) -> bool {
        matches!(self, Self::Flagged)
    }
}

/// Stateless crisis-phrase classifier
#[derive(Clone, Copy, Debug, Default)]
pub struct SafetyGate;

impl SafetyGate {
    /// Create the gate
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Screen raw input text
    #[must_use]
    pub fn check(&self, text: &str) -> SafetyVerdict {
        let normalized = normalize(text);
        if CRISIS_LEXICON
            .iter()
            .any(|phrase| normalized.contains(phrase))
        {
            SafetyVerdict::Flagged
        } else {
            SafetyVerdict::Clear
        }
    }

    /// The fixed supportive reply
    #[must_use]
    pub fn canned_reply(&self) -> &'static str {
        SAFETY_MESSAGE
    }
}

/// Lowercase, straighten apostrophes, collapse whitespace runs
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        match c {
            '\u{2018}' | '\u{2019}' | '\u{02BC}' => out.push('\''),
            _ => out.extend(c.to_lowercase()),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_lexicon_phrases() {
        let gate = SafetyGate::new();
        assert!(gate.check("I want to kill myself").is_flagged());
        assert!(gate.check("sometimes i think about SUICIDE").is_flagged());
        assert!(gate.check("Everyone would be better off dead without me").is_flagged());
    }

    #[test]
    fn test_every_lexicon_entry_matches_itself() {
        let gate = SafetyGate::new();
        for phrase in CRISIS_LEXICON {
            assert!(gate.check(phrase).is_flagged(), "phrase not matched: {phrase}");
            assert!(
                gate.check(&phrase.to_uppercase()).is_flagged(),
                "uppercase phrase not matched: {phrase}"
            );
        }
    }

    #[test]
    fn test_normalizes_whitespace_and_apostrophes() {
        let gate = SafetyGate::new();
        assert!(gate.check("I   want to\tKILL\n myself").is_flagged());
        assert!(gate.check("I don\u{2019}t want to live anymore").is_flagged());
    }

    #[test]
    fn test_clear_inputs() {
        let gate = SafetyGate::new();
        assert_eq!(gate.check("I had a rough day at work"), SafetyVerdict::Clear);
        assert_eq!(gate.check(""), SafetyVerdict::Clear);
        assert_eq!(gate.check("my houseplant might die"), SafetyVerdict::Clear);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Hello   World  "), "hello world");
        assert_eq!(normalize("it\u{2019}s"), "it's");
    }

    #[test]
    fn test_canned_reply_is_fixed() {
        let gate = SafetyGate::new();
        assert_eq!(gate.canned_reply(), SAFETY_MESSAGE);
        assert!(SAFETY_MESSAGE.contains("988"));
    }
}
