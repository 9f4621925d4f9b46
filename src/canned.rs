//! Canned responses: jokes, quotes, facts and the personality text wrapped
//! around model answers. Every pick is uniform over a fixed list.

use rand::seq::SliceRandom;
use rand::Rng;

pub const JOKE_LABEL: &str = "😂";
pub const QUOTE_LABEL: &str = "📜";
pub const FACT_LABEL: &str = "🧠";

pub const JOKES: &[&str] = &[
    "Why don't scientists trust atoms? Because they make up everything!",
    "I told my computer I needed a break, and it said: \"No problem, I'll go to sleep.\"",
    "Why do programmers prefer dark mode? Because light attracts bugs.",
    "I would tell you a UDP joke, but you might not get it.",
    "Why did the scarecrow win an award? He was outstanding in his field.",
    "There are 10 kinds of people: those who understand binary and those who don't.",
    "What do you call a fake noodle? An impasta.",
    "Why was the math book sad? It had too many problems.",
];

pub const QUOTES: &[&str] = &[
    "\"The only way to do great work is to love what you do.\" - Steve Jobs",
    "\"Simplicity is prerequisite for reliability.\" - Edsger W. Dijkstra",
    "\"In the middle of difficulty lies opportunity.\" - Albert Einstein",
    "\"It always seems impossible until it's done.\" - Nelson Mandela",
    "\"Talk is cheap. Show me the code.\" - Linus Torvalds",
    "\"The best time to plant a tree was 20 years ago. The second best time is now.\" - Chinese proverb",
    "\"Whether you think you can, or you think you can't, you're right.\" - Henry Ford",
];

pub const FACTS: &[&str] = &[
    "Honey never spoils. Edible honey has been found in ancient Egyptian tombs.",
    "Octopuses have three hearts and blue blood.",
    "A day on Venus is longer than a year on Venus.",
    "Bananas are berries, but strawberries are not.",
    "The Eiffel Tower can be about 15 cm taller in summer due to thermal expansion.",
    "Sharks existed before trees.",
    "Wombat droppings are cube-shaped.",
];

pub const PERSONALITY_PREFIXES: &[&str] = &[
    "🤖 ",
    "Hmm, let me think... ",
    "Great question! ",
    "Beep boop! ",
    "Oh, I know this one! ",
];

pub const PERSONALITY_SUFFIXES: &[&str] = &[
    "",
    " 😊",
    " ✨",
    " Anything else?",
    " 🤔",
];

/// Which canned list a command draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CannedKind {
    Joke,
    Quote,
    Fact,
}

impl CannedKind {
    pub fn items(self) -> &'static [&'static str] {
        match self {
            CannedKind::Joke => JOKES,
            CannedKind::Quote => QUOTES,
            CannedKind::Fact => FACTS,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CannedKind::Joke => JOKE_LABEL,
            CannedKind::Quote => QUOTE_LABEL,
            CannedKind::Fact => FACT_LABEL,
        }
    }
}

/// `"{label} {item}"` with a uniformly chosen item.
pub fn pick<R: Rng + ?Sized>(kind: CannedKind, rng: &mut R) -> String {
    let item = kind.items().choose(rng).copied().unwrap_or_default();
    format!("{} {}", kind.label(), item)
}

/// Surround a model answer with a random prefix and suffix.
pub fn with_personality<R: Rng + ?Sized>(text: &str, rng: &mut R) -> String {
    let prefix = PERSONALITY_PREFIXES.choose(rng).copied().unwrap_or_default();
    let suffix = PERSONALITY_SUFFIXES.choose(rng).copied().unwrap_or_default();
    format!("{}{}{}", prefix, text, suffix)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const ALL: [CannedKind; 3] = [CannedKind::Joke, CannedKind::Quote, CannedKind::Fact];

    #[test]
    fn picks_only_come_from_their_list() {
        let mut rng = StdRng::seed_from_u64(7);
        for kind in ALL {
            for _ in 0..200 {
                let text = pick(kind, &mut rng);
                let body = text
                    .strip_prefix(&format!("{} ", kind.label()))
                    .expect("label prefix");
                assert!(kind.items().contains(&body), "{:?} produced {:?}", kind, body);
            }
        }
    }

    #[test]
    fn every_item_is_reachable() {
        let mut rng = StdRng::seed_from_u64(1);
        for kind in ALL {
            let mut seen = std::collections::HashSet::new();
            for _ in 0..1000 {
                seen.insert(pick(kind, &mut rng));
            }
            assert_eq!(seen.len(), kind.items().len(), "{:?} not uniform", kind);
        }
    }

    #[test]
    fn lists_are_non_empty_and_distinct() {
        for kind in ALL {
            let items = kind.items();
            assert!(!items.is_empty());
            let unique: std::collections::HashSet<_> = items.iter().collect();
            assert_eq!(unique.len(), items.len());
        }
    }

    #[test]
    fn personality_wraps_the_text() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let wrapped = with_personality("the answer", &mut rng);
            let prefix = PERSONALITY_PREFIXES
                .iter()
                .find(|p| wrapped.starts_with(**p))
                .expect("known prefix");
            let rest = &wrapped[prefix.len()..];
            assert!(rest.starts_with("the answer"));
            let suffix = &rest["the answer".len()..];
            assert!(PERSONALITY_SUFFIXES.contains(&suffix));
        }
    }
}
