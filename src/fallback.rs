//! Static answers that need no corpus and no model.
//!
//! Two tables live here:
//!
//! - the **quick table**: short instant answers keyed by a phrase that must
//!   appear verbatim in the question ([`FallbackLibrary::quick`]);
//! - the **topic table**: longer canned answers keyed by any of several
//!   keywords ([`FallbackLibrary::lookup`]).
//!
//! [`FallbackLibrary::respond`] is the last resort of the pipeline and
//! always returns text.

use serde::Serialize;

use crate::config::FallbackConfig;
use crate::models::normalize_query;

const QUICK_PATTERNS: &[(&str, &str)] = &[
    (
        "stop sign",
        "Stop completely behind the line, look left-right-left, proceed when safe.",
    ),
    (
        "speed limit",
        "Residential: 25-35 mph, School zones: 15-25 mph, Highways: 55-80 mph.",
    ),
    (
        "right of way",
        "Pedestrians in crosswalks always have right of way. At 4-way stops: first to arrive goes first.",
    ),
    (
        "seatbelt",
        "Seatbelts required for all occupants. Driver responsible for passengers under 16.",
    ),
    (
        "turn signal",
        "Signal 100 feet before turning in city, 200 feet on highway.",
    ),
    (
        "parking",
        "No parking within 15 feet of fire hydrant, 20 feet of crosswalk.",
    ),
    (
        "school zone",
        "Reduced speed when children present, usually 15-25 mph.",
    ),
    (
        "yellow light",
        "Prepare to stop if safe to do so. Clear intersection if already entered.",
    ),
    (
        "following distance",
        "3-second rule: count 'one-thousand-one' to 'one-thousand-three'.",
    ),
];

struct CannedAnswer {
    keywords: &'static [&'static str],
    answer: &'static str,
}

// Right of way comes first so "who goes first at a 4-way stop" is not read
// as a stop sign question.
const CANNED: &[CannedAnswer] = &[
    CannedAnswer {
        keywords: &["right of way", "right-of-way", "yield", "who goes first"],
        answer: "Right-of-Way Rules:\n\
                 - 4-way stop: First to arrive goes first\n\
                 - Left turns: Yield to oncoming traffic\n\
                 - Pedestrians: Always have right of way in crosswalks\n\
                 - Emergency vehicles: Pull over and stop\n\
                 - Roundabouts: Yield to traffic already in the circle",
    },
    CannedAnswer {
        keywords: &["stop sign", "stop"],
        answer: "Stop Sign Procedure:\n\
                 1. Come to a complete stop behind the stop line\n\
                 2. Look left, then right, then left again\n\
                 3. Check for pedestrians in the crosswalk\n\
                 4. Proceed only when the intersection is clear\n\
                 5. Yield to any vehicle that arrived first",
    },
    CannedAnswer {
        keywords: &["speed limit", "speed", "mph"],
        answer: "Speed Limit Guidelines:\n\
                 - Residential areas: 25-35 mph\n\
                 - School zones: 15-25 mph (when children present)\n\
                 - City streets: 35-45 mph\n\
                 - Highways: 55-80 mph (varies by state)\n\
                 Always adjust speed for weather and traffic conditions.",
    },
    CannedAnswer {
        keywords: &["park", "parallel"],
        answer: "Parking Guidelines:\n\
                 - No parking within 15 feet of fire hydrants\n\
                 - Don't block driveways, crosswalks, or bus stops\n\
                 - Parallel parking: Signal, check mirrors, back in slowly\n\
                 - Always check parking signs for restrictions",
    },
    CannedAnswer {
        keywords: &["seat belt", "seatbelt"],
        answer: "Seat Belt Safety:\n\
                 - Driver and all passengers must wear seat belts\n\
                 - Children under certain age/weight need car seats\n\
                 - The belt should go across chest and hips\n\
                 - Never put the belt behind your back or under your arm",
    },
];

const GENERIC: &str = "I'm here to help with driving questions! Ask me about:\n\
                       - Traffic rules and road signs\n\
                       - Speed limits and parking\n\
                       - Right of way situations\n\
                       - Driving procedures and safety\n\
                       - Test preparation tips\n\n\
                       What driving topic would you like to learn about?";

/// A topic the assistant can talk about, with example questions.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TopicInfo {
    pub id: &'static str,
    pub title: &'static str,
    pub examples: Vec<&'static str>,
}

const TOPICS: &[(&str, &str, &[&str])] = &[
    (
        "traffic_signs",
        "Traffic Signs",
        &[
            "What does a stop sign mean?",
            "When do I yield at intersections?",
            "What are regulatory vs warning signs?",
        ],
    ),
    (
        "speed_limits",
        "Speed Limits",
        &[
            "What is the speed limit in residential areas?",
            "How fast can I drive on highways?",
            "What is the school zone speed limit?",
        ],
    ),
    (
        "right_of_way",
        "Right of Way",
        &[
            "Who has right of way at 4-way stops?",
            "When do I yield to pedestrians?",
            "Right of way when turning left?",
        ],
    ),
    (
        "parking",
        "Parking Rules",
        &[
            "How far from fire hydrants can I park?",
            "Parallel parking tips?",
            "Where is parking prohibited?",
        ],
    ),
    (
        "safety",
        "Safety",
        &[
            "When should I wear seat belts?",
            "How to handle emergency vehicles?",
            "Safe following distance?",
        ],
    ),
];

#[derive(Debug, Clone)]
pub struct FallbackLibrary {
    /// Configured patterns first, then the built-in table; all lower-cased.
    quick: Vec<(String, String)>,
}

impl Default for FallbackLibrary {
    fn default() -> Self {
        Self::new(&FallbackConfig::default())
    }
}

impl FallbackLibrary {
    pub fn new(config: &FallbackConfig) -> Self {
        let extra = config
            .quick
            .iter()
            .filter(|p| !p.pattern.trim().is_empty())
            .map(|p| (normalize_query(&p.pattern), p.answer.clone()));
        let builtin = QUICK_PATTERNS
            .iter()
            .map(|(p, a)| (p.to_string(), a.to_string()));
        Self {
            quick: extra.chain(builtin).collect(),
        }
    }

    /// Instant answer when a known phrase appears in the question. First
    /// match in table order wins.
    pub fn quick(&self, query: &str) -> Option<&str> {
        let q = normalize_query(query);
        self.quick
            .iter()
            .find(|(pattern, _)| q.contains(pattern.as_str()))
            .map(|(_, answer)| answer.as_str())
    }

    /// Canned topic answer when any topic keyword appears in the question.
    pub fn lookup(&self, query: &str) -> Option<&'static str> {
        let q = normalize_query(query);
        CANNED
            .iter()
            .find(|c| c.keywords.iter().any(|k| q.contains(k)))
            .map(|c| c.answer)
    }

    /// Topic answer, or the generic "ask me about" message.
    pub fn respond(&self, query: &str) -> String {
        self.lookup(query).unwrap_or(GENERIC).to_string()
    }

    pub fn topics(&self) -> Vec<TopicInfo> {
        TOPICS
            .iter()
            .map(|&(id, title, examples)| TopicInfo {
                id,
                title,
                examples: examples.to_vec(),
            })
            .collect()
    }
}

// ============ CLI ============

pub fn run_topics(library: &FallbackLibrary) {
    for topic in library.topics() {
        println!("{} ({})", topic.title, topic.id);
        for example in &topic.examples {
            println!("    - {}", example);
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuickPatternConfig;

    #[test]
    fn test_quick_matches_phrase() {
        let lib = FallbackLibrary::default();
        assert_eq!(
            lib.quick("How far should I keep my FOLLOWING DISTANCE?"),
            Some("3-second rule: count 'one-thousand-one' to 'one-thousand-three'.")
        );
    }

    #[test]
    fn test_quick_first_match_wins() {
        let lib = FallbackLibrary::default();
        // Contains both "speed limit" and "school zone"; "speed limit" is earlier.
        let answer = lib.quick("What is the speed limit in a school zone?").unwrap();
        assert!(answer.starts_with("Residential"));
    }

    #[test]
    fn test_quick_miss() {
        let lib = FallbackLibrary::default();
        assert!(lib.quick("How do roundabouts work?").is_none());
    }

    #[test]
    fn test_configured_patterns_take_precedence() {
        let config = FallbackConfig {
            quick: vec![QuickPatternConfig {
                pattern: "Speed Limit".to_string(),
                answer: "See posted signs.".to_string(),
            }],
        };
        let lib = FallbackLibrary::new(&config);
        assert_eq!(lib.quick("speed limit?"), Some("See posted signs."));
        assert!(lib.quick("stop sign").unwrap().starts_with("Stop completely"));
    }

    #[test]
    fn test_lookup_by_keyword() {
        let lib = FallbackLibrary::default();
        assert!(lib.lookup("Can I park here?").unwrap().starts_with("Parking"));
        assert!(lib.lookup("how fast, in mph?").unwrap().starts_with("Speed Limit"));
        assert!(lib.lookup("Who goes first at a 4-way stop?").unwrap().starts_with("Right-of-Way"));
        assert!(lib.lookup("what about roundabouts").is_none());
    }

    #[test]
    fn test_respond_never_empty() {
        let lib = FallbackLibrary::default();
        let generic = lib.respond("tell me about roundabouts");
        assert!(generic.starts_with("I'm here to help"));
        assert!(lib.respond("").starts_with("I'm here to help"));
        assert!(lib.respond("seat belt rules").starts_with("Seat Belt"));
    }

    #[test]
    fn test_topics_catalogue() {
        let topics = FallbackLibrary::default().topics();
        let ids: Vec<_> = topics.iter().map(|t| t.id).collect();
        assert_eq!(
            ids,
            ["traffic_signs", "speed_limits", "right_of_way", "parking", "safety"]
        );
        assert!(topics.iter().all(|t| t.examples.len() == 3));
    }
}
