//! Query type detection by keyword voting
//!
//! Each category has an indicator keyword set; the category with the most
//! hits wins, with zero hits falling back to general.

/// Broad query classification driving prompt template choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, serde::Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Technical,
    Creative,
    Analytical,
    Procedural,
    Philosophical,
    General,
}

const TECHNICAL: &[&str] = &[
    "how does",
    "explain",
    "technical",
    "algorithm",
    "implement",
    "code",
    "debug",
    "error",
    "architecture",
    "system",
    "api",
    "database",
    "performance",
    "optimize",
    "security",
];

const CREATIVE: &[&str] = &[
    "create",
    "design",
    "imagine",
    "story",
    "write",
    "compose",
    "invent",
    "brainstorm",
    "creative",
    "innovative",
    "novel",
    "artistic",
    "generate ideas",
];

const ANALYTICAL: &[&str] = &[
    "analyze",
    "compare",
    "evaluate",
    "assess",
    "examine",
    "investigate",
    "study",
    "review",
    "critique",
    "pros and cons",
    "advantages",
    "disadvantages",
    "trade-offs",
];

const PROCEDURAL: &[&str] = &[
    "how to",
    "steps",
    "process",
    "procedure",
    "guide",
    "instructions",
    "tutorial",
    "walkthrough",
    "method",
    "approach",
    "recipe",
    "plan",
];

const PHILOSOPHICAL: &[&str] = &[
    "why",
    "meaning",
    "purpose",
    "ethics",
    "moral",
    "philosophy",
    "believe",
    "think about",
    "implications",
    "consequences",
    "should",
    "ought",
    "values",
    "principles",
];

/// Classify a query by keyword voting over its lowercased text
pub fn detect_query_type(query: &str) -> QueryType {
    let lower = query.to_lowercase();

    let vote = |keywords: &[&str]| keywords.iter().filter(|k| lower.contains(*k)).count();

    let scores = [
        (QueryType::Technical, vote(TECHNICAL)),
        (QueryType::Creative, vote(CREATIVE)),
        (QueryType::Analytical, vote(ANALYTICAL)),
        (QueryType::Procedural, vote(PROCEDURAL)),
        (QueryType::Philosophical, vote(PHILOSOPHICAL)),
    ];

    let (winner, count) = scores
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .unwrap_or((QueryType::General, 0));

    if count == 0 { QueryType::General } else { winner }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn technical_queries() {
        assert_eq!(detect_query_type("How does the HTTP/2 protocol optimize performance?"), QueryType::Technical);
        assert_eq!(detect_query_type("debug this algorithm for me"), QueryType::Technical);
    }

    #[test]
    fn creative_queries() {
        assert_eq!(detect_query_type("write a story about a dragon"), QueryType::Creative);
    }

    #[test]
    fn analytical_queries() {
        assert_eq!(
            detect_query_type("compare and evaluate the pros and cons of solar vs wind"),
            QueryType::Analytical
        );
    }

    #[test]
    fn procedural_queries() {
        assert_eq!(detect_query_type("how to bake bread, step by step guide"), QueryType::Procedural);
    }

    #[test]
    fn philosophical_queries() {
        assert_eq!(
            detect_query_type("what is the meaning and purpose of consciousness, and why should we care"),
            QueryType::Philosophical
        );
    }

    #[test]
    fn unmatched_queries_are_general() {
        assert_eq!(detect_query_type("hello there"), QueryType::General);
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(QueryType::Technical.to_string(), "technical");
    }
}
