//! Stage prompt construction
//!
//! Builds the peer-review and synthesis prompts. Both always embed the
//! original user query verbatim; combined peer answers are trimmed to a
//! token budget by shortening the longest answer first.

use indexmap::IndexMap;
use quorum_selection::QueryType;

/// Floor below which an answer is no longer trimmed
const TRUNCATION_FLOOR_CHARS: usize = 200;

/// Word-based token estimate, roughly 0.75 tokens per English word
pub fn estimate_prompt_tokens(text: &str) -> usize {
    (text.split_whitespace().count() as f64 * 0.75) as usize
}

/// Trim combined responses to fit `max_tokens`
///
/// Repeatedly shortens the longest response by 20% until the combined
/// estimate fits, stopping once answers reach the floor length.
pub fn truncate_responses(
    responses: &IndexMap<String, String>,
    max_tokens: usize,
) -> IndexMap<String, String> {
    let combined = |map: &IndexMap<String, String>| {
        estimate_prompt_tokens(&map.values().cloned().collect::<Vec<_>>().join(" "))
    };

    if combined(responses) <= max_tokens {
        return responses.clone();
    }

    let mut truncated = responses.clone();

    while combined(&truncated) > max_tokens {
        let Some(longest_key) = truncated
            .iter()
            .max_by_key(|(_, text)| estimate_prompt_tokens(text))
            .map(|(model, _)| model.clone())
        else {
            break;
        };

        let text = &truncated[&longest_key];
        let mut new_len = (text.len() as f64 * 0.8) as usize;
        while new_len > 0 && !text.is_char_boundary(new_len) {
            new_len -= 1;
        }

        if new_len < TRUNCATION_FLOOR_CHARS {
            break;
        }

        let trimmed = format!("{} …", &text[..new_len]);
        truncated.insert(longest_key, trimmed);
    }

    truncated
}

/// Peer-review prompt for one model: its own answer plus labelled peers
pub fn peer_review_prompt(
    original_query: &str,
    own_response: &str,
    peers: &IndexMap<String, String>,
) -> String {
    let mut peer_responses = String::new();
    for (model, response) in peers {
        peer_responses.push_str(&format!("\n{model}: {response}\n"));
    }

    format!(
        "Please review the responses from other LLMs given the same query you just completed. \
Do not assume anything is factual, but would you like to edit your initial response after seeing \
the work of your peers?\n\n\
Original Query: {original_query}\n\n\
Your Initial Response:\n{own_response}\n\n\
Responses from Other LLMs:\n{peer_responses}\n\n\
After critically reviewing these peer responses, please provide your revised answer to the \
original query. You may keep your original response if you believe it's already optimal, or \
incorporate insights from the peer responses where they improve accuracy, completeness, or clarity."
    )
}

/// Render model responses as a labelled block for the synthesis prompt
pub fn responses_block(responses: &IndexMap<String, String>, peer_reviewed: bool) -> String {
    responses
        .iter()
        .map(|(model, response)| {
            if peer_reviewed {
                format!("**{model} (Peer-Reviewed):** {response}")
            } else {
                format!("**{model}:** {response}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Synthesis prompt; query-type-specific when a type is given
pub fn synthesis_prompt(
    query_type: Option<QueryType>,
    original_query: &str,
    responses: &str,
) -> String {
    match query_type {
        Some(QueryType::Technical) => technical_prompt(original_query, responses),
        Some(QueryType::Creative) => creative_prompt(original_query, responses),
        Some(QueryType::Analytical) => analytical_prompt(original_query, responses),
        Some(QueryType::Procedural) => procedural_prompt(original_query, responses),
        Some(QueryType::Philosophical) => philosophical_prompt(original_query, responses),
        Some(QueryType::General) => general_prompt(original_query, responses),
        None => baseline_prompt(original_query, responses),
    }
}

/// The non-enhanced synthesis prompt
fn baseline_prompt(original_query: &str, responses: &str) -> String {
    format!(
        "Given the user's initial query, please review the revised drafts from all LLMs. Keep \
commentary to a minimum unless it helps with the original inquiry. Do not reference the process, \
but produce the best, most thorough answer to the original query. Do not omit ANY relevant data \
from the other models.\n\n\
ORIGINAL QUERY: {original_query}\n\n\
REVISED LLM DRAFTS:\n{responses}\n\n\
Create a comprehensive synthesis document that:\n\
- Directly answers the original query with maximum thoroughness\n\
- Integrates ALL relevant information from every model's response\n\
- Adds analytical insights only where they enhance understanding\n\
- Presents the most complete, actionable answer possible\n\n\
Begin with the synthesis document."
    )
}

fn general_prompt(original_query: &str, responses: &str) -> String {
    format!(
        "# Intelligence Multiplication Synthesis\n\n\
## Original Query\n{original_query}\n\n\
## Peer-Reviewed Model Responses\n{responses}\n\n\
## Synthesis Objectives\n\
1. Convergent truth: surface facts multiple models agree on, flagging critical disagreements.\n\
2. Complementary insight: combine each model's unique valuable observations.\n\
3. Uncertainty management: mark claims with [High confidence], [Moderate confidence], or \
[Low confidence] where appropriate.\n\
4. Structure: organize in the most logical flow for the query with clear headers.\n\n\
## Output Requirements\n\
Begin directly with the synthesis, integrate insights seamlessly rather than listing model \
outputs, and ensure the result provides more value than any individual response.\n\n\
## Synthesis:\n"
    )
}

fn technical_prompt(original_query: &str, responses: &str) -> String {
    format!(
        "# Technical Synthesis\n\n\
## Technical Query\n{original_query}\n\n\
## Expert Model Responses\n{responses}\n\n\
## Framework\n\
1. Cross-validate technical facts across responses; flag contradictions.\n\
2. Merge implementation details, code examples, and best practices.\n\
3. Compile edge cases, limitations, and error handling strategies.\n\
4. Tag recommendations [Verified], [Best Practice], or [Experimental].\n\n\
Organize as: Overview, Core Concepts, Implementation, Considerations. Use precise terminology \
and include code where valuable.\n\n\
## Technical Synthesis:\n"
    )
}

fn creative_prompt(original_query: &str, responses: &str) -> String {
    format!(
        "# Creative Synthesis\n\n\
## Creative Challenge\n{original_query}\n\n\
## Creative Model Contributions\n{responses}\n\n\
## Approach\n\
1. Identify common creative themes and highlight each model's unique angles.\n\
2. Merge creative elements into novel concepts and unexpected connections.\n\
3. Balance innovation with feasibility; suggest variations and extensions.\n\n\
Maintain creative energy and vivid language. Structure as: Inspiration, Core Ideas, \
Variations, Next Steps.\n\n\
## Creative Synthesis:\n"
    )
}

fn analytical_prompt(original_query: &str, responses: &str) -> String {
    format!(
        "# Analytical Synthesis\n\n\
## Analytical Question\n{original_query}\n\n\
## Model Analyses\n{responses}\n\n\
## Framework\n\
1. Integrate the analytical frameworks used by different models.\n\
2. Compile supporting evidence, weighting by reliability; mark claims with [Strong Evidence], \
[Moderate Evidence], or [Limited Evidence].\n\
3. Balance evaluative perspectives into a nuanced assessment.\n\n\
Organize as: Overview, Analysis, Comparison, Evaluation, Conclusions. Maintain objectivity \
while acknowledging different viewpoints.\n\n\
## Analytical Synthesis:\n"
    )
}

fn procedural_prompt(original_query: &str, responses: &str) -> String {
    format!(
        "# Procedural Synthesis\n\n\
## Procedural Request\n{original_query}\n\n\
## Model Procedures\n{responses}\n\n\
## Method\n\
1. Merge steps from all models into an optimal sequence without redundancy.\n\
2. Include best practices, warnings, and common pitfalls where models agree.\n\
3. Offer alternative approaches with decision criteria; tag steps [Required], [Recommended], \
or [Optional].\n\n\
Number steps clearly. Structure as: Overview, Prerequisites, Steps, Validation, Tips. End with \
clear success criteria.\n\n\
## Procedural Synthesis:\n"
    )
}

fn philosophical_prompt(original_query: &str, responses: &str) -> String {
    format!(
        "# Philosophical Synthesis\n\n\
## Philosophical Inquiry\n{original_query}\n\n\
## Model Perspectives\n{responses}\n\n\
## Approach\n\
1. Weave together the philosophical viewpoints, respecting different traditions.\n\
2. Explore nuanced arguments and counterarguments; mark speculative ideas with \
[Philosophical perspective].\n\
3. Connect insights to practical implications and ethical dimensions.\n\n\
Use clear language for complex ideas. Structure as: Context, Perspectives, Analysis, \
Implications, Reflection.\n\n\
## Philosophical Synthesis:\n"
    )
}
