//! Prompt construction for every debate phase.
//!
//! Builders are pure string assembly; all model-output parsing lives at the
//! event normalization boundary, not here. Structured phases ask for JSON
//! with an explicit field list so the repair pass has a stable shape to
//! recover.

use crate::events::types::{Challenge, Convergence, PositionCard, RedTeamCritique};
use crate::session::Knight;

fn knight_preamble(knight: &Knight, topic: &str) -> String {
    let mut preamble = format!(
        "You are the {role} in a structured strategic debate.\n\
         Your mandate: {mandate}\n\
         Debate topic: {topic}\n",
        role = knight.role,
        mandate = knight.mandate,
        topic = topic,
    );
    if let Some(instruction) = &knight.instruction {
        preamble.push_str("Additional instruction: ");
        preamble.push_str(instruction);
        preamble.push('\n');
    }
    preamble
}

pub fn research(knight: &Knight, topic: &str) -> String {
    format!(
        "{preamble}\n\
         Research the topic from your mandate's perspective. Respond with JSON:\n\
         {{\"summary\": \"...\", \"findings\": [\"...\"], \"citations\": [\"url\", ...]}}\n\
         Findings are concrete, checkable observations. Cite sources for each.",
        preamble = knight_preamble(knight, topic),
    )
}

pub fn opening(knight: &Knight, topic: &str, research_summary: Option<&str>) -> String {
    let mut prompt = knight_preamble(knight, topic);
    if let Some(summary) = research_summary {
        prompt.push_str("\nYour earlier research summary:\n");
        prompt.push_str(summary);
        prompt.push('\n');
    }
    prompt.push_str(
        "\nState your opening position. Respond with JSON:\n\
         {\"headline\": \"one sentence\", \"body\": \"full argument\", \
         \"citations\": [\"url\", ...], \"confidence\": 0.0-1.0}\n",
    );
    prompt
}

pub fn extract_claims(topic: &str, card: &PositionCard) -> String {
    format!(
        "Debate topic: {topic}\n\
         An opening position reads:\n\
         Headline: {headline}\n\
         {body}\n\n\
         Extract 2-3 testable claims this position depends on. Respond with JSON:\n\
         {{\"claims\": [\"claim text\", ...]}}",
        topic = topic,
        headline = card.headline,
        body = card.body,
    )
}

pub fn challenge(
    challenger: &Knight,
    topic: &str,
    defender_role: &str,
    claim_text: &str,
) -> String {
    format!(
        "{preamble}\n\
         The {defender_role} claims: \"{claim_text}\"\n\
         Challenge this claim from your mandate's perspective. Identify the \
         weakest assumption and press on it. Respond with JSON:\n\
         {{\"challenge\": \"your challenge\"}}",
        preamble = knight_preamble(challenger, topic),
        defender_role = defender_role,
        claim_text = claim_text,
    )
}

pub fn rebuttal(
    knight: &Knight,
    topic: &str,
    challenge: &Challenge,
    critique: Option<&RedTeamCritique>,
) -> String {
    let mut prompt = format!(
        "{preamble}\n\
         Your claim \"{claim}\" was challenged:\n{challenge}\n",
        preamble = knight_preamble(knight, topic),
        claim = challenge.claim_text,
        challenge = challenge.challenge,
    );
    if let Some(critique) = critique {
        prompt.push_str("\nAn adversarial review of the debate also noted:\n");
        prompt.push_str(&critique.summary);
        prompt.push('\n');
    }
    prompt.push_str(
        "\nRespond to the challenge. If it changed your assessment, say so.\n\
         Respond with JSON:\n\
         {\"response\": \"your rebuttal\", \"updated_confidence\": 0.0-1.0 or null}\n",
    );
    prompt
}

pub fn red_team(topic: &str, cards: &[&PositionCard], challenges: &[Challenge]) -> String {
    let mut prompt = format!(
        "You are an adversarial reviewer. Attack the reasoning in this debate.\n\
         Debate topic: {topic}\n\nPositions:\n"
    );
    for card in cards {
        prompt.push_str(&format!("- [{}] {}\n", card.knight_id, card.headline));
    }
    if !challenges.is_empty() {
        prompt.push_str("\nChallenges raised:\n");
        for c in challenges {
            prompt.push_str(&format!("- {} vs {}: {}\n", c.challenger_id, c.defender_id, c.challenge));
        }
    }
    prompt.push_str(
        "\nIdentify the flaws the panel is missing: groupthink, unstated \
         assumptions, survivorship bias, missing data. Respond with JSON:\n\
         {\"severity\": \"low|moderate|high|critical\", \"summary\": \"...\", \
         \"flaws\": [\"...\"]}\n",
    );
    prompt
}

pub fn convergence(topic: &str, cards: &[&PositionCard], challenges: &[Challenge]) -> String {
    let mut prompt = format!(
        "You are the moderator synthesizing a structured debate.\n\
         Debate topic: {topic}\n\nFinal positions:\n"
    );
    for card in cards {
        prompt.push_str(&format!(
            "- [{}] {} (confidence {:.2})\n  {}\n",
            card.knight_id, card.headline, card.confidence, card.body
        ));
    }
    if !challenges.is_empty() {
        prompt.push_str("\nChallenges raised during cross-examination:\n");
        for c in challenges {
            prompt.push_str(&format!("- {}\n", c.challenge));
        }
    }
    prompt.push_str(
        "\nSynthesize a recommendation-first summary. Respond with JSON:\n\
         {\"recommendation\": \"...\", \"rationale\": \"...\", \"analysis\": \"...\", \
         \"critical_risks\": [\"...\"], \"known_unknowns\": [\"...\"], \
         \"dissent\": [\"...\"], \"confidence\": 0.0-1.0}\n",
    );
    prompt
}

pub fn translator(topic: &str, convergence: &Convergence) -> String {
    format!(
        "Translate this debate outcome for an executive audience with no \
         context. Plain language, no jargon.\n\
         Debate topic: {topic}\n\
         Recommendation: {recommendation}\n\
         Rationale: {rationale}\n\
         Critical risks: {risks}\n\n\
         Respond with JSON:\n\
         {{\"executive_summary\": \"...\", \"talking_points\": [\"...\"]}}",
        topic = topic,
        recommendation = convergence.recommendation,
        rationale = convergence.rationale,
        risks = convergence.critical_risks.join("; "),
    )
}

pub fn ruling(topic: &str, convergence: Option<&Convergence>) -> String {
    let mut prompt = format!(
        "You are the moderator issuing the binding final ruling of a \
         structured debate.\n\
         Debate topic: {topic}\n"
    );
    if let Some(c) = convergence {
        prompt.push_str(&format!(
            "Converged recommendation: {}\nRationale: {}\nCritical risks: {}\n",
            c.recommendation,
            c.rationale,
            c.critical_risks.join("; "),
        ));
    } else {
        prompt.push_str("The debate produced no convergence summary; rule on the record as it stands.\n");
    }
    prompt.push_str(
        "\nIssue the ruling. Respond with JSON:\n\
         {\"ruling\": \"the binding decision\", \"rationale\": \"...\"}\n",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Knight;

    fn knight() -> Knight {
        Knight::new("k1", "champion", "argue for entry", "gpt-4o").with_instruction("be terse")
    }

    #[test]
    fn test_preamble_carries_instruction() {
        let prompt = research(&knight(), "Should we enter market X?");
        assert!(prompt.contains("champion"));
        assert!(prompt.contains("argue for entry"));
        assert!(prompt.contains("be terse"));
        assert!(prompt.contains("Should we enter market X?"));
    }

    #[test]
    fn test_opening_includes_research_when_present() {
        let with = opening(&knight(), "topic", Some("margins look strong"));
        assert!(with.contains("margins look strong"));
        let without = opening(&knight(), "topic", None);
        assert!(!without.contains("earlier research"));
    }

    #[test]
    fn test_ruling_without_convergence() {
        let prompt = ruling("topic", None);
        assert!(prompt.contains("no convergence summary"));
    }
}
