//! Rendering and injection of locally selected ads.

use crate::decision::{AdDecision, Placement};

pub const SPONSORED_LABEL: &str = "Sponsored";
const BLOCK_SEPARATOR: &str = "\n\n";

/// Display-ready fragment for `decision`, empty for the no-op decision
///
/// The fragment carries its own leading separator so that appending it to a
/// response is plain concatenation.
pub fn render_ad(decision: &AdDecision) -> String {
    match &decision.creative {
        None => String::new(),
        Some(creative) => format!(
            "{}[{}] {}: {} {}",
            BLOCK_SEPARATOR, SPONSORED_LABEL, creative.headline, creative.body, creative.url
        ),
    }
}

/// Splice the rendered ad into `response_text` at the decision's placement
///
/// The no-op decision returns `response_text` unchanged.
pub fn inject_ad(response_text: &str, decision: &AdDecision) -> String {
    let fragment = render_ad(decision);
    if fragment.is_empty() {
        return response_text.to_string();
    }

    match decision.placement {
        Placement::End => format!("{}{}", response_text, fragment),
        Placement::Start => format!(
            "{}{}{}",
            fragment.trim_start_matches(BLOCK_SEPARATOR),
            BLOCK_SEPARATOR,
            response_text
        ),
        Placement::AfterFirstParagraph => match response_text.find(BLOCK_SEPARATOR) {
            Some(split) => {
                let (first, rest) = response_text.split_at(split);
                format!("{}{}{}", first, fragment, rest)
            }
            None => format!("{}{}", response_text, fragment),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{select_ad, AdContext};

    fn decision_with(placement: Placement) -> AdDecision {
        let mut decision = select_ad(&AdContext::new("Need performance tips", "Use caching"));
        decision.placement = placement;
        decision
    }

    #[test]
    fn test_end_to_end_append() {
        let decision = select_ad(&AdContext::new("Need performance tips", "Use caching"));
        let fragment = render_ad(&decision);

        assert!(!fragment.is_empty());
        assert!(fragment.contains(SPONSORED_LABEL));
        assert!(fragment.contains("EdgeCache"));
        assert_eq!(inject_ad("Use caching", &decision), format!("Use caching{}", fragment));
    }

    #[test]
    fn test_noop_is_identity() {
        let noop = AdDecision::noop();
        assert_eq!(render_ad(&noop), "");
        for text in ["", "Use caching", "multi\n\nparagraph\n\ntext", "  padded  "] {
            assert_eq!(inject_ad(text, &noop), text);
        }

        let unmatched = select_ad(&AdContext::new("Write a haiku", "Leaves fall"));
        assert_eq!(inject_ad("Leaves fall", &unmatched), "Leaves fall");
    }

    #[test]
    fn test_start_placement() {
        let decision = decision_with(Placement::Start);
        let injected = inject_ad("Use caching", &decision);
        assert!(injected.starts_with("[Sponsored] EdgeCache"));
        assert!(injected.ends_with("\n\nUse caching"));
    }

    #[test]
    fn test_after_first_paragraph_placement() {
        let decision = decision_with(Placement::AfterFirstParagraph);
        let fragment = render_ad(&decision);

        let injected = inject_ad("First.\n\nSecond.", &decision);
        assert_eq!(injected, format!("First.{}\n\nSecond.", fragment));

        let single = inject_ad("Only one paragraph", &decision);
        assert_eq!(single, format!("Only one paragraph{}", fragment));
    }
}
