//! Prompt construction for scene analysis and rule evaluation.

use pmcp_types::WatchRule;

pub const SCENE_SYSTEM: &str = "You are the perception module of a home camera \
assistant. You describe camera frames factually and concisely. You always \
answer with a single JSON object and nothing else.";

/// Prompt for `analyze_scene`.
pub fn scene_prompt(prior_context: &str) -> String {
    let mut p = String::from(
        "Describe this camera frame. Respond with JSON only:\n\
         {\"summary\": \"one or two sentences\", \
         \"objects\": [\"notable\", \"objects\"], \
         \"people_count\": 0, \
         \"changes\": \"what changed since the prior context, or empty\"}\n",
    );
    if !prior_context.is_empty() {
        p.push_str("\nPrior context:\n");
        p.push_str(prior_context);
    }
    p
}

/// Prompt for `evaluate_rules`.
pub fn rules_prompt(rules: &[WatchRule], scene_context: &str) -> String {
    let mut p = String::from(
        "Evaluate each watch rule against this camera frame. Respond with a \
         JSON array only, one entry per rule:\n\
         [{\"rule_id\": \"...\", \"triggered\": false, \
         \"confidence\": 0.0, \"reasoning\": \"...\"}]\n\
         Set triggered=true only when the condition is clearly met in the \
         image. Confidence is your certainty in the verdict, 0.0 to 1.0.\n\
         \nRules:\n",
    );
    for rule in rules {
        p.push_str(&format!("- id={} condition: {}\n", rule.id, rule.condition));
    }
    if !scene_context.is_empty() {
        p.push_str("\nScene context:\n");
        p.push_str(scene_context);
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmcp_types::{NotificationTarget, Priority, RuleSpec};

    #[test]
    fn rules_prompt_lists_every_rule_id() {
        let rules: Vec<WatchRule> = (0..3)
            .map(|i| {
                WatchRule::from_spec(RuleSpec {
                    name: format!("rule {i}"),
                    condition: format!("condition {i}"),
                    camera_id: None,
                    priority: Priority::default(),
                    notification: NotificationTarget::default(),
                    cooldown_seconds: 0,
                    custom_message: None,
                    owner_id: None,
                })
            })
            .collect();
        let p = rules_prompt(&rules, "a quiet room");
        for rule in &rules {
            assert!(p.contains(&rule.id));
        }
        assert!(p.contains("a quiet room"));
    }
}
