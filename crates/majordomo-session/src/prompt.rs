//! Prompt synthesis.
//!
//! A session prompt combines the butler's system prompt, its skill
//! references, the trigger's own text, and — for ingress-triggered work —
//! a request-context block that lets tools reply on the originating
//! channel and keeps the work under the original trace.

use majordomo_core::RequestContext;

/// Assemble the full prompt handed to the CLI.
#[must_use]
pub fn assemble_prompt(
    system_prompt: &str,
    skills: &[String],
    trigger_prompt: &str,
    request_context: Option<&RequestContext>,
) -> String {
    let mut sections: Vec<String> = Vec::new();

    if !system_prompt.is_empty() {
        sections.push(system_prompt.to_owned());
    }

    if !skills.is_empty() {
        let mut block = String::from("Skills available to you:\n");
        for skill in skills {
            block.push_str("- ");
            block.push_str(skill);
            block.push('\n');
        }
        sections.push(block.trim_end().to_owned());
    }

    if let Some(ctx) = request_context {
        sections.push(format!(
            "Request context:\n\
             - request_id: {}\n\
             - source_channel: {}\n\
             - source_sender_identity: {}\n\
             - trace_id: {}\n\
             When replying to the user, pass this context to the notify tool \
             with intent \"reply\".",
            ctx.request_id, ctx.source_channel, ctx.source_sender_identity, ctx.trace_context
        ));
    }

    sections.push(trigger_prompt.to_owned());
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use majordomo_core::{RequestId, TraceContext};

    #[test]
    fn bare_trigger_stays_bare() {
        assert_eq!(assemble_prompt("", &[], "do the thing", None), "do the thing");
    }

    #[test]
    fn all_sections_in_order() {
        let ctx = RequestContext {
            request_id: RequestId::new(),
            source_channel: "telegram".to_owned(),
            source_sender_identity: "user:77".to_owned(),
            trace_context: TraceContext::new(),
        };
        let prompt = assemble_prompt(
            "You are the health butler.",
            &["weight-tracking".to_owned()],
            "Log my weight 75 kg",
            Some(&ctx),
        );
        let sys = prompt.find("health butler").unwrap();
        let skills = prompt.find("weight-tracking").unwrap();
        let context = prompt.find("request_id").unwrap();
        let trigger = prompt.find("Log my weight").unwrap();
        assert!(sys < skills && skills < context && context < trigger);
        assert!(prompt.contains(&ctx.request_id.to_string()));
    }
}
