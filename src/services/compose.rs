use crate::models::{Attachment, Persona};

/// What the composer hands to the send pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Shown in the transcript; never carries the persona instruction.
    pub display_text: String,
    /// Posted to the backend as the `message` field.
    pub final_text: String,
    pub attachment: Option<Attachment>,
}

/// Assemble an outbound message, or `None` when there is nothing to send.
/// Whitespace-only text counts as empty but is otherwise sent exactly as
/// typed; a persona instruction is only prepended to non-empty text.
pub fn compose_outbound(
    raw_text: &str,
    attachment: Option<Attachment>,
    persona: &Persona,
) -> Option<OutboundMessage> {
    let has_text = !raw_text.trim().is_empty();
    if !has_text && attachment.is_none() {
        return None;
    }

    let final_text = if !persona.is_standard() && !persona.prompt.is_empty() && has_text {
        format!("{}{}", persona.prompt, raw_text)
    } else {
        raw_text.to_string()
    };

    Some(OutboundMessage {
        display_text: raw_text.to_string(),
        final_text,
        attachment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::persona::{find, PERSONAS};

    #[test]
    fn test_empty_without_attachment_is_noop() {
        assert_eq!(compose_outbound("", None, find("dev")), None);
        assert_eq!(compose_outbound("   \n", None, find("standard")), None);
    }

    #[test]
    fn test_persona_prefix_applied_to_text() {
        for persona in PERSONAS.iter().filter(|p| !p.is_standard()) {
            let out = compose_outbound("Hello", None, persona).unwrap();
            assert_eq!(out.final_text, format!("{}Hello", persona.prompt));
            assert_eq!(out.display_text, "Hello");
        }
    }

    #[test]
    fn test_dev_persona_scenario() {
        let out = compose_outbound("Hello", None, find("dev")).unwrap();
        assert!(out
            .final_text
            .starts_with("[SYSTEM: Act as a Senior Software Engineer."));
        assert!(out.final_text.ends_with("] Hello"));
        assert_eq!(out.display_text, "Hello");
    }

    #[test]
    fn test_standard_persona_leaves_text_alone() {
        let out = compose_outbound("Hello", None, find("standard")).unwrap();
        assert_eq!(out.final_text, "Hello");
    }

    #[test]
    fn test_text_is_sent_exactly_as_typed() {
        let code = "    fn main() {}\n";
        let out = compose_outbound(code, None, find("standard")).unwrap();
        assert_eq!(out.final_text, code);
        assert_eq!(out.display_text, code);

        for persona in PERSONAS.iter().filter(|p| !p.is_standard()) {
            let out = compose_outbound("  Hello\n", None, persona).unwrap();
            assert_eq!(out.final_text, format!("{}  Hello\n", persona.prompt));
            assert_eq!(out.display_text, "  Hello\n");
        }
    }

    #[test]
    fn test_no_prefix_on_attachment_only() {
        let file = Attachment::new("a.pdf", "application/pdf", vec![1, 2, 3]);
        let out = compose_outbound("", Some(file.clone()), find("witty")).unwrap();
        assert_eq!(out.final_text, "");
        assert_eq!(out.attachment, Some(file));
    }
}
