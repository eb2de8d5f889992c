/// A preset instruction prepended to outbound user text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persona {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub prompt: &'static str,
}

pub const STANDARD_ID: &str = "standard";

pub static PERSONAS: &[Persona] = &[
    Persona {
        id: STANDARD_ID,
        name: "Standard",
        description: "Balanced & helpful",
        prompt: "",
    },
    Persona {
        id: "dev",
        name: "Developer",
        description: "Code-focused & technical",
        prompt: "[SYSTEM: Act as a Senior Software Engineer. Provide efficient, well-commented code. Use Markdown for all code blocks.] ",
    },
    Persona {
        id: "researcher",
        name: "Researcher",
        description: "Factual & cited",
        prompt: "[SYSTEM: Act as a Document Analyst. Analyze the context/files deeply and provide cited, factual answers. Use clear headings.] ",
    },
    Persona {
        id: "designer",
        name: "Designer",
        description: "Visual & creative",
        prompt: "[SYSTEM: Act as a Creative Director. Focus on visual descriptions, design principles, and UI/UX best practices. When asked for images, generate detailed prompts.] ",
    },
    Persona {
        id: "witty",
        name: "Witty",
        description: "Fun & Sarcastic",
        prompt: "[SYSTEM: Be witty, sarcastic, and entertaining, but still helpful. Use emojis occasionally.] ",
    },
];

/// Look up a persona by id, falling back to `standard` for unknown ids.
pub fn find(id: &str) -> &'static Persona {
    PERSONAS
        .iter()
        .find(|p| p.id == id)
        .unwrap_or(&PERSONAS[0])
}

impl Persona {
    pub fn is_standard(&self) -> bool {
        self.id == STANDARD_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_known_and_unknown() {
        assert_eq!(find("dev").name, "Developer");
        assert!(find("nonexistent").is_standard());
    }

    #[test]
    fn test_only_standard_has_empty_prompt() {
        for p in PERSONAS {
            assert_eq!(p.prompt.is_empty(), p.is_standard(), "{}", p.id);
        }
    }
}
