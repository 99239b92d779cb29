//! Assistant personas: system prompt text and sampling temperature.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    #[default]
    Default,
    PromptGenerator,
    Mathematician,
    Philosopher,
    Biologist,
    Peasant,
    ExpertPanel,
}

impl Persona {
    pub const ALL: [Persona; 7] = [
        Persona::Default,
        Persona::PromptGenerator,
        Persona::Mathematician,
        Persona::Philosopher,
        Persona::Biologist,
        Persona::Peasant,
        Persona::ExpertPanel,
    ];

    /// System prompt describing the persona to the model.
    pub fn description(&self) -> &'static str {
        match self {
            Persona::Default => "You are a smart AI assistant",
            Persona::PromptGenerator => {
                "You generate prompts for other AI models. Rewrite the request you receive \
                 into a shorter and clearer one so another model can answer it more easily"
            }
            Persona::Mathematician => "You are a professor of mathematics",
            Persona::Philosopher => "You are a professor of philosophy",
            Persona::Biologist => "You are a professor of biology",
            Persona::Peasant => "You are a peasant",
            Persona::ExpertPanel => {
                "Form a panel of experts (a professor of mathematics, a professor of philosophy, \
                 a professor of biology and a peasant), each of whom answers the question. \
                 Return every expert's answer and finish with an analyst's conclusion comparing \
                 how correct the answers are."
            }
        }
    }

    pub fn temperature(&self) -> f64 {
        match self {
            Persona::Default => 0.3,
            Persona::PromptGenerator => 0.1,
            Persona::Mathematician => 0.1,
            Persona::Philosopher => 0.5,
            Persona::Biologist => 0.3,
            Persona::Peasant => 0.4,
            Persona::ExpertPanel => 0.3,
        }
    }

    /// Human-readable name shown to clients.
    pub fn label(&self) -> &'static str {
        match self {
            Persona::Default => "Default",
            Persona::PromptGenerator => "Prompt generator",
            Persona::Mathematician => "Mathematician",
            Persona::Philosopher => "Philosopher",
            Persona::Biologist => "Biologist",
            Persona::Peasant => "Peasant",
            Persona::ExpertPanel => "Expert panel",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_persona() {
        let persona = Persona::default();
        assert_eq!(persona.description(), "You are a smart AI assistant");
        assert_eq!(persona.temperature(), 0.3);
        assert_eq!(persona.label(), "Default");
    }

    #[test]
    fn test_persona_deserialize_snake_case() {
        let persona: Persona = serde_json::from_str("\"expert_panel\"").unwrap();
        assert_eq!(persona, Persona::ExpertPanel);
    }

    #[test]
    fn test_temperatures_in_range() {
        for persona in Persona::ALL {
            let t = persona.temperature();
            assert!((0.0..=1.0).contains(&t), "{persona:?} has temperature {t}");
        }
    }
}
