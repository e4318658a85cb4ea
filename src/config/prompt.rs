use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use log::{ info, warn };

pub const DISCLAIMER: &str =
    "This information is for educational purposes only and is not a substitute for professional medical advice. Always encourage the user to consult a qualified healthcare professional.";

const DIAGNOSIS_PLACEHOLDER: &str = "{diagnosis}";

#[derive(Debug)]
pub enum PromptError {
    MissingPlaceholder(String),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::MissingPlaceholder(key) =>
                write!(f, "Prompt template '{}' must contain {}", key, DIAGNOSIS_PLACEHOLDER),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PromptConfig {
    pub general_greeting: String,
    pub diagnosis_greeting: String,
    pub general_system: String,
    pub diagnosis_system: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            general_greeting: "Hello! I'm your cardiology assistant. Ask me anything about heart health, ECG readings or cardiac conditions.".to_string(),
            diagnosis_greeting: "Hello! Your ECG analysis indicates {diagnosis}. I can explain what this means and answer your questions about it.".to_string(),
            general_system: format!(
                "You are a knowledgeable and friendly cardiology assistant. Answer questions about heart health, ECG interpretation and cardiac conditions clearly and accurately. {}",
                DISCLAIMER
            ),
            diagnosis_system: format!(
                "You are a knowledgeable and friendly cardiology assistant. The user's ECG was classified as {{diagnosis}}. Focus your answers on {{diagnosis}}: what it is, its common causes, symptoms, risks and typical management. {}",
                DISCLAIMER
            ),
        }
    }
}

impl PromptConfig {
    fn validate(&self) -> Result<(), PromptError> {
        if !self.diagnosis_greeting.contains(DIAGNOSIS_PLACEHOLDER) {
            return Err(PromptError::MissingPlaceholder("diagnosis_greeting".to_string()));
        }
        if !self.diagnosis_system.contains(DIAGNOSIS_PLACEHOLDER) {
            return Err(PromptError::MissingPlaceholder("diagnosis_system".to_string()));
        }
        Ok(())
    }

    pub fn greeting(&self, diagnosis: Option<&str>) -> String {
        match diagnosis {
            Some(label) => self.diagnosis_greeting.replace(DIAGNOSIS_PLACEHOLDER, label),
            None => self.general_greeting.clone(),
        }
    }

    pub fn system_instruction(&self, diagnosis: Option<&str>) -> String {
        let body = match diagnosis {
            Some(label) => self.diagnosis_system.replace(DIAGNOSIS_PLACEHOLDER, label),
            None => self.general_system.clone(),
        };
        with_disclaimer(body)
    }
}

fn with_disclaimer(mut instruction: String) -> String {
    if !has_disclaimer(&instruction) {
        warn!("System instruction template has no disclaimer, appending it");
        if !instruction.is_empty() && !instruction.ends_with(char::is_whitespace) {
            instruction.push(' ');
        }
        instruction.push_str(DISCLAIMER);
    }
    instruction
}

pub fn has_disclaimer(instruction: &str) -> bool {
    instruction.contains(DISCLAIMER)
}

pub fn load_prompts<P: AsRef<Path>>(path: P) -> Result<Arc<PromptConfig>, PromptError> {
    let file_content = fs::read_to_string(path.as_ref())?;
    let config: PromptConfig = serde_json::from_str(&file_content)?;
    config.validate()?;
    info!("Loaded prompt templates from {}", path.as_ref().display());
    Ok(Arc::new(config))
}

pub fn load_or_default(path: Option<&str>) -> Arc<PromptConfig> {
    match path {
        Some(p) =>
            load_prompts(p).unwrap_or_else(|e| {
                warn!("Ignoring prompt file '{}': {}", p, e);
                Arc::new(PromptConfig::default())
            }),
        None => Arc::new(PromptConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn diagnosis_instruction_names_the_diagnosis() {
        let config = PromptConfig::default();
        let instruction = config.system_instruction(Some("Atrial Fibrillation"));
        assert!(instruction.contains("Atrial Fibrillation"));
        assert!(has_disclaimer(&instruction));
    }

    #[test]
    fn general_instruction_carries_disclaimer() {
        let instruction = PromptConfig::default().system_instruction(None);
        assert!(instruction.contains("cardiology assistant"));
        assert!(has_disclaimer(&instruction));
    }

    #[test]
    fn disclaimer_is_appended_when_template_drops_it() {
        let config = PromptConfig {
            general_system: "Be brief.".to_string(),
            ..PromptConfig::default()
        };
        let instruction = config.system_instruction(None);
        assert_eq!(instruction, format!("Be brief. {}", DISCLAIMER));
    }

    #[test]
    fn disclaimer_is_not_duplicated() {
        let config = PromptConfig {
            general_system: format!("Be brief. {}", DISCLAIMER),
            ..PromptConfig::default()
        };
        let instruction = config.system_instruction(None);
        assert_eq!(instruction.matches(DISCLAIMER).count(), 1);
    }

    #[test]
    fn greeting_depends_on_context() {
        let config = PromptConfig::default();
        assert!(config.greeting(Some("Bradycardia")).contains("Bradycardia"));
        assert_eq!(config.greeting(None), config.general_greeting);
    }

    #[test]
    fn partial_override_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"general_greeting": "Hi there."}}"#).unwrap();
        let config = load_prompts(file.path()).unwrap();
        assert_eq!(config.general_greeting, "Hi there.");
        assert_eq!(config.diagnosis_system, PromptConfig::default().diagnosis_system);
    }

    #[test]
    fn override_without_placeholder_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"diagnosis_greeting": "Hello."}}"#).unwrap();
        let err = load_prompts(file.path()).unwrap_err();
        assert!(matches!(err, PromptError::MissingPlaceholder(_)));
        assert!(load_or_default(file.path().to_str()).diagnosis_greeting.contains("{diagnosis}"));
    }
}
