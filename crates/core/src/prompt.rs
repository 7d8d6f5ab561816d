use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a senior corporate HR interviewer conducting a structured interview. Your role is to:

1. Ask one question at a time
2. Wait for the candidate's response before asking the next question
3. Adapt your next question based on the candidate's previous answer
4. Be concise, professional, and realistic
5. Ask relevant follow-up questions when appropriate
6. Maintain a professional but friendly tone
7. When you feel the interview is complete (typically after 5-8 questions), provide a comprehensive feedback summary including:
   - Overall assessment
   - Strengths observed
   - Areas for improvement
   - A numerical score out of 100
   - End with \"INTERVIEW_END\" to signal completion

Start by greeting the candidate warmly and asking the first question.";

pub const DEFAULT_OPENING_INSTRUCTION: &str =
    "Please greet the candidate and ask your first question.";

/// The two prompts every conversation opens with.
#[derive(Debug, Clone, PartialEq)]
pub struct InterviewPrompts {
    pub system: String,
    pub opening: String,
}

impl Default for InterviewPrompts {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            opening: DEFAULT_OPENING_INSTRUCTION.to_string(),
        }
    }
}

impl InterviewPrompts {
    /// Built-in prompts, overridden by `system.md` and `opening.md` in `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut prompts = load_prompts(dir)?;
        let mut loaded = Self::default();

        if let Some(system) = prompts.remove("system").filter(|s| !s.trim().is_empty()) {
            tracing::info!(path = %dir.display(), "using system prompt override");
            loaded.system = system.trim().to_string();
        }
        if let Some(opening) = prompts.remove("opening").filter(|s| !s.trim().is_empty()) {
            tracing::info!(path = %dir.display(), "using opening instruction override");
            loaded.opening = opening.trim().to_string();
        }

        Ok(loaded)
    }
}

/// Reads every `*.md` file in `dir_path` into a map keyed by file stem.
pub fn load_prompts(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?
    {
        let path = entry?.path();

        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem for prompt file")?
                .to_string();

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;

            prompts.insert(key, content);
        }
    }

    Ok(prompts)
}
