//! Prompt construction for the streaming endpoints.

use serde::{Deserialize, Serialize};

use crate::upstream::ChatMessage;

/// Prompt behind `GET /api`.
pub const IDEA_PROMPT: &str = "Come up with a new business idea for AI Agents";

/// System prompt for visit summaries.
pub const VISIT_SYSTEM_PROMPT: &str = "\
You are provided with notes written by a doctor from a patient's visit.
Your job is to summarize the visit for the doctor and provide an email.
Reply with exactly three sections with the headings:
### Summary of visit for the doctor's records
### Next steps for the doctor
### Draft of email to patient in patient-friendly language
";

/// A patient visit, as posted by the consultation form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub patient_name: String,
    pub date_of_visit: String,
    pub notes: String,
}

impl Visit {
    /// Every field must carry something besides whitespace.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("patient_name", &self.patient_name),
            ("date_of_visit", &self.date_of_visit),
            ("notes", &self.notes),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{field} must not be empty"));
            }
        }
        Ok(())
    }

    pub fn user_prompt(&self) -> String {
        format!(
            "Create the summary, next steps and draft email for:\n\
             Patient Name: {}\n\
             Date of Visit: {}\n\
             Notes:\n\
             {}",
            self.patient_name, self.date_of_visit, self.notes
        )
    }

    /// System instructions followed by the visit itself.
    pub fn messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(VISIT_SYSTEM_PROMPT),
            ChatMessage::user(self.user_prompt()),
        ]
    }
}

pub fn idea_messages() -> Vec<ChatMessage> {
    vec![ChatMessage::user(IDEA_PROMPT)]
}
