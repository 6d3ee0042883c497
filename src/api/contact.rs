use super::{envelope, Envelope};
use crate::error::{AppError, Result};
use axum::{extract::rejection::JsonRejection, Json};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::info;

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

const MIN_MESSAGE_CHARS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Technical,
    Feature,
    Bug,
    General,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactForm {
    first_name: String,
    last_name: String,
    email: String,
    subject: Subject,
    message: String,
}

impl ContactForm {
    fn validate(&self) -> Result<()> {
        let problem = if self.first_name.trim().is_empty() {
            "First name is required"
        } else if self.last_name.trim().is_empty() {
            "Last name is required"
        } else if !EMAIL.is_match(self.email.trim()) {
            "Please enter a valid email address"
        } else if self.message.trim().chars().count() < MIN_MESSAGE_CHARS {
            "Message must be at least 10 characters long"
        } else {
            return Ok(());
        };
        Err(AppError::ValidationFailed(problem.to_string()))
    }
}

#[derive(Debug, Serialize)]
pub struct ContactReply {
    message: &'static str,
}

pub async fn submit(
    form: std::result::Result<Json<ContactForm>, JsonRejection>,
) -> Result<Json<Envelope<ContactReply>>> {
    let Json(form) = form?;
    form.validate()?;

    info!(
        first_name = form.first_name.trim(),
        last_name = form.last_name.trim(),
        email = form.email.trim(),
        subject = ?form.subject,
        "Contact form submitted: {}",
        form.message.trim()
    );

    Ok(envelope(ContactReply {
        message: "Thank you for your message! We will get back to you within 24 hours.",
    }))
}
