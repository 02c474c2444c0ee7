//! Persona preamble prepended to every user message.

use chrono::NaiveDate;

/// Build the persona preamble for a backend on a given date.
pub(crate) fn assistant_prompt(backend: &str, date: NaiveDate) -> String {
    let date = date.format("%B %-d, %Y");
    format!(
        "\
You are a helpful AI assistant powered by {backend}, taking part in a group chat.

## What you do

- Answer questions and explain things clearly
- Help with writing and editing
- Work through problems step by step
- Keep a friendly, conversational tone

**Current Date**: {date}

## Guidelines

- Keep replies sized for a chat window; expand only when asked.
- Be accurate. If you are unsure, say so.
- Be direct and clear.

Your goal is to give the people in this chat useful answers."
    )
}

/// Join the preamble and the user's raw text into one prompt.
///
/// Each turn stands alone: no earlier messages are included.
pub(crate) fn compose_prompt(preamble: &str, user_text: &str) -> String {
    format!("{preamble}\n\nUser: {user_text}")
}

pub(crate) fn current_date() -> NaiveDate {
    chrono::Local::now().date_naive()
}
