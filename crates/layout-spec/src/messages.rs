use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    Status,
    Warning,
    Error,
}

/// A message meant for the editor who triggered the operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub level: MessageLevel,
    pub text: String,
}

/// Messages collected while handling one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Messages(Vec<Message>);

impl Messages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&mut self, text: impl Into<String>) {
        self.push(MessageLevel::Status, text);
    }

    pub fn warning(&mut self, text: impl Into<String>) {
        self.push(MessageLevel::Warning, text);
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.push(MessageLevel::Error, text);
    }

    fn push(&mut self, level: MessageLevel, text: impl Into<String>) {
        self.0.push(Message {
            level,
            text: text.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.0.iter()
    }

    pub fn at_level(&self, level: MessageLevel) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(move |message| message.level == level)
            .map(|message| message.text.as_str())
    }

    pub fn has_errors(&self) -> bool {
        self.0
            .iter()
            .any(|message| message.level == MessageLevel::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}
