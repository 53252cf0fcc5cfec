use teloxide::types::InlineKeyboardMarkup;

/// Telegram rejects messages over 4096 characters.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// A file attached to a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// What the bot sends back for one command. Text is HTML.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<InlineKeyboardMarkup>,
    /// When set, `text` becomes the document caption.
    pub document: Option<Document>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Build a reply from lines, cutting it at a line boundary when too long.
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut text = String::new();
        let mut chars = 0;
        for line in lines {
            let line = line.as_ref();
            let len = line.chars().count() + 1;
            if chars + len > MAX_MESSAGE_CHARS {
                text.push_str("…");
                break;
            }
            text.push_str(line);
            text.push('\n');
            chars += len;
        }
        Self::text(text.trim_end().to_string())
    }

    pub fn document(file_name: impl Into<String>, bytes: Vec<u8>, caption: impl Into<String>) -> Self {
        Self {
            text: caption.into(),
            keyboard: None,
            document: Some(Document {
                file_name: file_name.into(),
                bytes,
            }),
        }
    }

    pub fn with_keyboard(mut self, keyboard: InlineKeyboardMarkup) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}
