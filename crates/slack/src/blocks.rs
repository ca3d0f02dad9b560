use serde::Serialize;
use squadup_core::{Display, IntakeReply};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    PlainText { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::PlainText { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::PlainText { text } | Self::Mrkdwn { text } => text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Header {
        block_id: String,
        text: TextObject,
    },
    Section {
        block_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<TextObject>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        fields: Vec<TextObject>,
    },
    Context {
        block_id: String,
        elements: Vec<TextObject>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    #[serde(rename = "text")]
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn header(mut self, block_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.blocks.push(Block::Header { block_id: block_id.into(), text: TextObject::plain(text) });
        self
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        let (text, fields) = builder.build();
        self.blocks.push(Block::Section { block_id: block_id.into(), text, fields });
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Context { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
    fields: Vec<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(text));
        self
    }

    pub fn field(&mut self, text: impl Into<String>) -> &mut Self {
        self.fields.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> (Option<TextObject>, Vec<TextObject>) {
        if self.text.is_none() && self.fields.is_empty() {
            return (Some(TextObject::plain(" ")), self.fields);
        }
        (self.text, self.fields)
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

/// Converts a rendered match request into Block Kit.
///
/// Inline fields share one `fields` section; every other field gets a section
/// of its own, so the roster always renders below the summary.
pub fn display_message(display: &Display) -> MessageTemplate {
    let mut builder = MessageBuilder::new(display.fallback_text.as_str())
        .header("match.title.v1", display.title.as_str());

    let inline: Vec<_> = display.fields.iter().filter(|field| field.inline).collect();
    if !inline.is_empty() {
        builder = builder.section("match.summary.v1", |section| {
            for field in &inline {
                section.field(format!("*{}*\n{}", field.name, field.value));
            }
        });
    }

    for (index, field) in display.fields.iter().filter(|field| !field.inline).enumerate() {
        builder = builder.section(format!("match.roster.v{}", index + 1), |section| {
            section.mrkdwn(format!("*{}*\n{}", field.name, field.value));
        });
    }

    builder.build()
}

pub fn intake_reply_message(reply: &IntakeReply) -> MessageTemplate {
    let text = reply.text();
    match reply {
        IntakeReply::Usage(error) | IntakeReply::Failed(error) => {
            MessageBuilder::new(text.as_str())
                .section("match.intake.error.v1", |section| {
                    section.mrkdwn(text.as_str());
                })
                .context("match.intake.correlation.v1", |context| {
                    context.mrkdwn(format!("Request ID: `{}`", error.correlation_id()));
                })
                .build()
        }
        IntakeReply::WrongChannel { .. } | IntakeReply::Posted { .. } => {
            MessageBuilder::new(text.as_str())
                .section("match.intake.reply.v1", |section| {
                    section.plain(text.as_str());
                })
                .build()
        }
    }
}
