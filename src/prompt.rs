//! Prompt templates and multimodal request construction.

use crate::core::errors::HmeError;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named instruction strings, keyed by a symbolic prompt key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptTemplates(BTreeMap<String, String>);

impl PromptTemplates {
    /// Key of the handwritten-math template.
    pub const MATH_TO_LATEX: &'static str = "math_to_latex";
    /// Key of the printed-math template.
    pub const PRINTED_MATH_TO_LATEX: &'static str = "printed_math_to_latex";

    /// Creates an empty registry. Use [`Default`] for the built-in templates.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Registers `instruction` under `key`, replacing any previous entry.
    pub fn with_template(mut self, key: impl Into<String>, instruction: impl Into<String>) -> Self {
        self.0.insert(key.into(), instruction.into());
        self
    }

    /// Looks up the instruction registered under `key`.
    ///
    /// # Arguments
    ///
    /// * `key` - Symbolic prompt key, matched exactly.
    ///
    /// # Returns
    ///
    /// The instruction text, or `None` if the key is not registered.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self::new()
            .with_template(
                Self::MATH_TO_LATEX,
                "Convert the handwritten mathematical expression in this image to LaTeX.",
            )
            .with_template(
                Self::PRINTED_MATH_TO_LATEX,
                "Convert the printed mathematical expression in this image to LaTeX.",
            )
    }
}

/// One part of a multimodal request.
#[derive(Debug, Clone, Copy)]
pub enum PromptPart<'a> {
    Image(&'a RgbImage),
    Text(&'a str),
}

/// An image plus the instruction to apply to it.
///
/// Serialized as `[image, text]`; the order is fixed so that downstream
/// encodings are reproducible.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    prompt_key: &'a str,
    image: &'a RgbImage,
    instruction: &'a str,
}

impl<'a> PromptContext<'a> {
    pub fn prompt_key(&self) -> &'a str {
        self.prompt_key
    }

    pub fn image(&self) -> &'a RgbImage {
        self.image
    }

    pub fn instruction(&self) -> &'a str {
        self.instruction
    }

    /// The request parts, image first.
    pub fn parts(&self) -> [PromptPart<'a>; 2] {
        [PromptPart::Image(self.image), PromptPart::Text(self.instruction)]
    }

    /// Chat-template form used by chat-style vision-language models.
    pub fn to_chat_messages(&self) -> Vec<ChatMessage<'a>> {
        let content = self
            .parts()
            .into_iter()
            .map(|part| match part {
                PromptPart::Image(_) => ContentPart::Image,
                PromptPart::Text(text) => ContentPart::Text { text },
            })
            .collect();
        vec![ChatMessage {
            role: "user",
            content,
        }]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'static str,
    pub content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart<'a> {
    Image,
    Text { text: &'a str },
}

/// Builds [`PromptContext`]s from the configured templates.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    templates: PromptTemplates,
}

impl PromptBuilder {
    pub fn new(templates: PromptTemplates) -> Self {
        Self { templates }
    }

    /// The templates this builder resolves keys against.
    pub fn templates(&self) -> &PromptTemplates {
        &self.templates
    }

    /// Looks up the instruction for `prompt_key`.
    ///
    /// An unknown key means the caller and the configuration disagree; it is
    /// reported as `UnknownPromptKey` rather than a user-facing input error.
    pub fn instruction(&self, prompt_key: &str) -> Result<&str, HmeError> {
        self.templates
            .get(prompt_key)
            .ok_or_else(|| HmeError::UnknownPromptKey {
                key: prompt_key.to_string(),
            })
    }

    /// Pairs `image` with the instruction registered under `prompt_key`.
    ///
    /// # Arguments
    ///
    /// * `prompt_key` - Key to resolve in the templates.
    /// * `image` - Image the instruction applies to. Borrowed, not copied.
    ///
    /// # Returns
    ///
    /// A [`PromptContext`] borrowing from the builder and the image, or
    /// `UnknownPromptKey` if the key is not registered.
    pub fn build<'a>(
        &'a self,
        prompt_key: &'a str,
        image: &'a RgbImage,
    ) -> Result<PromptContext<'a>, HmeError> {
        let instruction = self.instruction(prompt_key)?;
        Ok(PromptContext {
            prompt_key,
            image,
            instruction,
        })
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(PromptTemplates::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_orders_image_before_text() {
        let builder = PromptBuilder::default();
        let image = RgbImage::new(4, 2);
        let ctx = builder.build(PromptTemplates::MATH_TO_LATEX, &image).unwrap();

        let parts = ctx.parts();
        assert!(matches!(parts[0], PromptPart::Image(img) if img.dimensions() == (4, 2)));
        assert!(matches!(parts[1], PromptPart::Text(t) if t.contains("LaTeX")));
        assert_eq!(ctx.prompt_key(), "math_to_latex");
    }

    #[test]
    fn test_unknown_key() {
        let builder = PromptBuilder::default();
        let image = RgbImage::new(1, 1);
        let err = builder.build("table_to_html", &image).unwrap_err();
        assert_eq!(
            err,
            HmeError::UnknownPromptKey {
                key: "table_to_html".to_string()
            }
        );
    }

    #[test]
    fn test_chat_messages_serialization() {
        let templates = PromptTemplates::new().with_template("k", "Read the formula.");
        let builder = PromptBuilder::new(templates);
        let image = RgbImage::new(1, 1);
        let ctx = builder.build("k", &image).unwrap();

        let json = serde_json::to_string(&ctx.to_chat_messages()).unwrap();
        assert_eq!(
            json,
            r#"[{"role":"user","content":[{"type":"image"},{"type":"text","text":"Read the formula."}]}]"#
        );
    }

    #[test]
    fn test_templates_deserialize_from_map() {
        let templates: PromptTemplates =
            serde_json::from_str(r#"{"a": "first", "b": "second"}"#).unwrap();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
