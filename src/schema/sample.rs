//! Conversation-format training samples (one JSONL line each).

use serde::{Deserialize, Serialize};

/// Who speaks a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Human,
    Gpt,
    /// Anything else; always a sample error.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub from: Speaker,
    pub value: String,
}

impl Turn {
    pub fn human(value: impl Into<String>) -> Self {
        Self {
            from: Speaker::Human,
            value: value.into(),
        }
    }

    pub fn gpt(value: impl Into<String>) -> Self {
        Self {
            from: Speaker::Gpt,
            value: value.into(),
        }
    }
}

/// One path or a list of paths, as the `image` field allows both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleImage {
    Single(String),
    Multi(Vec<String>),
}

impl SampleImage {
    pub fn count(&self) -> usize {
        match self {
            SampleImage::Single(_) => 1,
            SampleImage::Multi(paths) => paths.len(),
        }
    }
}

/// A training sample: images plus an alternating human/gpt dialogue.
///
/// Single-image samples carry `width`/`height`; multi-image samples carry
/// `width_list`/`height_list`. Nothing is enforced at parse time so that
/// [`crate::quality::ConsistencyChecker::check_sample`] can report every
/// problem of a malformed line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSample {
    pub id: String,
    pub image: SampleImage,
    pub conversations: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width_list: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_list: Option<Vec<u32>>,
}

impl ConversationSample {
    pub fn single(
        id: impl Into<String>,
        path: impl Into<String>,
        width: u32,
        height: u32,
        conversations: Vec<Turn>,
    ) -> Self {
        Self {
            id: id.into(),
            image: SampleImage::Single(path.into()),
            conversations,
            width: Some(width),
            height: Some(height),
            width_list: None,
            height_list: None,
        }
    }

    pub fn multi(id: impl Into<String>, images: Vec<(String, u32, u32)>, conversations: Vec<Turn>) -> Self {
        let mut paths = Vec::with_capacity(images.len());
        let mut widths = Vec::with_capacity(images.len());
        let mut heights = Vec::with_capacity(images.len());
        for (p, w, h) in images {
            paths.push(p);
            widths.push(w);
            heights.push(h);
        }
        Self {
            id: id.into(),
            image: SampleImage::Multi(paths),
            conversations,
            width: None,
            height: None,
            width_list: Some(widths),
            height_list: Some(heights),
        }
    }

    pub fn image_count(&self) -> usize {
        self.image.count()
    }

    pub fn is_multi_image(&self) -> bool {
        matches!(self.image, SampleImage::Multi(_))
    }

    /// `(width, height)` per image, as far as the sample declares them.
    pub fn image_sizes(&self) -> Vec<(u32, u32)> {
        match &self.image {
            SampleImage::Single(_) => match (self.width, self.height) {
                (Some(w), Some(h)) => vec![(w, h)],
                _ => Vec::new(),
            },
            SampleImage::Multi(_) => match (&self.width_list, &self.height_list) {
                (Some(ws), Some(hs)) => ws.iter().copied().zip(hs.iter().copied()).collect(),
                _ => Vec::new(),
            },
        }
    }

    /// All turn values joined by a space.
    pub fn full_text(&self) -> String {
        self.conversations
            .iter()
            .map(|t| t.value.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// True when some answer carries a grounding box.
    pub fn is_grounding(&self) -> bool {
        self.conversations
            .iter()
            .any(|t| t.from == Speaker::Gpt && t.value.contains("<box>"))
    }
}
