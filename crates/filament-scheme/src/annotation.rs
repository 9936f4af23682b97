//! Annotations: non-functional visual notes attached to a container
//!
//! Annotations are part of the persisted workflow content but play no role
//! in execution semantics.

use serde::{Deserialize, Serialize};

use crate::types::{AnnotationId, Position};

/// A visual annotation inside a meta node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: AnnotationId,
    #[serde(flatten)]
    pub kind: AnnotationKind,
}

/// The concrete annotation shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationKind {
    /// A text note occupying a rectangle
    #[serde(rename_all = "camelCase")]
    Text {
        /// (x, y, width, height)
        rect: (f64, f64, f64, f64),
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        font_family: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        font_size: Option<f64>,
    },
    /// An arrow between two canvas points
    #[serde(rename_all = "camelCase")]
    Arrow {
        start: Position,
        end: Position,
        color: String,
    },
}

impl Annotation {
    /// Create a text annotation
    pub fn text(rect: (f64, f64, f64, f64), text: impl Into<String>) -> Self {
        Self {
            id: AnnotationId::fresh(),
            kind: AnnotationKind::Text {
                rect,
                text: text.into(),
                font_family: None,
                font_size: None,
            },
        }
    }

    /// Create an arrow annotation
    pub fn arrow(start: impl Into<Position>, end: impl Into<Position>, color: impl Into<String>) -> Self {
        Self {
            id: AnnotationId::fresh(),
            kind: AnnotationKind::Arrow {
                start: start.into(),
                end: end.into(),
                color: color.into(),
            },
        }
    }
}
