//! Records exchanged between the routes, the store and the report pipeline.

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};

use crate::vision::Classification;

pub const NO_ASSESSMENT: &str = "No assessment available";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    #[default]
    Pending,
    Analyzing,
    Completed,
    Error,
}

/// Rectangle drawn by an operator, in original-image pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationBox {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// x1, y1, x2, y2
    pub coords: [f64; 4],
}

impl AnnotationBox {
    pub fn new(id: impl Into<String>, coords: [f64; 4]) -> Self {
        Self {
            id: id.into(),
            label: None,
            coords,
        }
    }

    /// Corner pair ordered so that x1 <= x2 and y1 <= y2.
    pub fn rect(&self) -> (f64, f64, f64, f64) {
        let [a, b, c, d] = self.coords;
        (a.min(c), b.min(d), a.max(c), b.max(d))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub uploaded_at: String,
    #[serde(default)]
    pub status: ImageStatus,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub annotations: Vec<AnnotationBox>,
    #[serde(default)]
    pub has_annotated_asset: bool,
}

impl ImageRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size,
            uploaded_at: Utc::now().to_rfc3339(),
            status: ImageStatus::Pending,
            comment: String::new(),
            annotations: Vec::new(),
            has_annotated_asset: false,
        }
    }

    pub fn mark_analyzing(&mut self) {
        self.status = ImageStatus::Analyzing;
    }

    pub fn apply_classification(&mut self, result: &Classification) {
        match (&result.comment, result.success) {
            (Some(comment), true) if !comment.is_empty() => {
                self.status = ImageStatus::Completed;
                self.comment = comment.clone();
            }
            _ => {
                self.status = ImageStatus::Error;
                self.comment = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "Analysis failed".to_string());
            }
        }
    }

    pub fn add_box(&mut self, annotation: AnnotationBox) {
        self.annotations.push(annotation);
    }

    /// Returns false when no box carried `box_id`.
    pub fn remove_box(&mut self, box_id: &str) -> bool {
        let before = self.annotations.len();
        self.annotations.retain(|b| b.id != box_id);
        self.annotations.len() != before
    }

    pub fn clear_boxes(&mut self) {
        self.annotations.clear();
        self.has_annotated_asset = false;
    }

    pub fn set_annotated_asset(&mut self, saved: bool) {
        self.has_annotated_asset = saved;
    }

    /// The document persisted next to the image bytes.
    pub fn metadata(&self) -> ImageMetadata {
        ImageMetadata {
            comment: self.comment.clone(),
            annotations: self.annotations.clone(),
            name: Some(self.name.clone()).filter(|n| !n.is_empty()),
        }
    }
}

/// JSON document stored next to each image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub annotations: Vec<AnnotationBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ImageMetadata {
    /// Stored comment, or the placeholder used in reports.
    pub fn comment_or_placeholder(&self) -> &str {
        if self.comment.trim().is_empty() {
            NO_ASSESSMENT
        } else {
            &self.comment
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Default,
    Info,
    Error,
    Cost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
}

impl LogEntry {
    pub fn new(message: impl Into<String>, kind: LogKind) -> Self {
        Self {
            timestamp: Local::now().format("%H:%M:%S").to_string(),
            message: message.into(),
            kind,
        }
    }
}
