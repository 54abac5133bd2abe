//! Batch report assembly: resolve ids, prepare images, lay out sections.

use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    InspectorError, IResult, codec,
    config::ReportConfig,
    docx,
    model::{AnnotationBox, ImageMetadata, ImageRecord, NO_ASSESSMENT},
    storage::AssetStore,
};

const DPI: f64 = 96.0;
const CM_PER_INCH: f64 = 2.54;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportVariant {
    /// Original images
    Normal,
    /// Annotated images where available
    Modified,
}

impl ReportVariant {
    pub fn file_name(&self, date: NaiveDate) -> String {
        match self {
            Self::Normal => format!("inspection-report-{}.docx", date.format("%Y-%m-%d")),
            Self::Modified => {
                format!("inspection-report-annotated-{}.docx", date.format("%Y-%m-%d"))
            }
        }
    }
}

impl FromStr for ReportVariant {
    type Err = InspectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "modified" => Ok(Self::Modified),
            other => Err(InspectorError::InvalidRequest(format!(
                "Unknown report variant: {}",
                other
            ))),
        }
    }
}

/// Report request body. The id list is the current shape; whole records are
/// still accepted from older clients, and their comment and boxes stand in
/// for metadata the store does not have.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ReportRequest {
    Ids {
        #[serde(rename = "imageIds")]
        image_ids: Vec<String>,
    },
    Records {
        images: Vec<ImageRecord>,
    },
}

/// One image to place in a report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportItem {
    pub id: String,
    /// Used when the store holds no metadata for `id`
    pub fallback: Option<ImageMetadata>,
}

impl From<String> for ReportItem {
    fn from(id: String) -> Self {
        Self { id, fallback: None }
    }
}

impl From<ImageRecord> for ReportItem {
    fn from(record: ImageRecord) -> Self {
        let fallback = Some(record.metadata());
        Self {
            id: record.id,
            fallback,
        }
    }
}

impl ReportRequest {
    /// Validated, ordered report items.
    pub fn into_items(self, max_images: usize) -> IResult<Vec<ReportItem>> {
        let items: Vec<ReportItem> = match self {
            Self::Ids { image_ids } => image_ids.into_iter().map(ReportItem::from).collect(),
            Self::Records { images } => images.into_iter().map(ReportItem::from).collect(),
        };

        if items.is_empty() {
            return Err(InspectorError::InvalidRequest("No images provided".to_string()));
        }
        if items.len() > max_images {
            return Err(InspectorError::InvalidRequest(format!(
                "Maximum {} images per report",
                max_images
            )));
        }
        Ok(items)
    }
}

/// A prepared JPEG and the size it is shown at in the document.
#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub display_width: u32,
    pub display_height: u32,
}

#[derive(Debug, Clone)]
pub enum ReportBlock {
    Image(EmbeddedImage),
    LoadError(String),
    Label(String),
    Comment(String),
    PageBreak,
}

/// One batch of images; the packer starts every section after the first on a new page.
#[derive(Debug, Clone, Default)]
pub struct ReportSection {
    pub blocks: Vec<ReportBlock>,
}

/// Display size in pixels at 96 DPI, capped at `max_width_cm` wide.
pub fn display_size(width: u32, height: u32, max_width_cm: f64) -> (u32, u32) {
    if width == 0 {
        return (0, height);
    }
    let max_width_px = max_width_cm / CM_PER_INCH * DPI;
    let scale = (max_width_px / width as f64).min(1.0);
    (
        (width as f64 * scale).round() as u32,
        (height as f64 * scale).round() as u32,
    )
}

/// "Image 01" for index 0.
pub fn image_label(index: usize) -> String {
    format!("Image {:02}", index + 1)
}

struct ReportEntry {
    id: String,
    comment: String,
    annotations: Vec<AnnotationBox>,
}

#[derive(Clone)]
pub struct ReportBuilder {
    store: AssetStore,
    config: ReportConfig,
}

impl ReportBuilder {
    pub fn new(store: AssetStore, config: ReportConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    /// Builds the whole document for `items`, in order.
    pub async fn build(&self, items: &[ReportItem], variant: ReportVariant) -> IResult<Vec<u8>> {
        info!("📄 Building {:?} report for {} images", variant, items.len());
        let sections = self.assemble(items, variant).await;
        let document = docx::pack_async(sections).await?;
        info!("✅ Report ready: {} bytes", document.len());
        Ok(document)
    }

    /// Lays out one section per batch. Never fails: per-image problems become
    /// inline error paragraphs.
    pub async fn assemble(&self, items: &[ReportItem], variant: ReportVariant) -> Vec<ReportSection> {
        let batch_size = self.config.batch_size.max(1);
        let mut sections = Vec::with_capacity(items.len().div_ceil(batch_size));

        for (batch_index, batch) in items.chunks(batch_size).enumerate() {
            let start = batch_index * batch_size;
            debug!(
                "Processing batch {} (images {}-{})",
                batch_index + 1,
                start + 1,
                start + batch.len()
            );
            sections.push(self.build_section(batch, start, variant).await);
        }

        sections
    }

    async fn build_section(
        &self,
        batch: &[ReportItem],
        start: usize,
        variant: ReportVariant,
    ) -> ReportSection {
        let per_page = self.config.images_per_page.max(1);
        let mut section = ReportSection::default();

        for (i, item) in batch.iter().enumerate() {
            let entry = self.resolve_entry(item).await;

            match self.load_image(&entry, variant).await {
                Ok(image) => section.blocks.push(ReportBlock::Image(image)),
                Err(e) => {
                    warn!("⚠️ Image {} left out of report: {}", item.id, e);
                    section
                        .blocks
                        .push(ReportBlock::LoadError(format!("[Error loading image: {}]", e)));
                }
            }

            section.blocks.push(ReportBlock::Label(image_label(start + i)));
            section
                .blocks
                .push(ReportBlock::Comment(format!("Comment: {}", entry.comment)));

            if (i + 1) % per_page == 0 && i + 1 != batch.len() {
                section.blocks.push(ReportBlock::PageBreak);
            }
        }

        section
    }

    /// Stored metadata wins over what the request carried.
    async fn resolve_entry(&self, item: &ReportItem) -> ReportEntry {
        let id = item.id.as_str();
        let stored = match self.store.get_meta(id).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("⚠️ Unreadable metadata for {}: {}", id, e);
                None
            }
        };

        match stored.or_else(|| item.fallback.clone()) {
            Some(metadata) => ReportEntry {
                id: id.to_string(),
                comment: metadata.comment_or_placeholder().to_string(),
                annotations: metadata.annotations,
            },
            None => {
                warn!("⚠️ No metadata found for {}", id);
                ReportEntry {
                    id: id.to_string(),
                    comment: NO_ASSESSMENT.to_string(),
                    annotations: Vec::new(),
                }
            }
        }
    }

    async fn original(&self, id: &str) -> IResult<Vec<u8>> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| InspectorError::NotFound(format!("Image {} not found in store", id)))
    }

    async fn load_image(&self, entry: &ReportEntry, variant: ReportVariant) -> IResult<EmbeddedImage> {
        let source = match variant {
            ReportVariant::Normal => self.original(&entry.id).await?,
            ReportVariant::Modified => {
                if let Some(saved) = self.store.get_annotated(&entry.id).await? {
                    saved
                } else if !entry.annotations.is_empty() {
                    let original = self.original(&entry.id).await?;
                    codec::overlay_async(original, entry.annotations.clone()).await?
                } else {
                    self.original(&entry.id).await?
                }
            }
        };

        let max = self.config.max_dimension;
        let encoded = codec::resize_async(source, max, max, self.config.jpeg_quality).await?;
        let (display_width, display_height) =
            display_size(encoded.width, encoded.height, self.config.max_width_cm);

        Ok(EmbeddedImage {
            bytes: encoded.bytes,
            width: encoded.width,
            height: encoded.height,
            display_width,
            display_height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::tests::png_bytes, model::ImageMetadata, storage::annotated_key};

    const MAX_DISPLAY_PX: f64 = 15.0 / 2.54 * 96.0;

    fn builder(store: &AssetStore) -> ReportBuilder {
        ReportBuilder::new(store.clone(), ReportConfig::default())
    }

    fn items(names: &[&str]) -> Vec<ReportItem> {
        names.iter().map(|s| ReportItem::from(s.to_string())).collect()
    }

    fn item_ids(items: Vec<ReportItem>) -> Vec<String> {
        items.into_iter().map(|item| item.id).collect()
    }

    fn labels(sections: &[ReportSection]) -> Vec<String> {
        sections
            .iter()
            .flat_map(|s| s.blocks.iter())
            .filter_map(|b| match b {
                ReportBlock::Label(l) => Some(l.clone()),
                _ => None,
            })
            .collect()
    }

    fn comments(sections: &[ReportSection]) -> Vec<String> {
        sections
            .iter()
            .flat_map(|s| s.blocks.iter())
            .filter_map(|b| match b {
                ReportBlock::Comment(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    fn images(sections: &[ReportSection]) -> Vec<EmbeddedImage> {
        sections
            .iter()
            .flat_map(|s| s.blocks.iter())
            .filter_map(|b| match b {
                ReportBlock::Image(img) => Some(img.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn display_size_caps_width_at_fifteen_cm() {
        assert_eq!(display_size(1200, 600, 15.0), (567, 283));
        assert_eq!(display_size(400, 300, 15.0), (400, 300));
        let (w, _) = display_size(5000, 10, 15.0);
        assert!(w as f64 <= MAX_DISPLAY_PX + 0.5);
    }

    #[test]
    fn labels_are_zero_padded() {
        assert_eq!(image_label(0), "Image 01");
        assert_eq!(image_label(9), "Image 10");
        assert_eq!(image_label(120), "Image 121");
    }

    #[test]
    fn request_shapes_are_decided_once() {
        let new: ReportRequest = serde_json::from_str(r#"{"imageIds":["a","b"]}"#).unwrap();
        assert_eq!(item_ids(new.into_items(1000).unwrap()), ["a", "b"]);

        let legacy: ReportRequest =
            serde_json::from_str(r#"{"images":[{"id":"x","name":"x.jpg","dataUrl":"data:,"}]}"#).unwrap();
        let legacy = legacy.into_items(1000).unwrap();
        assert_eq!(legacy[0].id, "x");
        assert!(legacy[0].fallback.is_some());

        assert!(serde_json::from_str::<ReportRequest>(r#"{"files":[]}"#).is_err());
    }

    #[test]
    fn request_limits() {
        let empty = ReportRequest::Ids { image_ids: vec![] };
        assert!(matches!(empty.into_items(1000), Err(InspectorError::InvalidRequest(_))));

        let too_many = ReportRequest::Ids {
            image_ids: (0..1001).map(|i| i.to_string()).collect(),
        };
        let err = too_many.into_items(1000).unwrap_err();
        assert!(err.to_string().contains("Maximum 1000"));
    }

    #[test]
    fn variant_file_names() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(ReportVariant::Normal.file_name(date), "inspection-report-2026-10-19.docx");
        assert_eq!(
            ReportVariant::Modified.file_name(date),
            "inspection-report-annotated-2026-10-19.docx"
        );
        assert!("weird".parse::<ReportVariant>().is_err());
    }

    #[tokio::test]
    async fn order_is_kept_with_missing_metadata() {
        let store = AssetStore::memory().unwrap();
        for id in ["c", "a", "b"] {
            store.put(id, png_bytes(20, 20)).await.unwrap();
        }
        store
            .put_meta("a", &ImageMetadata {
                comment: "Honeycombing at base.".to_string(),
                ..ImageMetadata::default()
            })
            .await
            .unwrap();

        let sections = builder(&store)
            .assemble(&items(&["c", "a", "b"]), ReportVariant::Normal)
            .await;

        assert_eq!(labels(&sections), ["Image 01", "Image 02", "Image 03"]);
        assert_eq!(
            comments(&sections),
            [
                "Comment: No assessment available",
                "Comment: Honeycombing at base.",
                "Comment: No assessment available",
            ]
        );
        assert_eq!(images(&sections).len(), 3);
    }

    #[tokio::test]
    async fn embedded_images_are_bounded() {
        let store = AssetStore::memory().unwrap();
        store.put("wide", png_bytes(2400, 1000)).await.unwrap();
        store.put("tall", png_bytes(900, 2700)).await.unwrap();

        let sections = builder(&store)
            .assemble(&items(&["wide", "tall"]), ReportVariant::Normal)
            .await;

        for image in images(&sections) {
            assert!(image.width <= 1200 && image.height <= 1200);
            assert!(image.display_width as f64 <= MAX_DISPLAY_PX + 0.5);
            assert_eq!(&image.bytes[..2], &[0xFF, 0xD8]);
        }
        let wide = &images(&sections)[0];
        assert_eq!((wide.width, wide.height), (1200, 500));
    }

    #[tokio::test]
    async fn page_breaks_after_every_second_image_but_not_the_last() {
        let store = AssetStore::memory().unwrap();
        let names: Vec<ReportItem> = (0..5).map(|i| format!("img{}", i).into()).collect();
        for item in &names {
            store.put(&item.id, png_bytes(8, 8)).await.unwrap();
        }

        let sections = builder(&store).assemble(&names, ReportVariant::Normal).await;
        assert_eq!(sections.len(), 1);

        // Track how many images precede each page break.
        let mut seen = 0;
        let mut breaks_after = Vec::new();
        for block in &sections[0].blocks {
            match block {
                ReportBlock::Label(_) => seen += 1,
                ReportBlock::PageBreak => breaks_after.push(seen),
                _ => {}
            }
        }
        assert_eq!(breaks_after, [2, 4]);

        let names: Vec<ReportItem> = names.into_iter().take(4).collect();
        let sections = builder(&store).assemble(&names, ReportVariant::Normal).await;
        assert!(matches!(sections[0].blocks.last(), Some(ReportBlock::Comment(_))));
    }

    #[tokio::test]
    async fn batches_of_twenty_become_sections() {
        let store = AssetStore::memory().unwrap();
        let names: Vec<ReportItem> = (0..45).map(|i| format!("img{}", i).into()).collect();

        let sections = builder(&store).assemble(&names, ReportVariant::Normal).await;

        assert_eq!(sections.len(), 3);
        let all = labels(&sections);
        assert_eq!(all.len(), 45);
        assert_eq!(all[20], "Image 21");
        assert_eq!(all[44], "Image 45");
        assert!(!matches!(sections[0].blocks.last(), Some(ReportBlock::PageBreak)));
    }

    #[tokio::test]
    async fn missing_image_becomes_inline_error() {
        let store = AssetStore::memory().unwrap();
        store.put("ok", png_bytes(10, 10)).await.unwrap();
        store.put("broken", b"not an image".to_vec()).await.unwrap();

        let sections = builder(&store)
            .assemble(&items(&["ok", "gone", "broken"]), ReportVariant::Normal)
            .await;

        let errors: Vec<_> = sections[0]
            .blocks
            .iter()
            .filter_map(|b| match b {
                ReportBlock::LoadError(msg) => Some(msg.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("[Error loading image:"));
        assert!(errors[0].contains("gone"));
        assert_eq!(labels(&sections).len(), 3);
    }

    #[tokio::test]
    async fn modified_variant_prefers_saved_then_overlay_then_original() {
        let store = AssetStore::memory().unwrap();
        // saved annotated asset: distinct size so it can be recognised
        store.put("saved", png_bytes(40, 40)).await.unwrap();
        store.put(&annotated_key("saved"), png_bytes(30, 10)).await.unwrap();
        // boxes only
        store.put("boxed", png_bytes(100, 100)).await.unwrap();
        store
            .put_meta("boxed", &ImageMetadata {
                annotations: vec![AnnotationBox::new("b", [10.0, 10.0, 50.0, 50.0])],
                ..ImageMetadata::default()
            })
            .await
            .unwrap();
        // plain
        store.put("plain", png_bytes(50, 20)).await.unwrap();

        let report = builder(&store);
        let modified = images(
            &report
                .assemble(&items(&["saved", "boxed", "plain"]), ReportVariant::Modified)
                .await,
        );
        assert_eq!((modified[0].width, modified[0].height), (30, 10));
        assert_eq!((modified[2].width, modified[2].height), (50, 20));

        let decoded = image::load_from_memory(&modified[1].bytes).unwrap().to_rgb8();
        let edge = decoded.get_pixel(10, 30);
        assert!(edge[0] > 180 && edge[1] > 180 && edge[2] < 100, "expected yellow, got {:?}", edge);

        let normal = images(
            &report
                .assemble(&items(&["saved", "boxed"]), ReportVariant::Normal)
                .await,
        );
        assert_eq!((normal[0].width, normal[0].height), (40, 40));
        let decoded = image::load_from_memory(&normal[1].bytes).unwrap().to_rgb8();
        let edge = decoded.get_pixel(10, 30);
        assert!(edge[2] > 80);
    }

    #[tokio::test]
    async fn legacy_records_supply_missing_metadata() {
        let store = AssetStore::memory().unwrap();
        store.put("x", png_bytes(100, 100)).await.unwrap();
        store.put("y", png_bytes(20, 20)).await.unwrap();
        store
            .put_meta("y", &ImageMetadata {
                comment: "Stored finding.".to_string(),
                ..ImageMetadata::default()
            })
            .await
            .unwrap();

        let request: ReportRequest = serde_json::from_str(
            r#"{"images":[
                {"id":"x","name":"x.jpg","comment":"Crack at joint.",
                 "annotations":[{"id":"b","coords":[10,10,50,50]}]},
                {"id":"y","name":"y.jpg","comment":"Stale client copy."}
            ]}"#,
        )
        .unwrap();
        let report_items = request.into_items(1000).unwrap();

        let report = builder(&store);
        let sections = report.assemble(&report_items, ReportVariant::Modified).await;
        assert_eq!(
            comments(&sections),
            ["Comment: Crack at joint.", "Comment: Stored finding."]
        );

        let boxed = &images(&sections)[0];
        let decoded = image::load_from_memory(&boxed.bytes).unwrap().to_rgb8();
        let edge = decoded.get_pixel(10, 30);
        assert!(edge[0] > 180 && edge[1] > 180 && edge[2] < 100, "expected yellow, got {:?}", edge);
    }

    #[tokio::test]
    async fn build_produces_a_docx_archive() {
        let store = AssetStore::memory().unwrap();
        store.put("a", png_bytes(64, 48)).await.unwrap();

        let document = builder(&store)
            .build(&items(&["a", "missing"]), ReportVariant::Normal)
            .await
            .unwrap();

        assert_eq!(&document[..2], b"PK");
    }
}
