//! Writes assembled report sections into a .docx package.

use std::io::Cursor;

use docx_rs::{AlignmentType, BreakType, Docx, LineSpacing, Paragraph, Pic, Run};

use crate::{
    InspectorError, IResult,
    report::{EmbeddedImage, ReportBlock, ReportSection},
};

const EMU_PER_PX: u32 = 9525;
/// Half-points
const LABEL_SIZE: usize = 22;

fn page_break() -> Paragraph {
    Paragraph::new().add_run(Run::new().add_break(BreakType::Page))
}

fn image_paragraph(image: EmbeddedImage) -> Paragraph {
    let pic = Pic::new_with_dimensions(image.bytes, image.width, image.height).size(
        image.display_width * EMU_PER_PX,
        image.display_height * EMU_PER_PX,
    );
    Paragraph::new()
        .add_run(Run::new().add_image(pic))
        .align(AlignmentType::Center)
        .line_spacing(LineSpacing::new().before(100).after(50))
}

fn block_paragraph(block: ReportBlock) -> Paragraph {
    match block {
        ReportBlock::Image(image) => image_paragraph(image),
        ReportBlock::LoadError(message) => Paragraph::new()
            .add_run(Run::new().add_text(message).italic())
            .align(AlignmentType::Center),
        ReportBlock::Label(label) => Paragraph::new()
            .add_run(Run::new().add_text(label).bold().size(LABEL_SIZE))
            .line_spacing(LineSpacing::new().before(50).after(25)),
        ReportBlock::Comment(comment) => Paragraph::new()
            .add_run(Run::new().add_text(comment))
            .line_spacing(LineSpacing::new().after(200)),
        ReportBlock::PageBreak => page_break(),
    }
}

pub fn pack(sections: Vec<ReportSection>) -> IResult<Vec<u8>> {
    let mut docx = Docx::new();

    for (index, section) in sections.into_iter().enumerate() {
        if index > 0 {
            docx = docx.add_paragraph(page_break());
        }
        for block in section.blocks {
            docx = docx.add_paragraph(block_paragraph(block));
        }
    }

    let mut buffer = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut buffer)
        .map_err(|e| InspectorError::ReportError(format!("Failed to pack document: {}", e)))?;
    Ok(buffer.into_inner())
}

/// [`pack`] on the blocking pool.
pub async fn pack_async(sections: Vec<ReportSection>) -> IResult<Vec<u8>> {
    tokio::task::spawn_blocking(move || pack(sections))
        .await
        .map_err(|e| InspectorError::ReportError(format!("Packing task failed: {}", e)))?
}
