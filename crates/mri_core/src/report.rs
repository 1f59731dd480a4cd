//! crates/mri_core/src/report.rs
//!
//! Renders the downloadable PDF diagnosis report.
//!
//! The layout is fixed: title, generation timestamp, patient details, diagnosis,
//! an optional scan image, and a disclaimer footer on every page. Rendering is
//! a pure function of its inputs; nothing derived from the wall clock or a
//! random source is written, so identical inputs give identical bytes.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::GenericImageView;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};

use crate::codec;
use crate::domain::{ClassLabel, PatientDetails};
use crate::error::ReportError;

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 50;
const FOOTER_HEIGHT: i64 = 40;
const IMAGE_BOX: i64 = 300;
const CONTENT_WIDTH: i64 = PAGE_WIDTH - 2 * MARGIN;

const TITLE: &str = "Alzheimer's MRI Diagnosis Report";
const DISCLAIMER: &str =
    "This report is generated by an AI model and is not a substitute for professional medical diagnosis.";

/// A rendered report ready for download.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportArtifact {
    pub filename: String,
    pub bytes: Bytes,
}

/// Inputs to [`render`].
#[derive(Debug, Clone, Copy)]
pub struct ReportInput<'a> {
    pub patient: &'a PatientDetails,
    pub label: ClassLabel,
    pub confidence: f64,
    /// Base64 JPEG as stored in the scan record.
    pub image_base64: Option<&'a str>,
    pub generated_at: DateTime<Utc>,
}

/// `Alzheimer_MRI_Report_<name>_<YYYYMMDD_HHMMSS>.pdf`, with every character of
/// the name that is not ASCII alphanumeric replaced by `_`.
pub fn suggested_filename(patient_name: &str, generated_at: DateTime<Utc>) -> String {
    let sanitized: String = patient_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!(
        "Alzheimer_MRI_Report_{}_{}.pdf",
        sanitized,
        generated_at.format("%Y%m%d_%H%M%S")
    )
}

pub fn render(input: ReportInput<'_>) -> Result<ReportArtifact, ReportError> {
    let image = match input.image_base64 {
        Some(text) => {
            let decoded = codec::decode(text)?;
            let (width, height) = decoded.dimensions();
            Some(EmbeddedImage {
                width: i64::from(width),
                height: i64::from(height),
                jpeg: codec::encode_jpeg_rgb(&decoded)?,
            })
        }
        None => None,
    };

    let mut layout = Layout::new();
    layout.text(Font::Bold, 20, TITLE);
    layout.rule();
    layout.text(
        Font::Regular,
        11,
        &format!(
            "Report Generated: {}",
            input.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
    );
    layout.gap(12);

    layout.text(Font::Bold, 14, "Patient Details");
    layout.text(Font::Regular, 12, &format!("Name: {}", input.patient.name));
    layout.text(Font::Regular, 12, &format!("Age: {}", input.patient.age));
    layout.text(Font::Regular, 12, &format!("Place: {}", input.patient.place));
    layout.text(Font::Regular, 12, &format!("Phone: {}", input.patient.phone));
    layout.gap(12);

    layout.text(Font::Bold, 14, "Diagnosis Result");
    layout.text(Font::Regular, 12, &format!("Prediction: {}", input.label));
    layout.text(
        Font::Regular,
        12,
        &format!("Confidence: {:.2}%", input.confidence),
    );

    if let Some(image) = &image {
        layout.gap(12);
        layout.text(Font::Bold, 14, "MRI Scan");
        let (w, h) = fit_within(image.width, image.height, IMAGE_BOX);
        layout.image(IMAGE_NAME, w, h);
    }

    let artifact = ReportArtifact {
        filename: suggested_filename(&input.patient.name, input.generated_at),
        bytes: Bytes::from(assemble(layout.finish(), image, input.generated_at)?),
    };
    Ok(artifact)
}

//=========================================================================================
// Page Layout
//=========================================================================================

const IMAGE_NAME: &str = "Im1";

struct EmbeddedImage {
    width: i64,
    height: i64,
    jpeg: Vec<u8>,
}

#[derive(Clone, Copy)]
enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }
}

/// A top-down cursor over A4 pages that starts a new page when a block would
/// run into the footer.
struct Layout {
    pages: Vec<Vec<Operation>>,
    current: Vec<Operation>,
    y: i64,
}

impl Layout {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: Vec::new(),
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn ensure_space(&mut self, height: i64) {
        if self.y - height < MARGIN + FOOTER_HEIGHT && !self.current.is_empty() {
            self.pages.push(std::mem::take(&mut self.current));
            self.y = PAGE_HEIGHT - MARGIN;
        }
    }

    /// Writes `text` as one or more lines wrapped at the content width.
    fn text(&mut self, font: Font, size: i64, text: &str) {
        let line_height = size + size / 2;
        for line in wrap(&pdf_text(text), chars_per_line(size)) {
            self.ensure_space(line_height);
            self.y -= size;
            self.current.extend(text_ops(font, size, MARGIN, self.y, &line));
            self.y -= line_height - size;
        }
    }

    fn gap(&mut self, height: i64) {
        self.y -= height;
    }

    fn rule(&mut self) {
        self.y -= 6;
        self.current.extend([
            Operation::new("w", vec![1.into()]),
            Operation::new("m", vec![MARGIN.into(), self.y.into()]),
            Operation::new("l", vec![(PAGE_WIDTH - MARGIN).into(), self.y.into()]),
            Operation::new("S", vec![]),
        ]);
        self.y -= 12;
    }

    fn image(&mut self, name: &str, width: i64, height: i64) {
        self.ensure_space(height + 6);
        self.y -= height + 6;
        self.current.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    width.into(),
                    0.into(),
                    0.into(),
                    height.into(),
                    MARGIN.into(),
                    self.y.into(),
                ],
            ),
            Operation::new("Do", vec![name.into()]),
            Operation::new("Q", vec![]),
        ]);
    }

    /// Closes the last page and stamps the footer on every page.
    fn finish(mut self) -> Vec<Vec<Operation>> {
        self.pages.push(self.current);
        let count = self.pages.len();
        for (i, page) in self.pages.iter_mut().enumerate() {
            page.extend(text_ops(Font::Regular, 8, MARGIN, MARGIN, DISCLAIMER));
            page.extend(text_ops(
                Font::Regular,
                8,
                PAGE_WIDTH - MARGIN - 40,
                MARGIN - 12,
                &format!("Page {} of {}", i + 1, count),
            ));
        }
        self.pages
    }
}

fn text_ops(font: Font, size: i64, x: i64, y: i64, text: &str) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![font.resource().into(), size.into()]),
        Operation::new("Td", vec![x.into(), y.into()]),
        Operation::new("Tj", vec![Object::string_literal(pdf_text(text))]),
        Operation::new("ET", vec![]),
    ]
}

/// The standard Type1 fonts only cover Latin-1 reliably; anything outside
/// printable ASCII is shown as `?`.
fn pdf_text(text: &str) -> String {
    text.chars()
        .map(|c| if c == ' ' || c.is_ascii_graphic() { c } else { '?' })
        .collect()
}

/// How many characters fit on a line, assuming 0.6 em per glyph. Helvetica's
/// widest common glyphs stay under that on average.
fn chars_per_line(size: i64) -> usize {
    (CONTENT_WIDTH * 5 / (size.max(1) * 3)).max(1) as usize
}

/// Greedy word wrap for ASCII text. Words longer than a line are split.
fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        let mut word = word;
        while word.len() > max_chars {
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            let (head, tail) = word.split_at(max_chars);
            lines.push(head.to_string());
            word = tail;
        }
        if word.is_empty() {
            continue;
        }
        if !line.is_empty() && line.len() + 1 + word.len() > max_chars {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() || lines.is_empty() {
        lines.push(line);
    }
    lines
}

/// Scales `(width, height)` to fit a `max`-sized square, preserving aspect ratio.
fn fit_within(width: i64, height: i64, max: i64) -> (i64, i64) {
    let largest = width.max(height).max(1);
    let scaled = |v: i64| ((v * max + largest / 2) / largest).max(1);
    (scaled(width), scaled(height))
}

//=========================================================================================
// Document Assembly
//=========================================================================================

fn assemble(
    pages: Vec<Vec<Operation>>,
    image: Option<EmbeddedImage>,
    generated_at: DateTime<Utc>,
) -> Result<Vec<u8>, ReportError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
    });

    let mut xobjects = Dictionary::new();
    if let Some(image) = image {
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width,
                "Height" => image.height,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            image.jpeg,
        ));
        xobjects.set(IMAGE_NAME, image_id);
    }

    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular_id,
            "F2" => bold_id,
        },
        "XObject" => xobjects,
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for operations in pages {
        let content = Content { operations }
            .encode()
            .map_err(|e| ReportError::Document(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(TITLE),
        "CreationDate" => Object::string_literal(generated_at.format("D:%Y%m%d%H%M%SZ").to_string()),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| ReportError::Document(e.to_string()))?;
    Ok(bytes)
}
