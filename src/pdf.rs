use anyhow::Context;
use chrono::NaiveDate;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use crate::calc::StudentMarksModel;
use crate::config::PortalConfig;

const PAGE_W: f64 = 595.28;
const PAGE_H: f64 = 841.89;
const TOP_Y: f64 = PAGE_H - 60.0;
const BOTTOM_Y: f64 = 70.0;
const MARGIN_L: f64 = 40.0;

const COL_WIDTHS: [f64; 7] = [165.6, 43.2, 43.2, 43.2, 79.2, 57.6, 79.2];
const COL_HEADERS: [&str; 7] = [
    "Subject",
    "IA1",
    "IA2",
    "IA3",
    "Attendance (%)",
    "Total (90)",
    "Status",
];
const HEADER_ROW_H: f64 = 22.0;
const ROW_H: f64 = 20.0;

fn table_x0() -> f64 {
    (PAGE_W - COL_WIDTHS.iter().sum::<f64>()) / 2.0
}

fn num(v: f64) -> Object {
    Object::Real(v as f32)
}

fn op(name: &str, operands: Vec<Object>) -> Operation {
    Operation::new(name, operands)
}

/// Coarse Helvetica average advance; close enough to center short labels.
fn text_width(text: &str, size: f64) -> f64 {
    0.5 * size * text.chars().count() as f64
}

fn draw_text(ops: &mut Vec<Operation>, font: &str, size: f64, x: f64, y: f64, text: &str) {
    ops.push(op("BT", vec![]));
    ops.push(op("Tf", vec![font.into(), num(size)]));
    ops.push(op("Td", vec![num(x), num(y)]));
    ops.push(op("Tj", vec![Object::string_literal(text)]));
    ops.push(op("ET", vec![]));
}

fn draw_text_centered(
    ops: &mut Vec<Operation>,
    font: &str,
    size: f64,
    center_x: f64,
    y: f64,
    text: &str,
) {
    draw_text(ops, font, size, center_x - text_width(text, size) / 2.0, y, text);
}

fn fill_rgb(ops: &mut Vec<Operation>, r: f64, g: f64, b: f64) {
    ops.push(op("rg", vec![num(r), num(g), num(b)]));
}

fn stroke_gray(ops: &mut Vec<Operation>, level: f64, width: f64) {
    ops.push(op("G", vec![num(level)]));
    ops.push(op("w", vec![num(width)]));
}

fn fill_rect(ops: &mut Vec<Operation>, x: f64, y: f64, w: f64, h: f64) {
    ops.push(op("re", vec![num(x), num(y), num(w), num(h)]));
    ops.push(op("f", vec![]));
}

fn stroke_rect(ops: &mut Vec<Operation>, x: f64, y: f64, w: f64, h: f64) {
    ops.push(op("re", vec![num(x), num(y), num(w), num(h)]));
    ops.push(op("S", vec![]));
}

/// Background layer repeated on every page: the diagonal watermark plus the
/// footer disclaimer. Emitted before any foreground content so the table
/// paints over it.
fn page_scaffold(cfg: &PortalConfig) -> Vec<Operation> {
    let mut ops = Vec::new();

    ops.push(op("q", vec![]));
    ops.push(op("g", vec![num(0.9)]));
    ops.push(op("BT", vec![]));
    ops.push(op("Tf", vec!["F2".into(), num(42.0)]));
    // 45-degree baseline starting low-left, same placement as the portal's
    // old canvas rotate(45); drawString(200, 150).
    let c = std::f64::consts::FRAC_1_SQRT_2;
    ops.push(op(
        "Tm",
        vec![num(c), num(c), num(-c), num(c), num(35.0), num(247.0)],
    ));
    ops.push(op("Tj", vec![Object::string_literal(cfg.watermark_text.as_str())]));
    ops.push(op("ET", vec![]));
    ops.push(op("Q", vec![]));

    ops.push(op("q", vec![]));
    ops.push(op("g", vec![num(0.6)]));
    draw_text_centered(&mut ops, "F1", 9.0, PAGE_W / 2.0, 32.0, &cfg.footer_text);
    ops.push(op("Q", vec![]));

    ops
}

fn draw_table_header(ops: &mut Vec<Operation>, y: f64) {
    let x0 = table_x0();
    let width: f64 = COL_WIDTHS.iter().sum();

    fill_rgb(ops, 1.0, 0.435, 0.235);
    fill_rect(ops, x0, y - HEADER_ROW_H, width, HEADER_ROW_H);

    fill_rgb(ops, 1.0, 1.0, 1.0);
    let mut x = x0;
    for (header, w) in COL_HEADERS.iter().zip(COL_WIDTHS.iter()) {
        draw_text_centered(ops, "F2", 10.0, x + w / 2.0, y - HEADER_ROW_H + 7.0, header);
        x += w;
    }

    stroke_gray(ops, 0.5, 0.5);
    stroke_rect(ops, x0, y - HEADER_ROW_H, width, HEADER_ROW_H);
}

fn draw_table_row(ops: &mut Vec<Operation>, y: f64, zebra: bool, cells: &[String; 7]) {
    let x0 = table_x0();
    let width: f64 = COL_WIDTHS.iter().sum();

    if zebra {
        fill_rgb(ops, 1.0, 0.97, 0.93);
    } else {
        fill_rgb(ops, 0.96, 0.96, 0.96);
    }
    fill_rect(ops, x0, y - ROW_H, width, ROW_H);

    fill_rgb(ops, 0.2, 0.2, 0.2);
    let mut x = x0;
    for (cell, w) in cells.iter().zip(COL_WIDTHS.iter()) {
        draw_text_centered(ops, "F1", 10.0, x + w / 2.0, y - ROW_H + 6.0, cell);
        x += w;
    }

    stroke_gray(ops, 0.83, 0.3);
    let mut x = x0;
    for w in COL_WIDTHS.iter() {
        stroke_rect(ops, x, y - ROW_H, *w, ROW_H);
        x += w;
    }
}

/// SOF scan over JPEG markers: (width, height, component count), or None
/// when the bytes are not a baseline/progressive JPEG we can embed.
fn jpeg_info(bytes: &[u8]) -> Option<(i64, i64, u8)> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        return None;
    }
    let mut i = 2usize;
    while i + 9 < bytes.len() {
        if bytes[i] != 0xFF {
            return None;
        }
        let marker = bytes[i + 1];
        if (0xD0..=0xD9).contains(&marker) || marker == 0x01 {
            i += 2;
            continue;
        }
        let len = ((bytes[i + 2] as usize) << 8) | bytes[i + 3] as usize;
        if len < 2 {
            return None;
        }
        match marker {
            0xC0 | 0xC1 | 0xC2 => {
                let height = ((bytes[i + 5] as i64) << 8) | bytes[i + 6] as i64;
                let width = ((bytes[i + 7] as i64) << 8) | bytes[i + 8] as i64;
                return Some((width, height, bytes[i + 9]));
            }
            0xDA => return None,
            _ => {}
        }
        i += 2 + len;
    }
    None
}

/// Renders the marksheet document. Deterministic for identical inputs; the
/// generation date is supplied by the caller. A missing or non-embeddable
/// logo is omitted, never an error. Zero subjects produce a valid document
/// with an empty table body.
pub fn render_marksheet(
    model: &StudentMarksModel,
    cfg: &PortalConfig,
    logo_jpeg: Option<&[u8]>,
    generated_on: NaiveDate,
) -> anyhow::Result<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let font_bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
    });

    let mut resources = dictionary! {
        "Font" => dictionary! { "F1" => font_regular, "F2" => font_bold },
    };

    let logo = logo_jpeg.and_then(|bytes| {
        let (width, height, components) = jpeg_info(bytes)?;
        let color_space = match components {
            1 => "DeviceGray",
            3 => "DeviceRGB",
            _ => return None,
        };
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => color_space,
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            bytes.to_vec(),
        ));
        resources.set("XObject", dictionary! { "Im1" => image_id });
        Some(image_id)
    });
    let resources_id = doc.add_object(resources);

    let mut page_contents: Vec<Vec<Operation>> = Vec::new();
    let mut ops = page_scaffold(cfg);
    let mut y = TOP_Y;

    if logo.is_some() {
        ops.push(op("q", vec![]));
        ops.push(op(
            "cm",
            vec![
                num(70.0),
                num(0.0),
                num(0.0),
                num(70.0),
                num(MARGIN_L),
                num(y - 70.0),
            ],
        ));
        ops.push(op("Do", vec!["Im1".into()]));
        ops.push(op("Q", vec![]));
        y -= 82.0;
    }

    fill_rgb(&mut ops, 1.0, 0.294, 0.169);
    draw_text_centered(&mut ops, "F2", 20.0, PAGE_W / 2.0, y - 20.0, &cfg.institution_name);
    y -= 34.0;
    fill_rgb(&mut ops, 0.2, 0.2, 0.2);
    draw_text_centered(&mut ops, "F1", 11.0, PAGE_W / 2.0, y - 12.0, &cfg.document_label);
    y -= 30.0;

    let term_label = model.student.term.to_string();
    let identity = [
        ("Name:", model.student.name.as_str()),
        ("USN:", model.student.usn.as_str()),
        ("Branch:", model.student.branch.as_str()),
        ("Semester:", term_label.as_str()),
    ];
    for (label, value) in identity {
        draw_text(&mut ops, "F2", 11.0, MARGIN_L, y - 12.0, label);
        draw_text(
            &mut ops,
            "F1",
            11.0,
            MARGIN_L + text_width(label, 11.0) + 6.0,
            y - 12.0,
            value,
        );
        y -= 15.0;
    }
    y -= 18.0;

    draw_table_header(&mut ops, y);
    y -= HEADER_ROW_H;

    for (i, line) in model.subjects.iter().enumerate() {
        if y - ROW_H < BOTTOM_Y {
            page_contents.push(ops);
            ops = page_scaffold(cfg);
            y = TOP_Y;
            draw_table_header(&mut ops, y);
            y -= HEADER_ROW_H;
        }
        let status = if line.eligible { "Eligible" } else { "Shortage" };
        let cells = [
            line.subject.clone(),
            line.ia1.to_string(),
            line.ia2.to_string(),
            line.ia3.to_string(),
            line.attendance.to_string(),
            line.total.to_string(),
            status.to_string(),
        ];
        draw_table_row(&mut ops, y, i % 2 == 1, &cells);
        y -= ROW_H;
    }

    if y - 70.0 < BOTTOM_Y {
        page_contents.push(ops);
        ops = page_scaffold(cfg);
        y = TOP_Y;
    }
    y -= 30.0;
    fill_rgb(&mut ops, 1.0, 0.294, 0.169);
    draw_text_centered(
        &mut ops,
        "F2",
        12.0,
        PAGE_W / 2.0,
        y,
        &format!(
            "Average IA Score: {:.1}   |   Average Attendance: {:.1}%",
            model.average_ia, model.average_attendance
        ),
    );
    y -= 18.0;
    draw_text_centered(
        &mut ops,
        "F2",
        12.0,
        PAGE_W / 2.0,
        y,
        &format!("Date Generated: {}", generated_on.format("%d %B %Y")),
    );
    page_contents.push(ops);

    let mut kids: Vec<Object> = Vec::with_capacity(page_contents.len());
    for operations in page_contents {
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().context("encode page content stream")?,
        ));
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
            "MediaBox" => vec![num(0.0), num(0.0), num(PAGE_W), num(PAGE_H)],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).context("serialize marksheet pdf")?;
    Ok(buffer)
}
