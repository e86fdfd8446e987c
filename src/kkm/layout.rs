//! Receipt text layout: margins and separator lines.
//!
//! Margins count blank lines and are clamped to `0..=10`. A second margin
//! that is absent or out of range takes the value of the first one.

use crate::kkm::details::PrintableText;

pub const SEPARATOR_CHAR: char = '-';
pub const MAX_MARGIN: u32 = 10;

fn clamp_pair(first: u32, second: Option<u32>) -> (usize, usize) {
    let first = first.min(MAX_MARGIN);
    let second = second.filter(|m| *m <= MAX_MARGIN).unwrap_or(first);
    (first as usize, second as usize)
}

/// Surround `text` with `top` and `bottom` blank lines.
pub fn add_margins(text: &str, top: u32, bottom: Option<u32>) -> String {
    let (top, bottom) = clamp_pair(top, bottom);
    let mut out = String::with_capacity(text.len() + top + bottom);
    out.extend(std::iter::repeat('\n').take(top));
    out.push_str(text);
    out.extend(std::iter::repeat('\n').take(bottom));
    out
}

/// A text ready for `PrintText`, with the formatting it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextJob {
    pub text: String,
    pub center: bool,
    pub magnified: bool,
}

/// Layout rules bound to one device's receipt width.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    line_length: usize,
}

impl Layout {
    pub fn new(line_length: u32) -> Self {
        Self {
            line_length: line_length as usize,
        }
    }

    fn rule(&self) -> String {
        std::iter::repeat(SEPARATOR_CHAR)
            .take(self.line_length)
            .collect()
    }

    /// A separator line with its own margins, as printed between sections.
    pub fn separator(&self, top: u32, bottom: Option<u32>) -> String {
        add_margins(&self.rule(), top, bottom)
    }

    /// Append a separator whose bottom margin is one line larger.
    fn push_separator(&self, text: &mut String, top: u32, bottom: Option<u32>) {
        let (top, bottom) = clamp_pair(top, bottom);
        text.extend(std::iter::repeat('\n').take(top));
        text.push_str(&self.rule());
        text.extend(std::iter::repeat('\n').take(bottom + 1));
    }

    /// `text` framed by separators: outer margins outside, inner margins
    /// (plus one line) between the separators and the text.
    pub fn add_separators(&self, text: &str, outer: u32, inner: Option<u32>) -> String {
        let (outer, inner) = clamp_pair(outer, inner);
        let inner = inner + 1;
        let mut out = String::new();
        out.extend(std::iter::repeat('\n').take(outer));
        out.push_str(&self.rule());
        out.extend(std::iter::repeat('\n').take(inner));
        out.push_str(text);
        out.extend(std::iter::repeat('\n').take(inner));
        out.push_str(&self.rule());
        out.extend(std::iter::repeat('\n').take(outer));
        out
    }

    /// Resolve one block into a print job. `None` means nothing is printed.
    ///
    /// - empty content prints only when separated, as a centred plain separator
    /// - magnified text is never framed by separators
    pub fn text(&self, block: &PrintableText) -> Option<TextJob> {
        let mut center = block.center;
        let mut magnified = block.magnified;
        let text = if block.content.is_empty() {
            if !block.separated {
                return None;
            }
            center = true;
            magnified = false;
            let mut text = String::new();
            self.push_separator(&mut text, block.margin_outer, Some(block.margin_inner));
            text
        } else if block.separated && !magnified {
            self.add_separators(&block.content, block.margin_outer, Some(block.margin_inner))
        } else {
            add_margins(&block.content, block.margin_inner, None)
        };
        Some(TextJob {
            text,
            center,
            magnified,
        })
    }
}
