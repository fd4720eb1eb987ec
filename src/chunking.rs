//! Hierarchical chunking: large parent chunks for context, small child
//! chunks for embedding and matching.
//!
//! Parents are contiguous multi-paragraph spans of the extracted full text;
//! children are nested windows within one parent's range. Both record
//! absolute character offsets so a page number can later be recovered via
//! the extraction-time [`PageMap`](crate::extract::PageMap). Chunking is
//! deterministic and never discards trailing content.

use crate::describe::{IMAGE_DESC_END, IMAGE_DESC_START};
use crate::document::ChunkSpan;
use crate::error::{RagError, Result};

/// A large context-preserving span of the document's full text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentChunk {
    /// Ordinal of this parent within the document (0-based).
    pub index: usize,
    /// The parent's text, an exact slice of the full text.
    pub content: String,
    /// Absolute offsets of `content` within the full text.
    pub span: ChunkSpan,
    /// Detected section heading, when the parent's first line looks like one.
    pub section: Option<String>,
}

/// A small embeddable span nested within one parent's range.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildChunk {
    /// Ordinal of the owning parent.
    pub parent_index: usize,
    /// Global ordinal of this child across the document (0-based).
    pub chunk_index: usize,
    /// The child's text, an exact slice of its parent's content.
    pub content: String,
    /// Absolute offsets of `content` within the full text.
    pub span: ChunkSpan,
}

/// Splits extracted text into parent and child chunks.
#[derive(Debug, Clone)]
pub struct HierarchicalChunker {
    parent_size: usize,
    child_size: usize,
}

impl HierarchicalChunker {
    /// Create a chunker with the given target sizes in characters.
    pub fn new(parent_size: usize, child_size: usize) -> Self {
        Self { parent_size, child_size }
    }

    /// Split the full text into ordered parent chunks.
    ///
    /// Whole paragraphs (separated by blank lines) are accumulated up to
    /// `parent_size`; a single paragraph larger than `parent_size` is
    /// hard-split at word boundaries.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Chunking`] if no parent can be produced (empty or
    /// whitespace-only text).
    pub fn chunk_parents(&self, full_text: &str) -> Result<Vec<ParentChunk>> {
        let paragraphs = paragraph_spans(full_text);

        let mut parents: Vec<ParentChunk> = Vec::new();
        let mut current: Option<(usize, usize)> = None;

        let flush = |current: &mut Option<(usize, usize)>, parents: &mut Vec<ParentChunk>| {
            if let Some((start, end)) = current.take() {
                parents.push(make_parent(full_text, parents.len(), start, end));
            }
        };

        for (p_start, p_end) in paragraphs {
            if p_end - p_start > self.parent_size {
                // Oversized paragraph: close the accumulator, then hard-split.
                flush(&mut current, &mut parents);
                for (s, e) in split_by_size(full_text, p_start, p_end, self.parent_size) {
                    parents.push(make_parent(full_text, parents.len(), s, e));
                }
                continue;
            }
            match current {
                None => current = Some((p_start, p_end)),
                Some((start, _)) if p_end - start <= self.parent_size => {
                    current = Some((start, p_end));
                }
                Some(_) => {
                    flush(&mut current, &mut parents);
                    current = Some((p_start, p_end));
                }
            }
        }
        flush(&mut current, &mut parents);

        if parents.is_empty() {
            return Err(RagError::Chunking("text produced no parent chunks".to_string()));
        }
        Ok(parents)
    }

    /// Flatten parents into ordered child chunks.
    ///
    /// Each parent's content is split into windows of at most `child_size`
    /// characters, preferring sentence boundaries, then whitespace, then a
    /// hard split. Whitespace-only windows are dropped; everything else is
    /// kept, including a trailing partial window.
    pub fn chunk_children(&self, parents: &[ParentChunk]) -> Vec<ChildChunk> {
        let mut children = Vec::new();

        for parent in parents {
            for (local_start, local_end) in
                child_windows(&parent.content, self.child_size)
            {
                let content = &parent.content[local_start..local_end];
                if content.trim().is_empty() {
                    continue;
                }
                children.push(ChildChunk {
                    parent_index: parent.index,
                    chunk_index: children.len(),
                    content: content.to_string(),
                    span: ChunkSpan::new(
                        parent.span.start_char + local_start,
                        parent.span.start_char + local_end,
                    ),
                });
            }
        }

        children
    }
}

fn make_parent(full_text: &str, index: usize, start: usize, end: usize) -> ParentChunk {
    let content = &full_text[start..end];
    ParentChunk {
        index,
        content: content.to_string(),
        span: ChunkSpan::new(start, end),
        section: detect_section(content),
    }
}

/// Byte spans of non-empty paragraphs, split on blank lines.
fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut offset = 0;

    for part in text.split("\n\n") {
        let lead = part.len() - part.trim_start().len();
        let trimmed_len = part.trim_end().len();
        if trimmed_len > lead {
            spans.push((offset + lead, offset + trimmed_len));
        }
        offset += part.len() + 2;
    }

    spans
}

/// Hard-split `text[start..end]` into pieces of at most `max_len` bytes,
/// preferring the last whitespace inside each window. Cuts never land
/// inside an image-annotation pair, so a piece holding one may run long.
fn split_by_size(text: &str, start: usize, end: usize, max_len: usize) -> Vec<(usize, usize)> {
    let annotations = annotation_ranges(text);
    let mut pieces = Vec::new();
    let mut pos = start;

    while pos < end {
        if end - pos <= max_len {
            pieces.push((pos, end));
            break;
        }
        let mut cut = floor_char_boundary(text, pos + max_len);
        if let Some(after_ws) = last_whitespace_end(&text[pos..cut]) {
            let candidate = pos + after_ws;
            if candidate > pos {
                cut = candidate;
            }
        }
        if cut <= pos {
            // No progress possible at this size; take the whole boundary-safe window.
            cut = floor_char_boundary(text, pos + max_len).max(pos + 1);
        }
        cut = avoid_annotation_cut(&annotations, pos, cut).min(end);
        pieces.push((pos, cut));
        pos = cut;
    }

    pieces
}

/// Local byte windows of at most `max_len` for child chunks, preferring
/// sentence boundaries over whitespace over a hard split.
///
/// A window never ends inside an image-annotation pair: the cut is pushed
/// back to the pair's start, or past its end when the pair itself exceeds
/// `max_len`, so the pair always reaches annotation post-processing intact.
fn child_windows(content: &str, max_len: usize) -> Vec<(usize, usize)> {
    let annotations = annotation_ranges(content);
    let mut windows = Vec::new();
    let mut pos = 0;

    while pos < content.len() {
        if content.len() - pos <= max_len {
            windows.push((pos, content.len()));
            break;
        }

        let limit = floor_char_boundary(content, pos + max_len);
        let window = &content[pos..limit];

        let sentence_cut = [". ", "! ", "? ", "\n"]
            .iter()
            .filter_map(|sep| window.rfind(sep).map(|i| i + sep.len()))
            .max();

        let cut = sentence_cut
            .or_else(|| last_whitespace_end(window))
            .map(|local| pos + local)
            .filter(|&c| c > pos)
            .unwrap_or_else(|| limit.max(pos + 1));

        let cut = avoid_annotation_cut(&annotations, pos, cut);
        windows.push((pos, cut));
        pos = cut;
    }

    windows
}

/// Byte ranges of complete `[IMG]…[/IMG]` pairs, sentinels included.
/// An unterminated opening sentinel is not a range.
fn annotation_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut offset = 0;

    while let Some(start) = text[offset..].find(IMAGE_DESC_START) {
        let abs_start = offset + start;
        let after_start = abs_start + IMAGE_DESC_START.len();
        match text[after_start..].find(IMAGE_DESC_END) {
            Some(end) => {
                let abs_end = after_start + end + IMAGE_DESC_END.len();
                ranges.push((abs_start, abs_end));
                offset = abs_end;
            }
            None => break,
        }
    }

    ranges
}

/// Move a cut that falls strictly inside an annotation pair to the pair's
/// start, or to its end when the window already begins at or inside the
/// pair. Always makes progress past `pos`.
fn avoid_annotation_cut(annotations: &[(usize, usize)], pos: usize, cut: usize) -> usize {
    for &(start, end) in annotations {
        if cut > start && cut < end {
            return if start > pos { start } else { end };
        }
    }
    cut
}

/// Byte offset just past the last whitespace char in `window`, if any.
fn last_whitespace_end(window: &str) -> Option<usize> {
    window
        .char_indices()
        .rev()
        .find(|(_, ch)| ch.is_whitespace())
        .map(|(i, ch)| i + ch.len_utf8())
}

/// Largest byte index `<= index` that is a char boundary.
fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Heading heuristic over a parent's first line: a markdown heading, or a
/// short title-cased line with no terminal punctuation.
fn detect_section(content: &str) -> Option<String> {
    let first_line = content.lines().next()?.trim();
    if first_line.is_empty() {
        return None;
    }

    if let Some(stripped) = first_line.strip_prefix('#') {
        let title = stripped.trim_start_matches('#').trim();
        return (!title.is_empty()).then(|| title.to_string());
    }

    if first_line.len() > 80 {
        return None;
    }
    let first_alpha = first_line.chars().find(|c| c.is_alphabetic())?;
    if !first_alpha.is_uppercase() {
        return None;
    }
    if first_line.ends_with(['.', '!', '?', ',', ';', ':']) {
        return None;
    }
    Some(first_line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chunker() -> HierarchicalChunker {
        HierarchicalChunker::new(200, 60)
    }

    #[test]
    fn empty_text_is_a_chunking_error() {
        let err = chunker().chunk_parents("").unwrap_err();
        assert!(matches!(err, RagError::Chunking(_)));
        let err = chunker().chunk_parents("   \n\n  \n ").unwrap_err();
        assert!(matches!(err, RagError::Chunking(_)));
    }

    #[test]
    fn paragraphs_accumulate_into_parents() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird one.";
        let parents = chunker().chunk_parents(text).unwrap();
        // All three fit within one 200-char parent.
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].span.start_char, 0);
        assert_eq!(&text[parents[0].span.start_char..parents[0].span.end_char], parents[0].content);
    }

    #[test]
    fn oversized_paragraph_is_hard_split() {
        let text = "word ".repeat(100); // 500 chars, no blank lines
        let parents = chunker().chunk_parents(&text).unwrap();
        assert!(parents.len() > 1);
        for parent in &parents {
            assert!(parent.content.len() <= 200);
        }
    }

    #[test]
    fn parent_spans_slice_back_to_content() {
        let text = format!("Intro.\n\n{}\n\nOutro paragraph.", "sentence one. ".repeat(30));
        let parents = chunker().chunk_parents(&text).unwrap();
        for parent in &parents {
            assert_eq!(&text[parent.span.start_char..parent.span.end_char], parent.content);
        }
        // Spans are ordered and non-overlapping.
        for pair in parents.windows(2) {
            assert!(pair[0].span.end_char <= pair[1].span.start_char);
        }
    }

    #[test]
    fn children_nest_within_their_parent() {
        let text = "A heading line\n\n".to_string() + &"This is a sentence. ".repeat(40);
        let c = chunker();
        let parents = c.chunk_parents(&text).unwrap();
        let children = c.chunk_children(&parents);
        assert!(!children.is_empty());

        for child in &children {
            let parent = &parents[child.parent_index];
            assert!(child.span.start_char >= parent.span.start_char);
            assert!(child.span.end_char <= parent.span.end_char);
            assert_eq!(&text[child.span.start_char..child.span.end_char], child.content);
            assert!(child.content.len() <= 60);
        }
        // Global child indexes are sequential.
        for (i, child) in children.iter().enumerate() {
            assert_eq!(child.chunk_index, i);
        }
    }

    #[test]
    fn trailing_partial_content_is_kept() {
        let text = "Full sentence here. Tail";
        let c = HierarchicalChunker::new(200, 20);
        let parents = c.chunk_parents(text).unwrap();
        let children = c.chunk_children(&parents);
        let joined: String = children.iter().map(|c| c.content.as_str()).collect();
        assert!(joined.contains("Tail"));
    }

    #[test]
    fn child_cut_lands_before_an_annotation_it_cannot_hold() {
        let desc = "A detailed diagram of a chloroplast showing thylakoid membranes";
        let text = format!("Photosynthesis converts light energy.\n[IMG]{desc}[/IMG]");
        let c = HierarchicalChunker::new(500, 60);
        let parents = c.chunk_parents(&text).unwrap();
        let children = c.chunk_children(&parents);

        // Every child holds complete pairs or none; no dangling sentinel.
        for child in &children {
            assert_eq!(
                child.content.matches(IMAGE_DESC_START).count(),
                child.content.matches(IMAGE_DESC_END).count(),
                "split sentinel pair in {:?}",
                child.content
            );
        }
        // The whole description survives in exactly one child.
        let carriers: Vec<_> =
            children.iter().filter(|c| c.content.contains(IMAGE_DESC_START)).collect();
        assert_eq!(carriers.len(), 1);
        assert!(carriers[0].content.contains(desc));
    }

    #[test]
    fn oversized_annotation_becomes_one_long_child() {
        let desc = "word ".repeat(40); // 200 chars, far over the child size
        let text = format!("Short intro sentence. More prose here.\n[IMG]{}[/IMG]", desc.trim());
        let c = HierarchicalChunker::new(500, 60);
        let parents = c.chunk_parents(&text).unwrap();
        let children = c.chunk_children(&parents);

        let carrier = children
            .iter()
            .find(|c| c.content.contains(IMAGE_DESC_START))
            .expect("annotation child");
        assert!(carrier.content.contains(IMAGE_DESC_END));
        assert!(carrier.content.len() > 60);
    }

    #[test]
    fn hard_split_respects_annotation_boundaries() {
        // One giant paragraph forces split_by_size at the parent level.
        let desc = "labels for every organelle in the figure shown on this page";
        let text = format!("{}[IMG]{desc}[/IMG] {}", "lead ".repeat(50), "tail ".repeat(50));
        let c = HierarchicalChunker::new(100, 60);
        let parents = c.chunk_parents(&text).unwrap();
        assert!(parents.len() > 1);

        for parent in &parents {
            assert_eq!(
                parent.content.matches(IMAGE_DESC_START).count(),
                parent.content.matches(IMAGE_DESC_END).count(),
                "split sentinel pair in {:?}",
                parent.content
            );
        }
    }

    #[test]
    fn markdown_heading_is_detected() {
        let parents = chunker().chunk_parents("## Photosynthesis\nPlants convert light.").unwrap();
        assert_eq!(parents[0].section.as_deref(), Some("Photosynthesis"));
    }

    #[test]
    fn title_case_line_is_detected_as_section() {
        let parents = chunker().chunk_parents("Cell Structure\nThe cell wall is rigid.").unwrap();
        assert_eq!(parents[0].section.as_deref(), Some("Cell Structure"));
    }

    #[test]
    fn prose_first_line_is_not_a_section() {
        let parents =
            chunker().chunk_parents("this starts lowercase and rambles on.\nMore text.").unwrap();
        assert!(parents[0].section.is_none());

        let parents = chunker().chunk_parents("A sentence that ends with punctuation.").unwrap();
        assert!(parents[0].section.is_none());
    }

    proptest! {
        #[test]
        fn chunking_is_deterministic(text in "[ a-zA-Z.\n]{1,600}") {
            prop_assume!(!text.trim().is_empty());
            let c = chunker();
            let a = c.chunk_parents(&text).unwrap();
            let b = c.chunk_parents(&text).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(c.chunk_children(&a), c.chunk_children(&b));
        }

        #[test]
        fn children_stay_inside_parent_spans(text in "[ a-zA-Z.\n]{1,600}") {
            prop_assume!(!text.trim().is_empty());
            let c = chunker();
            let parents = c.chunk_parents(&text).unwrap();
            for child in c.chunk_children(&parents) {
                let parent = &parents[child.parent_index];
                prop_assert!(child.span.start_char >= parent.span.start_char);
                prop_assert!(child.span.end_char <= parent.span.end_char);
            }
        }

        #[test]
        fn multibyte_text_never_panics(text in "\\PC{1,300}") {
            let c = HierarchicalChunker::new(64, 16);
            if let Ok(parents) = c.chunk_parents(&text) {
                let _ = c.chunk_children(&parents);
            }
        }
    }
}
