//! Splitting rendered pages into matchable sections.
//!
//! A section is one paragraph-level block. Headings are attached to the block
//! that follows them so a heading never stands alone, and fenced code blocks are
//! never split on their internal blank lines.

/// Split Markdown into ordered, non-empty sections.
pub fn split_sections(md: &str) -> Vec<String> {
    let blocks = split_blocks(md);

    let mut sections = Vec::with_capacity(blocks.len());
    let mut pending_heading: Option<String> = None;

    for block in blocks {
        if is_heading(&block) {
            // Consecutive headings stack up until a body block arrives.
            pending_heading = Some(match pending_heading.take() {
                Some(prev) => format!("{prev}\n{block}"),
                None => block,
            });
            continue;
        }

        match pending_heading.take() {
            Some(heading) => sections.push(format!("{heading}\n{block}")),
            None => sections.push(block),
        }
    }

    if let Some(heading) = pending_heading {
        sections.push(heading);
    }

    sections
}

/// Split on blank lines, keeping fenced code blocks intact.
fn split_blocks(md: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_code_block = false;

    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
        }

        if !in_code_block && line.trim().is_empty() {
            flush(&mut current, &mut blocks);
            continue;
        }
        current.push(line);
    }
    flush(&mut current, &mut blocks);

    blocks
}

fn flush(current: &mut Vec<&str>, blocks: &mut Vec<String>) {
    if current.is_empty() {
        return;
    }
    let block = current.join("\n").trim().to_string();
    current.clear();
    if !block.is_empty() {
        blocks.push(block);
    }
}

/// A block consisting solely of ATX heading lines.
fn is_heading(block: &str) -> bool {
    block.lines().all(|line| {
        let trimmed = line.trim_start();
        let hashes = trimmed.chars().take_while(|c| *c == '#').count();
        (1..=6).contains(&hashes) && trimmed[hashes..].starts_with(' ')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_become_sections() {
        let sections = split_sections("unrelated text\n\nhow to make an apple pie: ...");
        assert_eq!(sections, vec!["unrelated text", "how to make an apple pie: ..."]);
    }

    #[test]
    fn headings_attach_to_following_block() {
        let md = "# Recipes\n\n## Pie\n\nMix apples.\n\nBake it.";
        let sections = split_sections(md);
        assert_eq!(sections, vec!["# Recipes\n## Pie\nMix apples.", "Bake it."]);
    }

    #[test]
    fn code_fences_survive_blank_lines() {
        let md = "Intro\n\n```rust\nfn a() {}\n\nfn b() {}\n```\n\nOutro";
        let sections = split_sections(md);
        assert_eq!(sections.len(), 3);
        assert!(sections[1].contains("fn a() {}\n\nfn b() {}"));
    }

    #[test]
    fn trailing_heading_is_kept() {
        let sections = split_sections("Body\n\n## Footer");
        assert_eq!(sections, vec!["Body", "## Footer"]);
    }

    #[test]
    fn hashtag_text_is_not_a_heading() {
        assert!(!is_heading("#rustlang is trending"));
        assert!(is_heading("### Real heading"));
    }

    #[test]
    fn empty_input_has_no_sections() {
        assert!(split_sections("").is_empty());
        assert!(split_sections("\n\n  \n").is_empty());
    }
}
