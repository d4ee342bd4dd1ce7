//! Prompt compilation: predefined source plus reflections as one text block.
//!
//! Predefined source may contain hidden regions delimited by marker lines
//! (`// <hidden>` ... `// </hidden>` by default). Hidden lines, markers
//! included, are left out of the rendered prompt but are still loaded into
//! the namespace. Reflections follow the visible source in declaration
//! order, each preceded by its provenance and base-chain comments.

use crate::config::RuntimeConfig;
use crate::reflect::Reflection;
use std::collections::HashSet;
use tracing::debug;

/// Renders predefined source and reflections with one marker pair.
#[derive(Debug, Clone)]
pub struct PromptCompiler {
    hidden_begin: String,
    hidden_end: String,
}

impl Default for PromptCompiler {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}

impl PromptCompiler {
    pub fn new(hidden_begin: impl Into<String>, hidden_end: impl Into<String>) -> Self {
        Self {
            hidden_begin: hidden_begin.into(),
            hidden_end: hidden_end.into(),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.hidden_begin.clone(), config.hidden_end.clone())
    }

    /// `source` without its hidden regions. Markers match whole lines,
    /// ignoring surrounding whitespace. A region left open hides the rest
    /// of the source.
    pub fn visible_source(&self, source: &str) -> String {
        let mut hidden = false;
        let mut out = String::with_capacity(source.len());
        for line in source.lines() {
            let marker = line.trim();
            if !hidden && marker == self.hidden_begin {
                hidden = true;
                continue;
            }
            if hidden {
                if marker == self.hidden_end {
                    hidden = false;
                }
                continue;
            }
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Neutralize marker lines in generated text so it cannot open or close
    /// a hidden region when concatenated with predefined source.
    pub fn escape(&self, text: &str) -> String {
        text.lines()
            .map(|line| {
                let trimmed = line.trim();
                if trimmed == self.hidden_begin || trimmed == self.hidden_end {
                    format!("// (escaped) {trimmed}")
                } else {
                    line.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Visible predefined source, then each reflection. A display name seen
    /// before is skipped: the first declaration wins.
    pub fn render(&self, predefined: &str, reflections: &[Reflection]) -> String {
        let mut sections = Sections::new();
        sections.push(self.visible_source(predefined));
        sections.push(describe(reflections));
        sections.build()
    }
}

/// Render reflections alone, first declaration winning on duplicate names.
pub fn describe(reflections: &[Reflection]) -> String {
    let mut seen = HashSet::new();
    let mut sections = Sections::new();
    for reflection in reflections {
        if !seen.insert(reflection.name()) {
            debug!(
                "[prompt] duplicate symbol `{}` skipped (first declaration wins)",
                reflection.name()
            );
            continue;
        }
        let mut block = reflection.header().join("\n");
        if !block.is_empty() {
            block.push('\n');
        }
        block.push_str(&reflection.prompt());
        sections.push(block);
    }
    sections.build()
}

/// Render with the default hidden markers.
pub fn render(predefined: &str, reflections: &[Reflection]) -> String {
    PromptCompiler::default().render(predefined, reflections)
}

/// Text blocks joined by blank lines; empty blocks are skipped.
#[derive(Debug, Default)]
pub struct Sections {
    parts: Vec<String>,
}

impl Sections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, part: impl Into<String>) {
        let part = part.into();
        let trimmed = part.trim_matches('\n');
        if !trimmed.trim().is_empty() {
            self.parts.push(trimmed.to_string());
        }
    }

    pub fn build(self) -> String {
        self.parts.join("\n\n")
    }
}

/// Replace the declared name in `struct <from>` with `to`. Returns `None`
/// when `source` declares no such struct.
pub fn substitute_struct_name(source: &str, from: &str, to: &str) -> Option<String> {
    let needle = format!("struct {from}");
    let mut search = 0;
    while let Some(found) = source.get(search..).and_then(|rest| rest.find(&needle)) {
        let start = search + found;
        let end = start + needle.len();
        let boundary = source
            .get(end..)
            .and_then(|rest| rest.chars().next())
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_'));
        let preceded = source
            .get(..start)
            .and_then(|before| before.chars().next_back())
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_'));
        if boundary && preceded {
            let mut out = String::with_capacity(source.len() + to.len());
            out.push_str(source.get(..start)?);
            out.push_str("struct ");
            out.push_str(to);
            out.push_str(source.get(end..)?);
            return Some(out);
        }
        search = end;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "fn plus(a, b) { return a + b; }\n// <hidden>\nfn secret() { return 1; }\n// </hidden>\nfn shown() {}\n";

    #[test]
    fn hidden_regions_are_omitted_markers_included() {
        let visible = PromptCompiler::default().visible_source(SOURCE);
        assert_eq!(visible, "fn plus(a, b) { return a + b; }\nfn shown() {}\n");
    }

    #[test]
    fn unterminated_region_hides_the_rest() {
        let source = "a = 1;\n  // <hidden>  \nb = 2;\n";
        assert_eq!(PromptCompiler::default().visible_source(source), "a = 1;\n");
    }

    #[test]
    fn custom_markers() {
        let compiler = PromptCompiler::new("#begin", "#end");
        assert_eq!(compiler.visible_source("x\n#begin\ny\n#end\nz"), "x\nz\n");
    }

    #[test]
    fn render_orders_and_dedupes() {
        let reflections = vec![
            Reflection::attribute("limit", Some("int"), Some("3".into())).relocated("settings"),
            Reflection::attribute("limit", Some("int"), Some("9".into())),
            Reflection::import("builtins", "print", None),
        ];
        let text = render("fn f() {}\n", &reflections);
        assert_eq!(
            text,
            "fn f() {}\n\n// use settings::limit\nlet limit: int = 3;\n\nuse builtins::print;"
        );
    }

    #[test]
    fn escape_neutralizes_markers() {
        let escaped = PromptCompiler::default().escape("a\n// <hidden>\nb");
        assert_eq!(escaped, "a\n// (escaped) // <hidden>\nb");
        let visible = PromptCompiler::default().visible_source(&escaped);
        assert!(visible.contains('b'));
    }

    #[test]
    fn struct_name_substitution_respects_identifier_boundaries() {
        let source = "/// Doc.\nstruct FacadeBase {}\nstruct Facade extends FacadeBase {}";
        let out = substitute_struct_name(source, "Facade", "Kernel").unwrap();
        assert_eq!(
            out,
            "/// Doc.\nstruct FacadeBase {}\nstruct Kernel extends FacadeBase {}"
        );
        assert!(substitute_struct_name("fn f() {}", "Facade", "K").is_none());
    }
}
