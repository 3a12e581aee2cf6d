//! Platform-specific rendering of synthesized context

use crate::synthesizer::{Section, SourceType, SynthesizedBlock, SynthesizedContext};
use crate::tokens::estimate_tokens;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Downstream platform the artifact is rendered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(rename = "chatgpt")]
    ChatGpt,
    Claude,
}

/// Per-section summary returned in the response payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionSummary {
    pub name: String,
    pub content: String,
    pub token_count: usize,
    pub source_count: usize,
}

/// Renders a synthesized context for a target platform
pub struct PlatformFormatter;

impl PlatformFormatter {
    /// Render the context as prompt-prefix text
    pub fn format_context(context: &SynthesizedContext, platform: Platform) -> String {
        match platform {
            Platform::ChatGpt => Self::format_markdown(context),
            Platform::Claude => Self::format_xml(context),
        }
    }

    /// Per-section stats independent of the rendered text
    pub fn extract_sections(context: &SynthesizedContext) -> Vec<SectionSummary> {
        Section::ORDER
            .iter()
            .filter_map(|section| {
                let blocks: Vec<&SynthesizedBlock> = context
                    .blocks
                    .iter()
                    .filter(|b| b.section == *section)
                    .collect();
                if blocks.is_empty() {
                    return None;
                }

                let content = blocks
                    .iter()
                    .map(|b| b.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                let source_count = blocks.iter().map(|b| b.sources.len()).sum();

                Some(SectionSummary {
                    name: section.title().to_string(),
                    token_count: estimate_tokens(&content),
                    source_count,
                    content,
                })
            })
            .collect()
    }

    /// ChatGPT rendering: Markdown with source lines and note blockquotes
    fn format_markdown(context: &SynthesizedContext) -> String {
        let mut out = String::new();
        out.push_str("## Project Context\n");
        out.push_str(&format!(
            "_{} source(s) · {} tokens_\n",
            context.source_count, context.total_token_count
        ));

        for section in Section::ORDER {
            let blocks: Vec<&SynthesizedBlock> = context
                .blocks
                .iter()
                .filter(|b| b.section == section)
                .collect();
            if blocks.is_empty() {
                continue;
            }

            out.push_str(&format!("\n### {}\n", section.title()));
            for block in blocks {
                out.push('\n');
                out.push_str(block.content.trim_end());
                out.push('\n');

                let sources = block
                    .sources
                    .iter()
                    .map(|s| s.title.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push_str(&format!("_Sources: {}_\n", sources));

                for contradiction in &block.contradictions {
                    out.push_str(&format!(
                        "> **Note:** conflicting information: \"{}\" vs \"{}\"\n",
                        contradiction.claim, contradiction.alternative
                    ));
                }
            }
        }

        if context.contradiction_count > 0 {
            out.push_str(&format!(
                "\n_{} contradiction(s) detected across sources_\n",
                context.contradiction_count
            ));
        }

        out
    }

    /// Claude rendering: XML with project docs, web research and a trailer
    fn format_xml(context: &SynthesizedContext) -> String {
        let mut out = String::new();

        out.push_str("<project_docs>\n");
        for section in Section::ORDER {
            if section == Section::RelatedResources {
                continue;
            }
            let blocks: Vec<&SynthesizedBlock> = context
                .blocks
                .iter()
                .filter(|b| b.section == section)
                .collect();
            if blocks.is_empty() {
                continue;
            }

            out.push_str(&format!("  <section name=\"{}\">\n", section.title()));
            for block in blocks {
                out.push_str("    <document>\n");
                for source in &block.sources {
                    out.push_str(&format!(
                        "      <source>{}</source>\n",
                        escape_xml(&source.title)
                    ));
                    if let Some(url) = &source.url {
                        out.push_str(&format!("      <url>{}</url>\n", escape_xml(url)));
                    }
                }
                out.push_str(&format!(
                    "      <relevance>{}</relevance>\n",
                    relevance_bucket(block.priority)
                ));
                out.push_str(&format!(
                    "      <content>{}</content>\n",
                    escape_xml(block.content.trim())
                ));
                for contradiction in &block.contradictions {
                    out.push_str(&format!(
                        "      <warning>conflicting information: \"{}\" vs \"{}\"</warning>\n",
                        escape_xml(&contradiction.claim),
                        escape_xml(&contradiction.alternative)
                    ));
                }
                out.push_str("    </document>\n");
            }
            out.push_str("  </section>\n");
        }
        out.push_str("</project_docs>\n");

        let web_blocks: Vec<&SynthesizedBlock> = context
            .blocks
            .iter()
            .filter(|b| {
                b.section == Section::RelatedResources
                    && b.sources
                        .iter()
                        .any(|s| s.source_type == SourceType::WebSearch)
            })
            .collect();
        if !web_blocks.is_empty() {
            out.push_str("<web_research>\n");
            for block in web_blocks {
                out.push_str("  <result>\n");
                for source in &block.sources {
                    out.push_str(&format!(
                        "    <title>{}</title>\n",
                        escape_xml(&source.title)
                    ));
                    if let Some(url) = &source.url {
                        out.push_str(&format!("    <url>{}</url>\n", escape_xml(url)));
                    }
                }
                out.push_str(&format!(
                    "    <content>{}</content>\n",
                    escape_xml(block.content.trim())
                ));
                out.push_str("  </result>\n");
            }
            out.push_str("</web_research>\n");
        }

        out.push_str("<task_analysis>\n");
        out.push_str(&format!(
            "  <total_sources>{}</total_sources>\n",
            context.source_count
        ));
        out.push_str(&format!(
            "  <total_tokens>{}</total_tokens>\n",
            context.total_token_count
        ));
        out.push_str(&format!(
            "  <sections>{}</sections>\n",
            escape_xml(&context.sections.join(", "))
        ));
        if context.contradiction_count > 0 {
            out.push_str(&format!(
                "  <contradictions_detected>{}</contradictions_detected>\n",
                context.contradiction_count
            ));
        }
        out.push_str("</task_analysis>\n");

        out
    }
}

fn relevance_bucket(priority: f32) -> &'static str {
    if priority >= 0.7 {
        "high"
    } else if priority >= 0.4 {
        "medium"
    } else {
        "low"
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesizer::{Contradiction, SourceRef};

    fn block(section: Section, content: &str, priority: f32) -> SynthesizedBlock {
        SynthesizedBlock {
            content: content.to_string(),
            sources: vec![SourceRef {
                source_type: SourceType::ProjectDoc,
                source_id: "chunk-1".to_string(),
                title: "guide.md".to_string(),
                url: None,
                authority_score: 0.9,
            }],
            section,
            priority,
            contradictions: Vec::new(),
        }
    }

    fn web_block(content: &str) -> SynthesizedBlock {
        SynthesizedBlock {
            content: content.to_string(),
            sources: vec![SourceRef {
                source_type: SourceType::WebSearch,
                source_id: "https://example.com".to_string(),
                title: "external article".to_string(),
                url: Some("https://example.com".to_string()),
                authority_score: 0.5,
            }],
            section: Section::RelatedResources,
            priority: 0.5,
            contradictions: Vec::new(),
        }
    }

    fn context(blocks: Vec<SynthesizedBlock>, contradictions: usize) -> SynthesizedContext {
        let sections = Section::ORDER
            .iter()
            .filter(|s| blocks.iter().any(|b| b.section == **s))
            .map(|s| s.title().to_string())
            .collect();
        SynthesizedContext {
            total_token_count: 100,
            source_count: blocks.len(),
            contradiction_count: contradictions,
            sections,
            blocks,
        }
    }

    #[test]
    fn test_markdown_layout() {
        let ctx = context(
            vec![
                block(Section::CoreImplementation, "Register the handler.", 0.8),
                block(Section::Examples, "```js\napp.post()\n```", 0.6),
            ],
            0,
        );
        let out = PlatformFormatter::format_context(&ctx, Platform::ChatGpt);

        assert!(out.starts_with("## Project Context\n_2 source(s) · 100 tokens_"));
        assert!(out.contains("### Core Implementation"));
        assert!(out.contains("### Examples"));
        assert!(out.contains("_Sources: guide.md_"));
        let core_pos = out.find("### Core Implementation").unwrap();
        let examples_pos = out.find("### Examples").unwrap();
        assert!(core_pos < examples_pos, "fixed section order");
    }

    #[test]
    fn test_markdown_contradiction_note() {
        let mut b = block(Section::CoreImplementation, "timeout: 30 seconds", 0.8);
        b.contradictions.push(Contradiction {
            claim: "timeout is 30 seconds".to_string(),
            sources: vec!["a".to_string()],
            alternative: "timeout is 60 seconds".to_string(),
            alternative_sources: vec!["b".to_string()],
        });
        let ctx = context(vec![b], 1);
        let out = PlatformFormatter::format_context(&ctx, Platform::ChatGpt);

        assert!(out.contains("> **Note:**"));
        assert!(out.contains("1 contradiction(s) detected"));
    }

    #[test]
    fn test_xml_layout() {
        let ctx = context(
            vec![
                block(Section::CoreImplementation, "Register the handler.", 0.8),
                web_block("external search snippet"),
            ],
            0,
        );
        let out = PlatformFormatter::format_context(&ctx, Platform::Claude);

        assert!(out.starts_with("<project_docs>"));
        assert!(out.contains("<section name=\"Core Implementation\">"));
        assert!(out.contains("<relevance>high</relevance>"));
        assert!(out.contains("<web_research>"));
        assert!(out.contains("<url>https://example.com</url>"));
        assert!(out.contains("<total_sources>2</total_sources>"));
        assert!(out.contains("<sections>Core Implementation, Related Resources</sections>"));
        assert!(!out.contains("<contradictions_detected>"));
    }

    #[test]
    fn test_xml_warning_and_escaping() {
        let mut b = block(Section::CoreImplementation, "limit < 10 & retries > 2", 0.8);
        b.contradictions.push(Contradiction {
            claim: "limit is 10".to_string(),
            sources: vec!["a".to_string()],
            alternative: "limit is 20".to_string(),
            alternative_sources: vec!["b".to_string()],
        });
        let ctx = context(vec![b], 1);
        let out = PlatformFormatter::format_context(&ctx, Platform::Claude);

        assert!(out.contains("<warning>"));
        assert!(out.contains("&lt; 10 &amp; retries &gt; 2"));
        assert!(out.contains("<contradictions_detected>1</contradictions_detected>"));
    }

    #[test]
    fn test_empty_context_well_formed() {
        let ctx = SynthesizedContext {
            blocks: Vec::new(),
            total_token_count: 0,
            source_count: 0,
            contradiction_count: 0,
            sections: Vec::new(),
        };

        let md = PlatformFormatter::format_context(&ctx, Platform::ChatGpt);
        assert!(md.contains("_0 source(s) · 0 tokens_"));

        let xml = PlatformFormatter::format_context(&ctx, Platform::Claude);
        assert!(xml.contains("<project_docs>\n</project_docs>"));
        assert!(xml.contains("<total_tokens>0</total_tokens>"));
    }

    #[test]
    fn test_extract_sections() {
        let ctx = context(
            vec![
                block(Section::CoreImplementation, "Register the handler.", 0.8),
                block(Section::CoreImplementation, "Validate the payload.", 0.7),
                block(Section::BackgroundContext, "Some history.", 0.3),
            ],
            0,
        );
        let sections = PlatformFormatter::extract_sections(&ctx);

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].name, "Core Implementation");
        assert_eq!(sections[0].source_count, 2);
        assert!(sections[0].content.contains("Validate the payload."));
        assert!(sections[0].token_count > 0);
    }

    #[test]
    fn test_platform_serde_names() {
        assert_eq!(
            serde_json::to_string(&Platform::ChatGpt).unwrap(),
            "\"chatgpt\""
        );
        assert_eq!(serde_json::to_string(&Platform::Claude).unwrap(), "\"claude\"");
    }
}
