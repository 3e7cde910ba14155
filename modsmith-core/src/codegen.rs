//! # Template code generation
//!
//! Used when no model backend is configured. A request is matched to a
//! [`CodePattern`] by keyword, a class name is pulled from the request, and
//! the matching Fabric template is filled in. The result is scored with a
//! simple structural heuristic so callers can compare it against model
//! output.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

static CLASS_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-zA-Z]*\b").expect("valid class name regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodePattern {
    BasicBlock,
    BasicItem,
    Entity,
    General,
}

impl CodePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodePattern::BasicBlock => "basic_block",
            CodePattern::BasicItem => "basic_item",
            CodePattern::Entity => "entity",
            CodePattern::General => "general",
        }
    }

    fn class_suffix(&self) -> Option<&'static str> {
        match self {
            CodePattern::BasicBlock => Some("Block"),
            CodePattern::BasicItem => Some("Item"),
            CodePattern::Entity => Some("Entity"),
            CodePattern::General => None,
        }
    }
}

impl fmt::Display for CodePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order matters: earlier rows win ties
const PATTERN_KEYWORDS: [(CodePattern, &[&str]); 4] = [
    (CodePattern::BasicBlock, &["block", "blocks", "stone", "wood", "ore"]),
    (CodePattern::BasicItem, &["item", "items", "tool", "weapon", "sword"]),
    (CodePattern::Entity, &["entity", "mob", "creature"]),
    (CodePattern::General, &["mod", "class", "general"]),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    pub request_id: String,
    pub code: String,
    pub pattern: CodePattern,
    pub class_name: String,
    pub quality: f64,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratorStats {
    pub templates: usize,
    pub patterns: usize,
    pub generated: u64,
}

#[derive(Debug)]
pub struct CodeGenerator {
    package: String,
    include_comments: bool,
    generated: AtomicU64,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new("com.example.mod", true)
    }
}

impl CodeGenerator {
    pub fn new(package: impl Into<String>, include_comments: bool) -> Self {
        Self {
            package: package.into(),
            include_comments,
            generated: AtomicU64::new(0),
        }
    }

    pub fn generate(&self, request: &str) -> GenerationResult {
        let pattern = detect_pattern(request);
        let class_name = extract_class_name(request, pattern);
        let code = self.render(pattern, &class_name, request);
        let quality = quality_score(&code);
        let suggestions = suggestions(&code, pattern);

        let n = self.generated.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(pattern = pattern.as_str(), class = %class_name, quality, "template generated");

        GenerationResult {
            request_id: format!("tpl_{}", n),
            code,
            pattern,
            class_name,
            quality,
            suggestions,
        }
    }

    pub fn stats(&self) -> GeneratorStats {
        GeneratorStats {
            templates: PATTERN_KEYWORDS.len(),
            patterns: PATTERN_KEYWORDS.len(),
            generated: self.generated.load(Ordering::Relaxed),
        }
    }

    fn render(&self, pattern: CodePattern, class_name: &str, request: &str) -> String {
        let package = match pattern {
            CodePattern::BasicBlock => format!("{}.blocks", self.package),
            CodePattern::BasicItem => format!("{}.items", self.package),
            CodePattern::Entity => format!("{}.entities", self.package),
            CodePattern::General => self.package.clone(),
        };

        let doc = if self.include_comments {
            // Keep user text from closing the comment early
            format!(
                "/**\n * {} - Generated for: {}\n */\n",
                class_name,
                request.trim().replace("*/", "* /")
            )
        } else {
            String::new()
        };

        match pattern {
            CodePattern::BasicBlock => format!(
                r#"package {package};

import net.minecraft.block.Block;
import net.minecraft.block.Material;
import net.minecraft.sound.BlockSoundGroup;
import net.fabricmc.fabric.api.object.builder.v1.block.FabricBlockSettings;

{doc}public class {class_name} extends Block {{

    public {class_name}() {{
        super(FabricBlockSettings.of(Material.STONE)
            .strength(3.0f, 3.0f)
            .sounds(BlockSoundGroup.STONE)
        );
    }}
}}
"#
            ),
            CodePattern::BasicItem => format!(
                r#"package {package};

import net.minecraft.item.Item;
import net.fabricmc.fabric.api.item.v1.FabricItemSettings;

{doc}public class {class_name} extends Item {{

    public {class_name}() {{
        super(new FabricItemSettings()
            .maxCount(64)
        );
    }}
}}
"#
            ),
            CodePattern::Entity => format!(
                r#"package {package};

import net.minecraft.entity.EntityType;
import net.minecraft.entity.mob.PathAwareEntity;
import net.minecraft.world.World;

{doc}public class {class_name} extends PathAwareEntity {{

    public {class_name}(EntityType<? extends PathAwareEntity> entityType, World world) {{
        super(entityType, world);
    }}
}}
"#
            ),
            CodePattern::General => format!(
                r#"package {package};

{doc}public class {class_name} {{

    public {class_name}() {{
    }}
}}
"#
            ),
        }
    }
}

/// Keyword-count match. No hits means General.
pub fn detect_pattern(request: &str) -> CodePattern {
    let lower = request.to_lowercase();

    let mut best = (CodePattern::General, 0usize);
    for (pattern, keywords) in PATTERN_KEYWORDS {
        let score = keywords.iter().filter(|k| lower.contains(*k)).count();
        if score > best.1 {
            best = (pattern, score);
        }
    }
    best.0
}

pub fn extract_class_name(request: &str, pattern: CodePattern) -> String {
    let base = match CLASS_NAME_RE.find(request) {
        Some(m) => m.as_str().to_string(),
        None => request
            .split_whitespace()
            .next()
            .map(capitalize)
            .filter(|w| !w.is_empty())
            .unwrap_or_else(|| "Generated".to_string()),
    };

    match pattern.class_suffix() {
        Some(suffix) if !base.ends_with(suffix) => format!("{}{}", base, suffix),
        _ => base,
    }
}

/// First letter upper, rest lower, non-alphanumerics dropped
fn capitalize(word: &str) -> String {
    let cleaned: String = word.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    let mut chars = cleaned.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
        }
        _ => String::new(),
    }
}

pub fn quality_score(code: &str) -> f64 {
    let mut score: f64 = 0.5;
    if code.contains("package ") {
        score += 0.1;
    }
    if code.contains("import ") {
        score += 0.1;
    }
    if code.contains("class ") {
        score += 0.2;
    }
    if code.contains("/**") {
        score += 0.15;
    }
    if code.contains("public ") {
        score += 0.05;
    }
    score.min(1.0)
}

pub fn suggestions(code: &str, pattern: CodePattern) -> Vec<String> {
    let mut out = Vec::new();
    if !code.contains("/**") {
        out.push("Consider adding Javadoc documentation".to_string());
    }

    let registers = code.contains("Registry.register");
    match pattern {
        CodePattern::BasicBlock if !registers => {
            out.push("Don't forget to register your block in your mod initializer".to_string())
        }
        CodePattern::BasicItem if !registers => {
            out.push("Don't forget to register your item in your mod initializer".to_string())
        }
        _ => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_pattern() {
        assert_eq!(detect_pattern("create a stone block"), CodePattern::BasicBlock);
        assert_eq!(detect_pattern("a fire sword"), CodePattern::BasicItem);
        assert_eq!(detect_pattern("hostile mob"), CodePattern::Entity);
        assert_eq!(detect_pattern("hello world"), CodePattern::General);
        // "block" + "blocks" beats a single "item"
        assert_eq!(detect_pattern("item that places blocks"), CodePattern::BasicBlock);
        // one hit each: table order decides
        assert_eq!(detect_pattern("ore item"), CodePattern::BasicBlock);
    }

    #[test]
    fn test_extract_class_name() {
        assert_eq!(extract_class_name("create a Ruby block", CodePattern::BasicBlock), "RubyBlock");
        assert_eq!(extract_class_name("make RubyBlock glow", CodePattern::BasicBlock), "RubyBlock");
        assert_eq!(extract_class_name("sharp sword", CodePattern::BasicItem), "SharpItem");
        assert_eq!(extract_class_name("", CodePattern::Entity), "GeneratedEntity");
        assert_eq!(extract_class_name("hello", CodePattern::General), "Hello");
    }

    #[test]
    fn test_block_template() {
        let generator = CodeGenerator::default();
        let result = generator.generate("create a Ruby ore block");

        assert_eq!(result.pattern, CodePattern::BasicBlock);
        assert_eq!(result.class_name, "RubyBlock");
        assert!(result.code.starts_with("package com.example.mod.blocks;"));
        assert!(result.code.contains("public class RubyBlock extends Block"));
        assert!(result.code.contains("FabricBlockSettings.of(Material.STONE)"));
        assert!(result.code.contains("RubyBlock - Generated for: create a Ruby ore block"));
        assert_eq!(result.quality, 1.0);
        assert_eq!(result.suggestions.len(), 1);
        assert!(result.suggestions[0].contains("register your block"));
    }

    #[test]
    fn test_without_comments() {
        let generator = CodeGenerator::new("dev.gems", false);
        let result = generator.generate("Shiny entity");

        assert!(result.code.starts_with("package dev.gems.entities;"));
        assert!(!result.code.contains("/**"));
        assert!((result.quality - 0.95).abs() < 1e-9);
        assert_eq!(result.suggestions, vec!["Consider adding Javadoc documentation".to_string()]);
    }

    #[test]
    fn test_quality_score_bounds() {
        assert_eq!(quality_score(""), 0.5);
        assert_eq!(quality_score("package a; import b; /** */ public class C {}"), 1.0);
    }

    #[test]
    fn test_stats_counts_generations() {
        let generator = CodeGenerator::default();
        generator.generate("a");
        let second = generator.generate("b");
        assert_eq!(second.request_id, "tpl_2");
        assert_eq!(generator.stats().generated, 2);
        assert_eq!(generator.stats().patterns, 4);
    }
}
