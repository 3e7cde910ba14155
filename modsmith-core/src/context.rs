//! # Context
//!
//! Fabric API reference snippets that get prepended to generation prompts.
//! Every [`ContextKind`] has a built-in snippet; a context directory can
//! replace any of them with `<kind>_context.txt` and add a shared
//! `fabric_context.txt` that is placed in front of every snippet.

use crate::error::{io_failed, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

pub const TRUNCATION_MARKER: &str = "\n// ... (truncated)";
pub const DEFAULT_COMPRESS_LIMIT: usize = 2000;

const BASE_CONTEXT_FILE: &str = "fabric_context.txt";

static BLOCK_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid block comment regex"));
static LINE_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)//[^\n]*$").expect("valid line comment regex"));
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid ws regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Block,
    Item,
    Entity,
    BlockEntity,
    Recipe,
    Mixin,
    Event,
    General,
}

impl ContextKind {
    pub const ALL: [ContextKind; 8] = [
        ContextKind::Block,
        ContextKind::Item,
        ContextKind::Entity,
        ContextKind::BlockEntity,
        ContextKind::Recipe,
        ContextKind::Mixin,
        ContextKind::Event,
        ContextKind::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Block => "block",
            ContextKind::Item => "item",
            ContextKind::Entity => "entity",
            ContextKind::BlockEntity => "block_entity",
            ContextKind::Recipe => "recipe",
            ContextKind::Mixin => "mixin",
            ContextKind::Event => "event",
            ContextKind::General => "general",
        }
    }

    /// Guess the kind of mod element a request is about.
    ///
    /// More specific kinds are checked first, so "block entity" is not
    /// mistaken for a plain block.
    pub fn detect(request: &str) -> Self {
        let lower = request.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if has(&["block entity", "blockentity", "tile entity"]) {
            ContextKind::BlockEntity
        } else if has(&["mixin"]) {
            ContextKind::Mixin
        } else if has(&["recipe", "smelting", "crafting"]) {
            ContextKind::Recipe
        } else if has(&["event", "listener", "callback"]) {
            ContextKind::Event
        } else if has(&["block", "ore", "stone"]) {
            ContextKind::Block
        } else if has(&["item", "tool", "sword", "wand"]) {
            ContextKind::Item
        } else if has(&["entity", "mob", "creature", "zombie"]) {
            ContextKind::Entity
        } else {
            ContextKind::General
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextKind {
    type Err = std::convert::Infallible;

    /// Unknown names fall back to General
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Ok(ContextKind::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized || k.as_str().replace('_', "") == normalized)
            .unwrap_or(ContextKind::General))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextStats {
    pub snippets: usize,
    pub overridden: usize,
    pub base_context_loaded: bool,
}

/// Holds one reference snippet per [`ContextKind`]
#[derive(Debug, Clone)]
pub struct ContextManager {
    snippets: HashMap<ContextKind, String>,
    base: Option<String>,
    overridden: usize,
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextManager {
    /// Built-in snippets only
    pub fn new() -> Self {
        let snippets = ContextKind::ALL
            .iter()
            .map(|&kind| (kind, builtin_snippet(kind).to_string()))
            .collect();
        Self { snippets, base: None, overridden: 0 }
    }

    /// Built-in snippets overlaid with files from `dir`.
    ///
    /// A missing directory is not an error.
    pub fn with_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut manager = Self::new();
        if !dir.is_dir() {
            tracing::debug!(dir = %dir.display(), "context directory missing, using built-in snippets");
            return Ok(manager);
        }

        for kind in ContextKind::ALL {
            let path = dir.join(format!("{}_context.txt", kind.as_str()));
            if let Some(content) = read_optional(&path)? {
                manager.snippets.insert(kind, content);
                manager.overridden += 1;
            }
        }
        manager.base = read_optional(&dir.join(BASE_CONTEXT_FILE))?;

        tracing::info!(
            dir = %dir.display(),
            overridden = manager.overridden,
            base = manager.base.is_some(),
            "context loaded"
        );
        Ok(manager)
    }

    /// Snippet for `kind`, cut to `max_size` chars when given
    pub fn context_for(&self, kind: ContextKind, max_size: Option<usize>) -> String {
        let snippet = self
            .snippets
            .get(&kind)
            .or_else(|| self.snippets.get(&ContextKind::General))
            .map(String::as_str)
            .unwrap_or_default();

        let context = match &self.base {
            Some(base) => format!("{}\n{}", base.trim_end(), snippet),
            None => snippet.to_string(),
        };

        match max_size {
            Some(limit) if context.chars().count() > limit => {
                let mut cut: String = context.chars().take(limit).collect();
                cut.push_str(TRUNCATION_MARKER);
                cut
            }
            _ => context,
        }
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            snippets: self.snippets.len(),
            overridden: self.overridden,
            base_context_loaded: self.base.is_some(),
        }
    }
}

/// Strip comments and collapse whitespace, keeping at most `limit` chars
pub fn compress(text: &str, limit: usize) -> String {
    let without_blocks = BLOCK_COMMENT_RE.replace_all(text, " ");
    let without_lines = LINE_COMMENT_RE.replace_all(&without_blocks, "");
    let collapsed = WHITESPACE_RE.replace_all(without_lines.trim(), " ");
    collapsed.chars().take(limit).collect()
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }
    std::fs::read_to_string(path)
        .map(Some)
        .map_err(|e| io_failed("context::load", path, e))
}

fn builtin_snippet(kind: ContextKind) -> &'static str {
    match kind {
        ContextKind::Block => {
            r#"// Block creation context for Fabric 1.20.1
import net.minecraft.block.Block;
import net.minecraft.block.Material;
import net.minecraft.sound.BlockSoundGroup;
import net.fabricmc.fabric.api.object.builder.v1.block.FabricBlockSettings;

// Basic block pattern:
public class ExampleBlock extends Block {
    public ExampleBlock() {
        super(FabricBlockSettings.of(Material.STONE).strength(3.0f, 3.0f).sounds(BlockSoundGroup.STONE));
    }
}
// Register with Registry.register(Registries.BLOCK, new Identifier(MOD_ID, "example_block"), BLOCK);
"#
        }
        ContextKind::Item => {
            r#"// Item creation context for Fabric 1.20.1
import net.minecraft.item.Item;
import net.fabricmc.fabric.api.item.v1.FabricItemSettings;

// Basic item pattern:
public class ExampleItem extends Item {
    public ExampleItem() {
        super(new FabricItemSettings().maxCount(64));
    }
}
// Register with Registry.register(Registries.ITEM, new Identifier(MOD_ID, "example_item"), ITEM);
"#
        }
        ContextKind::Entity => {
            r#"// Entity creation context for Fabric 1.20.1
import net.minecraft.entity.EntityType;
import net.minecraft.entity.mob.PathAwareEntity;
import net.minecraft.world.World;

// Basic entity pattern:
public class ExampleEntity extends PathAwareEntity {
    public ExampleEntity(EntityType<? extends PathAwareEntity> type, World world) {
        super(type, world);
    }
}
// Register with FabricEntityTypeBuilder.create(SpawnGroup.CREATURE, ExampleEntity::new)
"#
        }
        ContextKind::BlockEntity => {
            r#"// Block entity context for Fabric 1.20.1
import net.minecraft.block.BlockState;
import net.minecraft.block.entity.BlockEntity;
import net.minecraft.block.entity.BlockEntityType;
import net.minecraft.nbt.NbtCompound;
import net.minecraft.util.math.BlockPos;

public class ExampleBlockEntity extends BlockEntity {
    public ExampleBlockEntity(BlockEntityType<?> type, BlockPos pos, BlockState state) {
        super(type, pos, state);
    }

    @Override
    protected void writeNbt(NbtCompound nbt) {
        super.writeNbt(nbt);
    }

    @Override
    public void readNbt(NbtCompound nbt) {
        super.readNbt(nbt);
    }
}
// Build the type with FabricBlockEntityTypeBuilder.create(ExampleBlockEntity::new, BLOCK).build()
"#
        }
        ContextKind::Recipe => {
            r#"// Recipe context for Fabric 1.20.1
Recipes are data-driven JSON files under data/<modid>/recipes/, no Java needed.
Shaped crafting, data/example_mod/recipes/example_block.json:
{
  "type": "minecraft:crafting_shaped",
  "pattern": ["SSS", "S S", "SSS"],
  "key": { "S": { "item": "minecraft:stone" } },
  "result": { "item": "example_mod:example_block", "count": 1 }
}
Smelting, data/example_mod/recipes/ingot_from_smelting.json:
{
  "type": "minecraft:smelting",
  "ingredient": { "item": "example_mod:raw_ore" },
  "result": "example_mod:ingot",
  "experience": 0.7,
  "cookingtime": 200
}
"#
        }
        ContextKind::Mixin => {
            r#"// Mixin context for Fabric 1.20.1
import org.spongepowered.asm.mixin.Mixin;
import org.spongepowered.asm.mixin.injection.At;
import org.spongepowered.asm.mixin.injection.Inject;
import org.spongepowered.asm.mixin.injection.callback.CallbackInfo;
import net.minecraft.server.MinecraftServer;

@Mixin(MinecraftServer.class)
public class ExampleMixin {
    @Inject(at = @At("HEAD"), method = "loadWorld")
    private void init(CallbackInfo info) {
        // Runs before the world loads
    }
}
// List the class in <modid>.mixins.json
"#
        }
        ContextKind::Event => {
            r#"// Event context for Fabric 1.20.1
import net.fabricmc.fabric.api.event.player.UseBlockCallback;
import net.fabricmc.fabric.api.event.lifecycle.v1.ServerTickEvents;
import net.minecraft.util.ActionResult;

// Register callbacks from onInitialize():
UseBlockCallback.EVENT.register((player, world, hand, hitResult) -> {
    return ActionResult.PASS;
});
ServerTickEvents.END_SERVER_TICK.register(server -> {
    // Runs every server tick
});
"#
        }
        ContextKind::General => {
            r#"// General Fabric mod context
package com.example.mod;

import net.fabricmc.api.ModInitializer;
import net.minecraft.registry.Registry;
import net.minecraft.util.Identifier;

public class ExampleMod implements ModInitializer {
    public static final String MOD_ID = "example_mod";

    @Override
    public void onInitialize() {
        // Mod initialization
    }
}
"#
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_priority() {
        assert_eq!(ContextKind::detect("create a block entity for a furnace"), ContextKind::BlockEntity);
        assert_eq!(ContextKind::detect("a mixin into the player tick"), ContextKind::Mixin);
        assert_eq!(ContextKind::detect("add a smelting recipe for ruby ore"), ContextKind::Recipe);
        assert_eq!(ContextKind::detect("listen for the block break event"), ContextKind::Event);
        assert_eq!(ContextKind::detect("Create a Ruby Ore"), ContextKind::Block);
        assert_eq!(ContextKind::detect("a magic wand"), ContextKind::Item);
        assert_eq!(ContextKind::detect("friendly zombie companion"), ContextKind::Entity);
        assert_eq!(ContextKind::detect("hello"), ContextKind::General);
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("block_entity".parse::<ContextKind>().unwrap(), ContextKind::BlockEntity);
        assert_eq!("Block Entity".parse::<ContextKind>().unwrap(), ContextKind::BlockEntity);
        assert_eq!("blockentity".parse::<ContextKind>().unwrap(), ContextKind::BlockEntity);
        assert_eq!("ITEM".parse::<ContextKind>().unwrap(), ContextKind::Item);
        assert_eq!("nonsense".parse::<ContextKind>().unwrap(), ContextKind::General);
    }

    #[test]
    fn test_builtin_snippets() {
        let manager = ContextManager::new();
        assert!(manager.context_for(ContextKind::Block, None).contains("FabricBlockSettings"));
        assert!(manager.context_for(ContextKind::General, None).contains("ModInitializer"));
        assert_eq!(manager.stats().snippets, 8);
        assert!(!manager.stats().base_context_loaded);
    }

    #[test]
    fn test_truncation_marker() {
        let manager = ContextManager::new();
        let context = manager.context_for(ContextKind::Item, Some(20));
        assert!(context.ends_with(TRUNCATION_MARKER));
        assert_eq!(context.chars().count(), 20 + TRUNCATION_MARKER.chars().count());

        let full = manager.context_for(ContextKind::Item, Some(100_000));
        assert!(!full.contains("(truncated)"));
    }

    #[test]
    fn test_directory_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("block_context.txt"), "// custom block api").unwrap();
        std::fs::write(dir.path().join("fabric_context.txt"), "// fabric 0.92").unwrap();

        let manager = ContextManager::with_directory(dir.path()).unwrap();
        let block = manager.context_for(ContextKind::Block, None);
        assert_eq!(block, "// fabric 0.92\n// custom block api");
        assert!(manager.context_for(ContextKind::Item, None).starts_with("// fabric 0.92"));

        let stats = manager.stats();
        assert_eq!(stats.overridden, 1);
        assert!(stats.base_context_loaded);
    }

    #[test]
    fn test_missing_directory_uses_builtins() {
        let manager = ContextManager::with_directory("/definitely/not/here").unwrap();
        assert_eq!(manager.stats().overridden, 0);
    }

    #[test]
    fn test_every_builtin_survives_compression() {
        let manager = ContextManager::new();
        for kind in ContextKind::ALL {
            let compressed = compress(&manager.context_for(kind, None), DEFAULT_COMPRESS_LIMIT);
            assert!(!compressed.is_empty(), "{:?} compressed to nothing", kind);
        }

        let recipe = compress(&manager.context_for(ContextKind::Recipe, None), DEFAULT_COMPRESS_LIMIT);
        assert!(recipe.contains("crafting_shaped"));
        assert!(recipe.contains("minecraft:smelting"));
    }

    #[test]
    fn test_compress() {
        let code = "/* header\n spanning lines */\nimport a.B; // trailing\n\n\npublic   class  X {}";
        assert_eq!(compress(code, DEFAULT_COMPRESS_LIMIT), "import a.B; public class X {}");
        assert_eq!(compress(code, 6), "import");
    }
}
