//! Name rewriter (§4.1): prefix-mangles identifiers and asset strings by
//! media-pool tag, and reverses the direction implicitly by only ever being
//! called on the appropriate leg of a packet's trip through the proxy.
//!
//! Grounded in the original's `prepend`/`prependTexture`/`prependInv` (see
//! `content.go`) and `prependFormspec` (`formspec.go`), generalized from
//! Go's hand-rolled `ReplaceAllStringSubmatchFunc` to `regex`'s native
//! closure-based `replace_all`.

use regex::Regex;
use std::sync::LazyLock;

use crate::wire::ItemDef;

/// Default asset/node names exempt from mangling (§3 invariants).
const DEFAULT_WHITELIST: &[&str] = &["", "air", "unknown", "ignore", "sun.png", "moon.png"];

pub fn is_default_node(s: &str) -> bool {
    DEFAULT_WHITELIST.contains(&s)
}

/// Prepends `pool_` to `s` unless it's in the default whitelist.
pub fn prepend(pool: &str, s: &str) -> String {
    if is_default_node(s) {
        s.to_string()
    } else {
        format!("{pool}_{s}")
    }
}

static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-zA-Z0-9\-_.]*\.[a-zA-Z\-_.]+").unwrap());

/// Treats `s` as a texture-modifier string (stacked effects separated by
/// `^`, `(`, `)`, `:`, ...) and prepends the pool tag to every embedded
/// filename, leaving punctuation and numeric arguments untouched.
pub fn prepend_texture(pool: &str, s: &str) -> String {
    FILENAME_RE
        .replace_all(s, |caps: &regex::Captures| {
            let filename = &caps[0];
            if is_default_node(filename) {
                filename.to_string()
            } else {
                format!("{pool}_{filename}")
            }
        })
        .into_owned()
}

static ITEM_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(item_image\[[0-9.\-]+,[0-9.\-]+;[0-9.\-]+,[0-9.\-]+;)([a-zA-Z0-9\-_.: ]+)(\])")
        .unwrap()
});
static ITEM_IMAGE_BUTTON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(item_image_button\[[0-9.\-]+,[0-9.\-]+;[0-9.\-]+,[0-9.\-]+;)([a-zA-Z0-9\-_.: ]+)(;[a-zA-Z0-9\-_.: ]+;[^\[\]]*\])",
    )
    .unwrap()
});

/// Mangles a formspec string: every embedded filename gets the pool prefix,
/// and the item fields of `item_image[...]` / `item_image_button[...]`
/// elements additionally get their item-name substring prefixed.
pub fn prepend_formspec(pool: &str, fs: &str) -> String {
    let with_textures = prepend_texture(pool, fs);

    let with_items = ITEM_IMAGE_RE.replace_all(&with_textures, |caps: &regex::Captures| {
        format!("{}{}_{}{}", &caps[1], pool, &caps[2], &caps[3])
    });

    ITEM_IMAGE_BUTTON_RE
        .replace_all(&with_items, |caps: &regex::Captures| {
            format!("{}{}_{}{}", &caps[1], pool, &caps[2], &caps[3])
        })
        .into_owned()
}

/// A logical inventory: named lists of item stacks. The wire's opaque
/// serialized form is decoded into this view before mangling and
/// re-serialized afterward; the encode/decode step lives with the server
/// session since only it knows the serialization the game protocol uses.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub lists: Vec<InvList>,
}

#[derive(Debug, Clone, Default)]
pub struct InvList {
    pub name: String,
    pub stacks: Vec<ItemStack>,
}

#[derive(Debug, Clone, Default)]
pub struct ItemStack {
    pub name: String,
    pub count: u16,
    pub wear: u16,
}

/// Prefixes every stack's item name in every named list with the pool tag.
pub fn prepend_inv(pool: &str, inv: &mut Inventory) {
    for list in &mut inv.lists {
        for stack in &mut list.stacks {
            if !stack.name.is_empty() {
                stack.name = prepend(pool, &stack.name);
            }
        }
    }
}

/// Mangles an item definition's name and every texture/sound field it
/// carries, in place (§4.2's item-def merge step).
pub fn mangle_item_def(pool: &str, def: &mut ItemDef) {
    let normalized_name = if def.name.is_empty() {
        "hand".to_string()
    } else {
        def.name.clone()
    };
    def.name = prepend(pool, &normalized_name);
    def.image = prepend_texture(pool, &def.image);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_skips_whitelist() {
        assert_eq!(prepend("a", "air"), "air");
        assert_eq!(prepend("a", ""), "");
        assert_eq!(prepend("a", "stone"), "a_stone");
    }

    #[test]
    fn prepend_texture_handles_stacked_modifiers() {
        let out = prepend_texture("a", "default_stone.png^overlay.png:0,0=mask.png");
        assert_eq!(
            out,
            "a_default_stone.png^a_overlay.png:0,0=a_mask.png"
        );
    }

    #[test]
    fn prepend_texture_preserves_whitelisted_names() {
        let out = prepend_texture("a", "sun.png^moon.png");
        assert_eq!(out, "sun.png^moon.png");
    }

    #[test]
    fn prepend_formspec_mangles_item_image() {
        let fs = "item_image[0,0;1,1;default:stone]";
        let out = prepend_formspec("a", fs);
        assert_eq!(out, "item_image[0,0;1,1;a_default:stone]");
    }

    #[test]
    fn prepend_inv_mangles_nonempty_stacks() {
        let mut inv = Inventory {
            lists: vec![InvList {
                name: "main".to_string(),
                stacks: vec![
                    ItemStack {
                        name: "default:stone".to_string(),
                        count: 1,
                        wear: 0,
                    },
                    ItemStack::default(),
                ],
            }],
        };
        prepend_inv("a", &mut inv);
        assert_eq!(inv.lists[0].stacks[0].name, "a_default:stone");
        assert_eq!(inv.lists[0].stacks[1].name, "");
    }

    #[test]
    fn mangle_item_def_normalizes_empty_name_to_hand() {
        let mut def = ItemDef {
            name: String::new(),
            image: "wieldhand.png".to_string(),
            tool_caps: serde_json::Value::Null,
        };
        mangle_item_def("a", &mut def);
        assert_eq!(def.name, "a_hand");
    }
}
