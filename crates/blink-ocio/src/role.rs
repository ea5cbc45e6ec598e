//! Role table of a config.
//!
//! A role is an alias chosen by purpose. The node asks for
//! `compositing_log` and `scene_linear` and each config decides which of its
//! color spaces those mean.

use std::collections::BTreeMap;

/// Role names the built-in config and the node rely on.
pub mod names {
    /// Space all transforms pass through.
    pub const REFERENCE: &str = "reference";
    /// Scene-referred linear working space.
    pub const SCENE_LINEAR: &str = "scene_linear";
    /// Log encoding used for compositing (Cineon in most film configs).
    pub const COMPOSITING_LOG: &str = "compositing_log";
    /// Space color pickers work in.
    pub const COLOR_PICKING: &str = "color_picking";
    /// Values that are not colors and must never be transformed.
    pub const DATA: &str = "data";
    /// Fallback for inputs with no declared space.
    pub const DEFAULT: &str = "default";
}

/// `role -> color space` table, kept sorted for stable output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roles {
    table: BTreeMap<String, String>,
}

impl Roles {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Points `role` at `colorspace`, replacing any earlier target.
    pub fn define(&mut self, role: impl Into<String>, colorspace: impl Into<String>) {
        self.table.insert(role.into(), colorspace.into());
    }

    /// Color space behind `role`, if the config has it.
    pub fn get(&self, role: &str) -> Option<&str> {
        self.table.get(role).map(String::as_str)
    }

    /// `(role, colorspace)` pairs sorted by role.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.table.iter().map(|(role, cs)| (role.as_str(), cs.as_str()))
    }

    /// Shorthand for the `compositing_log` role.
    pub fn compositing_log(&self) -> Option<&str> {
        self.get(names::COMPOSITING_LOG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_role() {
        let mut roles = Roles::new();
        roles.define(names::SCENE_LINEAR, "linear");
        roles.define(names::COMPOSITING_LOG, "Cineon");

        assert_eq!(roles.get(names::SCENE_LINEAR), Some("linear"));
        assert_eq!(roles.compositing_log(), Some("Cineon"));
        assert!(roles.get("matte_paint").is_none());
    }

    #[test]
    fn later_definition_wins() {
        let mut roles = Roles::new();
        roles.define(names::DATA, "raw");
        roles.define(names::DATA, "ncf");
        assert_eq!(roles.iter().count(), 1);
        assert_eq!(roles.get(names::DATA), Some("ncf"));
    }

    #[test]
    fn pairs_come_out_sorted() {
        let mut roles = Roles::new();
        roles.define("scene_linear", "linear");
        roles.define("data", "raw");

        let order: Vec<_> = roles.iter().map(|(role, _)| role).collect();
        assert_eq!(order, ["data", "scene_linear"]);
    }
}
