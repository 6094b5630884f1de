use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// The modloaders an instance can run on.
#[derive(Serialize, Deserialize, Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Loader {
    #[default]
    Vanilla,
    Fabric,
    Forge,
    Neoforge,
    Quilt,
}

impl Display for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Loader {
    pub const ALL: &'static [Self] = &[
        Self::Vanilla,
        Self::Fabric,
        Self::Forge,
        Self::Neoforge,
        Self::Quilt,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vanilla => "vanilla",
            Self::Fabric => "fabric",
            Self::Forge => "forge",
            Self::Neoforge => "neoforge",
            Self::Quilt => "quilt",
        }
    }

    #[must_use]
    pub fn is_vanilla(self) -> bool {
        matches!(self, Self::Vanilla)
    }

    /// Maps a `.mrpack` dependency key to its loader. `minecraft` is the
    /// game itself, not a loader, so it maps to `None`.
    #[must_use]
    pub fn from_dependency_key(key: &str) -> Option<Self> {
        match key {
            "fabric-loader" => Some(Self::Fabric),
            "quilt-loader" => Some(Self::Quilt),
            "forge" => Some(Self::Forge),
            "neoforge" => Some(Self::Neoforge),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_modrinth_str(self) -> &'static str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_keys_map_to_loaders() {
        assert_eq!(Loader::from_dependency_key("fabric-loader"), Some(Loader::Fabric));
        assert_eq!(Loader::from_dependency_key("quilt-loader"), Some(Loader::Quilt));
        assert_eq!(Loader::from_dependency_key("forge"), Some(Loader::Forge));
        assert_eq!(Loader::from_dependency_key("neoforge"), Some(Loader::Neoforge));
        assert_eq!(Loader::from_dependency_key("minecraft"), None);
        assert_eq!(Loader::from_dependency_key("liteloader"), None);
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Loader::Neoforge).unwrap(), "\"neoforge\"");
        let parsed: Loader = serde_json::from_str("\"fabric\"").unwrap();
        assert_eq!(parsed, Loader::Fabric);
    }
}
