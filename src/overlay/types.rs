use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Priority assigned when neither the user nor the catalog chose one.
pub const DEFAULT_PRIORITY: u8 = 50;
pub const MAX_PRIORITY: u8 = 100;

/// Version-control (or transport) type of an overlay source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    Rsync,
    Cvs,
    Svn,
    Bzr,
    Darcs,
    Git,
    Mercurial,
    Tar,
    #[serde(rename = "g-common")]
    GCommon,
}

impl SourceType {
    pub const ALL: [SourceType; 9] = [
        SourceType::Rsync,
        SourceType::Cvs,
        SourceType::Svn,
        SourceType::Bzr,
        SourceType::Darcs,
        SourceType::Git,
        SourceType::Mercurial,
        SourceType::Tar,
        SourceType::GCommon,
    ];

    /// Tag used in catalog documents
    pub fn tag(self) -> &'static str {
        match self {
            SourceType::Rsync => "rsync",
            SourceType::Cvs => "cvs",
            SourceType::Svn => "svn",
            SourceType::Bzr => "bzr",
            SourceType::Darcs => "darcs",
            SourceType::Git => "git",
            SourceType::Mercurial => "mercurial",
            SourceType::Tar => "tar",
            SourceType::GCommon => "g-common",
        }
    }

    /// Prefix of the per-type configuration keys (`git_command`, `g_common_syncopts`, ...)
    pub fn config_prefix(self) -> String {
        self.tag().replace('-', "_")
    }

    /// Human readable name
    pub fn display_name(self) -> &'static str {
        match self {
            SourceType::Rsync => "Rsync",
            SourceType::Cvs => "CVS",
            SourceType::Svn => "Subversion",
            SourceType::Bzr => "Bazaar",
            SourceType::Darcs => "Darcs",
            SourceType::Git => "Git",
            SourceType::Mercurial => "Mercurial",
            SourceType::Tar => "Tar",
            SourceType::GCommon => "g-common",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceType::ALL
            .into_iter()
            .find(|t| t.tag() == s)
            .ok_or_else(|| format!("unknown overlay type \"{s}\""))
    }
}

/// One candidate location for obtaining an overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "type")]
    pub kind: SourceType,
    pub url: String,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// `person` or `project` in current catalogs
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Core,
    Stable,
    Testing,
    #[default]
    Experimental,
    Graveyard,
}

impl Quality {
    /// Parse a catalog quality attribute; unknown levels fall back to experimental.
    pub fn parse_lenient(s: &str) -> Quality {
        match s {
            "core" => Quality::Core,
            "stable" => Quality::Stable,
            "testing" => Quality::Testing,
            "graveyard" => Quality::Graveyard,
            _ => Quality::Experimental,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Core => "core",
            Quality::Stable => "stable",
            Quality::Testing => "testing",
            Quality::Experimental => "experimental",
            Quality::Graveyard => "graveyard",
        }
    }
}

/// A catalog entry describing one overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlay {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default)]
    pub owner: Owner,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub sources: Vec<Source>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feeds: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub irc: Option<String>,
}

impl Overlay {
    pub fn new(name: impl Into<String>, sources: Vec<Source>) -> Self {
        Self {
            name: name.into(),
            description: None,
            homepage: None,
            owner: Owner::default(),
            quality: Quality::default(),
            status: None,
            sources,
            feeds: Vec::new(),
            priority: None,
            branch: None,
            subpath: None,
            irc: None,
        }
    }

    pub fn is_official(&self) -> bool {
        self.status.as_deref() == Some("official")
    }

    pub fn effective_priority(&self) -> u8 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    /// Distinct source types in declared order
    pub fn source_types(&self) -> Vec<SourceType> {
        let mut types = Vec::new();
        for s in &self.sources {
            if !types.contains(&s.kind) {
                types.push(s.kind);
            }
        }
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_type_tags_round_trip() {
        for t in SourceType::ALL {
            assert_eq!(t.tag().parse::<SourceType>().unwrap(), t);
        }
        assert!("fossil".parse::<SourceType>().is_err());
        assert_eq!(SourceType::GCommon.config_prefix(), "g_common");
    }

    #[test]
    fn unknown_quality_falls_back_to_experimental() {
        assert_eq!(Quality::parse_lenient("stable"), Quality::Stable);
        assert_eq!(Quality::parse_lenient("bleeding"), Quality::Experimental);
    }

    #[test]
    fn source_types_are_deduplicated_in_order() {
        let overlay = Overlay::new(
            "mixed",
            vec![
                Source { kind: SourceType::Git, url: "git://a".into() },
                Source { kind: SourceType::Svn, url: "https://b".into() },
                Source { kind: SourceType::Git, url: "https://c".into() },
            ],
        );
        assert_eq!(overlay.source_types(), vec![SourceType::Git, SourceType::Svn]);
        assert_eq!(overlay.effective_priority(), DEFAULT_PRIORITY);
    }
}
