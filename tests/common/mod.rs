use anyhow::Result;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Helper script standing in for a real g-common tool. Syncing any URL that
/// contains "broken" fails.
const FAKE_TOOL: &str = r#"#!/bin/sh
action="$1"
url="$2"
target="$3"
case "$url" in
  *broken*)
    if [ "$action" = sync ]; then
      echo "cannot reach $url"
      exit 1
    fi
    ;;
esac
mkdir -p "$target" && echo "$action $url" >> "$target/.log"
"#;

/// A self-contained storage root, catalog and configuration file.
pub struct TestEnvironment {
    temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        let env = Self {
            temp_dir: tempfile::tempdir()?,
        };
        let tool = env.path().join("g-common");
        fs::write(&tool, FAKE_TOOL)?;
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755))?;

        let config = format!(
            "storage = \"{root}/storage\"\n\
             make_conf = \"{root}/make.conf\"\n\
             overlays = [\"file://{root}/repositories.xml\"]\n\
             g_common_command = \"{tool}\"\n",
            root = env.path().display(),
            tool = tool.display(),
        );
        fs::write(env.config_path(), config)?;
        Ok(env)
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join("overlayman.toml")
    }

    pub fn storage(&self) -> PathBuf {
        self.path().join("storage")
    }

    pub fn make_conf(&self) -> PathBuf {
        self.path().join("make.conf")
    }

    /// Write the catalog with one g-common entry per `(name, url)` pair.
    pub fn write_catalog(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<repositories version=\"1.0\">\n");
        for (name, url) in entries {
            xml.push_str(&format!(
                "  <repo quality=\"experimental\" status=\"unofficial\">\n\
                 \x20   <name>{name}</name>\n\
                 \x20   <description>{name} test overlay</description>\n\
                 \x20   <owner type=\"person\"><email>{name}@example.org</email></owner>\n\
                 \x20   <source type=\"g-common\">{url}</source>\n\
                 \x20 </repo>\n"
            ));
        }
        xml.push_str("</repositories>\n");
        fs::write(self.path().join("repositories.xml"), xml)?;
        Ok(())
    }
}
