use std::path::Path;

use super::runner::CommandSpec;
use super::{Backend, Invocation, command_for};
use crate::overlay::error::BackendError;
use crate::overlay::types::{Overlay, SourceType};

pub struct Svn;

impl Svn {
    fn base(&self, inv: &Invocation, verb: &str) -> CommandSpec {
        let mut spec = CommandSpec::new(command_for(inv.options(SourceType::Svn), self.default_command()))
            .arg(verb)
            .arg("--non-interactive");
        if inv.quiet() {
            spec = spec.arg("-q");
        }
        spec
    }
}

impl Backend for Svn {
    fn kind(&self) -> SourceType {
        SourceType::Svn
    }

    fn default_command(&self) -> &'static str {
        "svn"
    }

    fn add(&self, inv: &Invocation, _overlay: &Overlay, url: &str, target: &Path) -> Result<(), BackendError> {
        let spec = self
            .base(inv, "checkout")
            .args(inv.options(SourceType::Svn).addopts.iter().cloned())
            .arg(url)
            .path_arg(target);
        inv.run(SourceType::Svn, spec)?;
        Ok(())
    }

    fn sync(&self, inv: &Invocation, _overlay: &Overlay, _url: &str, target: &Path) -> Result<(), BackendError> {
        let spec = self
            .base(inv, "update")
            .args(inv.options(SourceType::Svn).syncopts.iter().cloned())
            .path_arg(target);
        inv.run(SourceType::Svn, spec)?;
        Ok(())
    }

    /// Release working-copy locks left by an interrupted checkout or update.
    fn cleanup(&self, inv: &Invocation, target: &Path) -> Result<(), BackendError> {
        if !target.join(".svn").is_dir() {
            return Ok(());
        }
        let spec = CommandSpec::new(command_for(inv.options(SourceType::Svn), self.default_command()))
            .arg("cleanup")
            .path_arg(target);
        inv.run(SourceType::Svn, spec)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::backend::runner::testing::RecordingRunner;
    use crate::overlay::config::Config;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn checkout_update_and_cleanup_command_lines() {
        let dir = tempdir().unwrap();
        let config = Config::with_storage(dir.path());
        let runner = RecordingRunner::default();
        let inv = Invocation::new(&runner, &config);
        let target = dir.path().join("wrobel");
        let overlay = Overlay::new("wrobel", Vec::new());

        Svn.add(&inv, &overlay, "https://svn.example.org/wrobel", &target)
            .unwrap();
        Svn.sync(&inv, &overlay, "https://svn.example.org/wrobel", &target)
            .unwrap();
        Svn.cleanup(&inv, &target).unwrap();

        fs::create_dir_all(target.join(".svn")).unwrap();
        Svn.cleanup(&inv, &target).unwrap();

        let t = target.display();
        assert_eq!(
            runner.lines(),
            vec![
                format!("svn checkout --non-interactive https://svn.example.org/wrobel {t}"),
                format!("svn update --non-interactive {t}"),
                format!("svn cleanup {t}"),
            ]
        );
    }
}
