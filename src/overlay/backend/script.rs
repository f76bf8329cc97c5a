use std::path::Path;

use super::runner::CommandSpec;
use super::{Backend, Invocation, command_for};
use crate::overlay::error::BackendError;
use crate::overlay::types::{Overlay, SourceType};

/// Generic helper-script backend: `<command> add|sync [opts] <url> <target>`.
pub struct GCommon;

impl GCommon {
    fn invoke(&self, inv: &Invocation, action: &str, opts: &[String], url: &str, target: &Path) -> Result<(), BackendError> {
        let spec = CommandSpec::new(command_for(inv.options(SourceType::GCommon), self.default_command()))
            .arg(action)
            .args(opts.iter().cloned())
            .arg(url)
            .path_arg(target);
        inv.run(SourceType::GCommon, spec)?;
        Ok(())
    }
}

impl Backend for GCommon {
    fn kind(&self) -> SourceType {
        SourceType::GCommon
    }

    fn default_command(&self) -> &'static str {
        "g-common"
    }

    fn add(&self, inv: &Invocation, _overlay: &Overlay, url: &str, target: &Path) -> Result<(), BackendError> {
        self.invoke(inv, "add", &inv.options(SourceType::GCommon).addopts, url, target)
    }

    fn sync(&self, inv: &Invocation, _overlay: &Overlay, url: &str, target: &Path) -> Result<(), BackendError> {
        self.invoke(inv, "sync", &inv.options(SourceType::GCommon).syncopts, url, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::backend::runner::testing::RecordingRunner;
    use crate::overlay::config::Config;
    use tempfile::tempdir;

    #[test]
    fn passes_action_url_and_target() {
        let dir = tempdir().unwrap();
        let mut config = Config::with_storage(dir.path());
        config.backends.get_mut(&SourceType::GCommon).unwrap().command = Some("/usr/bin/g-sorcery".into());
        let runner = RecordingRunner::default();
        let inv = Invocation::new(&runner, &config);
        let target = dir.path().join("gs");
        let overlay = Overlay::new("gs", Vec::new());

        GCommon.add(&inv, &overlay, "gs-pypi", &target).unwrap();
        GCommon.sync(&inv, &overlay, "gs-pypi", &target).unwrap();
        assert_eq!(
            runner.lines(),
            vec![
                format!("/usr/bin/g-sorcery add gs-pypi {}", target.display()),
                format!("/usr/bin/g-sorcery sync gs-pypi {}", target.display()),
            ]
        );
    }
}
