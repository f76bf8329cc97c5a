use std::path::Path;

use super::runner::CommandSpec;
use super::{Backend, Invocation, command_for};
use crate::overlay::error::BackendError;
use crate::overlay::types::{Overlay, SourceType};

pub struct Git;

/// `http://` remotes get a trailing slash; other protocols are left alone.
fn normalize_source(url: &str) -> String {
    if url.starts_with("http://") && !url.ends_with('/') {
        format!("{url}/")
    } else {
        url.to_string()
    }
}

impl Backend for Git {
    fn kind(&self) -> SourceType {
        SourceType::Git
    }

    fn default_command(&self) -> &'static str {
        "git"
    }

    fn add(&self, inv: &Invocation, overlay: &Overlay, url: &str, target: &Path) -> Result<(), BackendError> {
        let options = inv.options(SourceType::Git);
        let git = command_for(options, self.default_command());

        let mut spec = CommandSpec::new(&git).arg("clone");
        if inv.quiet() {
            spec = spec.arg("-q");
        }
        spec = spec.args(options.addopts.iter().cloned());
        if let Some(branch) = &overlay.branch {
            spec = spec.args(["-b", branch.as_str()]);
        }
        spec = spec.arg(normalize_source(url)).path_arg(target);
        if let Some(parent) = target.parent() {
            spec = spec.current_dir(parent);
        }
        inv.run(SourceType::Git, spec)?;

        let identity = [
            ("user.name", inv.config.git_user.as_deref()),
            ("user.email", inv.config.git_email.as_deref()),
        ];
        for (key, value) in identity {
            if let Some(value) = value {
                inv.run(
                    SourceType::Git,
                    CommandSpec::new(&git)
                        .args(["config", key, value])
                        .current_dir(target),
                )?;
            }
        }
        Ok(())
    }

    fn sync(&self, inv: &Invocation, _overlay: &Overlay, _url: &str, target: &Path) -> Result<(), BackendError> {
        let options = inv.options(SourceType::Git);
        let mut spec = CommandSpec::new(command_for(options, self.default_command())).arg("pull");
        if inv.quiet() {
            spec = spec.arg("-q");
        }
        spec = spec.args(options.syncopts.iter().cloned()).current_dir(target);
        inv.run(SourceType::Git, spec)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::backend::runner::testing::RecordingRunner;
    use crate::overlay::config::Config;
    use crate::overlay::types::Source;
    use tempfile::tempdir;

    fn overlay(branch: Option<&str>) -> Overlay {
        let mut o = Overlay::new(
            "foo",
            vec![Source {
                kind: SourceType::Git,
                url: "http://example.org/foo.git".into(),
            }],
        );
        o.branch = branch.map(String::from);
        o
    }

    #[test]
    fn clone_uses_branch_quiet_flag_and_addopts() {
        let dir = tempdir().unwrap();
        let mut config = Config::with_storage(dir.path());
        config.quiet = true;
        config.backends.get_mut(&SourceType::Git).unwrap().addopts = vec!["--depth=1".into()];
        let runner = RecordingRunner::default();
        let inv = Invocation::new(&runner, &config);
        let target = dir.path().join("foo");

        Git.add(&inv, &overlay(Some("stable")), "http://example.org/foo.git", &target)
            .unwrap();

        assert_eq!(
            runner.lines(),
            vec![format!(
                "git clone -q --depth=1 -b stable http://example.org/foo.git/ {}",
                target.display()
            )]
        );
        assert_eq!(runner.calls.borrow()[0].dir.as_deref(), Some(dir.path()));
    }

    #[test]
    fn configured_identity_is_written_to_new_clone() {
        let dir = tempdir().unwrap();
        let mut config = Config::with_storage(dir.path());
        config.git_user = Some("overlayman".into());
        config.git_email = Some("overlayman@localhost".into());
        let runner = RecordingRunner::default();
        let inv = Invocation::new(&runner, &config);

        Git.add(&inv, &overlay(None), "https://example.org/foo.git", &dir.path().join("foo"))
            .unwrap();

        let lines = runner.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("https://example.org/foo.git "));
        assert_eq!(lines[1], "git config user.name overlayman");
        assert_eq!(lines[2], "git config user.email overlayman@localhost");
    }

    #[test]
    fn sync_pulls_inside_working_copy() {
        let dir = tempdir().unwrap();
        let mut config = Config::with_storage(dir.path());
        config.backends.get_mut(&SourceType::Git).unwrap().syncopts = vec!["--rebase".into()];
        let runner = RecordingRunner::default();
        let inv = Invocation::new(&runner, &config);
        let target = dir.path().join("foo");

        Git.sync(&inv, &overlay(None), "http://example.org/foo.git", &target)
            .unwrap();
        assert_eq!(runner.lines(), vec!["git pull --rebase"]);
        assert_eq!(runner.calls.borrow()[0].dir.as_deref(), Some(target.as_path()));
    }

    #[test]
    fn only_plain_http_gets_trailing_slash() {
        assert_eq!(normalize_source("http://a/b"), "http://a/b/");
        assert_eq!(normalize_source("http://a/b/"), "http://a/b/");
        assert_eq!(normalize_source("https://a/b"), "https://a/b");
        assert_eq!(normalize_source("git://a/b"), "git://a/b");
    }
}
